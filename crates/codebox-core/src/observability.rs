//! Observability: tracing init and the JSONL build event log.
//!
//! Uses config::ObservabilityConfig for CODEBOX_QUIET, CODEBOX_LOG_LEVEL,
//! CODEBOX_LOG_JSON and CODEBOX_BUILD_LOG.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Value};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Initialize tracing. Call at process startup.
///
/// `RUST_LOG` takes precedence; otherwise CODEBOX_LOG_LEVEL (or warn when
/// CODEBOX_QUIET=1). Output goes to stderr so stdout stays parseable.
pub fn init_tracing() {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let level = cfg.filter_directive();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .try_init()
    };
}

/// Append-only JSONL sink for build events, keyed by a per-build id.
///
/// A log without a path is a no-op, so callers never branch on whether
/// CODEBOX_BUILD_LOG is set.
#[derive(Debug, Clone)]
pub struct BuildEventLog {
    build_id: String,
    path: Option<PathBuf>,
}

impl BuildEventLog {
    /// Log to the file named by CODEBOX_BUILD_LOG, if any.
    pub fn from_env() -> Self {
        let path = crate::config::ObservabilityConfig::from_env()
            .build_log
            .clone()
            .map(PathBuf::from);
        Self::new(path)
    }

    pub fn new(path: Option<PathBuf>) -> Self {
        if let Some(parent) = path.as_deref().and_then(Path::parent) {
            let _ = std::fs::create_dir_all(parent);
        }
        Self {
            build_id: uuid::Uuid::new_v4().to_string(),
            path,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Build started for `image` from `base`.
    pub fn build_started(&self, image: &str, base: &str, steps: usize) {
        self.emit(
            "build_started",
            json!({ "image": image, "base": base, "steps": steps }),
        );
    }

    /// One transaction-log step committed.
    pub fn step_completed(&self, index: usize, step: &str, detail: &str) {
        self.emit(
            "step_completed",
            json!({ "index": index, "step": step, "detail": detail }),
        );
    }

    /// A step failed; the build is aborted.
    pub fn step_failed(&self, index: usize, step: &str, kind: &str, error: &str) {
        tracing::warn!(
            build_id = %self.build_id,
            index,
            step = %step,
            kind = %kind,
            "Build aborted: {}",
            error
        );
        self.emit(
            "step_failed",
            json!({ "index": index, "step": step, "kind": kind, "error": error }),
        );
    }

    /// All steps committed.
    pub fn build_completed(&self, fingerprint: &str) {
        self.emit("build_completed", json!({ "fingerprint": fingerprint }));
    }

    fn emit(&self, event: &str, details: Value) {
        let Some(ref path) = self.path else {
            return;
        };
        let record = json!({
            "ts": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "event": event,
            "build_id": self.build_id,
            "details": details,
        });
        append_jsonl(path, &record);
    }
}

fn append_jsonl(path: &Path, record: &Value) {
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = writeln!(f, "{}", line);
        }
    }
}
