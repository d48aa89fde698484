//! Recipe validation.
//!
//! Runs before any step executes. All issues are collected so one pass over a
//! broken recipe reports everything wrong with it. Container paths come back
//! normalized.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::Recipe;
use crate::path_validation::{is_within, normalize_container_path};

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeIssue {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for RecipeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("failed to read recipe {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse recipe {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid recipe: {}", join_issues(.0))]
    Invalid(Vec<RecipeIssue>),
}

impl RecipeError {
    pub fn issues(&self) -> &[RecipeIssue] {
        match self {
            RecipeError::Invalid(issues) => issues,
            _ => &[],
        }
    }
}

fn join_issues(issues: &[RecipeIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn image_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?$")
            .expect("static regex")
    })
}

fn base_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*$")
            .expect("static regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("static regex"))
}

/// Debian package names.
fn package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9+.-]+$").expect("static regex"))
}

/// useradd's default NAME_REGEX.
fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("static regex"))
}

/// Normalized container path: no whitespace, quoting or shell syntax, since
/// paths are written verbatim into `RUN` and `WORKDIR` lines.
fn container_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/[A-Za-z0-9._+@/-]*$").expect("static regex"))
}

fn relative_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._+@-]+(?:/[A-Za-z0-9._+@-]+)*$").expect("static regex")
    })
}

fn toolchain_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9+._-]{0,63}$").expect("static regex"))
}

/// Host, optional port, path. No query string, no userinfo.
fn download_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https://[A-Za-z0-9.-]+(?::[0-9]{1,5})?(?:/[A-Za-z0-9._~%+-]*)+$")
            .expect("static regex")
    })
}

fn sha256_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{64}$").expect("static regex"))
}

#[derive(Default)]
struct Issues(Vec<RecipeIssue>);

impl Issues {
    fn push(&mut self, field: &str, reason: impl Into<String>) {
        self.0.push(RecipeIssue {
            field: field.to_string(),
            reason: reason.into(),
        });
    }

    /// Normalize `value` in place, recording an issue on failure.
    fn path(&mut self, field: &str, value: &mut String) -> bool {
        match normalize_container_path(value) {
            Ok(normalized) if !container_path_re().is_match(&normalized) => {
                self.push(
                    field,
                    format!("{:?} contains characters not allowed in a container path", normalized),
                );
                false
            }
            Ok(normalized) => {
                *value = normalized;
                true
            }
            Err(e) => {
                self.push(field, e.to_string());
                false
            }
        }
    }
}

impl Recipe {
    /// Validate every field and return the recipe with normalized paths.
    pub fn validate(mut self) -> Result<Self, RecipeError> {
        let mut issues = Issues::default();

        if !image_tag_re().is_match(&self.image) {
            issues.push("image", format!("'{}' is not a valid image reference", self.image));
        }

        if !base_name_re().is_match(&self.base.name) {
            issues.push("base", format!("'{}' is not a valid image name", self.base.name));
        }
        if !tag_re().is_match(&self.base.version) {
            issues.push("base", format!("'{}' is not a valid tag", self.base.version));
        }

        let mut seen = std::collections::HashSet::new();
        for name in &self.packages {
            if !package_re().is_match(name) {
                issues.push("packages", format!("'{}' is not a valid package name", name));
            } else if !seen.insert(name.as_str()) {
                issues.push("packages", format!("'{}' is listed twice", name));
            }
        }

        self.validate_toolchain(&mut issues);

        if !username_re().is_match(&self.user.name) {
            issues.push("user.name", format!("'{}' is not a valid user name", self.user.name));
        } else if self.user.name == "root" {
            issues.push("user.name", "the execution identity must not be root");
        }
        if let Some(mut home) = self.user.home.take() {
            issues.path("user.home", &mut home);
            self.user.home = Some(home);
        }
        issues.path("user.shell", &mut self.user.shell);

        issues.path("workdir", &mut self.workdir);

        match self.command.first() {
            None => issues.push("command", "startup argv must not be empty"),
            Some(program) if program.trim().is_empty() => {
                issues.push("command", "argv[0] must not be blank")
            }
            Some(_) => {}
        }
        if self.command.iter().any(|a| a.contains('\0')) {
            issues.push("command", "arguments must not contain NUL");
        }

        if issues.0.is_empty() {
            Ok(self)
        } else {
            Err(RecipeError::Invalid(issues.0))
        }
    }

    fn validate_toolchain(&mut self, issues: &mut Issues) {
        let tc = &mut self.toolchain;
        if !toolchain_name_re().is_match(&tc.name) {
            issues.push("toolchain.name", format!("{:?} is not a valid toolchain name", tc.name));
        }
        if !tag_re().is_match(&tc.version) {
            issues.push("toolchain.version", format!("'{}' is not a valid version", tc.version));
        }

        if !tc.url.starts_with("https://") {
            issues.push("toolchain.url", "toolchain must be downloaded over https");
        } else if !download_url_re().is_match(&tc.url) {
            issues.push("toolchain.url", "url contains characters not allowed in a download URL");
        }
        if !tc.version.is_empty() && !tc.url.contains(&tc.version) {
            issues.push(
                "toolchain.url",
                format!("url does not embed version '{}'", tc.version),
            );
        }
        let archive = tc.archive_file_name();
        if archive.is_empty() || archive.contains(':') {
            issues.push("toolchain.url", "url has no archive file name");
        } else if !(archive.ends_with(".tar.gz") || archive.ends_with(".tgz")) {
            issues.push("toolchain.url", format!("'{}' is not a .tar.gz archive", archive));
        }

        let root_ok = issues.path("toolchain.install_root", &mut tc.install_root);
        let path_ok = issues.path("toolchain.install_path", &mut tc.install_path);
        if root_ok && path_ok
            && (tc.install_path == tc.install_root || !is_within(&tc.install_path, &tc.install_root))
        {
            issues.push(
                "toolchain.install_path",
                format!("must lie beneath install_root {}", tc.install_root),
            );
        }

        let bin = tc.bin_dir.trim_matches('/').to_string();
        if !relative_dir_re().is_match(&bin) || bin.split('/').any(|s| s == "..") {
            issues.push("toolchain.bin_dir", "must be a relative directory inside install_path");
        } else {
            tc.bin_dir = bin;
        }

        if let Some(ref digest) = tc.sha256 {
            if !sha256_re().is_match(digest) {
                issues.push("toolchain.sha256", "must be 64 lowercase hex characters");
            }
        }
    }
}
