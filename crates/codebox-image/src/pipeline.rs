//! Provisioning pipeline.
//!
//! Straight-line execution: validate, check ordering, apply each step to the
//! snapshot in turn, stop at the first failure. There is no rollback and no
//! resume; a failed build yields no image, only the record of what completed.

use codebox_core::observability::BuildEventLog;
use codebox_core::recipe::Recipe;
use serde::Serialize;
use thiserror::Error;

use crate::base::ensure_supported;
use crate::error::{ErrorKind, ProvisionError};
use crate::fetch::Fetcher;
use crate::packages::{AptCatalog, PackageCatalog};
use crate::plan::Plan;
use crate::snapshot::Snapshot;
use crate::step::{Step, StepContext};

/// One completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// 1-based position in the plan.
    pub index: usize,
    pub op: String,
    pub description: String,
    pub detail: String,
}

/// A finished image.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub image: String,
    pub snapshot: Snapshot,
    pub records: Vec<StepRecord>,
    pub fingerprint: String,
}

/// A build that stopped early.
#[derive(Debug, Error)]
#[error("{}", failure_headline(.failed_step, .failed_op))]
pub struct BuildFailure {
    #[source]
    pub error: ProvisionError,
    /// 1-based index of the failing step; `None` when the failure is not tied
    /// to a step (rejected recipe, post-build checks).
    pub failed_step: Option<usize>,
    pub failed_op: Option<String>,
    pub completed: Vec<StepRecord>,
}

fn failure_headline(step: &Option<usize>, op: &Option<String>) -> String {
    match (step, op) {
        (Some(index), Some(op)) => format!("build failed at step {} ({})", index, op),
        (Some(index), None) => format!("build failed at step {}", index),
        (None, Some(op)) => format!("build failed during {}", op),
        (None, None) => "build failed before any step ran".to_string(),
    }
}

impl BuildFailure {
    fn before_start(error: ProvisionError) -> Self {
        Self {
            error,
            failed_step: None,
            failed_op: None,
            completed: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Runs plans against a fetcher and a package catalog.
pub struct Pipeline {
    fetcher: Box<dyn Fetcher>,
    catalog: Option<Box<dyn PackageCatalog>>,
    log: BuildEventLog,
}

impl Pipeline {
    /// Catalog is picked from the plan's base image; events are not logged.
    pub fn new(fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            catalog: None,
            log: BuildEventLog::disabled(),
        }
    }

    pub fn with_catalog(mut self, catalog: Box<dyn PackageCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_event_log(mut self, log: BuildEventLog) -> Self {
        self.log = log;
        self
    }

    pub fn event_log(&self) -> &BuildEventLog {
        &self.log
    }

    /// Validate `recipe`, lower it to a plan and execute it.
    pub fn build(&self, recipe: Recipe) -> Result<BuildOutcome, BuildFailure> {
        let recipe = recipe
            .validate()
            .map_err(|e| BuildFailure::before_start(e.into()))?;
        ensure_supported(&recipe.base).map_err(BuildFailure::before_start)?;
        let plan = Plan::from_recipe(&recipe);
        self.execute(&recipe.image, &plan)
    }

    /// Execute an explicit plan. The ordering policy is checked first.
    pub fn execute(&self, image: &str, plan: &Plan) -> Result<BuildOutcome, BuildFailure> {
        let base = plan.base().map(ToString::to_string).unwrap_or_default();
        self.log.build_started(image, &base, plan.len());
        tracing::info!(image = %image, base = %base, steps = plan.len(), build_id = %self.log.build_id(), "Build started");

        if let Err(error) = plan.check_ordering() {
            let (index, op) = match &error {
                ProvisionError::OrderingViolation { index, step, .. } => (*index, step.clone()),
                _ => (0, String::new()),
            };
            self.log
                .step_failed(index, &op, error.kind().as_str(), &error.to_string());
            return Err(BuildFailure {
                error,
                failed_step: Some(index),
                failed_op: Some(op),
                completed: Vec::new(),
            });
        }

        let fallback;
        let catalog: &dyn PackageCatalog = match self.catalog {
            Some(ref catalog) => catalog.as_ref(),
            None => {
                fallback = plan
                    .base()
                    .and_then(AptCatalog::for_base)
                    .unwrap_or_else(|| AptCatalog::new("none"));
                &fallback
            }
        };
        let ctx = StepContext {
            catalog,
            fetcher: self.fetcher.as_ref(),
        };

        let total = plan.len();
        let mut snapshot = Snapshot::empty();
        let mut records = Vec::with_capacity(total);
        for (i, step) in plan.steps().iter().enumerate() {
            let index = i + 1;
            tracing::info!("Step {}/{} : {}", index, total, step.describe());
            match step.apply(snapshot, &ctx) {
                Ok((next, detail)) => {
                    tracing::debug!(step = step.name(), detail = %detail, "Step completed");
                    self.log.step_completed(index, step.name(), &detail);
                    records.push(record(index, step, detail));
                    snapshot = next;
                }
                Err(error) => {
                    self.log
                        .step_failed(index, step.name(), error.kind().as_str(), &error.to_string());
                    return Err(BuildFailure {
                        error,
                        failed_step: Some(index),
                        failed_op: Some(step.name().to_string()),
                        completed: records,
                    });
                }
            }
        }

        // check_ordering demands a switch to a created user and set-identity
        // refuses root, so a completed plan never ends privileged.
        debug_assert!(!snapshot.is_privileged());

        let fingerprint = snapshot.fingerprint();
        self.log.build_completed(&fingerprint);
        tracing::info!(image = %image, fingerprint = %fingerprint, "Build completed");
        Ok(BuildOutcome {
            image: image.to_string(),
            snapshot,
            records,
            fingerprint,
        })
    }
}

fn record(index: usize, step: &Step, detail: String) -> StepRecord {
    StepRecord {
        index,
        op: step.name().to_string(),
        description: step.describe(),
        detail,
    }
}
