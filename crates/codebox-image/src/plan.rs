//! Ordered provisioning plans.

use codebox_core::path_validation::is_within;
use codebox_core::recipe::{BaseImageRef, Recipe};
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;
use crate::step::Step;

/// Transaction log of steps, applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Lower a validated recipe into its ten-phase plan. The archive is
    /// downloaded into `/`, the working directory of a fresh image.
    pub fn from_recipe(recipe: &Recipe) -> Self {
        let tc = &recipe.toolchain;
        let archive = format!("/{}", tc.archive_file_name());
        let mut steps = vec![Step::SelectBase {
            base: recipe.base.clone(),
        }];
        if !recipe.packages.is_empty() {
            steps.push(Step::InstallPackages {
                packages: recipe.packages.clone(),
            });
        }
        steps.extend([
            Step::FetchArchive {
                url: tc.url.clone(),
                dest: archive.clone(),
                sha256: tc.sha256.clone(),
            },
            Step::ExtractArchive {
                archive: archive.clone(),
                destination: tc.install_root.clone(),
                expect: Some(tc.install_path.clone()),
            },
            Step::RemoveArchive { path: archive },
            Step::AppendPath { dir: tc.bin_path() },
            Step::CreateUser {
                name: recipe.user.name.clone(),
                home: recipe.user.home(),
                shell: recipe.user.shell.clone(),
            },
            Step::SetIdentity {
                user: recipe.user.name.clone(),
            },
            Step::SetWorkdir {
                path: recipe.workdir.clone(),
            },
            Step::SetCommand {
                argv: recipe.command.clone(),
            },
        ]);
        Self { steps }
    }

    /// Plan from an explicit step list. Nothing is checked until
    /// [`Plan::check_ordering`] or execution.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Base image named by the leading `select-base` step.
    pub fn base(&self) -> Option<&BaseImageRef> {
        match self.steps.first() {
            Some(Step::SelectBase { base }) => Some(base),
            _ => None,
        }
    }

    /// Static ordering policy. Step indices in errors are 1-based.
    ///
    /// - `select-base` comes first and only once.
    /// - Privileged steps precede the identity switch, which happens exactly
    ///   once and targets a user created earlier in the plan.
    /// - An archive is fetched before it is extracted, and not removed in between.
    /// - A PATH entry inside an extraction target follows that extraction.
    pub fn check_ordering(&self) -> Result<(), ProvisionError> {
        let violation = |i: usize, step: &Step, reason: String| ProvisionError::OrderingViolation {
            index: i + 1,
            step: step.name().to_string(),
            reason,
        };

        let mut switched: Option<usize> = None;
        let mut created: Vec<&str> = Vec::new();
        let mut fetched: Vec<&str> = Vec::new();

        for (i, step) in self.steps.iter().enumerate() {
            match step {
                Step::SelectBase { .. } if i > 0 => {
                    return Err(violation(i, step, "base image must be selected first".to_string()))
                }
                _ if i == 0 && !matches!(step, Step::SelectBase { .. }) => {
                    return Err(violation(i, step, "plan must start by selecting a base image".to_string()))
                }
                _ => {}
            }

            if let Some(at) = switched {
                if step.requires_privilege() {
                    let reason = match step {
                        Step::SetIdentity { .. } => {
                            format!("identity was already switched at step {}", at + 1)
                        }
                        _ => format!("privileged step after the identity switch at step {}", at + 1),
                    };
                    return Err(violation(i, step, reason));
                }
            }

            match step {
                Step::FetchArchive { dest, .. } => fetched.push(dest),
                Step::ExtractArchive { archive, .. } => {
                    if !fetched.contains(&archive.as_str()) {
                        return Err(violation(i, step, format!("{} has not been fetched", archive)));
                    }
                }
                Step::RemoveArchive { path } => fetched.retain(|p| p != path),
                Step::AppendPath { dir } => {
                    if let Some(j) = self.later_extraction_covering(i, dir) {
                        return Err(violation(
                            i,
                            step,
                            format!("{} is produced by the extraction at step {}", dir, j + 1),
                        ));
                    }
                }
                Step::CreateUser { name, .. } => created.push(name),
                Step::SetIdentity { user } => {
                    if !created.contains(&user.as_str()) {
                        return Err(violation(
                            i,
                            step,
                            format!("user '{}' is not created earlier in the plan", user),
                        ));
                    }
                    switched = Some(i);
                }
                _ => {}
            }
        }

        if switched.is_none() {
            return Err(ProvisionError::OrderingViolation {
                index: self.steps.len() + 1,
                step: "set-identity".to_string(),
                reason: "plan never switches to an unprivileged identity".to_string(),
            });
        }
        Ok(())
    }

    fn later_extraction_covering(&self, after: usize, dir: &str) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .skip(after + 1)
            .find_map(|(j, s)| match s {
                Step::ExtractArchive {
                    destination,
                    expect,
                    ..
                } => {
                    let root = expect.as_deref().unwrap_or(destination);
                    (root != "/" && is_within(dir, root)).then_some(j)
                }
                _ => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn go_plan() -> Plan {
        Plan::from_recipe(&Recipe::builtin_go().validate().unwrap())
    }

    fn violation_of(err: ProvisionError) -> (usize, String, String) {
        match err {
            ProvisionError::OrderingViolation { index, step, reason } => (index, step, reason),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_go_recipe_lowering() {
        let plan = go_plan();
        let names: Vec<&str> = plan.steps().iter().map(Step::name).collect();
        assert_eq!(
            names,
            vec![
                "select-base",
                "install-packages",
                "fetch-archive",
                "extract-archive",
                "remove-archive",
                "append-path",
                "create-user",
                "set-identity",
                "set-workdir",
                "set-command",
            ]
        );
        assert_eq!(
            plan.steps()[2],
            Step::FetchArchive {
                url: "https://golang.org/dl/go1.18.10.linux-amd64.tar.gz".to_string(),
                dest: "/go1.18.10.linux-amd64.tar.gz".to_string(),
                sha256: None,
            }
        );
        assert_eq!(
            plan.steps()[5],
            Step::AppendPath {
                dir: "/usr/local/go/bin".to_string()
            }
        );
        assert_eq!(plan.base().map(ToString::to_string).as_deref(), Some("ubuntu:20.04"));
        plan.check_ordering().unwrap();
    }

    #[test]
    fn test_path_before_extraction() {
        let mut steps = go_plan().steps().to_vec();
        let append = steps.remove(5);
        steps.insert(2, append);
        let (index, step, reason) = violation_of(Plan::from_steps(steps).check_ordering().unwrap_err());
        assert_eq!((index, step.as_str()), (3, "append-path"));
        assert!(reason.contains("produced by the extraction at step 5"));
    }

    #[test]
    fn test_privileged_after_switch() {
        let mut steps = go_plan().steps().to_vec();
        let install = steps.remove(1);
        steps.push(install);
        let (index, step, _) = violation_of(Plan::from_steps(steps).check_ordering().unwrap_err());
        assert_eq!((index, step.as_str()), (10, "install-packages"));
    }

    #[test]
    fn test_extract_after_remove() {
        let mut steps = go_plan().steps().to_vec();
        steps.swap(3, 4);
        let (_, step, reason) = violation_of(Plan::from_steps(steps).check_ordering().unwrap_err());
        assert_eq!(step, "extract-archive");
        assert!(reason.contains("has not been fetched"));
    }

    #[test]
    fn test_base_must_be_first() {
        let mut steps = go_plan().steps().to_vec();
        steps.swap(0, 1);
        let (index, _, _) = violation_of(Plan::from_steps(steps).check_ordering().unwrap_err());
        assert_eq!(index, 1);
    }

    #[test]
    fn test_missing_identity_switch() {
        let steps: Vec<Step> = go_plan()
            .steps()
            .iter()
            .filter(|s| !matches!(s, Step::SetIdentity { .. }))
            .cloned()
            .collect();
        let (index, step, _) = violation_of(Plan::from_steps(steps).check_ordering().unwrap_err());
        assert_eq!((index, step.as_str()), (10, "set-identity"));
    }

    #[test]
    fn test_switch_to_user_not_created() {
        let mut steps = go_plan().steps().to_vec();
        steps[7] = Step::SetIdentity {
            user: "nobody".to_string(),
        };
        let (_, _, reason) = violation_of(Plan::from_steps(steps).check_ordering().unwrap_err());
        assert!(reason.contains("'nobody' is not created"));
    }

    #[test]
    fn test_plan_json_is_step_list() {
        let json = serde_json::to_value(go_plan()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 10);
        assert_eq!(json[0]["op"], "select-base");
        assert_eq!(json[0]["base"], "ubuntu:20.04");
    }
}
