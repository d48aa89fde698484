//! Provisioning steps.
//!
//! Each step is a function from a snapshot and its own parameters to the next
//! snapshot, or a failure. Preconditions that the ordering policy relies on are
//! checked here again at execution time, so a plan that slipped past the static
//! check still cannot put the image into an inconsistent state.

use codebox_core::path_validation::{normalize_container_path, parent};
use codebox_core::recipe::BaseImageRef;
use serde::{Deserialize, Serialize};

use crate::base;
use crate::error::ProvisionError;
use crate::extract::extract_tar_gz;
use crate::fetch::{verify_sha256, Fetcher};
use crate::packages::{install_packages, PackageCatalog};
use crate::snapshot::Snapshot;
use crate::users::create_user;

/// Collaborators a step may call out to.
pub struct StepContext<'a> {
    pub catalog: &'a dyn PackageCatalog,
    pub fetcher: &'a dyn Fetcher,
}

/// One entry of the provisioning transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    SelectBase {
        base: BaseImageRef,
    },
    InstallPackages {
        packages: Vec<String>,
    },
    FetchArchive {
        url: String,
        dest: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha256: Option<String>,
    },
    ExtractArchive {
        archive: String,
        destination: String,
        /// Directory the archive must produce.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expect: Option<String>,
    },
    RemoveArchive {
        path: String,
    },
    AppendPath {
        dir: String,
    },
    CreateUser {
        name: String,
        home: String,
        shell: String,
    },
    SetIdentity {
        user: String,
    },
    SetWorkdir {
        path: String,
    },
    SetCommand {
        argv: Vec<String>,
    },
}

impl Step {
    /// Stable kebab-case name, as serialized in `op`.
    pub fn name(&self) -> &'static str {
        match self {
            Step::SelectBase { .. } => "select-base",
            Step::InstallPackages { .. } => "install-packages",
            Step::FetchArchive { .. } => "fetch-archive",
            Step::ExtractArchive { .. } => "extract-archive",
            Step::RemoveArchive { .. } => "remove-archive",
            Step::AppendPath { .. } => "append-path",
            Step::CreateUser { .. } => "create-user",
            Step::SetIdentity { .. } => "set-identity",
            Step::SetWorkdir { .. } => "set-workdir",
            Step::SetCommand { .. } => "set-command",
        }
    }

    /// Steps that must run as root, before the identity switch. The switch
    /// itself is one of them, which makes it irreversible.
    pub fn requires_privilege(&self) -> bool {
        matches!(
            self,
            Step::InstallPackages { .. }
                | Step::FetchArchive { .. }
                | Step::ExtractArchive { .. }
                | Step::RemoveArchive { .. }
                | Step::CreateUser { .. }
                | Step::SetIdentity { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            Step::SelectBase { base } => format!("select base image {}", base),
            Step::InstallPackages { packages } => format!("install packages {}", packages.join(" ")),
            Step::FetchArchive { url, dest, sha256 } => match sha256 {
                Some(digest) => format!("fetch {} to {} (sha256 {})", url, dest, digest),
                None => format!("fetch {} to {}", url, dest),
            },
            Step::ExtractArchive {
                archive,
                destination,
                ..
            } => format!("extract {} into {}", archive, destination),
            Step::RemoveArchive { path } => format!("remove {}", path),
            Step::AppendPath { dir } => format!("append {} to PATH", dir),
            Step::CreateUser { name, home, shell } => {
                format!("create user {} (home {}, shell {})", name, home, shell)
            }
            Step::SetIdentity { user } => format!("switch identity to {}", user),
            Step::SetWorkdir { path } => format!("set working directory {}", path),
            Step::SetCommand { argv } => format!("set startup command {:?}", argv),
        }
    }

    /// Apply the step. Returns the next snapshot and a short detail line.
    pub fn apply(
        &self,
        mut snapshot: Snapshot,
        ctx: &StepContext<'_>,
    ) -> Result<(Snapshot, String), ProvisionError> {
        if self.requires_privilege() && !snapshot.is_privileged() {
            return Err(ProvisionError::PrivilegeRequired {
                step: self.name().to_string(),
                user: snapshot.identity().to_string(),
            });
        }

        let detail = match self {
            Step::SelectBase { base } => {
                snapshot = base::seed(base)?;
                format!("{} files", snapshot.paths().count())
            }
            Step::InstallPackages { packages } => {
                let installed = install_packages(&mut snapshot, ctx.catalog, packages)?;
                format!("{} newly installed", installed.len())
            }
            Step::FetchArchive { url, dest, sha256 } => {
                let dest = normalize(dest)?;
                let dir = parent(&dest).unwrap_or("/");
                if !snapshot.is_dir(dir) {
                    return Err(ProvisionError::Download {
                        url: url.clone(),
                        reason: format!("{}: No such file or directory", dir),
                    });
                }
                let bytes = ctx.fetcher.fetch(url)?;
                if let Some(expected) = sha256 {
                    verify_sha256(url, &bytes, expected)?;
                }
                let size = bytes.len();
                let user = snapshot.active_user().clone();
                snapshot.stage_file(&dest, bytes, user.uid, user.gid)?;
                format!("{} bytes", size)
            }
            Step::ExtractArchive {
                archive,
                destination,
                expect,
            } => {
                let archive = normalize(archive)?;
                let destination = normalize(destination)?;
                let bytes = snapshot.take_staged(&archive).ok_or_else(|| {
                    ProvisionError::Extraction {
                        destination: destination.clone(),
                        reason: format!("{}: Cannot open: No such file or directory", archive),
                    }
                })?;
                let user = snapshot.active_user().clone();
                let extracted = extract_tar_gz(&mut snapshot, &bytes, &destination, user.uid, user.gid);
                snapshot.restore_staged(&archive, bytes);
                let summary = extracted?;
                if let Some(expect) = expect {
                    if !snapshot.is_dir(expect) {
                        return Err(ProvisionError::Extraction {
                            destination,
                            reason: format!("archive did not produce {}", expect),
                        });
                    }
                }
                format!(
                    "{} files, {} dirs, {} symlinks",
                    summary.files, summary.dirs, summary.symlinks
                )
            }
            Step::RemoveArchive { path } => {
                let removed = snapshot.remove(path)?;
                format!("{} entries removed", removed)
            }
            Step::AppendPath { dir } => {
                let dir = normalize(dir)?;
                if !snapshot.is_dir(&dir) {
                    return Err(ProvisionError::path(
                        dir,
                        "cannot append to PATH: no such directory",
                    ));
                }
                let path = match snapshot.env("PATH") {
                    Some(current) if !current.is_empty() => format!("{}:{}", current, dir),
                    _ => dir,
                };
                snapshot.set_env("PATH", path.clone());
                format!("PATH={}", path)
            }
            Step::CreateUser { name, home, shell } => {
                let home = normalize(home)?;
                let entry = create_user(&mut snapshot, name, &home, shell)?;
                format!("uid {}", entry.uid)
            }
            Step::SetIdentity { user } => {
                let uid = snapshot
                    .user(user)
                    .map(|u| u.uid)
                    .ok_or_else(|| ProvisionError::UserCreation {
                        name: user.clone(),
                        reason: "no such user".to_string(),
                    })?;
                if uid == crate::snapshot::ROOT_UID {
                    return Err(ProvisionError::PrivilegedIdentity { user: user.clone() });
                }
                snapshot.set_identity(user);
                format!("uid {}", uid)
            }
            Step::SetWorkdir { path } => {
                let path = normalize(path)?;
                snapshot.set_workdir(path.clone());
                path
            }
            Step::SetCommand { argv } => {
                snapshot.set_command(argv.clone());
                format!("{:?}", argv)
            }
        };
        Ok((snapshot, detail))
    }
}

fn normalize(path: &str) -> Result<String, ProvisionError> {
    normalize_container_path(path).map_err(|e| ProvisionError::path(path, e.reason()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::go_archive;
    use crate::fetch::{sha256_hex, MemoryFetcher};
    use crate::packages::AptCatalog;

    const URL: &str = "https://golang.org/dl/go1.18.10.linux-amd64.tar.gz";

    fn run(steps: &[Step], fetcher: &MemoryFetcher) -> Result<Snapshot, ProvisionError> {
        let catalog = AptCatalog::focal();
        let ctx = StepContext {
            catalog: &catalog,
            fetcher,
        };
        let mut snap = Snapshot::empty();
        for step in steps {
            snap = step.apply(snap, &ctx)?.0;
        }
        Ok(snap)
    }

    fn select_focal() -> Step {
        Step::SelectBase {
            base: BaseImageRef::new("ubuntu", "20.04"),
        }
    }

    fn fetch(sha256: Option<String>) -> Step {
        Step::FetchArchive {
            url: URL.to_string(),
            dest: "/go.tgz".to_string(),
            sha256,
        }
    }

    fn extract() -> Step {
        Step::ExtractArchive {
            archive: "/go.tgz".to_string(),
            destination: "/usr/local".to_string(),
            expect: Some("/usr/local/go".to_string()),
        }
    }

    #[test]
    fn test_serde_shape() {
        let step = Step::AppendPath {
            dir: "/usr/local/go/bin".to_string(),
        };
        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(json, r#"{"op":"append-path","dir":"/usr/local/go/bin"}"#);
        let back: Step = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
        assert_eq!(step.name(), "append-path");
    }

    #[test]
    fn test_fetch_extract_remove() {
        let archive = go_archive();
        let digest = sha256_hex(&archive);
        let fetcher = MemoryFetcher::new().with(URL, archive);
        let snap = run(
            &[
                select_focal(),
                fetch(Some(digest)),
                extract(),
                Step::RemoveArchive {
                    path: "/go.tgz".to_string(),
                },
            ],
            &fetcher,
        )
        .unwrap();

        assert!(snap.is_dir("/usr/local/go/bin"));
        assert!(!snap.exists("/go.tgz"));
        assert!(snap.clone().take_staged("/go.tgz").is_none());
    }

    #[test]
    fn test_digest_mismatch_is_download_failure() {
        let fetcher = MemoryFetcher::new().with(URL, go_archive());
        let err = run(&[select_focal(), fetch(Some("0".repeat(64)))], &fetcher).unwrap_err();
        assert!(matches!(err, ProvisionError::Download { .. }));
    }

    #[test]
    fn test_archive_stays_staged_until_removed() {
        let fetcher = MemoryFetcher::new().with(URL, go_archive());
        let mut snap = run(&[select_focal(), fetch(None), extract(), extract()], &fetcher).unwrap();
        assert_eq!(snap.take_staged("/go.tgz").map(|b| b.len()), Some(go_archive().len()));
    }

    #[test]
    fn test_extract_without_fetch() {
        let err = run(&[select_focal(), extract()], &MemoryFetcher::new()).unwrap_err();
        assert!(matches!(err, ProvisionError::Extraction { .. }));
    }

    #[test]
    fn test_expected_dir_missing() {
        let fetcher = MemoryFetcher::new().with(URL, go_archive());
        let wrong = Step::ExtractArchive {
            archive: "/go.tgz".to_string(),
            destination: "/usr/local".to_string(),
            expect: Some("/usr/local/golang".to_string()),
        };
        let err = run(&[select_focal(), fetch(None), wrong], &fetcher).unwrap_err();
        assert!(err.to_string().contains("archive did not produce /usr/local/golang"));
    }

    #[test]
    fn test_append_path_requires_directory() {
        let err = run(
            &[
                select_focal(),
                Step::AppendPath {
                    dir: "/usr/local/go/bin".to_string(),
                },
            ],
            &MemoryFetcher::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::Path { .. }));
    }

    #[test]
    fn test_identity_switch_is_irreversible() {
        let create = Step::CreateUser {
            name: "runner".to_string(),
            home: "/home/runner".to_string(),
            shell: "/bin/bash".to_string(),
        };
        let switch = Step::SetIdentity {
            user: "runner".to_string(),
        };
        let snap = run(&[select_focal(), create.clone(), switch.clone()], &MemoryFetcher::new()).unwrap();
        assert_eq!(snap.identity(), "runner");
        assert!(!snap.is_privileged());

        let err = run(
            &[select_focal(), create, switch, Step::InstallPackages { packages: vec!["git".to_string()] }],
            &MemoryFetcher::new(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "step 'install-packages' requires root but the active identity is 'runner'"
        );
    }

    #[test]
    fn test_switch_to_unknown_or_root() {
        let err = run(
            &[select_focal(), Step::SetIdentity { user: "ghost".to_string() }],
            &MemoryFetcher::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::UserCreation { .. }));

        let err = run(
            &[select_focal(), Step::SetIdentity { user: "root".to_string() }],
            &MemoryFetcher::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ProvisionError::PrivilegedIdentity { .. }));
    }
}
