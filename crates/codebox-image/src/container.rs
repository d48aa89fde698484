//! Container start simulation.
//!
//! Checks what the runtime would check when instantiating the image: who the
//! process runs as, whether it can enter its working directory, and what
//! `argv[0]` resolves to on PATH.

use codebox_core::path_validation::join_container_path;
use serde::Serialize;

use crate::error::ProvisionError;
use crate::snapshot::Snapshot;

/// What starting the image would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub user: String,
    pub uid: u32,
    pub workdir: String,
    pub argv: Vec<String>,
    /// Absolute path `argv[0]` resolved to.
    pub resolved_program: String,
    pub path: Vec<String>,
}

/// Simulate `docker run <image>` against a final snapshot.
pub fn simulate_start(snapshot: &Snapshot) -> Result<StartupReport, ProvisionError> {
    let user = snapshot.active_user();
    if snapshot.is_privileged() {
        return Err(ProvisionError::PrivilegedIdentity {
            user: user.name.clone(),
        });
    }
    let (uid, gid) = (user.uid, user.gid);

    let workdir = snapshot.workdir().unwrap_or("/").to_string();
    if !snapshot.is_dir(&workdir) {
        return Err(ProvisionError::path(workdir, "working directory does not exist"));
    }
    let enterable = snapshot.can_traverse(uid, gid, &workdir)? && snapshot.can_read(uid, gid, &workdir)?;
    if !enterable {
        return Err(ProvisionError::path(
            workdir,
            format!("working directory is not accessible to '{}'", user.name),
        ));
    }

    let argv = snapshot.command().to_vec();
    let program = argv
        .first()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ProvisionError::path(workdir.as_str(), "no startup command configured"))?;
    let resolved_program = resolve_program(snapshot, uid, gid, &workdir, program)?;

    Ok(StartupReport {
        user: user.name.clone(),
        uid,
        workdir,
        resolved_program,
        argv,
        path: snapshot.path_entries().into_iter().map(String::from).collect(),
    })
}

/// `execvp` lookup: names with a `/` are taken relative to the working
/// directory, bare names are searched on PATH in order.
fn resolve_program(
    snapshot: &Snapshot,
    uid: u32,
    gid: u32,
    workdir: &str,
    program: &str,
) -> Result<String, ProvisionError> {
    if program.contains('/') {
        let candidate = join_container_path(workdir, program)
            .map_err(|e| ProvisionError::path(program, e.reason()))?;
        return if snapshot.is_executable_by(uid, gid, &candidate) {
            Ok(candidate)
        } else {
            Err(ProvisionError::path(candidate, "permission denied or not found"))
        };
    }

    snapshot
        .path_entries()
        .into_iter()
        .filter(|dir| dir.starts_with('/'))
        .map(|dir| format!("{}/{}", dir.trim_end_matches('/'), program))
        .find(|candidate| snapshot.is_executable_by(uid, gid, candidate))
        .ok_or_else(|| {
            ProvisionError::path(
                program,
                format!("executable file not found in $PATH ({})", snapshot.env("PATH").unwrap_or("")),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::create_user;
    use codebox_core::recipe::BaseImageRef;

    fn runner_image() -> Snapshot {
        let mut snap = crate::base::seed(&BaseImageRef::new("ubuntu", "20.04")).unwrap();
        snap.write_file("/usr/local/go/bin/go", b"go", 0, 0, 0o755).unwrap();
        snap.set_env("PATH", format!("{}:/usr/local/go/bin", snap.env("PATH").unwrap()));
        create_user(&mut snap, "runner", "/home/runner", "/bin/bash").unwrap();
        snap.set_identity("runner");
        snap.set_workdir("/home/runner".to_string());
        snap.set_command(vec!["go".to_string(), "run".to_string(), "main.go".to_string()]);
        snap
    }

    #[test]
    fn test_resolves_go_on_path() {
        let report = simulate_start(&runner_image()).unwrap();
        assert_eq!(report.user, "runner");
        assert_eq!(report.uid, 1000);
        assert_eq!(report.workdir, "/home/runner");
        assert_eq!(report.resolved_program, "/usr/local/go/bin/go");
        assert_eq!(report.path.last().map(String::as_str), Some("/usr/local/go/bin"));
    }

    #[test]
    fn test_root_refused() {
        let mut snap = runner_image();
        snap.set_identity("root");
        assert!(matches!(
            simulate_start(&snap),
            Err(ProvisionError::PrivilegedIdentity { .. })
        ));
    }

    #[test]
    fn test_inaccessible_workdir() {
        let mut snap = runner_image();
        snap.set_workdir("/root".to_string());
        let err = simulate_start(&snap).unwrap_err();
        assert_eq!(err.to_string(), "/root: working directory is not accessible to 'runner'");

        snap.set_workdir("/srv/app".to_string());
        assert!(simulate_start(&snap).unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_command_not_found() {
        let mut snap = runner_image();
        snap.set_command(vec!["python3".to_string()]);
        let err = simulate_start(&snap).unwrap_err();
        assert!(err.to_string().starts_with("python3: executable file not found in $PATH"));
    }

    #[test]
    fn test_relative_program() {
        let mut snap = runner_image();
        snap.write_file("/home/runner/run.sh", b"#!/bin/sh", 1000, 1000, 0o755).unwrap();
        snap.set_command(vec!["./run.sh".to_string()]);
        assert_eq!(simulate_start(&snap).unwrap().resolved_program, "/home/runner/run.sh");
    }
}
