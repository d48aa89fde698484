//! User creation (`useradd -m -s <shell> [-d <home>] <name>`).

use std::collections::BTreeSet;

use codebox_core::path_validation::file_name;

use crate::error::ProvisionError;
use crate::snapshot::{NodeKind, Snapshot, UserEntry, ROOT_UID};

const USERADD: &str = "/usr/sbin/useradd";
const SKEL: &str = "/etc/skel";
const PASSWD: &str = "/etc/passwd";

/// `UID_MIN`..`UID_MAX` from Debian's login.defs.
pub const UID_MIN: u32 = 1000;
pub const UID_MAX: u32 = 60000;

fn user_error(name: &str, reason: impl Into<String>) -> ProvisionError {
    ProvisionError::UserCreation {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Create `name` with a user-private group, home directory populated from
/// `/etc/skel`, and `shell` as login shell. `/etc/passwd` is rewritten.
pub fn create_user(
    snapshot: &mut Snapshot,
    name: &str,
    home: &str,
    shell: &str,
) -> Result<UserEntry, ProvisionError> {
    if !snapshot.is_executable_by(ROOT_UID, ROOT_UID, USERADD) {
        return Err(user_error(name, format!("{}: command not found", USERADD)));
    }
    if snapshot.user(name).is_some() {
        return Err(user_error(name, format!("user '{}' already exists", name)));
    }
    let taken: BTreeSet<u32> = snapshot.users().flat_map(|u| [u.uid, u.gid]).collect();
    let uid = (UID_MIN..=UID_MAX)
        .find(|candidate| !taken.contains(candidate))
        .ok_or_else(|| user_error(name, "can't get unique UID (no more available UIDs)"))?;
    if !snapshot.is_executable_by(ROOT_UID, ROOT_UID, shell) {
        tracing::warn!(user = %name, shell = %shell, "Login shell does not exist in the image");
    }

    let home_existed = snapshot.exists(home);
    if home_existed {
        if !snapshot.is_dir(home) {
            return Err(user_error(name, format!("{} exists and is not a directory", home)));
        }
        tracing::warn!(home = %home, "Home directory already exists; not copying skel files");
    } else {
        snapshot
            .mkdir_p(home, uid, uid, 0o755)
            .map_err(|e| user_error(name, e.to_string()))?;
        let skel: Vec<(String, String, u64, u32)> = snapshot
            .children(SKEL)
            .into_iter()
            .filter_map(|p| match snapshot.node(p) {
                Some(node) => match &node.kind {
                    NodeKind::File { sha256, size } => {
                        Some((file_name(p).to_string(), sha256.clone(), *size, node.mode))
                    }
                    _ => None,
                },
                None => None,
            })
            .collect();
        for (file, sha256, size, mode) in skel {
            snapshot.put_file(&format!("{}/{}", home, file), sha256, size, uid, uid, mode)?;
        }
    }

    let entry = UserEntry {
        name: name.to_string(),
        uid,
        gid: uid,
        home: home.to_string(),
        shell: shell.to_string(),
    };
    snapshot.insert_user(entry.clone());
    let passwd = snapshot.render_passwd();
    snapshot.write_file(PASSWD, passwd.as_bytes(), ROOT_UID, ROOT_UID, 0o644)?;
    tracing::debug!(user = %name, uid, home = %home, "Created user");
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::seed;
    use codebox_core::recipe::BaseImageRef;

    fn focal() -> Snapshot {
        seed(&BaseImageRef::new("ubuntu", "20.04")).unwrap()
    }

    #[test]
    fn test_create_runner() {
        let mut snap = focal();
        let entry = create_user(&mut snap, "runner", "/home/runner", "/bin/bash").unwrap();

        assert_eq!(entry.uid, 1000);
        assert_eq!(snap.user("runner"), Some(&entry));
        let home = snap.node("/home/runner").unwrap();
        assert_eq!((home.uid, home.mode), (1000, 0o755));
        assert_eq!(snap.node("/home/runner/.bashrc").unwrap().uid, 1000);
        assert!(snap.can_write(1000, 1000, "/home/runner").unwrap());
    }

    #[test]
    fn test_duplicate_user() {
        let mut snap = focal();
        create_user(&mut snap, "runner", "/home/runner", "/bin/bash").unwrap();
        let err = create_user(&mut snap, "runner", "/home/runner", "/bin/bash").unwrap_err();
        assert_eq!(err.to_string(), "cannot create user 'runner': user 'runner' already exists");
    }

    #[test]
    fn test_uids_allocated_in_order() {
        let mut snap = focal();
        create_user(&mut snap, "a", "/home/a", "/bin/bash").unwrap();
        let b = create_user(&mut snap, "b", "/home/b", "/bin/bash").unwrap();
        assert_eq!(b.uid, 1001);
    }

    #[test]
    fn test_uid_space_exhausted() {
        let mut snap = focal();
        for uid in UID_MIN..=UID_MAX {
            snap.insert_user(UserEntry {
                name: format!("u{}", uid),
                uid,
                gid: uid,
                home: "/nonexistent".to_string(),
                shell: "/usr/sbin/nologin".to_string(),
            });
        }
        let err = create_user(&mut snap, "runner", "/home/runner", "/bin/bash").unwrap_err();
        assert!(err.to_string().contains("no more available UIDs"));
        assert!(!snap.exists("/home/runner"));
    }

    #[test]
    fn test_scratch_image_has_no_useradd() {
        let mut snap = Snapshot::empty();
        let err = create_user(&mut snap, "runner", "/home/runner", "/bin/bash").unwrap_err();
        assert!(matches!(err, ProvisionError::UserCreation { .. }));
    }
}
