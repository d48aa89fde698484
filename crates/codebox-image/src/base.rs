//! Base image seeding.
//!
//! Only the layout a provisioning run can observe is modelled: the standard
//! directory hierarchy, the handful of binaries the steps shell out to, the
//! system accounts, the preinstalled package set and the default PATH.

use codebox_core::recipe::BaseImageRef;

use crate::error::ProvisionError;
use crate::snapshot::{Snapshot, UserEntry, DEFAULT_PATH, ROOT_UID};

/// Stand-in content for an executable. Deterministic per path.
pub(crate) fn stub_binary(path: &str) -> Vec<u8> {
    format!("\x7fELF {}", path).into_bytes()
}

const FOCAL_DIRS: &[(&str, u32)] = &[
    ("/bin", 0o755),
    ("/boot", 0o755),
    ("/dev", 0o755),
    ("/etc", 0o755),
    ("/etc/skel", 0o755),
    ("/home", 0o755),
    ("/lib", 0o755),
    ("/lib64", 0o755),
    ("/media", 0o755),
    ("/mnt", 0o755),
    ("/opt", 0o755),
    ("/proc", 0o555),
    ("/root", 0o700),
    ("/run", 0o755),
    ("/sbin", 0o755),
    ("/srv", 0o755),
    ("/sys", 0o555),
    ("/tmp", 0o1777),
    ("/usr/bin", 0o755),
    ("/usr/sbin", 0o755),
    ("/usr/lib", 0o755),
    ("/usr/share", 0o755),
    ("/usr/local/bin", 0o755),
    ("/usr/local/sbin", 0o755),
    ("/usr/local/lib", 0o755),
    ("/usr/local/share", 0o755),
    ("/var/cache/apt", 0o755),
    ("/var/lib/apt/lists", 0o755),
    ("/var/lib/dpkg", 0o755),
    ("/var/log", 0o755),
];

const FOCAL_BINARIES: &[&str] = &[
    "/bin/bash",
    "/bin/cat",
    "/bin/dash",
    "/bin/gzip",
    "/bin/ls",
    "/bin/mkdir",
    "/bin/rm",
    "/bin/tar",
    "/usr/bin/apt-get",
    "/usr/bin/dpkg",
    "/usr/bin/env",
    "/usr/bin/sha256sum",
    "/usr/sbin/nologin",
    "/usr/sbin/useradd",
];

const FOCAL_SKEL: &[&str] = &["/etc/skel/.bash_logout", "/etc/skel/.bashrc", "/etc/skel/.profile"];

/// Packages shipped in the ubuntu:20.04 image.
const FOCAL_PACKAGES: &[(&str, &str)] = &[
    ("apt", "2.0.2ubuntu0.2"),
    ("bash", "5.0-6ubuntu1.2"),
    ("coreutils", "8.30-3ubuntu2"),
    ("dash", "0.5.10.2-6"),
    ("dpkg", "1.19.7ubuntu3.2"),
    ("gzip", "1.10-0ubuntu4.1"),
    ("passwd", "1:4.8.1-1ubuntu5.20.04.4"),
    ("tar", "1.30+dfsg-7ubuntu0.20.04.3"),
];

/// Base images this build can start from.
pub fn supported_bases() -> Vec<BaseImageRef> {
    vec![BaseImageRef::new("ubuntu", "20.04")]
}

/// Reject a base before anything runs, so `validate`, `plan` and `render`
/// agree with `build`.
pub fn ensure_supported(base: &BaseImageRef) -> Result<(), ProvisionError> {
    if supported_bases().contains(base) {
        Ok(())
    } else {
        Err(ProvisionError::UnsupportedBase(base.to_string()))
    }
}

/// Produce the initial snapshot for `base`.
pub fn seed(base: &BaseImageRef) -> Result<Snapshot, ProvisionError> {
    match (base.name.as_str(), base.version.as_str()) {
        ("ubuntu", "20.04") => seed_focal(base),
        _ => Err(ProvisionError::UnsupportedBase(base.to_string())),
    }
}

fn seed_focal(base: &BaseImageRef) -> Result<Snapshot, ProvisionError> {
    let mut snap = Snapshot::empty();
    snap.set_base(base.to_string());

    for (dir, mode) in FOCAL_DIRS {
        snap.mkdir_p(dir, ROOT_UID, ROOT_UID, *mode)?;
    }
    for bin in FOCAL_BINARIES {
        snap.write_file(bin, &stub_binary(bin), ROOT_UID, ROOT_UID, 0o755)?;
    }
    snap.symlink("/bin/sh", "dash", ROOT_UID, ROOT_UID)?;
    for file in FOCAL_SKEL {
        snap.write_file(file, file.as_bytes(), ROOT_UID, ROOT_UID, 0o644)?;
    }

    snap.insert_user(UserEntry {
        name: "daemon".to_string(),
        uid: 1,
        gid: 1,
        home: "/usr/sbin".to_string(),
        shell: "/usr/sbin/nologin".to_string(),
    });
    snap.insert_user(UserEntry {
        name: "nobody".to_string(),
        uid: 65534,
        gid: 65534,
        home: "/nonexistent".to_string(),
        shell: "/usr/sbin/nologin".to_string(),
    });
    let passwd = snap.render_passwd();
    snap.write_file("/etc/passwd", passwd.as_bytes(), ROOT_UID, ROOT_UID, 0o644)?;

    for (name, version) in FOCAL_PACKAGES {
        snap.record_package(name, version);
    }
    snap.set_env("PATH", DEFAULT_PATH);
    snap.set_workdir("/".to_string());
    snap.set_command(vec!["bash".to_string()]);

    tracing::debug!(base = %base, nodes = snap.paths().count(), "Seeded base image");
    Ok(snap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focal_layout() {
        let snap = seed(&BaseImageRef::new("ubuntu", "20.04")).unwrap();
        assert_eq!(snap.base(), Some("ubuntu:20.04"));
        assert_eq!(snap.identity(), "root");
        assert_eq!(snap.env("PATH"), Some(DEFAULT_PATH));
        assert!(snap.is_dir("/usr/local"));
        assert_eq!(snap.node("/tmp").unwrap().mode, 0o1777);
        assert!(snap.is_executable_by(0, 0, "/usr/bin/apt-get"));
        assert_eq!(snap.resolve("/bin/sh").unwrap(), "/bin/dash");
        assert!(snap.has_package("tar"));
        assert!(!snap.has_package("wget"));
        assert!(snap.user("nobody").is_some());
        assert!(snap.children("/var/lib/apt/lists").is_empty());
    }

    #[test]
    fn test_unsupported_base() {
        let err = seed(&BaseImageRef::new("alpine", "3.18")).unwrap_err();
        assert!(matches!(err, ProvisionError::UnsupportedBase(ref b) if b == "alpine:3.18"));
    }

    #[test]
    fn test_ensure_supported_matches_seed() {
        for base in supported_bases() {
            ensure_supported(&base).unwrap();
            seed(&base).unwrap();
        }
        let err = ensure_supported(&BaseImageRef::new("ubuntu", "22.04")).unwrap_err();
        assert_eq!(err.to_string(), "unsupported base image ubuntu:22.04");
    }

    #[test]
    fn test_seed_is_deterministic() {
        let base = BaseImageRef::new("ubuntu", "20.04");
        assert_eq!(seed(&base).unwrap().fingerprint(), seed(&base).unwrap().fingerprint());
    }
}
