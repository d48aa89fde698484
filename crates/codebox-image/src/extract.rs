//! gzip-compressed tar extraction into a snapshot (`tar -C <dest> -xzf`).

use codebox_core::path_validation::{join_container_path, parent};
use flate2::read::GzDecoder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tar::EntryType;

use crate::error::ProvisionError;
use crate::snapshot::{NodeKind, Snapshot};

/// Counts of what an extraction produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    pub skipped: usize,
}

fn extraction_error(destination: &str, reason: impl Into<String>) -> ProvisionError {
    ProvisionError::Extraction {
        destination: destination.to_string(),
        reason: reason.into(),
    }
}

/// Extract `archive` beneath `destination` as `uid:gid`.
///
/// Entries keep their mode bits and are owned by the extracting identity.
/// Leading `/` is stripped from member names; any member resolving outside
/// `destination` fails the whole extraction.
pub fn extract_tar_gz(
    snapshot: &mut Snapshot,
    archive: &[u8],
    destination: &str,
    uid: u32,
    gid: u32,
) -> Result<ExtractSummary, ProvisionError> {
    if !snapshot.is_dir(destination) {
        return Err(extraction_error(destination, "Cannot open: No such file or directory"));
    }
    let writable = snapshot.can_traverse(uid, gid, destination)?
        && snapshot.can_write(uid, gid, destination)?;
    if !writable {
        return Err(extraction_error(destination, "Cannot open: Permission denied"));
    }

    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    let entries = tar
        .entries()
        .map_err(|e| extraction_error(destination, format!("not a gzip tar archive: {}", e)))?;

    let mut summary = ExtractSummary::default();
    for entry in entries {
        let mut entry =
            entry.map_err(|e| extraction_error(destination, format!("corrupt archive: {}", e)))?;
        let member = entry
            .path()
            .map_err(|e| extraction_error(destination, format!("bad member name: {}", e)))?
            .to_string_lossy()
            .into_owned();
        let relative = member.trim_start_matches('/');
        if relative.is_empty() || relative == "." || relative == "./" {
            continue;
        }
        let target = join_container_path(destination, relative).map_err(|e| {
            extraction_error(destination, format!("member '{}' rejected: {}", member, e.reason()))
        })?;

        let header = entry.header();
        let mode = header.mode().unwrap_or(0o644) & 0o7777;
        let entry_type = header.entry_type();

        if let Some(dir) = parent(&target) {
            snapshot.mkdir_p(dir, uid, gid, 0o755)?;
        }
        match entry_type {
            EntryType::Directory => {
                snapshot.mkdir_p(&target, uid, gid, mode)?;
                summary.dirs += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                let mut hasher = Sha256::new();
                let size = std::io::copy(&mut entry, &mut hasher).map_err(|e| {
                    extraction_error(destination, format!("{}: read error: {}", member, e))
                })?;
                snapshot.put_file(&target, hex::encode(hasher.finalize()), size, uid, gid, mode)?;
                summary.files += 1;
            }
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(|e| extraction_error(destination, e.to_string()))?
                    .ok_or_else(|| extraction_error(destination, format!("{}: symlink without target", member)))?;
                snapshot.symlink(&target, &link.to_string_lossy(), uid, gid)?;
                summary.symlinks += 1;
            }
            EntryType::Link => {
                let link = entry
                    .link_name()
                    .map_err(|e| extraction_error(destination, e.to_string()))?
                    .ok_or_else(|| extraction_error(destination, format!("{}: hard link without target", member)))?;
                let source = join_container_path(destination, link.to_string_lossy().trim_start_matches('/'))
                    .map_err(|e| extraction_error(destination, format!("link '{}' rejected: {}", member, e.reason())))?;
                let (sha256, size) = match snapshot.node(&source).map(|n| &n.kind) {
                    Some(NodeKind::File { sha256, size }) => (sha256.clone(), *size),
                    _ => {
                        return Err(extraction_error(
                            destination,
                            format!("{}: Cannot hard link to '{}'", member, source),
                        ))
                    }
                };
                snapshot.put_file(&target, sha256, size, uid, gid, mode)?;
                summary.files += 1;
            }
            other => {
                tracing::debug!(member = %member, kind = ?other, "Skipping special archive member");
                summary.skipped += 1;
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    /// Build a `.tar.gz` in memory. Paths ending in `/` become directories;
    /// `(path, target)` pairs in `links` become symlinks.
    pub(crate) fn tar_gz(files: &[(&str, &[u8], u32)], links: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, data, mode) in files {
            let mut header = tar::Header::new_gnu();
            if path.ends_with('/') {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
            } else {
                header.set_size(data.len() as u64);
            }
            header.set_mode(*mode);
            header.set_mtime(0);
            builder.append_data(&mut header, path, *data).unwrap();
        }
        for (path, target) in links {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder.append_link(&mut header, path, target).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    /// Minimal Go distribution layout.
    pub(crate) fn go_archive() -> Vec<u8> {
        tar_gz(
            &[
                ("go/", &[][..], 0o755),
                ("go/VERSION", &b"go1.18.10"[..], 0o644),
                ("go/bin/", &[][..], 0o755),
                ("go/bin/go", &b"\x7fELF go"[..], 0o755),
                ("go/bin/gofmt", &b"\x7fELF gofmt"[..], 0o755),
                ("go/src/fmt/print.go", &b"package fmt"[..], 0o644),
            ],
            &[],
        )
    }

    fn dest_snapshot() -> Snapshot {
        let mut snap = Snapshot::empty();
        snap.mkdir_p("/usr/local", 0, 0, 0o755).unwrap();
        snap
    }

    #[test]
    fn test_extract_go_layout() {
        let mut snap = dest_snapshot();
        let summary = extract_tar_gz(&mut snap, &go_archive(), "/usr/local", 0, 0).unwrap();

        assert_eq!(summary.files, 4);
        assert_eq!(summary.dirs, 2);
        assert!(snap.is_dir("/usr/local/go/bin"));
        assert!(snap.is_dir("/usr/local/go/src/fmt"));
        assert!(snap.is_executable_by(1000, 1000, "/usr/local/go/bin/go"));
        match &snap.node("/usr/local/go/VERSION").unwrap().kind {
            NodeKind::File { sha256, size } => {
                assert_eq!(*size, 9);
                assert_eq!(sha256, &hex::encode(Sha256::digest(b"go1.18.10")));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_symlink_member() {
        let mut snap = dest_snapshot();
        let archive = tar_gz(&[("go/bin/go", &b"go"[..], 0o755)], &[("go/bin/go1.18", "go")]);
        let summary = extract_tar_gz(&mut snap, &archive, "/usr/local", 0, 0).unwrap();
        assert_eq!(summary.symlinks, 1);
        assert_eq!(snap.resolve("/usr/local/go/bin/go1.18").unwrap(), "/usr/local/go/bin/go");
    }

    #[test]
    fn test_corrupt_archive() {
        let mut snap = dest_snapshot();
        let err = extract_tar_gz(&mut snap, b"definitely not gzip", "/usr/local", 0, 0).unwrap_err();
        assert!(matches!(err, ProvisionError::Extraction { .. }));
    }

    #[test]
    fn test_missing_or_unwritable_destination() {
        let mut snap = dest_snapshot();
        let err = extract_tar_gz(&mut snap, &go_archive(), "/opt/missing", 0, 0).unwrap_err();
        assert!(err.to_string().contains("No such file or directory"));

        let err = extract_tar_gz(&mut snap, &go_archive(), "/usr/local", 1000, 1000).unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
    }

    /// Single-member archive with a raw name; `append_data` refuses
    /// absolute and `..` names.
    fn raw_member(name: &[u8]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        header.set_cksum();
        builder.append(&header, &b"hi"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_parent_member_rejected() {
        let mut snap = dest_snapshot();
        let err = extract_tar_gz(&mut snap, &raw_member(b"../../etc/passwd"), "/usr/local", 0, 0)
            .unwrap_err();
        assert!(err.to_string().contains("member '../../etc/passwd' rejected"));
        assert!(!snap.exists("/etc/passwd"));
    }

    #[test]
    fn test_absolute_member_is_relative_to_destination() {
        let mut snap = dest_snapshot();
        extract_tar_gz(&mut snap, &raw_member(b"/etc/x"), "/usr/local", 0, 0).unwrap();
        assert!(snap.exists("/usr/local/etc/x"));
        assert!(!snap.exists("/etc/x"));
    }
}
