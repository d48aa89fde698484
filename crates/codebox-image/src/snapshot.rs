//! In-memory image snapshot.
//!
//! A snapshot is the full observable state of an image under construction:
//! filesystem tree, user table, package database, environment, the active
//! identity and the image metadata (working directory, startup command).
//! Every map is a `BTreeMap` and nothing carries a timestamp, so two builds of
//! one recipe produce byte-identical encodings and therefore equal
//! fingerprints.

use std::collections::BTreeMap;

use codebox_core::path_validation::{
    ancestors_inclusive, is_within, normalize_container_path, parent,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ProvisionError;

pub const ROOT_UID: u32 = 0;
pub const ROOT_USER: &str = "root";

/// Default PATH of the Debian/Ubuntu base images.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

const READ: u32 = 0o4;
const WRITE: u32 = 0o2;
const EXEC: u32 = 0o1;
const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Dir,
    File { sha256: String, size: u64 },
    Symlink { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    /// Unix permission check for one of r/w/x. Root bypasses r/w, and x on
    /// files only needs some execute bit.
    fn permits(&self, uid: u32, gid: u32, bit: u32) -> bool {
        if uid == ROOT_UID {
            return bit != EXEC || self.is_dir() || self.mode & 0o111 != 0;
        }
        let shift = if self.uid == uid {
            6
        } else if self.gid == gid {
            3
        } else {
            0
        };
        (self.mode >> shift) & bit != 0
    }
}

/// One `/etc/passwd` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

/// Snapshot of an image under construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    base: Option<String>,
    nodes: BTreeMap<String, Node>,
    users: BTreeMap<String, UserEntry>,
    packages: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
    identity: String,
    workdir: Option<String>,
    command: Vec<String>,
    /// Content of transient files that later steps read back (downloaded archives).
    #[serde(skip)]
    staged: BTreeMap<String, Vec<u8>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snapshot {
    /// A scratch snapshot: only `/` and the root user.
    pub fn empty() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                kind: NodeKind::Dir,
                uid: ROOT_UID,
                gid: ROOT_UID,
                mode: 0o755,
            },
        );
        let mut users = BTreeMap::new();
        users.insert(
            ROOT_USER.to_string(),
            UserEntry {
                name: ROOT_USER.to_string(),
                uid: ROOT_UID,
                gid: ROOT_UID,
                home: "/root".to_string(),
                shell: "/bin/bash".to_string(),
            },
        );
        Self {
            base: None,
            nodes,
            users,
            packages: BTreeMap::new(),
            env: BTreeMap::new(),
            identity: ROOT_USER.to_string(),
            workdir: None,
            command: Vec::new(),
            staged: BTreeMap::new(),
        }
    }

    // ─── Base / metadata ───────────────────────────────────────────────────

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub(crate) fn set_base(&mut self, base: impl Into<String>) {
        self.base = Some(base.into());
    }

    pub fn workdir(&self) -> Option<&str> {
        self.workdir.as_deref()
    }

    pub(crate) fn set_workdir(&mut self, path: String) {
        self.workdir = Some(path);
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub(crate) fn set_command(&mut self, argv: Vec<String>) {
        self.command = argv;
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub(crate) fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// PATH split into entries, in search order.
    pub fn path_entries(&self) -> Vec<&str> {
        self.env("PATH")
            .map(|p| p.split(':').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    // ─── Identity / users ──────────────────────────────────────────────────

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The active user's passwd row. The identity always names an existing user.
    pub fn active_user(&self) -> &UserEntry {
        self.users
            .get(&self.identity)
            .or_else(|| self.users.get(ROOT_USER))
            .unwrap_or_else(|| unreachable!("root user is never removed"))
    }

    pub fn is_privileged(&self) -> bool {
        self.active_user().uid == ROOT_UID
    }

    pub(crate) fn set_identity(&mut self, name: &str) {
        self.identity = name.to_string();
    }

    pub fn user(&self, name: &str) -> Option<&UserEntry> {
        self.users.get(name)
    }

    pub fn users(&self) -> impl Iterator<Item = &UserEntry> {
        self.users.values()
    }

    pub(crate) fn insert_user(&mut self, entry: UserEntry) {
        self.users.insert(entry.name.clone(), entry);
    }

    /// `/etc/passwd` text for the current user table, ordered by uid.
    pub fn render_passwd(&self) -> String {
        let mut rows: Vec<&UserEntry> = self.users.values().collect();
        rows.sort_by_key(|u| (u.uid, u.name.clone()));
        rows.iter()
            .map(|u| {
                format!(
                    "{}:x:{}:{}::{}:{}\n",
                    u.name, u.uid, u.gid, u.home, u.shell
                )
            })
            .collect()
    }

    // ─── Packages ──────────────────────────────────────────────────────────

    pub fn packages(&self) -> &BTreeMap<String, String> {
        &self.packages
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub(crate) fn record_package(&mut self, name: &str, version: &str) {
        self.packages.insert(name.to_string(), version.to_string());
    }

    // ─── Filesystem ────────────────────────────────────────────────────────

    /// Node at `path` without following a final symlink.
    pub fn node(&self, path: &str) -> Option<&Node> {
        let path = normalize_container_path(path).ok()?;
        self.nodes.get(&path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.node(path).is_some()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.resolve(path)
            .ok()
            .and_then(|p| self.nodes.get(&p))
            .is_some_and(Node::is_dir)
    }

    /// All paths in the tree, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Direct children of a directory.
    pub fn children(&self, dir: &str) -> Vec<&str> {
        self.nodes
            .keys()
            .filter(|p| p.as_str() != dir && parent(p) == Some(dir))
            .map(String::as_str)
            .collect()
    }

    fn normalize(path: &str) -> Result<String, ProvisionError> {
        normalize_container_path(path).map_err(|e| ProvisionError::path(path, e.reason()))
    }

    /// `mkdir -p`. Missing parents are created root-owned 0755; the leaf gets
    /// the given owner and mode. Existing directories are left untouched.
    pub fn mkdir_p(&mut self, path: &str, uid: u32, gid: u32, mode: u32) -> Result<(), ProvisionError> {
        let path = Self::normalize(path)?;
        let ancestors = ancestors_inclusive(&path);
        let last = ancestors.len() - 1;
        for (i, dir) in ancestors.iter().enumerate() {
            match self.nodes.get(dir) {
                Some(node) if node.is_dir() => {}
                Some(_) => {
                    return Err(ProvisionError::path(dir.as_str(), "exists and is not a directory"))
                }
                None => {
                    let (uid, gid, mode) = if i == last { (uid, gid, mode) } else { (ROOT_UID, ROOT_UID, 0o755) };
                    self.nodes.insert(
                        dir.clone(),
                        Node {
                            kind: NodeKind::Dir,
                            uid,
                            gid,
                            mode,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Write a regular file, creating parent directories as needed. Only the
    /// digest and size are kept.
    pub fn write_file(
        &mut self,
        path: &str,
        content: &[u8],
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> Result<(), ProvisionError> {
        let sha256 = hex::encode(Sha256::digest(content));
        self.put_file(path, sha256, content.len() as u64, uid, gid, mode)
    }

    /// Insert a file node from a precomputed digest.
    pub(crate) fn put_file(
        &mut self,
        path: &str,
        sha256: String,
        size: u64,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> Result<(), ProvisionError> {
        let path = Self::normalize(path)?;
        self.ensure_parent(&path)?;
        if self.nodes.get(&path).is_some_and(Node::is_dir) {
            return Err(ProvisionError::path(path, "is a directory"));
        }
        self.nodes.insert(
            path,
            Node {
                kind: NodeKind::File { sha256, size },
                uid,
                gid,
                mode,
            },
        );
        Ok(())
    }

    pub fn symlink(&mut self, path: &str, target: &str, uid: u32, gid: u32) -> Result<(), ProvisionError> {
        let path = Self::normalize(path)?;
        self.ensure_parent(&path)?;
        if self.nodes.get(&path).is_some_and(Node::is_dir) {
            return Err(ProvisionError::path(path, "is a directory"));
        }
        self.nodes.insert(
            path,
            Node {
                kind: NodeKind::Symlink {
                    target: target.to_string(),
                },
                uid,
                gid,
                mode: 0o777,
            },
        );
        Ok(())
    }

    fn ensure_parent(&mut self, path: &str) -> Result<(), ProvisionError> {
        if let Some(dir) = parent(path) {
            self.mkdir_p(dir, ROOT_UID, ROOT_UID, 0o755)?;
        }
        Ok(())
    }

    /// Write a file and keep its content for a later step to read back.
    pub(crate) fn stage_file(&mut self, path: &str, content: Vec<u8>, uid: u32, gid: u32) -> Result<(), ProvisionError> {
        self.write_file(path, &content, uid, gid, 0o644)?;
        self.staged.insert(Self::normalize(path)?, content);
        Ok(())
    }

    /// Move staged content out without copying it.
    pub(crate) fn take_staged(&mut self, path: &str) -> Option<Vec<u8>> {
        let path = normalize_container_path(path).ok()?;
        self.staged.remove(&path)
    }

    /// Put content back after `take_staged`, unless the file is gone by now.
    pub(crate) fn restore_staged(&mut self, path: &str, content: Vec<u8>) {
        if let Ok(path) = normalize_container_path(path) {
            if self.nodes.get(&path).is_some_and(Node::is_file) {
                self.staged.insert(path, content);
            }
        }
    }

    /// `rm -rf`: removes the node and everything beneath it. Missing paths are an error.
    pub fn remove(&mut self, path: &str) -> Result<usize, ProvisionError> {
        let path = Self::normalize(path)?;
        if path == "/" {
            return Err(ProvisionError::path(path, "refusing to remove /"));
        }
        if !self.nodes.contains_key(&path) {
            return Err(ProvisionError::path(path, "no such file or directory"));
        }
        let doomed: Vec<String> = self
            .nodes
            .keys()
            .filter(|p| is_within(p, &path))
            .cloned()
            .collect();
        for p in &doomed {
            self.nodes.remove(p);
            self.staged.remove(p);
        }
        Ok(doomed.len())
    }

    /// Remove everything beneath `dir`, keeping `dir` itself (`rm -rf dir/*`).
    pub fn clear_dir(&mut self, dir: &str) -> Result<usize, ProvisionError> {
        let dir = Self::normalize(dir)?;
        let children: Vec<String> = self.children(&dir).into_iter().map(String::from).collect();
        let mut removed = 0;
        for child in children {
            removed += self.remove(&child)?;
        }
        Ok(removed)
    }

    /// Resolve symlinks in every component. Fails on a missing component or a loop.
    pub fn resolve(&self, path: &str) -> Result<String, ProvisionError> {
        let mut pending = Self::normalize(path)?;
        let mut hops = 0;
        'restart: loop {
            let mut resolved = String::from("/");
            let segments: Vec<String> = pending
                .split('/')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            for (i, segment) in segments.iter().enumerate() {
                let candidate = if resolved == "/" {
                    format!("/{}", segment)
                } else {
                    format!("{}/{}", resolved, segment)
                };
                match self.nodes.get(&candidate).map(|n| &n.kind) {
                    None => {
                        return Err(ProvisionError::path(candidate, "no such file or directory"))
                    }
                    Some(NodeKind::Symlink { target }) => {
                        hops += 1;
                        if hops > MAX_SYMLINK_HOPS {
                            return Err(ProvisionError::path(path, "too many levels of symbolic links"));
                        }
                        let base = if target.starts_with('/') {
                            target.clone()
                        } else {
                            format!("{}/{}", resolved, target)
                        };
                        let rest = segments[i + 1..].join("/");
                        let joined = if rest.is_empty() { base } else { format!("{}/{}", base, rest) };
                        pending = collapse_dots(&joined);
                        continue 'restart;
                    }
                    Some(_) => resolved = candidate,
                }
            }
            return Ok(resolved);
        }
    }

    // ─── Permission checks ─────────────────────────────────────────────────

    /// Every directory on the way to `path` (inclusive, if a directory) is searchable by `uid`.
    pub fn can_traverse(&self, uid: u32, gid: u32, path: &str) -> Result<bool, ProvisionError> {
        let resolved = self.resolve(path)?;
        for dir in ancestors_inclusive(&resolved) {
            let Some(node) = self.nodes.get(&dir) else {
                return Ok(false);
            };
            if node.is_dir() && !node.permits(uid, gid, EXEC) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn can_read(&self, uid: u32, gid: u32, path: &str) -> Result<bool, ProvisionError> {
        let resolved = self.resolve(path)?;
        Ok(self
            .nodes
            .get(&resolved)
            .is_some_and(|n| n.permits(uid, gid, READ)))
    }

    pub fn can_write(&self, uid: u32, gid: u32, path: &str) -> Result<bool, ProvisionError> {
        let resolved = self.resolve(path)?;
        Ok(self
            .nodes
            .get(&resolved)
            .is_some_and(|n| n.permits(uid, gid, WRITE)))
    }

    /// Regular file with an execute bit for `uid`, reachable through searchable directories.
    pub fn is_executable_by(&self, uid: u32, gid: u32, path: &str) -> bool {
        let Ok(resolved) = self.resolve(path) else {
            return false;
        };
        let Some(node) = self.nodes.get(&resolved) else {
            return false;
        };
        let parent_ok = parent(&resolved)
            .map(|dir| self.can_traverse(uid, gid, dir).unwrap_or(false))
            .unwrap_or(true);
        node.is_file() && parent_ok && node.permits(uid, gid, EXEC)
    }

    // ─── Fingerprint ───────────────────────────────────────────────────────

    /// SHA-256 over the canonical JSON encoding of the snapshot.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

/// Lexically fold `.` and `..` in an absolute path built from a symlink target.
/// `..` at the root stays at the root, as in the kernel.
fn collapse_dots(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkdir_p_creates_parents_root_owned() {
        let mut snap = Snapshot::empty();
        snap.mkdir_p("/home/runner", 1000, 1000, 0o750).unwrap();

        let home = snap.node("/home").unwrap();
        assert_eq!((home.uid, home.mode), (0, 0o755));
        let leaf = snap.node("/home/runner").unwrap();
        assert_eq!((leaf.uid, leaf.gid, leaf.mode), (1000, 1000, 0o750));
    }

    #[test]
    fn test_mkdir_through_file_fails() {
        let mut snap = Snapshot::empty();
        snap.write_file("/etc", b"oops", 0, 0, 0o644).unwrap();
        let err = snap.mkdir_p("/etc/ssl", 0, 0, 0o755).unwrap_err();
        assert!(err.to_string().contains("/etc: exists and is not a directory"));
    }

    #[test]
    fn test_remove_is_recursive() {
        let mut snap = Snapshot::empty();
        snap.write_file("/usr/local/go/bin/go", b"go", 0, 0, 0o755).unwrap();
        snap.write_file("/usr/local/gopher", b"x", 0, 0, 0o644).unwrap();

        let removed = snap.remove("/usr/local/go").unwrap();
        assert_eq!(removed, 3);
        assert!(!snap.exists("/usr/local/go/bin/go"));
        assert!(snap.exists("/usr/local/gopher"));
        assert!(snap.remove("/usr/local/go").is_err());
        assert!(snap.remove("/").is_err());
    }

    #[test]
    fn test_clear_dir_keeps_dir() {
        let mut snap = Snapshot::empty();
        snap.write_file("/var/lib/apt/lists/focal_Release", b"r", 0, 0, 0o644).unwrap();
        snap.write_file("/var/lib/apt/lists/partial/x", b"p", 0, 0, 0o644).unwrap();
        snap.clear_dir("/var/lib/apt/lists").unwrap();
        assert!(snap.is_dir("/var/lib/apt/lists"));
        assert!(snap.children("/var/lib/apt/lists").is_empty());
    }

    #[test]
    fn test_resolve_symlinks() {
        let mut snap = Snapshot::empty();
        snap.write_file("/usr/bin/bash", b"bash", 0, 0, 0o755).unwrap();
        snap.symlink("/bin", "usr/bin", 0, 0).unwrap();
        snap.symlink("/usr/local/bin/sh", "../../bin/bash", 0, 0).unwrap();

        assert_eq!(snap.resolve("/bin/bash").unwrap(), "/usr/bin/bash");
        assert_eq!(snap.resolve("/usr/local/bin/sh").unwrap(), "/usr/bin/bash");

        snap.symlink("/loop", "/loop", 0, 0).unwrap();
        assert!(snap.resolve("/loop").is_err());
    }

    #[test]
    fn test_permissions() {
        let mut snap = Snapshot::empty();
        snap.mkdir_p("/root", 0, 0, 0o700).unwrap();
        snap.write_file("/root/tool", b"t", 0, 0, 0o755).unwrap();
        snap.mkdir_p("/home/runner", 1000, 1000, 0o755).unwrap();

        assert!(!snap.can_traverse(1000, 1000, "/root").unwrap());
        assert!(!snap.is_executable_by(1000, 1000, "/root/tool"));
        assert!(snap.is_executable_by(0, 0, "/root/tool"));
        assert!(snap.can_traverse(1000, 1000, "/home/runner").unwrap());
        assert!(snap.can_write(1000, 1000, "/home/runner").unwrap());
        assert!(!snap.can_write(1001, 1001, "/home/runner").unwrap());
        assert!(snap.can_read(1001, 1001, "/home/runner").unwrap());
    }

    #[test]
    fn test_fingerprint_tracks_content_not_staging() {
        let mut a = Snapshot::empty();
        let mut b = Snapshot::empty();
        a.write_file("/f", b"same", 0, 0, 0o644).unwrap();
        b.stage_file("/f", b"same".to_vec(), 0, 0).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.write_file("/f", b"different", 0, 0, 0o644).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_render_passwd_sorted_by_uid() {
        let mut snap = Snapshot::empty();
        snap.insert_user(UserEntry {
            name: "runner".to_string(),
            uid: 1000,
            gid: 1000,
            home: "/home/runner".to_string(),
            shell: "/bin/bash".to_string(),
        });
        assert_eq!(
            snap.render_passwd(),
            "root:x:0:0::/root:/bin/bash\nrunner:x:1000:1000::/home/runner:/bin/bash\n"
        );
    }
}
