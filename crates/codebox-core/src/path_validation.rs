//! Container path validation utilities.
//!
//! Paths inside an image are plain `/`-separated strings, independent of the
//! host platform. Every path stored in a recipe or snapshot goes through
//! [`normalize_container_path`] first, so `..` can never climb out of a
//! destination and two spellings of one path never produce two entries.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathRuleError {
    #[error("{0}: path must be absolute")]
    NotAbsolute(String),

    #[error("{0}: path must not contain '..'")]
    ParentSegment(String),

    #[error("{0}: path must not contain NUL")]
    Nul(String),

    #[error("path is empty")]
    Empty,
}

impl PathRuleError {
    /// The rule that was broken, without the offending path.
    pub fn reason(&self) -> &'static str {
        match self {
            PathRuleError::NotAbsolute(_) => "path must be absolute",
            PathRuleError::ParentSegment(_) => "path must not contain '..'",
            PathRuleError::Nul(_) => "path must not contain NUL",
            PathRuleError::Empty => "path is empty",
        }
    }
}

/// Normalize an absolute container path: collapse `//` and `.`, drop the trailing slash.
pub fn normalize_container_path(path: &str) -> Result<String, PathRuleError> {
    if path.is_empty() {
        return Err(PathRuleError::Empty);
    }
    if path.contains('\0') {
        return Err(PathRuleError::Nul(path.to_string()));
    }
    if !path.starts_with('/') {
        return Err(PathRuleError::NotAbsolute(path.to_string()));
    }
    let mut parts = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(PathRuleError::ParentSegment(path.to_string())),
            s => parts.push(s),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Join a relative archive/entry path under `base`. The result is normalized.
pub fn join_container_path(base: &str, relative: &str) -> Result<String, PathRuleError> {
    if relative.starts_with('/') {
        return normalize_container_path(relative);
    }
    let relative = relative.trim_start_matches("./");
    normalize_container_path(&format!("{}/{}", base, relative))
}

/// Parent of a normalized path; `None` for `/`.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `/`, `/a`, `/a/b` for `/a/b`. Input must be normalized.
pub fn ancestors_inclusive(path: &str) -> Vec<String> {
    let mut out = vec!["/".to_string()];
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

/// True if `path` is `root` or lies beneath it. Both must be normalized.
pub fn is_within(path: &str, root: &str) -> bool {
    root == "/" || path == root || path.starts_with(&format!("{}/", root))
}
