//! Typed image recipe.
//!
//! A recipe carries every literal that the provisioning pipeline needs: base
//! image, OS packages, toolchain archive, execution identity, working directory
//! and startup command. Recipes are YAML on disk; the built-in recipe
//! provisions the Go 1.18.10 runner image.

mod validate;

pub use validate::{RecipeError, RecipeIssue};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Full recipe for one runner image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    /// Tag of the produced image, e.g. `code-runner-go`.
    pub image: String,
    pub base: BaseImageRef,
    /// Installed in one package-manager transaction, in this order.
    pub packages: Vec<String>,
    pub toolchain: ToolchainSpec,
    pub user: UserSpec,
    pub workdir: String,
    /// argv of the default process.
    pub command: Vec<String>,
}

/// Base image reference, written `name:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BaseImageRef {
    pub name: String,
    pub version: String,
}

impl BaseImageRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for BaseImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

impl FromStr for BaseImageRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(':') {
            Some((name, version)) if !name.is_empty() && !version.is_empty() => {
                Ok(Self::new(name, version))
            }
            _ => Err(format!("base image '{}' must be written name:version", s)),
        }
    }
}

impl TryFrom<String> for BaseImageRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BaseImageRef> for String {
    fn from(value: BaseImageRef) -> Self {
        value.to_string()
    }
}

/// Versioned toolchain archive and where it lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainSpec {
    /// Toolchain name, e.g. `go`.
    pub name: String,
    pub version: String,
    /// HTTPS URL of a gzip-compressed tarball; must embed `version`.
    pub url: String,
    /// Directory the archive is extracted into (`tar -C`).
    pub install_root: String,
    /// Directory the archive produces under `install_root`.
    pub install_path: String,
    /// Binary directory relative to `install_path`.
    #[serde(default = "default_bin_dir")]
    pub bin_dir: String,
    /// Optional pinned SHA-256 of the archive (lowercase hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

fn default_bin_dir() -> String {
    "bin".to_string()
}

impl ToolchainSpec {
    /// Last path segment of the URL, used as the transient archive name.
    pub fn archive_file_name(&self) -> &str {
        let without_query = self.url.split(['?', '#']).next().unwrap_or(&self.url);
        without_query.rsplit('/').next().unwrap_or(without_query)
    }

    /// Absolute directory appended to PATH.
    pub fn bin_path(&self) -> String {
        format!(
            "{}/{}",
            self.install_path.trim_end_matches('/'),
            self.bin_dir.trim_matches('/')
        )
    }
}

/// Unprivileged execution identity (`useradd -m -s <shell> <name>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSpec {
    pub name: String,
    /// Defaults to `/home/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

impl UserSpec {
    pub fn home(&self) -> String {
        self.home
            .clone()
            .unwrap_or_else(|| format!("/home/{}", self.name))
    }
}

impl Recipe {
    /// The Go runner image: ubuntu 20.04, Go 1.18.10, user `runner`.
    pub fn builtin_go() -> Self {
        Self {
            image: "code-runner-go".to_string(),
            base: BaseImageRef::new("ubuntu", "20.04"),
            packages: vec![
                "wget".to_string(),
                "tar".to_string(),
                "ca-certificates".to_string(),
            ],
            toolchain: ToolchainSpec {
                name: "go".to_string(),
                version: "1.18.10".to_string(),
                url: "https://golang.org/dl/go1.18.10.linux-amd64.tar.gz".to_string(),
                install_root: "/usr/local".to_string(),
                install_path: "/usr/local/go".to_string(),
                bin_dir: default_bin_dir(),
                sha256: None,
            },
            user: UserSpec {
                name: "runner".to_string(),
                home: None,
                shell: default_shell(),
            },
            workdir: "/home/runner".to_string(),
            command: vec!["go".to_string(), "run".to_string(), "main.go".to_string()],
        }
    }

    /// Parse YAML and validate.
    pub fn from_yaml_str(content: &str) -> Result<Self, RecipeError> {
        let recipe: Recipe =
            serde_yaml::from_str(content).map_err(|source| RecipeError::Parse {
                origin: "<inline>".to_string(),
                source,
            })?;
        recipe.validate()
    }

    /// Read, parse and validate a recipe file.
    pub fn load(path: &Path) -> Result<Self, RecipeError> {
        let content = std::fs::read_to_string(path).map_err(|source| RecipeError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let recipe: Recipe =
            serde_yaml::from_str(&content).map_err(|source| RecipeError::Parse {
                origin: path.display().to_string(),
                source,
            })?;
        tracing::debug!(path = %path.display(), image = %recipe.image, "Loaded recipe");
        recipe.validate()
    }

    pub fn to_yaml(&self) -> Result<String, RecipeError> {
        serde_yaml::to_string(self).map_err(|source| RecipeError::Parse {
            origin: self.image.clone(),
            source,
        })
    }
}

impl Default for Recipe {
    fn default() -> Self {
        Self::builtin_go()
    }
}
