//! Provisioning error taxonomy.
//!
//! Every build-time variant aborts the build at the step that raised it; there
//! is no retry and no partial image.

use codebox_core::recipe::RecipeError;
use serde::Serialize;
use thiserror::Error;

/// Coarse classification used in logs and JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRecipe,
    PackageInstallFailure,
    DownloadFailure,
    ExtractionFailure,
    UserCreationFailure,
    PathFailure,
    OrderingViolation,
    PrivilegeViolation,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRecipe => "invalid_recipe",
            ErrorKind::PackageInstallFailure => "package_install_failure",
            ErrorKind::DownloadFailure => "download_failure",
            ErrorKind::ExtractionFailure => "extraction_failure",
            ErrorKind::UserCreationFailure => "user_creation_failure",
            ErrorKind::PathFailure => "path_failure",
            ErrorKind::OrderingViolation => "ordering_violation",
            ErrorKind::PrivilegeViolation => "privilege_violation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    InvalidRecipe(#[from] RecipeError),

    #[error("unsupported base image {0}")]
    UnsupportedBase(String),

    #[error("package installation failed: {reason}")]
    PackageInstall {
        packages: Vec<String>,
        reason: String,
    },

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("extraction into {destination} failed: {reason}")]
    Extraction { destination: String, reason: String },

    #[error("cannot create user '{name}': {reason}")]
    UserCreation { name: String, reason: String },

    #[error("{path}: {reason}")]
    Path { path: String, reason: String },

    #[error("step {index} ({step}) is out of order: {reason}")]
    OrderingViolation {
        index: usize,
        step: String,
        reason: String,
    },

    #[error("step '{step}' requires root but the active identity is '{user}'")]
    PrivilegeRequired { step: String, user: String },

    #[error("container would run as privileged identity '{user}'")]
    PrivilegedIdentity { user: String },
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::InvalidRecipe(_) | ProvisionError::UnsupportedBase(_) => {
                ErrorKind::InvalidRecipe
            }
            ProvisionError::PackageInstall { .. } => ErrorKind::PackageInstallFailure,
            ProvisionError::Download { .. } => ErrorKind::DownloadFailure,
            ProvisionError::Extraction { .. } => ErrorKind::ExtractionFailure,
            ProvisionError::UserCreation { .. } => ErrorKind::UserCreationFailure,
            ProvisionError::Path { .. } => ErrorKind::PathFailure,
            ProvisionError::OrderingViolation { .. } => ErrorKind::OrderingViolation,
            ProvisionError::PrivilegeRequired { .. } | ProvisionError::PrivilegedIdentity { .. } => {
                ErrorKind::PrivilegeViolation
            }
        }
    }

    pub(crate) fn path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ProvisionError::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
