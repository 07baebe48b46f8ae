//! Error types for the mod manager core.
//!
//! Every fallible library operation returns [`Result`]. The `Display` text of
//! each variant is the detail string shown to users.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Broad error classes, used by batch operations to decide whether to skip
/// an item or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ContentIntegrity,
    Io,
    Remote,
    DestinationCollision,
    InvalidInput,
}

#[derive(Debug, Error)]
pub enum ModError {
    // Lookup errors
    #[error("Mod does not exist in cache: {mod_id}")]
    ModNotFound { mod_id: String },

    #[error("Mod has no downloaded versions: {mod_id}")]
    NoDownloadedVersions { mod_id: String },

    #[error("Mod version is not in cache: {mod_id} {version_id}")]
    VersionNotFound { mod_id: String, version_id: String },

    #[error("Mod is not installed: {mod_id}")]
    NotInstalled { mod_id: String },

    #[error("Mod is already installed with a different alias: {mod_id} (installed as {installed}, requested {requested})")]
    AliasMismatch {
        mod_id: String,
        installed: String,
        requested: String,
    },

    // Content errors
    #[error("No modinfo.txt in {0}")]
    MissingMarker(PathBuf),

    #[error("Invalid archive: {message}")]
    InvalidArchive { message: String },

    #[error("Exceeded IDs for original versions of {mod_id}")]
    VersionIdsExhausted { mod_id: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Output directory non-empty and not a mod folder: {0}")]
    DestinationCollision(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Remote catalog errors
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("{message}")]
    RemoteRejected { message: String },

    // Validation errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ModError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModError::ModNotFound { .. }
            | ModError::NoDownloadedVersions { .. }
            | ModError::VersionNotFound { .. }
            | ModError::NotInstalled { .. } => ErrorKind::NotFound,
            ModError::MissingMarker(_)
            | ModError::InvalidArchive { .. }
            | ModError::VersionIdsExhausted { .. } => ErrorKind::ContentIntegrity,
            ModError::Io { .. } | ModError::Json { .. } => ErrorKind::Io,
            ModError::DestinationCollision(_) => ErrorKind::DestinationCollision,
            ModError::Network { .. } | ModError::RemoteRejected { .. } => ErrorKind::Remote,
            ModError::AliasMismatch { .. } | ModError::InvalidArgument(_) => {
                ErrorKind::InvalidInput
            }
        }
    }

    /// Wraps an I/O error together with the path it happened on.
    pub fn io_with_path(source: std::io::Error, path: impl AsRef<Path>) -> Self {
        ModError::Io {
            message: source.to_string(),
            path: Some(path.as_ref().to_path_buf()),
            source: Some(source),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        ModError::RemoteRejected {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ModError {
    fn from(err: std::io::Error) -> Self {
        ModError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ModError {
    fn from(err: serde_json::Error) -> Self {
        ModError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ModError {
    fn from(err: reqwest::Error) -> Self {
        ModError::Network {
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for ModError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => e.into(),
            other => ModError::InvalidArchive {
                message: other.to_string(),
            },
        }
    }
}

impl From<walkdir::Error> for ModError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf);
        let message = err.to_string();
        ModError::Io {
            message,
            path,
            source: err.into_io_error(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModError>;
