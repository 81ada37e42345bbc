//! Error taxonomy for the capture pipeline and the attendance ledger.
//!
//! Plumbing code (startup, handlers, model loading) keeps using
//! `anyhow::Result`; these variants exist where callers branch on the kind of
//! failure.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttendanceError>;

#[derive(Error, Debug)]
pub enum AttendanceError {
    /// The camera failed to deliver a frame. The iteration is skipped.
    #[error("capture failure: {0}")]
    CaptureFailure(String),

    /// The camera device could not be acquired. Halts the run.
    #[error("camera device {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    /// A recognized teacher has no subject mapping.
    #[error("teacher {0} has no subject mapping")]
    UnmappedTeacher(String),

    /// A ledger or registry read/write failed.
    #[error("storage failure on {path}: {source}")]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A reference image produced no usable descriptor.
    #[error("no face found in reference image {0}")]
    ConfigurationGap(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl AttendanceError {
    pub fn storage(path: impl Into<PathBuf>, source: rusqlite::Error) -> Self {
        Self::StorageFailure { path: path.into(), source }
    }

    /// Errors that must stop the capture run instead of being logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceUnavailable { .. } | Self::InvalidConfig(_))
    }
}
