//! Error types for migration operations.

use thiserror::Error;

/// Migration-specific errors.
///
/// Anything surfaced through this type is fatal to the run unless the caller
/// explicitly downgrades it. Corrupted projects are not errors; they are
/// reported as [`crate::types::ProjectOutcome::Corrupted`].
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Credentials or settings could not be loaded.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The hosting service answered with an unexpected status.
    #[error("API request {method} {path} failed with status {status}: {body}")]
    Api {
        method: &'static str,
        path: String,
        status: u16,
        body: String,
    },

    /// A 2xx response carried a body that did not match the expected shape.
    #[error("Failed to decode response from {path}: {message}")]
    Decode { path: String, message: String },

    /// Failed to clone repository.
    #[error("Git clone failed: {0}")]
    GitCloneFailed(String),

    /// Failed to push a ref to the destination.
    #[error("Git push failed: {0}")]
    GitPushFailed(String),

    /// Any other git invocation that exited unsuccessfully.
    #[error("Git command `{command}` failed ({status}): {stderr}")]
    GitCommand {
        command: String,
        status: String,
        stderr: String,
    },

    /// The local mirror workspace could not be reset.
    #[error("Workspace error at {path}: {source}")]
    Workspace {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl MigrationError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::HttpError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Why a destination group could not be located or created.
///
/// The walker logs these and continues with the parent group id.
#[derive(Debug, Error)]
pub enum GroupEnsureError {
    /// Looking up an existing group failed.
    #[error("lookup of group {path} failed: {source}")]
    Lookup {
        path: String,
        #[source]
        source: MigrationError,
    },

    /// The create call was rejected, typically because a concurrent run
    /// created the same path first.
    #[error("creation of group {path} failed: {source}")]
    Create {
        path: String,
        #[source]
        source: MigrationError,
    },
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
