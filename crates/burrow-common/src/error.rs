//! Unified error types for the burrow workspace.
//!
//! Every fallible kernel or filesystem operation is wrapped with the
//! operation name and the path it touched, so a failed container start can
//! be diagnosed from the message alone.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BurrowError {
    /// An I/O operation on a path failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A system call (mount, `pivot_root`, clone, ...) failed.
    #[error("{op} failed at {path}: {source}")]
    Syscall {
        /// Name of the failed operation.
        op: &'static str,
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A container name cannot be used to derive host paths.
    #[error("invalid container name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Per-container state already exists for this name.
    #[error("container name {name} is already in use ({path} exists)")]
    NameInUse {
        /// The colliding name.
        name: String,
        /// The pre-existing path.
        path: PathBuf,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The launcher/init handshake broke down.
    #[error("launcher synchronization failed: {message}")]
    Sync {
        /// Description of the failure.
        message: String,
    },

    /// The launcher was told to stop before the container started.
    #[error("interrupted before container {name} started")]
    Interrupted {
        /// The container that was abandoned.
        name: String,
    },

    /// Installing the launcher's signal handling failed.
    #[error("cannot install signal handler: {message}")]
    Signal {
        /// Description of the failure.
        message: String,
    },

    /// Replacing the init process with the target command failed.
    #[error("failed to exec {command}: {source}")]
    Exec {
        /// Command that could not be executed.
        command: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// One or more best-effort cleanup steps failed.
    #[error("teardown incomplete: {}", failures.join("; "))]
    Teardown {
        /// Description of each failed step.
        failures: Vec<String>,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl BurrowError {
    /// Builds a [`BurrowError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`BurrowError::Syscall`] for `op` on `path`.
    pub fn syscall(
        op: &'static str,
        path: impl Into<PathBuf>,
        source: impl Into<std::io::Error>,
    ) -> Self {
        Self::Syscall {
            op,
            path: path.into(),
            source: source.into(),
        }
    }

    /// Returns the raw OS error code carried by this error, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } | Self::Syscall { source, .. } | Self::Exec { source, .. } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BurrowError>;
