//! Error types for arserver

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::locking::LockError;
use crate::domain::session::SessionError;

/// Result type alias using arserver's Error
pub type Result<T> = std::result::Result<T, Error>;

/// arserver error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Session errors (E400-E499)
    #[error(transparent)]
    Session(#[from] SessionError),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // I/O errors (E900)
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lock(e) => e.code(),
            Self::Session(e) => e.code(),
            Self::ConfigError(_) => "E600",
            Self::Io { .. } => "E900",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Lock(LockError::CannotLock { .. }) => {
                Some("Wait for the other user to finish, then try again".to_string())
            }
            Self::Lock(LockError::UnknownResource(_)) => {
                Some("Reload the scene or project; the object may have been removed".to_string())
            }
            Self::Session(SessionError::UserExists(_)) => {
                Some("Log in with a different user name".to_string())
            }
            Self::ConfigError(_) => Some("arserver config show".to_string()),
            _ => None,
        }
    }

    /// Whether the caller may simply retry later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Lock(e) if e.is_contention())
    }
}
