//! Error types for ttflash.

use std::io;
use thiserror::Error;

/// Result type for ttflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ttflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (transport read/write, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The target sent something the protocol does not allow.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport or the session was closed.
    #[error("Connection closed")]
    Closed,

    /// The embedding application asked to stop.
    #[error("Interrupted")]
    Interrupted,

    /// Invalid firmware preset.
    #[error("Invalid preset: {0}")]
    InvalidPreset(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Programming one file of a multi-file job failed.
    #[error("Flashing {name} failed: {source}")]
    FileFailed {
        /// Name of the file that failed.
        name: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Name of the file that failed, for errors raised by multi-file programming.
    pub fn failed_file(&self) -> Option<&str> {
        match self {
            Self::FileFailed { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The underlying failure, looking through [`Error::FileFailed`].
    pub fn innermost(&self) -> &Error {
        match self {
            Self::FileFailed { source, .. } => source.innermost(),
            other => other,
        }
    }
}
