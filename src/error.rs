//! Crate-level error types.

use std::fmt;

/// Errors produced by the isomesh crate.
#[derive(Debug)]
pub enum IsomeshError {
    /// Generic I/O failure.
    Io(std::io::Error),
    /// Failed to spawn a worker thread.
    ThreadSpawn(std::io::Error),
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
    /// Field dimensions do not match the supplied data.
    InvalidGrid(String),
    /// Malformed caller input (atom arrays, atom files).
    InvalidInput(String),
    /// A worker job failed and could not be recovered.
    Worker(String),
}

impl fmt::Display for IsomeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ThreadSpawn(e) => {
                write!(f, "failed to spawn worker thread: {e}")
            }
            Self::OptionsParse(msg) => {
                write!(f, "options parse error: {msg}")
            }
            Self::InvalidGrid(msg) => write!(f, "invalid grid: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Worker(msg) => write!(f, "worker error: {msg}"),
        }
    }
}

impl std::error::Error for IsomeshError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::ThreadSpawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IsomeshError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
