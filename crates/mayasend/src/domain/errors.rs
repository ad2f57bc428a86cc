//! Domain-specific errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No Maya-recognized language found in syntax '{syntax}'")]
    Unsupported { syntax: String },
}

/// Buffer state that forbids building a command at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("Save Changes Before Maya Source/Import")]
    UnsavedChanges,
    #[error("File must be saved before sending to Maya")]
    MissingFilePath,
    #[error("file path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

#[derive(Debug, Error)]
#[error("Failed to communicate with Maya ({host}:{port}):\n{source}")]
pub struct TransportError {
    pub host: String,
    pub port: u16,
    #[source]
    pub source: io::Error,
}

impl TransportError {
    pub fn new(host: impl Into<String>, port: u16, source: io::Error) -> Self {
        Self {
            host: host.into(),
            port,
            source,
        }
    }
}
