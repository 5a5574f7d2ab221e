//! Error types for the setup path and the command surface.
//!
//! Everything here is reported synchronously, before or outside the
//! event stream. RPC-level failure is not an error type at all: it
//! arrives as a `Finished` event with a non-zero status code.

use std::io;

use crate::state::CallState;

/// Metadata that cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// Key contains characters that are illegal in a header name.
    InvalidKey { key: String },
    /// Value is not header-safe text, or a `-bin` value is not valid base64.
    InvalidValue { key: String },
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::InvalidKey { key } => write!(f, "invalid metadata key {key:?}"),
            MetadataError::InvalidValue { key } => {
                write!(f, "invalid metadata value for key {key:?}")
            }
        }
    }
}

impl std::error::Error for MetadataError {}

/// Failure to set a call up. No session exists when this is returned,
/// and no event will ever be delivered.
#[derive(Debug)]
pub enum SetupError {
    /// Outbound metadata could not be encoded for the wire.
    Metadata(MetadataError),
    /// The channel or its credentials could not be constructed.
    Connect(io::Error),
    /// The dispatcher worker could not be spawned.
    Worker(io::Error),
}

impl std::fmt::Display for SetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetupError::Metadata(e) => write!(f, "metadata error: {e}"),
            SetupError::Connect(e) => write!(f, "connection setup error: {e}"),
            SetupError::Worker(e) => write!(f, "failed to spawn session worker: {e}"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Metadata(e) => Some(e),
            SetupError::Connect(e) => Some(e),
            SetupError::Worker(e) => Some(e),
        }
    }
}

impl From<MetadataError> for SetupError {
    fn from(e: MetadataError) -> Self {
        SetupError::Metadata(e)
    }
}

/// A command that is a programming error in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// `send` after the write side was closed, after the call entered
    /// `Finishing`, or a second payload on a non-client-streaming call.
    InvalidState { state: CallState },
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::InvalidState { state } => {
                write!(f, "cannot send in call state {state:?}")
            }
        }
    }
}

impl std::error::Error for SendError {}
