//! Error types for the endpoint daemon

use crate::framing::FramingError;
use thiserror::Error;
use westfield_native::BridgeError;

#[derive(Error, Debug)]
pub enum EndpointError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Display or client operation failed
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Malformed wire frame
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for endpoint operations
pub type Result<T> = std::result::Result<T, EndpointError>;
