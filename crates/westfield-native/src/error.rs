//! Error types for the bridge

use thiserror::Error;
use westfield_server_core::EngineError;

/// Failures of the resource-reference registry.
///
/// Inside the bridge's own handlers these are not recoverable and go
/// through [`crate::fatal`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The reference was already released to zero.
    ///
    /// Ids are counted per registry, so a token presented to a registry
    /// other than the one that issued it is not detected and may resolve
    /// to an unrelated value.
    #[error("reference {0} is stale")]
    Stale(u64),

    /// The reference resolves to a value of another type
    #[error("reference {0} does not hold the requested type")]
    TypeMismatch(u64),

    /// Acquiring would overflow the strong count
    #[error("reference {0} strong count overflow")]
    CountOverflow(u64),
}

/// Bridge errors surfaced to the application
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
