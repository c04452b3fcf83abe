//! Error types for the server engine

use thiserror::Error;
use westfield_types::{ClientId, ParseError};

/// Server engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Neither the config nor the environment names a runtime directory
    #[error("XDG_RUNTIME_DIR is not set and no runtime_dir is configured")]
    NoRuntimeDir,

    /// Every automatically numbered socket name is taken
    #[error("no free socket name in {prefix}0..{prefix}{limit}")]
    NoFreeSocket { prefix: String, limit: u32 },

    /// Another server holds the lock for this socket name
    #[error("socket {0} is in use by another server")]
    SocketInUse(String),

    /// The client has already been destroyed
    #[error("{0} is gone")]
    ClientGone(ClientId),

    /// The display has already been destroyed
    #[error("display is gone")]
    DisplayGone,

    /// Invalid name or format
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// System call failure
    #[error("System error: {0}")]
    Sys(#[from] nix::errno::Errno),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
