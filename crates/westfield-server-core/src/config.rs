//! Display configuration
//!
//! Embedded as the `[display]` table of endpoint configuration files.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default cap on buffered inbound bytes per client.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 4096;

/// Most descriptors sent with a single `sendmsg`.
pub const MAX_FDS_OUT: usize = 28;

/// Display engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Directory holding listening sockets; `$XDG_RUNTIME_DIR` when unset
    #[serde(default)]
    pub runtime_dir: Option<PathBuf>,

    /// Prefix for automatically numbered socket names
    #[serde(default = "default_socket_prefix")]
    pub socket_prefix: String,

    /// Upper bound (exclusive) for automatic socket numbering
    #[serde(default = "default_max_socket_index")]
    pub max_socket_index: u32,

    /// Maximum buffered, unconsumed inbound bytes per client
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Maximum ready events handled per dispatch iteration
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

fn default_socket_prefix() -> String {
    "wayland-".to_string()
}

fn default_max_socket_index() -> u32 {
    32
}

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_max_events() -> usize {
    32
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            socket_prefix: default_socket_prefix(),
            max_socket_index: default_max_socket_index(),
            max_buffer_size: default_max_buffer_size(),
            max_events: default_max_events(),
        }
    }
}

impl DisplayConfig {
    /// Config rooted at an explicit runtime directory
    pub fn with_runtime_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Resolve the runtime directory, falling back to `$XDG_RUNTIME_DIR`
    pub fn resolve_runtime_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.runtime_dir {
            return Ok(dir.clone());
        }
        std::env::var_os("XDG_RUNTIME_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .ok_or(EngineError::NoRuntimeDir)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.socket_prefix.is_empty() || self.socket_prefix.contains('/') {
            return Err(EngineError::Configuration(
                "socket_prefix must be a non-empty path component".to_string(),
            ));
        }

        if self.max_socket_index == 0 {
            return Err(EngineError::Configuration(
                "max_socket_index must be > 0".to_string(),
            ));
        }

        if self.max_buffer_size < 8 {
            return Err(EngineError::Configuration(
                "max_buffer_size must hold at least one message header".to_string(),
            ));
        }

        if self.max_events == 0 {
            return Err(EngineError::Configuration(
                "max_events must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
