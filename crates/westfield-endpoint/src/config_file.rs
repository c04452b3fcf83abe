//! Configuration file support for the endpoint daemon
//!
//! Loads and validates configuration from TOML files.
//! Default location: /etc/westfield/endpoint.toml

use crate::error::{EndpointError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use westfield_native::DisplayConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/westfield/endpoint.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Endpoint behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSection {
    /// Advertise shared-memory buffer support
    #[serde(default = "default_init_shm")]
    pub init_shm: bool,

    /// Fixed socket name; the first free automatic name when unset
    #[serde(default)]
    pub socket_name: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Complete endpoint configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub endpoint: EndpointSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_init_shm() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            init_shm: default_init_shm(),
            socket_name: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl EndpointConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map_err(|e| {
                EndpointError::Configuration(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Logging is not set up yet
                eprintln!(
                    "westfield-endpoint: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(EndpointError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.display
            .validate()
            .map_err(|e| EndpointError::Configuration(e.to_string()))?;

        if let Some(name) = &self.endpoint.socket_name {
            name.parse::<westfield_types::SocketName>()
                .map_err(|e| EndpointError::Configuration(e.to_string()))?;
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(EndpointError::Configuration(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}
