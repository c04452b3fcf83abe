//! Westfield endpoint daemon
//!
//! Listens on a display socket, consumes every client's complete wire
//! frames through the bridge and keeps per-client traffic counters.

pub mod config_file;
pub mod endpoint;
pub mod error;
pub mod framing;

pub use config_file::{EndpointConfig, EndpointSection, LoggingConfig};
pub use endpoint::{ClientStats, Endpoint, EndpointTotals, StatsTable};
pub use error::{EndpointError, Result};
pub use framing::{scan_frames, FrameHeader, FrameScan, FramingError};
