//! Common Westfield types shared by the protocol engine and the bridge.
//!
//! This crate provides type-safe representations of the few values that
//! cross the engine/bridge boundary:
//!
//! - [`ClientId`]: stable per-display identity of a connected client
//! - [`DisconnectReason`]: why a client is being torn down
//! - [`SocketName`]: validated name of a listening endpoint
//! - [`ShmFormat`]: pixel formats advertised by shared-memory support

mod client;
mod shm;
mod socket;

pub use client::{ClientId, DisconnectReason};
pub use shm::ShmFormat;
pub use socket::SocketName;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid client id: {0}")]
    InvalidClientId(String),

    #[error("invalid socket name: {0}")]
    InvalidSocketName(String),

    #[error("invalid shm format: {0}")]
    InvalidShmFormat(String),
}
