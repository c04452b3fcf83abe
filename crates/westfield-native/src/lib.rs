//! Bridge between the Westfield server engine and application callbacks.
//!
//! The engine owns displays, clients and connections. This crate lets an
//! application observe and drive them through callbacks while keeping
//! every callback and handle alive for exactly as long as it can be used:
//!
//! - [`DisplayHandle`]: creates and destroys the engine display and
//!   reports new clients
//! - [`ClientHandle`]: destroy and wire-message callbacks per client,
//!   plus [`ClientHandle::send_events`] for outbound bytes and descriptors
//! - [`WireMessage`]: zero-copy view of a client's buffered input
//! - [`Registry`]: reference counting for everything the bridge holds
//!
//! # Re-entrancy
//!
//! Callbacks run synchronously from inside dispatch or destroy calls. The
//! bridge holds no internal borrow while a callback runs, so callbacks may
//! register callbacks, send events or destroy clients, including the one
//! they were called for.

mod client;
mod context;
mod display;
mod error;
mod event_loop;
mod io;
mod registry;
mod wire;

pub use client::{ClientDestroyedCallback, ClientHandle, WireMessageCallback};
pub use context::{CallContext, CallbackEvent};
pub use display::{ClientCreatedCallback, DisplayHandle};
pub use error::{BridgeError, RegistryError, Result};
pub use event_loop::create_memory_mapped_file;
pub use registry::{Reference, Registry, RegistryStats};
pub use westfield_server_core::DisplayConfig;
pub use wire::WireMessage;
pub use westfield_types::{ClientId, DisconnectReason, ShmFormat};

/// Abort on a failure the bridge has no way to recover from.
///
/// Used for registry failures inside the bridge's own handlers: a stale
/// or mistyped reference there means bookkeeping is already corrupt.
pub fn fatal(what: &str, err: &dyn std::fmt::Display) -> ! {
    tracing::error!(error = %err, "{what} failed, aborting");
    std::process::abort()
}
