//! Minimal Wayland-style server engine
//!
//! Provides a [`Display`] that listens on named unix sockets in the runtime
//! directory, accepts clients, moves raw bytes and file descriptors over
//! their connections and dispatches everything from a single epoll loop.
//! Message decoding is left to whoever installs a [`WireHook`].

mod client;
mod config;
mod connection;
mod display;
mod error;
mod event_loop;
mod shm;
mod signal;
mod socket;

pub use client::{Client, ClientDestroyListener, WireHook};
pub use config::{DisplayConfig, DEFAULT_MAX_BUFFER_SIZE, MAX_FDS_OUT};
pub use display::{ClientCreatedListener, Display, DisplayDestroyListener};
pub use error::{EngineError, Result};
pub use shm::{create_anonymous_file, ShmSupport};
pub use signal::{ListenerId, Signal};
pub use westfield_types::{ClientId, DisconnectReason, ShmFormat, SocketName};
