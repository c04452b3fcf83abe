//! Engine-side clients
//!
//! A [`Client`] is a weak handle: the display owns the per-client state and
//! the handle only names it. Every operation on a client whose display or
//! state is gone returns an error instead of touching freed state.

use crate::connection::Connection;
use crate::display::{self, DisplayShared};
use crate::error::{EngineError, Result};
use crate::signal::{ListenerId, Signal};
use std::fmt;
use std::os::fd::{OwnedFd, RawFd};
use std::rc::{Rc, Weak};
use westfield_types::{ClientId, DisconnectReason};

/// Notified once when a client is destroyed, before its socket closes
pub type ClientDestroyListener = dyn Fn(&Client, DisconnectReason);

/// Raw-message interceptor.
///
/// Receives all buffered inbound bytes and any descriptors that arrived
/// with them, and returns how many leading bytes it consumed.
pub type WireHook = dyn Fn(&Client, &[u8], &[RawFd]) -> usize;

pub(crate) struct ClientState {
    pub connection: Connection,
    pub destroy: Signal<ClientDestroyListener>,
    pub wire_hook: Option<Rc<WireHook>>,
    pub destroying: bool,
    pub broken: bool,
    pub writable_armed: bool,
}

impl ClientState {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            destroy: Signal::new(),
            wire_hook: None,
            destroying: false,
            broken: false,
            writable_armed: false,
        }
    }
}

/// Handle to a connected client
#[derive(Clone)]
pub struct Client {
    id: ClientId,
    display: Weak<DisplayShared>,
}

impl Client {
    pub(crate) fn new(id: ClientId, display: &Rc<DisplayShared>) -> Self {
        Self {
            id,
            display: Rc::downgrade(display),
        }
    }

    /// Stable id of this client
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Returns true until the client has been fully destroyed
    pub fn is_alive(&self) -> bool {
        self.display
            .upgrade()
            .is_some_and(|shared| shared.state.borrow().clients.contains_key(&self.id))
    }

    fn shared(&self) -> Result<Rc<DisplayShared>> {
        self.display.upgrade().ok_or(EngineError::DisplayGone)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ClientState) -> R) -> Result<R> {
        let shared = self.shared()?;
        let mut state = shared.state.borrow_mut();
        let client = state
            .clients
            .get_mut(&self.id)
            .ok_or(EngineError::ClientGone(self.id))?;
        Ok(f(client))
    }

    /// Queue bytes for the next flush
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.with_state(|client| client.connection.write(data))
    }

    /// Queue a descriptor for the next flush; it is closed once sent
    pub fn put_fd(&self, fd: OwnedFd) -> Result<()> {
        self.with_state(|client| client.connection.put_fd(fd))?
    }

    /// Flag the connection as failed; the client is destroyed on the next
    /// flush instead of sending anything more.
    pub fn mark_broken(&self) -> Result<()> {
        self.with_state(|client| client.broken = true)
    }

    /// Flush this client's queued output
    pub fn flush(&self) -> Result<()> {
        let shared = self.shared()?;
        display::flush_client(&shared, self.id);
        Ok(())
    }

    /// Destroy the client. Destroy listeners run before this returns.
    pub fn destroy(&self) {
        if let Ok(shared) = self.shared() {
            display::destroy_client(&shared, self.id, DisconnectReason::Destroyed);
        }
    }

    pub fn add_destroy_listener(&self, listener: Rc<ClientDestroyListener>) -> Result<ListenerId> {
        self.with_state(|client| client.destroy.add(listener))
    }

    pub fn remove_destroy_listener(&self, id: ListenerId) -> Result<bool> {
        self.with_state(|client| client.destroy.remove(id))
    }

    /// Install, replace or clear the raw-message interceptor
    pub fn set_wire_hook(&self, hook: Option<Rc<WireHook>>) -> Result<()> {
        self.with_state(|client| client.wire_hook = hook)
    }

    /// Bytes received but not yet consumed
    pub fn pending_input_len(&self) -> Result<usize> {
        self.with_state(|client| client.connection.pending_input_len())
    }

    /// Bytes queued but not yet flushed
    pub fn pending_output_len(&self) -> Result<usize> {
        self.with_state(|client| client.connection.pending_output_len())
    }

    /// Descriptors queued but not yet flushed
    pub fn pending_output_fds(&self) -> Result<usize> {
        self.with_state(|client| client.connection.pending_output_fds())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("id", &self.id).finish()
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.display, &other.display)
    }
}

impl Eq for Client {}
