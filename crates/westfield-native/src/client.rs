//! Client lifecycle manager
//!
//! Every engine client gets one [`ClientRecord`] at creation time, kept in
//! the display's side table under its [`ClientId`]. The record holds the
//! registry references for the application-side handle and the two
//! callback slots. The engine destroy listener is the only place a record
//! is freed.

use crate::context::{CallContext, CallbackEvent};
use crate::display::DisplayState;
use crate::fatal;
use crate::registry::Reference;
use crate::wire::{self, WireMessage};
use std::cell::Cell;
use std::fmt;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use tracing::debug;
use westfield_server_core::Client;
use westfield_types::{ClientId, DisconnectReason};

/// Called once when a client is destroyed, before its connection closes
pub type ClientDestroyedCallback = dyn Fn(&CallContext<'_>, &ClientHandle);

/// Called with buffered inbound bytes; returns how many leading bytes
/// were consumed. The remainder is presented again with the next read.
pub type WireMessageCallback = dyn Fn(&CallContext<'_>, &ClientHandle, &WireMessage<'_>) -> usize;

/// Bridge bookkeeping for one client
pub(crate) struct ClientRecord {
    pub handle: Reference<ClientHandle>,
    pub destroy: Option<Reference<ClientDestroyedCallback>>,
    pub wire_message: Option<Reference<WireMessageCallback>>,
}

/// Application-side value for an engine client.
///
/// Valid from the client-created callback until the client's destroy
/// callback has returned. Using it afterwards is a contract violation and
/// panics.
#[derive(Clone)]
pub struct ClientHandle {
    client: Client,
    display: Weak<DisplayState>,
    alive: Rc<Cell<bool>>,
}

impl ClientHandle {
    pub fn id(&self) -> ClientId {
        self.client.id()
    }

    /// False once the bridge has released this client
    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// The engine client, after checking the handle is still valid
    pub(crate) fn engine(&self) -> &Client {
        assert!(self.alive.get(), "{} used after it was destroyed", self.id());
        &self.client
    }

    fn state(&self) -> Rc<DisplayState> {
        assert!(self.alive.get(), "{} used after it was destroyed", self.id());
        match self.display.upgrade() {
            Some(state) => state,
            None => panic!("{} used after its display was destroyed", self.id()),
        }
    }

    /// Register the destroy callback, releasing any previous one
    pub fn set_destroyed_callback(&self, callback: Rc<ClientDestroyedCallback>) {
        let state = self.state();
        let reference = state.registry.create_reference(callback);
        let previous = self.with_record(&state, |record| record.destroy.replace(reference));
        if let Some(previous) = previous {
            state
                .registry
                .release(previous)
                .unwrap_or_else(|e| fatal("releasing replaced destroy callback", &e));
        }
    }

    /// Register the wire message callback, releasing any previous one
    pub fn set_wire_message_callback(&self, callback: Rc<WireMessageCallback>) {
        let state = self.state();
        let reference = state.registry.create_reference(callback);
        let previous = self.with_record(&state, |record| record.wire_message.replace(reference));
        if let Some(previous) = previous {
            state
                .registry
                .release(previous)
                .unwrap_or_else(|e| fatal("releasing replaced wire message callback", &e));
        }
    }

    /// Destroy the client. The destroy callback, if any, runs before this
    /// returns.
    pub fn destroy(&self) {
        self.engine().destroy();
    }

    fn with_record<R>(&self, state: &DisplayState, f: impl FnOnce(&mut ClientRecord) -> R) -> R {
        let mut clients = state.clients.borrow_mut();
        match clients.get_mut(&self.id()) {
            Some(record) => f(record),
            None => panic!("{} has no bridge record", self.id()),
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id())
            .field("alive", &self.alive.get())
            .finish()
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.client == other.client
    }
}

impl Eq for ClientHandle {}

/// Engine client-created listener
pub(crate) fn on_client_created(state: &Rc<DisplayState>, client: &Client) {
    let alive = Rc::new(Cell::new(true));
    let handle = ClientHandle {
        client: client.clone(),
        display: Rc::downgrade(state),
        alive: Rc::clone(&alive),
    };
    let handle_ref = state
        .registry
        .create_reference_with_finalizer(Rc::new(handle.clone()), move || alive.set(false));

    let weak = Rc::downgrade(state);
    client
        .add_destroy_listener(Rc::new(move |client: &Client, reason: DisconnectReason| {
            if let Some(state) = weak.upgrade() {
                on_client_destroyed(&state, client, reason);
            }
        }))
        .unwrap_or_else(|e| fatal("attaching client destroy listener", &e));

    let weak = Rc::downgrade(state);
    client
        .set_wire_hook(Some(Rc::new(
            move |client: &Client, bytes: &[u8], fds: &[RawFd]| match weak.upgrade() {
                Some(state) => wire::on_wire_message(&state, client, bytes, fds),
                None => 0,
            },
        )))
        .unwrap_or_else(|e| fatal("installing wire hook", &e));

    state.clients.borrow_mut().insert(
        client.id(),
        ClientRecord {
            handle: handle_ref,
            destroy: None,
            wire_message: None,
        },
    );
    debug!(client = %client.id(), "Client attached to bridge");

    let callback = {
        let slot = state.on_client_created.borrow();
        match slot.as_ref() {
            Some(reference) => state
                .registry
                .get(reference)
                .unwrap_or_else(|e| fatal("client created callback lookup", &e)),
            None => return,
        }
    };
    let ctx = CallContext::new(&state.registry, CallbackEvent::ClientCreated);
    callback(&ctx, &handle);
}

/// Engine client destroy listener: notify, then free the record.
pub(crate) fn on_client_destroyed(state: &DisplayState, client: &Client, reason: DisconnectReason) {
    let (callback, handle) = {
        let clients = state.clients.borrow();
        let Some(record) = clients.get(&client.id()) else {
            return;
        };
        let callback = record.destroy.as_ref().map(|reference| {
            state
                .registry
                .get(reference)
                .unwrap_or_else(|e| fatal("destroy callback lookup", &e))
        });
        let handle = state
            .registry
            .get(&record.handle)
            .unwrap_or_else(|e| fatal("client handle lookup", &e));
        (callback, handle)
    };

    if let Some(callback) = callback {
        let ctx = CallContext::new(&state.registry, CallbackEvent::ClientDestroyed(reason));
        callback(&ctx, &handle);
    }
    drop(handle);

    let record = state.clients.borrow_mut().remove(&client.id());
    if let Some(record) = record {
        let ClientRecord {
            handle,
            destroy,
            wire_message,
        } = record;
        let release = |what: &str, result| {
            if let Err(e) = result {
                fatal(what, &e);
            }
        };
        release("releasing client handle", state.registry.release(handle));
        if let Some(destroy) = destroy {
            release("releasing destroy callback", state.registry.release(destroy));
        }
        if let Some(wire_message) = wire_message {
            release("releasing wire message callback", state.registry.release(wire_message));
        }
    }
    debug!(client = %client.id(), %reason, "Client released from bridge");
}
