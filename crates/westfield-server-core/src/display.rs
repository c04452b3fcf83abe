//! The display: listening sockets, clients and the dispatch loop
//!
//! All state lives behind one `RefCell`. Borrows are scoped to each step and
//! never held while a listener or the wire hook runs, so listeners may call
//! back into any display or client operation, including destroying clients.

use crate::client::{Client, ClientState};
use crate::config::DisplayConfig;
use crate::connection::{Connection, FlushOutcome, ReadOutcome};
use crate::error::Result;
use crate::event_loop::{EventLoop, Interest, Ready, Source};
use crate::shm::ShmSupport;
use crate::signal::{ListenerId, Signal};
use crate::socket::ListeningSocket;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};
use westfield_types::{ClientId, DisconnectReason, ShmFormat};

/// Notified for every accepted client, before any of its input is read
pub type ClientCreatedListener = dyn Fn(&Client);

/// Notified once when the display is destroyed, after all clients
pub type DisplayDestroyListener = dyn Fn();

pub(crate) struct DisplayState {
    pub sockets: Vec<ListeningSocket>,
    pub clients: BTreeMap<ClientId, ClientState>,
    pub next_client_id: u32,
    pub client_created: Signal<ClientCreatedListener>,
    pub destroy: Signal<DisplayDestroyListener>,
    pub shm: Option<ShmSupport>,
    pub terminated: bool,
    pub destroyed: bool,
}

pub(crate) struct DisplayShared {
    pub config: DisplayConfig,
    pub event_loop: EventLoop,
    pub state: RefCell<DisplayState>,
}

/// Root engine object
pub struct Display {
    shared: Rc<DisplayShared>,
}

impl Display {
    /// Create a display with no sockets and no clients
    pub fn new(config: DisplayConfig) -> Result<Self> {
        config.validate()?;
        let event_loop = EventLoop::new()?;
        let shared = Rc::new(DisplayShared {
            config,
            event_loop,
            state: RefCell::new(DisplayState {
                sockets: Vec::new(),
                clients: BTreeMap::new(),
                next_client_id: 0,
                client_created: Signal::new(),
                destroy: Signal::new(),
                shm: None,
                terminated: false,
                destroyed: false,
            }),
        });
        Ok(Self { shared })
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.shared.config
    }

    /// Listen on the first free automatically numbered socket name
    pub fn add_socket_auto(&self) -> Result<String> {
        let config = &self.shared.config;
        let dir = config.resolve_runtime_dir()?;
        let socket =
            ListeningSocket::bind_auto(&dir, &config.socket_prefix, config.max_socket_index)?;
        let name = socket.name().to_string();
        self.register_socket(socket)?;
        Ok(name)
    }

    /// Listen on an explicitly named socket
    pub fn add_socket(&self, name: &str) -> Result<()> {
        let dir = self.shared.config.resolve_runtime_dir()?;
        let socket = ListeningSocket::bind(&dir, name.parse()?)?;
        self.register_socket(socket)
    }

    fn register_socket(&self, socket: ListeningSocket) -> Result<()> {
        let mut state = self.shared.state.borrow_mut();
        let index = state.sockets.len();
        if !state.terminated {
            self.shared
                .event_loop
                .register(socket.listener(), Source::Listener(index), Interest::Readable)?;
        }
        debug!(socket = %socket.name(), "Added listening socket");
        state.sockets.push(socket);
        Ok(())
    }

    /// Names of all listening sockets
    pub fn socket_names(&self) -> Vec<String> {
        let state = self.shared.state.borrow();
        state.sockets.iter().map(|s| s.name().to_string()).collect()
    }

    /// The event loop's pollable descriptor
    pub fn event_loop_fd(&self) -> RawFd {
        self.shared.event_loop.fd()
    }

    /// Run one event loop iteration; `None` blocks until something is
    /// ready. Returns the number of ready descriptors handled.
    pub fn dispatch(&self, timeout: Option<Duration>) -> Result<usize> {
        dispatch(&self.shared, timeout)
    }

    /// Flush every client's queued output
    pub fn flush_clients(&self) {
        let ids: Vec<ClientId> = self.shared.state.borrow().clients.keys().copied().collect();
        for id in ids {
            flush_client(&self.shared, id);
        }
    }

    /// Stop accepting new clients
    pub fn terminate(&self) {
        let mut state = self.shared.state.borrow_mut();
        if state.terminated {
            return;
        }
        state.terminated = true;
        for socket in &state.sockets {
            if let Err(e) = self.shared.event_loop.deregister(socket.listener()) {
                warn!(socket = %socket.name(), error = %e, "Failed to stop listening");
            }
        }
        debug!("Display terminated");
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.state.borrow().terminated
    }

    /// Destroy every client, in ascending id order
    pub fn destroy_clients(&self) {
        let ids: Vec<ClientId> = self.shared.state.borrow().clients.keys().copied().collect();
        for id in ids {
            destroy_client(&self.shared, id, DisconnectReason::DisplayTeardown);
        }
    }

    /// Adopt an already connected stream as a client
    pub fn create_client(&self, stream: UnixStream) -> Result<Client> {
        create_client(&self.shared, stream)
    }

    pub fn client(&self, id: ClientId) -> Option<Client> {
        let state = self.shared.state.borrow();
        state
            .clients
            .contains_key(&id)
            .then(|| Client::new(id, &self.shared))
    }

    pub fn clients(&self) -> Vec<Client> {
        let state = self.shared.state.borrow();
        state
            .clients
            .keys()
            .map(|id| Client::new(*id, &self.shared))
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.shared.state.borrow().clients.len()
    }

    pub fn add_client_created_listener(&self, listener: Rc<ClientCreatedListener>) -> ListenerId {
        self.shared.state.borrow_mut().client_created.add(listener)
    }

    pub fn remove_client_created_listener(&self, id: ListenerId) -> bool {
        self.shared.state.borrow_mut().client_created.remove(id)
    }

    pub fn add_destroy_listener(&self, listener: Rc<DisplayDestroyListener>) -> ListenerId {
        self.shared.state.borrow_mut().destroy.add(listener)
    }

    pub fn remove_destroy_listener(&self, id: ListenerId) -> bool {
        self.shared.state.borrow_mut().destroy.remove(id)
    }

    /// Enable shared-memory buffer support. Idempotent.
    pub fn init_shm(&self) {
        let mut state = self.shared.state.borrow_mut();
        if state.shm.is_none() {
            state.shm = Some(ShmSupport::new());
            debug!("Shared memory support initialised");
        }
    }

    /// Advertise an extra shm format, initialising shm support if needed
    pub fn add_shm_format(&self, format: ShmFormat) {
        let mut state = self.shared.state.borrow_mut();
        state.shm.get_or_insert_with(ShmSupport::new).add_format(format);
    }

    /// Advertised shm formats; empty until shm support is initialised
    pub fn shm_formats(&self) -> Vec<ShmFormat> {
        let state = self.shared.state.borrow();
        state.shm.as_ref().map(ShmSupport::formats).unwrap_or_default()
    }

    /// Tear the display down: remaining clients first, then the destroy
    /// listeners, then the sockets.
    pub fn destroy(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        {
            let mut state = self.shared.state.borrow_mut();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }

        self.terminate();
        self.destroy_clients();

        let listeners = {
            let mut state = self.shared.state.borrow_mut();
            state.client_created.clear();
            state.destroy.snapshot()
        };
        for listener in listeners {
            listener();
        }

        let sockets = {
            let mut state = self.shared.state.borrow_mut();
            state.destroy.clear();
            std::mem::take(&mut state.sockets)
        };
        drop(sockets);
        debug!("Display destroyed");
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn dispatch(shared: &Rc<DisplayShared>, timeout: Option<Duration>) -> Result<usize> {
    let ready = shared.event_loop.wait(shared.config.max_events, timeout)?;
    for event in &ready {
        match event.source {
            Source::Listener(index) => accept_clients(shared, index),
            Source::Client(id) => handle_client_ready(shared, id, event),
        }
    }
    Ok(ready.len())
}

fn accept_clients(shared: &Rc<DisplayShared>, index: usize) {
    loop {
        let accepted = {
            let state = shared.state.borrow();
            if state.terminated {
                return;
            }
            match state.sockets.get(index) {
                Some(socket) => socket.accept(),
                None => return,
            }
        };

        match accepted {
            Ok(Some(stream)) => {
                if let Err(e) = create_client(shared, stream) {
                    warn!(error = %e, "Failed to set up accepted client");
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Failed to accept client");
                return;
            }
        }
    }
}

fn create_client(shared: &Rc<DisplayShared>, stream: UnixStream) -> Result<Client> {
    let connection = Connection::new(stream, shared.config.max_buffer_size)?;

    let (id, listeners) = {
        let mut state = shared.state.borrow_mut();
        state.next_client_id += 1;
        let id = ClientId::new(state.next_client_id);
        shared
            .event_loop
            .register(connection.stream(), Source::Client(id), Interest::Readable)?;
        state.clients.insert(id, ClientState::new(connection));
        (id, state.client_created.snapshot())
    };

    debug!(client = %id, "Client created");
    let client = Client::new(id, shared);
    for listener in listeners {
        listener(&client);
    }
    Ok(client)
}

fn handle_client_ready(shared: &Rc<DisplayShared>, id: ClientId, event: &Ready) {
    if event.writable {
        flush_client(shared, id);
    }
    if event.readable {
        read_client(shared, id);
    } else if event.hangup {
        destroy_client(shared, id, DisconnectReason::PeerClosed);
    }
}

fn read_client(shared: &Rc<DisplayShared>, id: ClientId) {
    let outcome = {
        let mut state = shared.state.borrow_mut();
        match state.clients.get_mut(&id) {
            Some(client) if !client.destroying => client.connection.read(),
            _ => return,
        }
    };

    match outcome {
        Ok(ReadOutcome::Data(bytes)) => {
            trace!(client = %id, bytes, "Read from client");
            present_input(shared, id);
        }
        Ok(ReadOutcome::WouldBlock) => {}
        Ok(ReadOutcome::Closed) => destroy_client(shared, id, DisconnectReason::PeerClosed),
        Ok(ReadOutcome::Overflow) => {
            warn!(client = %id, "Inbound buffer full and nothing consumed");
            destroy_client(shared, id, DisconnectReason::BufferOverflow);
        }
        Err(e) => {
            warn!(client = %id, error = %e, "Failed to read from client");
            destroy_client(shared, id, DisconnectReason::ConnectionError);
        }
    }
}

/// Lend all buffered input to the wire hook and drop what it consumed
fn present_input(shared: &Rc<DisplayShared>, id: ClientId) {
    let (hook, mut lent) = {
        let mut state = shared.state.borrow_mut();
        let Some(client) = state.clients.get_mut(&id) else {
            return;
        };
        let Some(hook) = client.wire_hook.clone() else {
            return;
        };
        (hook, client.connection.take_input())
    };

    let fds = lent.raw_fds();
    let available = lent.data.len();
    let consumed = hook(&Client::new(id, shared), &lent.data, &fds);

    if consumed > available {
        error!(
            client = %id,
            consumed,
            available,
            "Wire hook consumed more than was buffered, framing lost"
        );
        drop(lent);
        destroy_client(shared, id, DisconnectReason::ProtocolError);
        return;
    }

    trace!(client = %id, consumed, available, fds = fds.len(), "Wire hook returned");
    let mut state = shared.state.borrow_mut();
    match state.clients.get_mut(&id) {
        Some(client) => client.connection.restore_input(lent, consumed, consumed > 0),
        None if consumed > 0 => {
            // Destroyed from inside the hook; the hook still owns what it consumed.
            lent.hand_over_fds();
        }
        None => {}
    }
}

pub(crate) fn flush_client(shared: &Rc<DisplayShared>, id: ClientId) {
    let failed = {
        let mut state = shared.state.borrow_mut();
        let Some(client) = state.clients.get_mut(&id) else {
            return;
        };
        if client.broken {
            true
        } else {
            match client.connection.flush() {
                Ok(FlushOutcome::Done) => {
                    if client.writable_armed {
                        client.writable_armed = false;
                        rearm(shared, id, client, Interest::Readable);
                    }
                    false
                }
                Ok(FlushOutcome::WouldBlock) => {
                    if !client.writable_armed {
                        client.writable_armed = true;
                        rearm(shared, id, client, Interest::ReadWritable);
                    }
                    false
                }
                Err(e) => {
                    warn!(client = %id, error = %e, "Failed to flush client");
                    true
                }
            }
        }
    };

    if failed {
        destroy_client(shared, id, DisconnectReason::ConnectionError);
    }
}

fn rearm(shared: &DisplayShared, id: ClientId, client: &ClientState, interest: Interest) {
    if let Err(e) = shared.event_loop.reregister(
        client.connection.stream(),
        Source::Client(id),
        interest,
    ) {
        warn!(client = %id, error = %e, "Failed to update client interest");
    }
}

/// Destroy a client: flush what can be flushed, notify destroy listeners,
/// then drop the state (closing the socket and any undelivered
/// descriptors). Re-entrant calls for a client already being destroyed
/// are ignored.
pub(crate) fn destroy_client(shared: &Rc<DisplayShared>, id: ClientId, reason: DisconnectReason) {
    let listeners = {
        let mut state = shared.state.borrow_mut();
        let Some(client) = state.clients.get_mut(&id) else {
            return;
        };
        if client.destroying {
            return;
        }
        client.destroying = true;
        if !client.broken && reason != DisconnectReason::ConnectionError {
            if let Err(e) = client.connection.flush() {
                debug!(client = %id, error = %e, "Final flush before destroy failed");
            }
        }
        client.destroy.snapshot()
    };

    if reason.is_local() {
        debug!(client = %id, %reason, "Destroying client");
    } else {
        warn!(client = %id, %reason, "Client disconnected");
    }
    let client = Client::new(id, shared);
    for listener in listeners {
        listener(&client, reason);
    }

    let removed = shared.state.borrow_mut().clients.remove(&id);
    if let Some(state) = removed {
        if let Err(e) = shared.event_loop.deregister(state.connection.stream()) {
            trace!(client = %id, error = %e, "Client socket already gone from event loop");
        }
    }
}
