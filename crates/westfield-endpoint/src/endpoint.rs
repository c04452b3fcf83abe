//! The endpoint: a display whose clients' wire frames are consumed and
//! counted through the bridge

use crate::config_file::EndpointConfig;
use crate::error::Result;
use crate::framing::{self, FrameScan};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, trace, warn};
use westfield_native::{
    CallContext, CallbackEvent, ClientCreatedCallback, ClientDestroyedCallback, ClientHandle,
    ClientId, DisplayHandle, Registry, WireMessage, WireMessageCallback,
};

/// Per-client traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub frames: u64,
    pub bytes: u64,
    pub fds: u64,
}

/// Counters over every client the endpoint has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointTotals {
    pub clients_seen: u64,
    pub clients_closed: u64,
    pub framing_errors: u64,
    pub traffic: ClientStats,
}

#[derive(Default)]
struct StatsInner {
    clients: HashMap<ClientId, ClientStats>,
    totals: EndpointTotals,
}

/// Shared view of the endpoint's counters
#[derive(Clone, Default)]
pub struct StatsTable {
    inner: Rc<RefCell<StatsInner>>,
}

impl StatsTable {
    /// Counters of a live client
    pub fn client(&self, id: ClientId) -> Option<ClientStats> {
        self.inner.borrow().clients.get(&id).copied()
    }

    pub fn live_clients(&self) -> usize {
        self.inner.borrow().clients.len()
    }

    pub fn totals(&self) -> EndpointTotals {
        self.inner.borrow().totals
    }

    fn client_created(&self, id: ClientId) {
        let mut inner = self.inner.borrow_mut();
        inner.clients.insert(id, ClientStats::default());
        inner.totals.clients_seen += 1;
    }

    fn record(&self, id: ClientId, scan: &FrameScan, fds: usize) {
        let mut inner = self.inner.borrow_mut();
        let delta = ClientStats {
            frames: scan.frames.len() as u64,
            bytes: scan.consumed as u64,
            fds: fds as u64,
        };
        if let Some(stats) = inner.clients.get_mut(&id) {
            stats.add(delta);
        }
        inner.totals.traffic.add(delta);
    }

    fn framing_error(&self) {
        self.inner.borrow_mut().totals.framing_errors += 1;
    }

    fn client_closed(&self, id: ClientId) -> Option<ClientStats> {
        let mut inner = self.inner.borrow_mut();
        inner.totals.clients_closed += 1;
        inner.clients.remove(&id)
    }
}

impl ClientStats {
    fn add(&mut self, other: ClientStats) {
        self.frames += other.frames;
        self.bytes += other.bytes;
        self.fds += other.fds;
    }
}

/// Raw descriptor of the display's event loop, for reactor registration
struct DisplayFd(RawFd);

impl AsRawFd for DisplayFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

pub struct Endpoint {
    display: DisplayHandle,
    socket: String,
    stats: StatsTable,
}

impl Endpoint {
    /// Create the display, start listening and wire up client callbacks
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        let stats = StatsTable::default();
        let display = DisplayHandle::create_with_config(
            config.display.clone(),
            Registry::new(),
            client_created_callback(stats.clone()),
        )?;

        let socket = match &config.endpoint.socket_name {
            Some(name) => {
                display.add_socket(name)?;
                name.clone()
            }
            None => display.add_socket_auto()?,
        };

        if config.endpoint.init_shm {
            display.init_shm();
        }

        Ok(Self {
            display,
            socket,
            stats,
        })
    }

    pub fn socket_name(&self) -> &str {
        &self.socket
    }

    pub fn display(&self) -> &DisplayHandle {
        &self.display
    }

    pub fn stats(&self) -> StatsTable {
        self.stats.clone()
    }

    /// Handle whatever is ready, waiting up to `timeout`, then flush
    pub fn dispatch(&self, timeout: Option<Duration>) -> Result<usize> {
        let handled = self.display.dispatch_requests_timeout(timeout)?;
        self.display.flush_events();
        Ok(handled)
    }

    /// Serve clients from the current tokio runtime until `shutdown`
    /// completes, then destroy the display.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let fd = AsyncFd::new(DisplayFd(self.display.fd()))?;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                guard = fd.readable() => {
                    let mut guard = guard?;
                    // Drain before clearing: readiness is edge triggered
                    while self.dispatch(Some(Duration::ZERO))? > 0 {}
                    guard.clear_ready();
                }
                () = &mut shutdown => break,
            }
        }

        drop(fd);
        self.shutdown();
        Ok(())
    }

    /// Destroy the display and every client on it
    pub fn shutdown(self) {
        let totals = self.stats.totals();
        self.display.destroy();
        info!(
            clients = totals.clients_seen,
            frames = totals.traffic.frames,
            bytes = totals.traffic.bytes,
            framing_errors = totals.framing_errors,
            "Endpoint stopped"
        );
    }
}

fn client_created_callback(stats: StatsTable) -> Rc<ClientCreatedCallback> {
    Rc::new(move |_: &CallContext<'_>, client: &ClientHandle| {
        debug!(client = %client.id(), "Client connected");
        stats.client_created(client.id());
        client.set_destroyed_callback(client_destroyed_callback(stats.clone()));
        client.set_wire_message_callback(wire_message_callback(stats.clone()));
    })
}

fn client_destroyed_callback(stats: StatsTable) -> Rc<ClientDestroyedCallback> {
    Rc::new(move |ctx: &CallContext<'_>, client: &ClientHandle| {
        let reason = match ctx.event() {
            CallbackEvent::ClientDestroyed(reason) => reason.to_string(),
            other => format!("{other:?}"),
        };
        let totals = stats.client_closed(client.id()).unwrap_or_default();
        info!(
            client = %client.id(),
            %reason,
            frames = totals.frames,
            bytes = totals.bytes,
            fds = totals.fds,
            "Client disconnected"
        );
    })
}

fn wire_message_callback(stats: StatsTable) -> Rc<WireMessageCallback> {
    Rc::new(
        move |_: &CallContext<'_>, client: &ClientHandle, message: &WireMessage<'_>| {
            let scan = match framing::scan_frames(message.bytes()) {
                Ok(scan) => scan,
                Err(e) => {
                    warn!(client = %client.id(), error = %e, "Dropping client");
                    stats.framing_error();
                    client.destroy();
                    return 0;
                }
            };

            for frame in &scan.frames {
                trace!(
                    client = %client.id(),
                    object = frame.object_id,
                    opcode = frame.opcode,
                    size = frame.size,
                    "Frame"
                );
            }

            let fds = message.fds().unwrap_or_default();
            if scan.consumed > 0 {
                // Consuming bytes takes ownership of the lent descriptors
                for fd in fds {
                    // SAFETY: handed over by the engine, owned by nobody else
                    drop(unsafe { OwnedFd::from_raw_fd(*fd) });
                }
                stats.record(client.id(), &scan, fds.len());
            }
            scan.consumed
        },
    )
}
