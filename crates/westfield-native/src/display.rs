//! Display lifecycle manager

use crate::client::{self, ClientHandle, ClientRecord};
use crate::context::CallContext;
use crate::error::Result;
use crate::fatal;
use crate::registry::{Reference, Registry};
use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::rc::Rc;
use tracing::{debug, info};
use westfield_server_core::{Client, Display, DisplayConfig};
use westfield_types::{ClientId, ShmFormat};

/// Called for every new client, before any of its wire messages
pub type ClientCreatedCallback = dyn Fn(&CallContext<'_>, &ClientHandle);

/// Bridge state shared by one display's listeners and client handles
pub(crate) struct DisplayState {
    pub registry: Registry,
    pub clients: RefCell<HashMap<ClientId, ClientRecord>>,
    /// Released by the display destroy listener
    pub on_client_created: RefCell<Option<Reference<ClientCreatedCallback>>>,
}

/// Application-side handle to a display and its bridge state
pub struct DisplayHandle {
    // Dropped first: engine teardown still needs the bridge state.
    display: Display,
    state: Rc<DisplayState>,
}

impl DisplayHandle {
    /// Create a display with the default config and a private registry
    pub fn create(on_client_created: Rc<ClientCreatedCallback>) -> Result<Self> {
        Self::create_with_config(DisplayConfig::default(), Registry::new(), on_client_created)
    }

    pub fn create_with_config(
        config: DisplayConfig,
        registry: Registry,
        on_client_created: Rc<ClientCreatedCallback>,
    ) -> Result<Self> {
        let display = Display::new(config)?;
        let state = Rc::new(DisplayState {
            on_client_created: RefCell::new(Some(registry.create_reference(on_client_created))),
            registry,
            clients: RefCell::new(HashMap::new()),
        });

        let weak = Rc::downgrade(&state);
        display.add_client_created_listener(Rc::new(move |client: &Client| {
            if let Some(state) = weak.upgrade() {
                client::on_client_created(&state, client);
            }
        }));

        let weak = Rc::downgrade(&state);
        display.add_destroy_listener(Rc::new(move || {
            if let Some(state) = weak.upgrade() {
                on_display_destroyed(&state);
            }
        }));

        debug!("Display created");
        Ok(Self { display, state })
    }

    /// Stop accepting, destroy every client, then tear down the display.
    /// Every client's destroy callback runs before this returns.
    pub fn destroy(self) {
        let Self { display, state } = self;
        display.destroy();
        info!(
            live_references = state.registry.live_references(),
            "Display destroyed"
        );
    }

    /// Listen on the first free `wayland-N` style socket
    pub fn add_socket_auto(&self) -> Result<String> {
        let name = self.display.add_socket_auto()?;
        info!(socket = %name, "Listening");
        Ok(name)
    }

    pub fn add_socket(&self, name: &str) -> Result<()> {
        self.display.add_socket(name)?;
        info!(socket = %name, "Listening");
        Ok(())
    }

    pub fn socket_names(&self) -> Vec<String> {
        self.display.socket_names()
    }

    /// Pollable descriptor of the display's event loop
    pub fn fd(&self) -> RawFd {
        self.display.event_loop_fd()
    }

    pub fn init_shm(&self) {
        self.display.init_shm();
    }

    pub fn shm_formats(&self) -> Vec<ShmFormat> {
        self.display.shm_formats()
    }

    pub fn registry(&self) -> &Registry {
        &self.state.registry
    }

    pub fn client_count(&self) -> usize {
        self.state.clients.borrow().len()
    }

    /// Handles of all live clients, in no particular order
    pub fn clients(&self) -> Vec<ClientHandle> {
        let clients = self.state.clients.borrow();
        clients
            .values()
            .map(|record| {
                let handle = self
                    .state
                    .registry
                    .get(&record.handle)
                    .unwrap_or_else(|e| fatal("client handle lookup", &e));
                ClientHandle::clone(&handle)
            })
            .collect()
    }

    pub(crate) fn engine(&self) -> &Display {
        &self.display
    }
}

fn on_display_destroyed(state: &DisplayState) {
    let callback = state.on_client_created.borrow_mut().take();
    if let Some(callback) = callback {
        state
            .registry
            .release(callback)
            .unwrap_or_else(|e| fatal("releasing client created callback", &e));
    }
}
