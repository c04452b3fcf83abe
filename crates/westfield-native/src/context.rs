//! Per-call context handed to every application callback

use crate::registry::Registry;
use westfield_types::DisconnectReason;

/// Which bridge event is being delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackEvent {
    ClientCreated,
    WireMessage,
    ClientDestroyed(DisconnectReason),
}

/// Context for one callback invocation.
///
/// Built fresh for each call and passed by reference, so a callback always
/// has the registry at hand, including when it runs from inside a display
/// teardown.
#[derive(Debug)]
pub struct CallContext<'a> {
    registry: &'a Registry,
    event: CallbackEvent,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(registry: &'a Registry, event: CallbackEvent) -> Self {
        Self { registry, event }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn event(&self) -> CallbackEvent {
        self.event
    }
}
