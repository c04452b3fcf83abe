//! Wire interception bridge
//!
//! Installed as every client's raw-message hook. Inbound bytes and the
//! descriptors that came with them are lent to the application's wire
//! callback as a borrowed [`WireMessage`]; the callback's consumed count
//! goes straight back to the engine.

use crate::client::{ClientHandle, WireMessageCallback};
use crate::context::{CallContext, CallbackEvent};
use crate::display::DisplayState;
use crate::fatal;
use std::os::fd::RawFd;
use std::rc::Rc;
use tracing::trace;
use westfield_server_core::Client;

/// Borrowed view of buffered inbound bytes and their descriptors.
///
/// Only valid for the duration of the callback it is passed to.
#[derive(Debug, Clone, Copy)]
pub struct WireMessage<'a> {
    bytes: &'a [u8],
    fds: &'a [RawFd],
}

impl<'a> WireMessage<'a> {
    pub fn new(bytes: &'a [u8], fds: &'a [RawFd]) -> Self {
        Self { bytes, fds }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes as native-endian 32-bit words. A trailing partial word is
    /// not included.
    pub fn words(&self) -> impl Iterator<Item = u32> + 'a {
        self.bytes
            .chunks_exact(4)
            .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
    }

    /// Descriptors received with these bytes, `None` when there are none
    pub fn fds(&self) -> Option<&'a [RawFd]> {
        (!self.fds.is_empty()).then_some(self.fds)
    }
}

/// Engine wire hook: resolve the client's wire callback and ask it how
/// much of the buffered input it consumed. Zero when no callback is set.
pub(crate) fn on_wire_message(
    state: &DisplayState,
    client: &Client,
    bytes: &[u8],
    fds: &[RawFd],
) -> usize {
    let (callback, handle) = {
        let clients = state.clients.borrow();
        let Some(record) = clients.get(&client.id()) else {
            return 0;
        };
        let Some(callback) = &record.wire_message else {
            return 0;
        };
        let callback: Rc<WireMessageCallback> = state
            .registry
            .get(callback)
            .unwrap_or_else(|e| fatal("wire message callback lookup", &e));
        let handle: Rc<ClientHandle> = state
            .registry
            .get(&record.handle)
            .unwrap_or_else(|e| fatal("client handle lookup", &e));
        (callback, handle)
    };

    let message = WireMessage::new(bytes, fds);
    let ctx = CallContext::new(&state.registry, CallbackEvent::WireMessage);
    let consumed = callback(&ctx, &handle, &message);
    trace!(client = %client.id(), len = message.len(), consumed, "Wire message delivered");
    consumed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_words_are_native_endian() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u32.to_ne_bytes());
        bytes.extend_from_slice(&(12u32 << 16 | 1).to_ne_bytes());
        bytes.push(0xff);

        let message = WireMessage::new(&bytes, &[]);
        assert_eq!(message.len(), 9);
        assert_eq!(message.words().collect::<Vec<_>>(), vec![7, 12 << 16 | 1]);
    }

    #[test]
    fn test_fds_none_when_empty() {
        assert_eq!(WireMessage::new(b"", &[]).fds(), None);
        assert_eq!(WireMessage::new(b"abcd", &[3, 4]).fds(), Some(&[3, 4][..]));
    }
}
