//! Event-loop bridge

use crate::display::DisplayHandle;
use crate::error::Result;
use std::os::fd::OwnedFd;
use std::time::Duration;

impl DisplayHandle {
    /// Run one non-blocking event loop iteration: accept clients, deliver
    /// wire messages, handle hang-ups. Returns the number of ready
    /// descriptors handled.
    pub fn dispatch_requests(&self) -> Result<usize> {
        self.dispatch_requests_timeout(Some(Duration::ZERO))
    }

    /// Like [`dispatch_requests`](Self::dispatch_requests) but waits up to
    /// `timeout` for something to become ready; `None` waits indefinitely.
    pub fn dispatch_requests_timeout(&self, timeout: Option<Duration>) -> Result<usize> {
        Ok(self.engine().dispatch(timeout)?)
    }

    /// Flush every client's queued events
    pub fn flush_events(&self) {
        self.engine().flush_clients();
    }
}

/// Anonymous, zero-filled, memory-backed file of `size` bytes for shared
/// memory buffers. The caller owns the descriptor.
pub fn create_memory_mapped_file(size: u64) -> Result<OwnedFd> {
    Ok(westfield_server_core::create_anonymous_file(size)?)
}
