//! Connection I/O bridge

use crate::client::ClientHandle;
use std::io;
use std::mem;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use tracing::{trace, warn};

const FD_SIZE: usize = mem::size_of::<RawFd>();

impl ClientHandle {
    /// Queue pre-built event bytes and descriptors for the client.
    ///
    /// `fd_bytes` is a packed array of native-endian descriptors. Each is
    /// duplicated, so the caller keeps its own copies. Nothing is flushed
    /// here, and failures are not reported: a descriptor that cannot be
    /// passed breaks the connection and the client is destroyed on the
    /// next flush.
    pub fn send_events(&self, bytes: &[u8], fd_bytes: &[u8]) {
        let client = self.engine();
        if let Err(e) = client.write(bytes) {
            warn!(client = %self.id(), error = %e, "Dropping events");
            return;
        }

        let chunks = fd_bytes.chunks_exact(FD_SIZE);
        if !chunks.remainder().is_empty() {
            warn!(
                client = %self.id(),
                trailing = chunks.remainder().len(),
                "Ignoring partial descriptor"
            );
        }

        for chunk in chunks {
            let mut raw = [0u8; FD_SIZE];
            raw.copy_from_slice(chunk);
            let fd = RawFd::from_ne_bytes(raw);

            let queued = dup_cloexec(fd).and_then(|dup| {
                client.put_fd(dup).map_err(io::Error::other)
            });
            if let Err(e) = queued {
                warn!(client = %self.id(), fd, error = %e, "Cannot pass descriptor");
                if let Err(e) = client.mark_broken() {
                    trace!(client = %self.id(), error = %e, "Client already gone");
                }
                return;
            }
        }

        trace!(
            client = %self.id(),
            bytes = bytes.len(),
            fds = fd_bytes.len() / FD_SIZE,
            "Events queued"
        );
    }
}

fn dup_cloexec(fd: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: fcntl accepts any integer and reports bad descriptors via errno.
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
    if dup < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `dup` is a fresh descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(dup) })
}
