//! Shared-memory support
//!
//! Tracks the pixel formats advertised to clients and allocates the
//! anonymous files that back shared-memory pools.

use crate::error::Result;
use nix::errno::Errno;
use std::collections::BTreeSet;
use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::PathBuf;
use tracing::{debug, warn};
use westfield_types::ShmFormat;

/// Formats advertised once shm support is initialised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmSupport {
    formats: BTreeSet<ShmFormat>,
}

impl ShmSupport {
    pub fn new() -> Self {
        Self {
            formats: [ShmFormat::ARGB8888, ShmFormat::XRGB8888].into_iter().collect(),
        }
    }

    /// Advertise an extra format. Returns false if already advertised.
    pub fn add_format(&mut self, format: ShmFormat) -> bool {
        self.formats.insert(format)
    }

    pub fn formats(&self) -> Vec<ShmFormat> {
        self.formats.iter().copied().collect()
    }
}

impl Default for ShmSupport {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a zero-filled anonymous file of `size` bytes.
///
/// Prefers a sealable memfd; falls back to an unlinked file in
/// `$XDG_RUNTIME_DIR` (or the system temp dir) on kernels without memfd.
pub fn create_anonymous_file(size: u64) -> Result<OwnedFd> {
    let fd = match create_memfd() {
        Ok(fd) => fd,
        Err(errno) => {
            let dir = std::env::var_os("XDG_RUNTIME_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir);
            debug!(error = %errno, dir = %dir.display(), "memfd unavailable, using tmpfile");
            OwnedFd::from(tempfile::tempfile_in(dir)?)
        }
    };

    let file = File::from(fd);
    file.set_len(size)?;
    Ok(OwnedFd::from(file))
}

fn create_memfd() -> std::result::Result<OwnedFd, Errno> {
    let raw = unsafe {
        libc::memfd_create(
            c"westfield-shared".as_ptr(),
            libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING,
        )
    };
    if raw < 0 {
        return Err(Errno::last());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    // Pools are mapped by clients; they must never shrink under them.
    let sealed = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_ADD_SEALS, libc::F_SEAL_SHRINK) };
    if sealed < 0 {
        warn!(error = %Errno::last(), "Failed to seal anonymous file");
    }
    Ok(fd)
}
