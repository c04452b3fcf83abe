//! Listening sockets in the runtime directory
//!
//! Each socket `<dir>/<name>` is guarded by `<dir>/<name>.lock`, held with
//! an exclusive non-blocking `flock` for the socket's lifetime. Holding
//! the lock proves any existing socket file is stale, so it is unlinked
//! before binding.

use crate::error::{EngineError, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use westfield_types::SocketName;

#[derive(Debug)]
pub(crate) struct ListeningSocket {
    name: SocketName,
    path: PathBuf,
    lock_path: PathBuf,
    listener: UnixListener,
    _lock: Flock<File>,
}

impl ListeningSocket {
    /// Bind `name` inside `runtime_dir`
    pub fn bind(runtime_dir: &Path, name: SocketName) -> Result<Self> {
        let path = runtime_dir.join(name.as_str());
        let lock_path = runtime_dir.join(name.lock_name());

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .mode(0o660)
            .custom_flags(libc::O_CLOEXEC)
            .open(&lock_path)?;

        let lock = Flock::lock(lock_file, FlockArg::LockExclusiveNonblock).map_err(
            |(_, errno)| match errno {
                Errno::EWOULDBLOCK => EngineError::SocketInUse(name.to_string()),
                errno => EngineError::Sys(errno),
            },
        )?;

        match fs::remove_file(&path) {
            Ok(()) => debug!(socket = %name, "Removed stale socket"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        debug!(socket = %path.display(), "Listening");

        Ok(Self {
            name,
            path,
            lock_path,
            listener,
            _lock: lock,
        })
    }

    /// Bind the first free `<prefix><N>` for `N` in `0..limit`
    pub fn bind_auto(runtime_dir: &Path, prefix: &str, limit: u32) -> Result<Self> {
        for index in 0..limit {
            let name = SocketName::numbered(prefix, index)?;
            match Self::bind(runtime_dir, name) {
                Ok(socket) => return Ok(socket),
                Err(EngineError::SocketInUse(name)) => {
                    debug!(socket = %name, "Socket name taken, trying next");
                }
                Err(EngineError::Io(e)) if e.kind() == ErrorKind::AddrInUse => {}
                Err(e) => return Err(e),
            }
        }
        Err(EngineError::NoFreeSocket {
            prefix: prefix.to_string(),
            limit,
        })
    }

    pub fn name(&self) -> &SocketName {
        &self.name
    }

    pub fn listener(&self) -> &UnixListener {
        &self.listener
    }

    /// Accept one pending connection, if any
    pub fn accept(&self) -> Result<Option<UnixStream>> {
        match self.listener.accept() {
            Ok((stream, _)) => Ok(Some(stream)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ListeningSocket {
    fn drop(&mut self) {
        for path in [&self.path, &self.lock_path] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to unlink socket file");
                }
            }
        }
    }
}
