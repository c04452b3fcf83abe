//! epoll-backed event loop
//!
//! One epoll instance per display watches the listening sockets and every
//! client socket. Its descriptor is what callers integrate into an outer
//! reactor: it polls readable whenever a dispatch would make progress.

use crate::error::Result;
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::Duration;
use westfield_types::ClientId;

/// Token bit marking a listening socket rather than a client
const LISTENER_TAG: u64 = 1 << 32;

/// What a ready descriptor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Listener(usize),
    Client(ClientId),
}

impl Source {
    fn token(self) -> u64 {
        match self {
            Source::Listener(index) => LISTENER_TAG | index as u64,
            Source::Client(id) => u64::from(id.as_u32()),
        }
    }

    fn from_token(token: u64) -> Self {
        if token & LISTENER_TAG != 0 {
            Source::Listener((token & !LISTENER_TAG) as usize)
        } else {
            Source::Client(ClientId::new(token as u32))
        }
    }
}

/// Readiness a descriptor is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    Readable,
    ReadWritable,
}

impl Interest {
    fn flags(self) -> EpollFlags {
        match self {
            Interest::Readable => EpollFlags::EPOLLIN,
            Interest::ReadWritable => EpollFlags::EPOLLIN | EpollFlags::EPOLLOUT,
        }
    }
}

/// One ready descriptor reported by [`EventLoop::wait`]
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ready {
    pub source: Source,
    pub readable: bool,
    pub writable: bool,
    pub hangup: bool,
}

/// The display's event loop
#[derive(Debug)]
pub struct EventLoop {
    epoll: Epoll,
}

impl EventLoop {
    /// Create a new close-on-exec epoll instance
    pub fn new() -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        Ok(Self { epoll })
    }

    /// Pollable descriptor for integration into an outer reactor
    pub fn fd(&self) -> RawFd {
        self.epoll.0.as_raw_fd()
    }

    pub(crate) fn register<F: AsFd>(&self, fd: F, source: Source, interest: Interest) -> Result<()> {
        self.epoll
            .add(fd, EpollEvent::new(interest.flags(), source.token()))?;
        Ok(())
    }

    pub(crate) fn reregister<F: AsFd>(
        &self,
        fd: F,
        source: Source,
        interest: Interest,
    ) -> Result<()> {
        let mut event = EpollEvent::new(interest.flags(), source.token());
        self.epoll.modify(fd, &mut event)?;
        Ok(())
    }

    pub(crate) fn deregister<F: AsFd>(&self, fd: F) -> Result<()> {
        self.epoll.delete(fd)?;
        Ok(())
    }

    /// Wait for ready descriptors. `None` blocks indefinitely.
    ///
    /// An interrupted wait reports nothing ready rather than an error.
    pub(crate) fn wait(&self, capacity: usize, timeout: Option<Duration>) -> Result<Vec<Ready>> {
        let mut events = vec![EpollEvent::empty(); capacity.max(1)];
        let timeout = match timeout {
            None => EpollTimeout::NONE,
            Some(d) => EpollTimeout::from(u16::try_from(d.as_millis()).unwrap_or(u16::MAX)),
        };

        let count = match self.epoll.wait(&mut events, timeout) {
            Ok(count) => count,
            Err(Errno::EINTR) => 0,
            Err(e) => return Err(e.into()),
        };

        Ok(events[..count]
            .iter()
            .map(|event| {
                let flags = event.events();
                Ready {
                    source: Source::from_token(event.data()),
                    readable: flags.contains(EpollFlags::EPOLLIN),
                    writable: flags.contains(EpollFlags::EPOLLOUT),
                    hangup: flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_token_round_trip_distinguishes_sources() {
        let listener = Source::Listener(3);
        let client = Source::Client(ClientId::new(3));
        assert_ne!(listener.token(), client.token());
        assert_eq!(Source::from_token(listener.token()), listener);
        assert_eq!(Source::from_token(client.token()), client);
    }

    #[test]
    fn test_wait_reports_readable_client() {
        let event_loop = EventLoop::new().unwrap();
        let (mut peer, ours) = UnixStream::pair().unwrap();
        event_loop
            .register(&ours, Source::Client(ClientId::new(1)), Interest::Readable)
            .unwrap();

        assert!(event_loop.wait(8, Some(Duration::ZERO)).unwrap().is_empty());

        peer.write_all(b"ping").unwrap();
        let ready = event_loop.wait(8, Some(Duration::from_millis(500))).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].source, Source::Client(ClientId::new(1)));
        assert!(ready[0].readable);

        event_loop.deregister(&ours).unwrap();
        assert!(event_loop.wait(8, Some(Duration::ZERO)).unwrap().is_empty());
    }

    #[test]
    fn test_fd_is_valid() {
        let event_loop = EventLoop::new().unwrap();
        assert!(event_loop.fd() >= 0);
    }
}
