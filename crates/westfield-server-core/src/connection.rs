//! Per-client byte and descriptor transport
//!
//! Inbound bytes and `SCM_RIGHTS` descriptors are buffered until the wire
//! hook declares them consumed. Outbound bytes and descriptors are queued
//! until the next flush.

use crate::config::MAX_FDS_OUT;
use crate::error::Result;
use nix::errno::Errno;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// Result of one socket read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// Appended this many bytes to the inbound buffer
    Data(usize),
    /// Nothing to read right now
    WouldBlock,
    /// The peer closed the socket
    Closed,
    /// The inbound buffer is full
    Overflow,
}

/// Result of flushing the outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    /// Everything that can be sent was sent
    Done,
    /// The socket buffer is full; wait for writability
    WouldBlock,
}

/// Inbound bytes and descriptors lent out to the wire hook
#[derive(Debug, Default)]
pub(crate) struct PendingInput {
    pub data: Vec<u8>,
    pub fds: Vec<OwnedFd>,
}

impl PendingInput {
    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.fds.iter().map(|fd| fd.as_raw_fd()).collect()
    }

    /// Give up ownership of the lent descriptors without closing them.
    pub fn hand_over_fds(&mut self) {
        for fd in self.fds.drain(..) {
            let _ = fd.into_raw_fd();
        }
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    stream: UnixStream,
    in_buf: Vec<u8>,
    in_fds: Vec<OwnedFd>,
    out_buf: Vec<u8>,
    out_fds: Vec<OwnedFd>,
    max_buffer_size: usize,
}

impl Connection {
    pub fn new(stream: UnixStream, max_buffer_size: usize) -> Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            in_buf: Vec::with_capacity(max_buffer_size),
            in_fds: Vec::new(),
            out_buf: Vec::new(),
            out_fds: Vec::new(),
            max_buffer_size,
        })
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    pub fn pending_input_len(&self) -> usize {
        self.in_buf.len()
    }

    pub fn pending_output_len(&self) -> usize {
        self.out_buf.len()
    }

    pub fn pending_output_fds(&self) -> usize {
        self.out_fds.len()
    }

    /// Read once from the socket into the free tail of the inbound buffer
    pub fn read(&mut self) -> Result<ReadOutcome> {
        let start = self.in_buf.len();
        let space = self.max_buffer_size.saturating_sub(start);
        if space == 0 {
            return Ok(ReadOutcome::Overflow);
        }

        self.in_buf.resize(start + space, 0);
        let received = recv_with_fds(self.stream.as_raw_fd(), &mut self.in_buf[start..]);
        let (bytes, fds) = match received {
            Ok(received) => received,
            Err(e) => {
                self.in_buf.truncate(start);
                return match e {
                    Errno::EAGAIN | Errno::EINTR => Ok(ReadOutcome::WouldBlock),
                    e => Err(e.into()),
                };
            }
        };
        self.in_buf.truncate(start + bytes);
        self.in_fds.extend(fds);

        if bytes == 0 {
            Ok(ReadOutcome::Closed)
        } else {
            Ok(ReadOutcome::Data(bytes))
        }
    }

    /// Move the buffered input out so it can be lent to the wire hook
    /// without holding any borrow of the connection.
    pub fn take_input(&mut self) -> PendingInput {
        PendingInput {
            data: std::mem::take(&mut self.in_buf),
            fds: std::mem::take(&mut self.in_fds),
        }
    }

    /// Put lent input back, minus the consumed prefix.
    ///
    /// With `hand_over_fds` the lent descriptors now belong to the hook's
    /// owner and are released without being closed; otherwise they are
    /// queued again ahead of anything received meanwhile.
    pub fn restore_input(&mut self, mut lent: PendingInput, consumed: usize, hand_over_fds: bool) {
        if hand_over_fds {
            lent.hand_over_fds();
        }
        let PendingInput { mut data, mut fds } = lent;
        data.drain(..consumed.min(data.len()));
        data.append(&mut self.in_buf);
        self.in_buf = data;

        if !fds.is_empty() {
            fds.append(&mut self.in_fds);
            self.in_fds = fds;
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.out_buf.extend_from_slice(data);
    }

    /// Queue a descriptor for the next flush; the connection closes it
    /// once sent. A full queue is flushed first.
    pub fn put_fd(&mut self, fd: OwnedFd) -> Result<()> {
        if self.out_fds.len() >= MAX_FDS_OUT {
            self.flush()?;
        }
        self.out_fds.push(fd);
        Ok(())
    }

    /// Send queued bytes, attaching up to [`MAX_FDS_OUT`] queued
    /// descriptors to each `sendmsg`.
    pub fn flush(&mut self) -> Result<FlushOutcome> {
        while !self.out_buf.is_empty() {
            let fd_count = self.out_fds.len().min(MAX_FDS_OUT);
            let raw: Vec<RawFd> = self.out_fds[..fd_count]
                .iter()
                .map(|fd| fd.as_raw_fd())
                .collect();
            let rights = [ControlMessage::ScmRights(&raw)];
            let cmsgs: &[ControlMessage<'_>] = if raw.is_empty() { &[] } else { &rights };
            let iov = [IoSlice::new(&self.out_buf)];

            match sendmsg::<()>(
                self.stream.as_raw_fd(),
                &iov,
                cmsgs,
                MsgFlags::MSG_NOSIGNAL | MsgFlags::MSG_DONTWAIT,
                None,
            ) {
                Ok(sent) => {
                    self.out_buf.drain(..sent);
                    // Closes our copies; the peer has its own now.
                    self.out_fds.drain(..fd_count);
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => return Ok(FlushOutcome::WouldBlock),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(FlushOutcome::Done)
    }
}

fn recv_with_fds(fd: RawFd, buf: &mut [u8]) -> std::result::Result<(usize, Vec<OwnedFd>), Errno> {
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_FDS_OUT]);
    let mut iov = [IoSliceMut::new(buf)];
    let msg = recvmsg::<()>(
        fd,
        &mut iov,
        Some(&mut cmsg_buffer),
        MsgFlags::MSG_CMSG_CLOEXEC | MsgFlags::MSG_DONTWAIT,
    )?;

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs()? {
        if let ControlMessageOwned::ScmRights(raw) = cmsg {
            // The kernel installed these descriptors for us; we own them.
            fds.extend(raw.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
        }
    }
    Ok((msg.bytes, fds))
}
