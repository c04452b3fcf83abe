//! Shared harness for bridge integration tests

#![allow(dead_code)]

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::cell::RefCell;
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use westfield_native::*;

pub struct Harness {
    // Dropped before the runtime directory it listens in
    pub display: DisplayHandle,
    pub dir: TempDir,
    pub socket: String,
    /// Every handle passed to the client-created callback, in order
    pub created: Rc<RefCell<Vec<ClientHandle>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_callback(|_, _| {})
    }

    /// Harness whose client-created callback records the handle, then
    /// runs `on_created`
    pub fn with_callback(on_created: impl Fn(&CallContext<'_>, &ClientHandle) + 'static) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let created: Rc<RefCell<Vec<ClientHandle>>> = Rc::default();
        let callback: Rc<ClientCreatedCallback> = {
            let created = Rc::clone(&created);
            Rc::new(move |ctx: &CallContext<'_>, client: &ClientHandle| {
                created.borrow_mut().push(client.clone());
                on_created(ctx, client);
            })
        };
        let display = DisplayHandle::create_with_config(
            DisplayConfig::with_runtime_dir(dir.path()),
            Registry::new(),
            callback,
        )
        .unwrap();
        let socket = display.add_socket_auto().unwrap();
        Self {
            display,
            dir,
            socket,
            created,
        }
    }

    pub fn connect(&self) -> UnixStream {
        UnixStream::connect(self.dir.path().join(&self.socket)).unwrap()
    }

    /// Connect a peer and dispatch until its client-created callback ran
    pub fn connect_client(&self) -> (UnixStream, ClientHandle) {
        let before = self.created.borrow().len();
        let stream = self.connect();
        self.pump_until(|| self.created.borrow().len() > before);
        let client = self.created.borrow().last().cloned().unwrap();
        (stream, client)
    }

    pub fn pump_until(&self, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for display");
            self.display
                .dispatch_requests_timeout(Some(Duration::from_millis(20)))
                .unwrap();
        }
    }
}

/// A destroy callback that records each event it sees
pub fn recording_destroy_callback(
    log: &Rc<RefCell<Vec<(ClientId, CallbackEvent)>>>,
) -> Rc<ClientDestroyedCallback> {
    let log = Rc::clone(log);
    Rc::new(move |ctx: &CallContext<'_>, client: &ClientHandle| {
        log.borrow_mut().push((client.id(), ctx.event()));
    })
}

pub fn frame(object: u32, opcode: u16, payload: &[u8]) -> Vec<u8> {
    let size = 8 + payload.len() as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&object.to_ne_bytes());
    out.extend_from_slice(&(size << 16 | u32::from(opcode)).to_ne_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn send_with_fds(stream: &UnixStream, data: &[u8], fds: &[RawFd]) {
    let iov = [IoSlice::new(data)];
    let rights = [ControlMessage::ScmRights(fds)];
    sendmsg::<()>(stream.as_raw_fd(), &iov, &rights, MsgFlags::empty(), None).unwrap();
}

pub fn recv_with_fds(stream: &UnixStream) -> (Vec<u8>, Vec<OwnedFd>) {
    let mut buf = vec![0u8; 512];
    let mut cmsg = nix::cmsg_space!([RawFd; 8]);
    let (bytes, fds) = {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = recvmsg::<()>(
            stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg),
            MsgFlags::empty(),
        )
        .unwrap();
        let mut fds = Vec::new();
        for c in msg.cmsgs().unwrap() {
            if let ControlMessageOwned::ScmRights(raw) = c {
                fds.extend(raw.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
            }
        }
        (msg.bytes, fds)
    };
    buf.truncate(bytes);
    (buf, fds)
}

pub fn fd_bytes(fds: &[RawFd]) -> Vec<u8> {
    fds.iter().flat_map(|fd| fd.to_ne_bytes()).collect()
}
