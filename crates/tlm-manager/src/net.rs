// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket ownership and readiness waiting.
//!
//! A [`SocketSet`] owns one listening socket plus the established client
//! sockets of interest and multiplexes them through a `mio::Poll`:
//!
//! ```text
//! +------------------------------------------------------------+
//! |                        SocketSet                           |
//! |  +------------------------------------------------------+  |
//! |  |                      mio::Poll                       |  |
//! |  |  - TCP listener (pending accepts)                    |  |
//! |  |  - client sockets (data pending)                     |  |
//! |  +------------------------------------------------------+  |
//! |        select_readable() -> has_data(h) / accept_client()  |
//! +------------------------------------------------------------+
//! ```
//!
//! Sockets are plain `std::net` streams switched to non-blocking mode and
//! registered by raw fd (`SourceFd`), so the fd doubles as the socket
//! handle the rest of the manager passes around. mio's events are
//! edge-triggered; a handle's data-pending flag therefore stays set until
//! the caller has drained the socket to `WouldBlock` and calls
//! [`SocketSet::clear_data`], which restores the level-triggered semantics
//! the protocol loops are written against.
//!
//! Established streams live in a [`StreamTable`] shared with the writer
//! thread: reading and writing both go through `&TcpStream`, so no socket
//! duplication is needed.

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{ManagerError, Result};

/// OS-level socket handle (the raw fd). `-1` means unassigned.
pub type SocketHandle = i32;

/// Sentinel for "no socket".
pub const INVALID_SOCKET: SocketHandle = -1;

/// Maximum poll events processed per wait.
const MAX_EVENTS: usize = 128;

/// Established streams indexed by handle, shared between the socket sets,
/// the writer thread and the close path.
#[derive(Debug, Default)]
pub struct StreamTable {
    inner: Mutex<HashMap<SocketHandle, Arc<TcpStream>>>,
}

impl StreamTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a stream by handle.
    pub fn get(&self, handle: SocketHandle) -> Option<Arc<TcpStream>> {
        self.inner.lock().get(&handle).cloned()
    }

    /// Remove a stream from the table; the caller decides whether to shut
    /// it down.
    pub fn remove(&self, handle: SocketHandle) -> Option<Arc<TcpStream>> {
        self.inner.lock().remove(&handle)
    }

    /// Shut down every stream in both directions. Entries stay in the
    /// table; blocked reads observe EOF and blocked writes fail.
    pub fn shutdown_all(&self) {
        for stream in self.inner.lock().values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn insert(&self, handle: SocketHandle, stream: Arc<TcpStream>) {
        self.inner.lock().insert(handle, stream);
    }
}

/// Listening socket plus the active set of client sockets.
#[derive(Debug)]
pub struct SocketSet {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    listener_fd: SocketHandle,
    listener_active: bool,
    port: u16,
    table: Arc<StreamTable>,
    owned: HashSet<SocketHandle>,
    ready: HashSet<SocketHandle>,
    accept_ready: bool,
}

impl SocketSet {
    /// Bind a listener on `port` (0 = OS-chosen) and set up the poller.
    pub fn bind(port: u16, table: Arc<StreamTable>) -> Result<Self> {
        let listener =
            TcpListener::bind(("0.0.0.0", port)).map_err(|source| ManagerError::Bind {
                port,
                source,
            })?;
        listener.set_nonblocking(true)?;
        let bound_port = listener.local_addr()?.port();
        let listener_fd = listener.as_raw_fd();

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut SourceFd(&listener_fd), Token(listener_fd as usize), Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            listener,
            listener_fd,
            listener_active: true,
            port: bound_port,
            table,
            owned: HashSet::new(),
            ready: HashSet::new(),
            accept_ready: false,
        })
    }

    /// The port the listener actually bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait until a socket of interest is readable, at most `timeout`.
    /// Afterwards [`SocketSet::has_data`] and
    /// [`SocketSet::has_pending_accept`] reflect the new readiness.
    pub fn select_readable(&mut self, timeout: Duration) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        for event in self.events.iter() {
            let handle = event.token().0 as SocketHandle;
            if handle == self.listener_fd {
                if self.listener_active {
                    self.accept_ready = true;
                }
            } else {
                self.ready.insert(handle);
            }
        }
        Ok(())
    }

    /// Whether the listener has (or may have) connections waiting. Stays
    /// set until an accept attempt hits `WouldBlock`.
    pub fn has_pending_accept(&self) -> bool {
        self.listener_active && self.accept_ready
    }

    /// Accept one pending connection, register it and publish its stream
    /// to the table. `Ok(None)` when nothing is pending anymore.
    pub fn accept_client(&mut self) -> io::Result<Option<SocketHandle>> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    let _ = stream.set_nodelay(true);
                    let handle = stream.as_raw_fd();
                    self.poll.registry().register(
                        &mut SourceFd(&handle),
                        Token(handle as usize),
                        Interest::READABLE,
                    )?;
                    self.table.insert(handle, Arc::new(stream));
                    self.owned.insert(handle);
                    debug!(handle, %peer, "accepted connection");
                    return Ok(Some(handle));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.accept_ready = false;
                    return Ok(None);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether `handle` had unread data after the last wait.
    pub fn has_data(&self, handle: SocketHandle) -> bool {
        self.ready.contains(&handle)
    }

    /// Clear the data-pending flag once the socket is drained to
    /// `WouldBlock`.
    pub fn clear_data(&mut self, handle: SocketHandle) {
        self.ready.remove(&handle);
    }

    /// Snapshot of the handles with pending data.
    pub fn ready_handles(&self) -> Vec<SocketHandle> {
        self.ready.iter().copied().collect()
    }

    /// Remove a socket from the active set; it no longer participates in
    /// readiness waits. The stream stays in the table until closed.
    pub fn drop_active(&mut self, handle: SocketHandle) {
        if self.owned.contains(&handle) {
            let _ = self.poll.registry().deregister(&mut SourceFd(&handle));
        }
        self.ready.remove(&handle);
    }

    /// Leave startup mode: the listener stops participating in readiness
    /// waits and no further connections are accepted.
    pub fn switch_to_running_mode(&mut self) {
        let _ = self
            .poll
            .registry()
            .deregister(&mut SourceFd(&self.listener_fd));
        self.listener_active = false;
        self.accept_ready = false;
    }

    /// Close every owned socket and forget them. The listener itself is
    /// closed when the set is dropped.
    pub fn close_all(&mut self) {
        for handle in std::mem::take(&mut self.owned) {
            let _ = self.poll.registry().deregister(&mut SourceFd(&handle));
            if let Some(stream) = self.table.remove(handle) {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        self.ready.clear();
        self.accept_ready = false;
    }
}
