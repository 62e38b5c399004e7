// Connection registry for the relay server.
//
// `ConnectionRegistry` owns every live `Connection`. It is created once per
// server by `start_relay` and shared (via `Arc`) with the accept thread and
// each reader thread; there is no process-wide table, so several servers can
// run side by side in one process (the integration tests rely on this).
//
// Locking:
// - One registry mutex guards the id counter and the id -> connection map.
//   `register`, `unregister` and `snapshot` all take it, so they are
//   mutually exclusive.
// - Each connection has its own write mutex. Broadcasts from different
//   reader threads can target the same peer at once; the write mutex keeps
//   their frames from interleaving on that socket.
// - `unregister` marks the connection Closed and shuts the socket down while
//   the registry mutex is held. A snapshot taken afterwards never contains
//   it, and a broadcast still holding an older snapshot finds it Closed (or
//   gets a write error from the shut-down socket) instead of delivering.
//
// Shutdown goes through a separate handle so it never waits on the write
// mutex: a write blocked on a stalled peer is woken by the shutdown rather
// than holding up the registry.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use moonlapse_protocol::ConnectionId;

/// Lifecycle of one peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, not yet in a registry.
    Connecting,
    /// In the registry; its reader has not started.
    Registered,
    /// Its reader thread is in the read loop.
    Reading,
    /// Unregistered and shut down. Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a step of the lifecycle. Any live state
    /// may close; nothing leaves `Closed`.
    pub fn can_become(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Registered)
                | (Registered, Reading)
                | (Connecting | Registered | Reading, Closed)
        )
    }
}

/// One live peer. Only the registry creates these.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    state: Mutex<ConnectionState>,
    writer: Mutex<TcpStream>,
    control: TcpStream,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_alive(&self) -> bool {
        self.state() != ConnectionState::Closed
    }

    /// Registered -> Reading. Does nothing if already closed.
    pub fn mark_reading(&self) {
        let mut state = lock(&self.state);
        if state.can_become(ConnectionState::Reading) {
            *state = ConnectionState::Reading;
        }
    }

    /// Write one whole frame to this peer. Fails with `NotConnected` once
    /// the connection is closed.
    pub fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = lock(&self.writer);
        if !self.is_alive() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("connection {} is closed", self.id),
            ));
        }
        writer.write_all(frame)?;
        writer.flush()
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        if !state.can_become(ConnectionState::Closed) {
            return;
        }
        *state = ConnectionState::Closed;
        // The peer may already be gone; either way the socket is done.
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    connections: BTreeMap<ConnectionId, Arc<Connection>>,
}

/// Thread-safe table of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an accepted stream and assign it the next ID. IDs
    /// start at 1 and are never reused.
    pub fn register(&self, stream: TcpStream, peer_addr: SocketAddr) -> io::Result<ConnectionId> {
        let control = stream.try_clone()?;
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = ConnectionId(inner.next_id);
        let connection = Connection {
            id,
            peer_addr,
            state: Mutex::new(ConnectionState::Registered),
            writer: Mutex::new(stream),
            control,
        };
        inner.connections.insert(id, Arc::new(connection));
        Ok(id)
    }

    /// Remove and close a connection. Returns false if `id` was not
    /// registered (never was, or already removed).
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut inner = lock(&self.inner);
        match inner.connections.remove(&id) {
            Some(connection) => {
                connection.close();
                true
            }
            None => {
                tracing::trace!(%id, "unregister of unknown connection ignored");
                false
            }
        }
    }

    /// Point-in-time copy of all registered connections, in ID order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        lock(&self.inner).connections.values().cloned().collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        lock(&self.inner).connections.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        lock(&self.inner).connections.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister everything. Each reader sees its socket shut down and
    /// exits; their own `unregister` calls become no-ops.
    pub fn close_all(&self) {
        let mut inner = lock(&self.inner);
        for connection in std::mem::take(&mut inner.connections).into_values() {
            connection.close();
        }
    }
}

/// A panicking holder leaves the data consistent (every critical section is
/// a single map or field update), so poisoning is ignored.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
