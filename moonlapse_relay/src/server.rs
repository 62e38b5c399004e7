// TCP broadcast server.
//
// Architecture: one accept thread plus one reader thread per connection,
// all sharing a `ConnectionRegistry`.
//
// - **Accept thread** (`TcpListener::accept()` loop): registers each new
//   stream and spawns its reader. The listener is non-blocking so the loop
//   can notice `RelayHandle::stop`; between polls it sleeps.
// - **Reader threads**: blocking `read()` into a fixed buffer, bytes fed to
//   a `FrameDecoder`. Every decoded message is stamped with the reader's
//   peer address as sender and broadcast to a registry snapshot, on the
//   reader's own thread. End-of-stream, a read error or a malformed frame
//   ends the loop, and the reader unregisters its connection.
//
// Broadcast writes are synchronous: a peer that stops reading stalls the
// reader thread that is writing to it, and with it that reader's later
// messages. Other readers keep going until they also reach that peer. There
// is no per-peer queue.
//
// Messages from one connection reach every peer in the order they were
// read. Messages from different connections race.
//
// Shutdown: `RelayHandle::stop` stops the accept loop and closes every
// registered connection; reader threads then see their sockets shut down
// and exit on their own.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use moonlapse_protocol::{ConnectionId, FrameDecoder, FrameError, Message, encode_message};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::ConnectionRegistry;

/// How long the accept loop sleeps when no connection is waiting.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    keep_running: Arc<AtomicBool>,
    registry: Arc<ConnectionRegistry>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// The server's connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Stop accepting, close every connection, and wait for the accept
    /// thread to exit.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.registry.close_all();
        tracing::info!("relay stopped");
    }
}

/// Start the relay on a background thread. Returns a handle for stopping it
/// and the actual bound address (useful when port 0 is used to let the OS
/// pick a free port).
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr), RelayError> {
    let listener = TcpListener::bind(config.bind_addr())?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let registry = Arc::new(ConnectionRegistry::new());
    let keep_running = Arc::new(AtomicBool::new(true));
    tracing::info!(%addr, framing = %config.framing, echo = config.echo_to_sender, "relay listening");

    let thread = {
        let registry = Arc::clone(&registry);
        let keep_running = Arc::clone(&keep_running);
        let config = Arc::new(config);
        thread::Builder::new()
            .name("relay-accept".into())
            .spawn(move || accept_loop(listener, registry, config, keep_running))?
    };

    Ok((
        RelayHandle {
            keep_running,
            registry,
            thread: Some(thread),
        },
        addr,
    ))
}

fn accept_loop(
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    config: Arc<RelayConfig>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = admit(stream, peer, &registry, &config) {
                    tracing::warn!(%peer, error = %e, "failed to set up connection");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

/// Register an accepted stream and spawn its reader.
fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<ConnectionRegistry>,
    config: &Arc<RelayConfig>,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let read_half = stream.try_clone()?;
    let id = registry.register(stream, peer)?;
    tracing::info!(%id, %peer, "connection accepted");

    let reader_registry = Arc::clone(registry);
    let reader_config = Arc::clone(config);
    let spawned = thread::Builder::new()
        .name(format!("relay-reader-{}", id.0))
        .spawn(move || reader_loop(id, peer, read_half, reader_registry, reader_config));

    if let Err(e) = spawned {
        registry.unregister(id);
        return Err(e);
    }
    Ok(())
}

/// Why a reader loop ended.
enum ReadExit {
    EndOfStream,
    Malformed(FrameError),
    Io(io::Error),
}

/// Reader loop for a single connection. Runs in its own thread.
fn reader_loop(
    id: ConnectionId,
    peer: SocketAddr,
    mut stream: TcpStream,
    registry: Arc<ConnectionRegistry>,
    config: Arc<RelayConfig>,
) {
    if let Some(connection) = registry.get(id) {
        connection.mark_reading();
    }

    let sender = peer.to_string();
    let mut decoder = FrameDecoder::new(config.framing, config.max_field_len);
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];

    let exit = loop {
        match stream.read(&mut buf) {
            Ok(0) => break ReadExit::EndOfStream,
            Ok(n) => match decoder.feed(&buf[..n]) {
                Ok(messages) => {
                    for message in messages {
                        let message = message.with_sender(sender.as_str());
                        tracing::info!(from = %id, "{message}");
                        broadcast(&registry, id, &message, config.echo_to_sender);
                    }
                }
                Err(e) => break ReadExit::Malformed(e),
            },
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => break ReadExit::Io(e),
        }
    };

    match exit {
        ReadExit::EndOfStream => {
            tracing::debug!(%id, %peer, dropped = decoder.pending(), "peer closed connection");
        }
        ReadExit::Malformed(e) => {
            tracing::warn!(%id, %peer, reason = e.reason(), "closing connection on malformed frame");
        }
        ReadExit::Io(e) => {
            tracing::debug!(%id, %peer, error = %e, "connection read failed");
        }
    }
    registry.unregister(id);
}

/// Write `message` to every connection in a registry snapshot, skipping
/// `origin` unless `echo_to_sender`. Returns how many peers were written.
/// A failed write is logged and skipped; that peer's reader will notice the
/// broken socket and tear it down.
pub fn broadcast(
    registry: &ConnectionRegistry,
    origin: ConnectionId,
    message: &Message,
    echo_to_sender: bool,
) -> usize {
    let frame = encode_message(message);
    let mut delivered = 0;
    for connection in registry.snapshot() {
        if !echo_to_sender && connection.id() == origin {
            continue;
        }
        match connection.send(&frame) {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::debug!(to = %connection.id(), error = %e, "broadcast write failed");
            }
        }
    }
    tracing::debug!(%origin, delivered, "broadcast");
    delivered
}
