// Test-only chat client for multiplayer integration tests.
//
// Wraps the real `NetClient` (from `moonlapse_relay::client`) in its
// channel-backed form to give a synchronous, test-friendly API for
// exercising the full path: client → relay → every client.
//
// The only test-specific code here is the blocking receive wrappers with a
// timeout. All networking uses the same code paths as the `chat` binary.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::net::SocketAddr;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use moonlapse_protocol::Message;
use moonlapse_relay::client::{NetClient, ReaderExit};
use moonlapse_relay::config::RelayConfig;
use moonlapse_relay::registry::ConnectionRegistry;
use moonlapse_relay::server::{RelayHandle, start_relay};

/// Default timeout for blocking receive operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between registry polls.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A test chat client wrapping a real NetClient.
pub struct TestChatClient {
    client: NetClient,
    inbox: Receiver<Message>,
}

impl TestChatClient {
    /// Connect to a relay.
    pub fn connect(addr: SocketAddr) -> Self {
        let (client, inbox) = NetClient::connect_channel(&addr.to_string())
            .expect("TestChatClient::connect failed");
        Self { client, inbox }
    }

    /// The address the relay will report as this client's sender.
    pub fn addr(&self) -> &str {
        self.client.local_addr()
    }

    pub fn say(&mut self, text: &str) {
        self.client.say(text).expect("say failed");
    }

    pub fn send(&mut self, header: &str, body: &str) {
        self.client.send(header, body).expect("send failed");
    }

    /// Blocking receive of the next message.
    pub fn recv(&self) -> Message {
        match self.inbox.recv_timeout(POLL_TIMEOUT) {
            Ok(msg) => msg,
            Err(RecvTimeoutError::Timeout) => panic!("timed out waiting for a message"),
            Err(RecvTimeoutError::Disconnected) => panic!("reader ended before a message arrived"),
        }
    }

    /// Blocking receive of the next `n` messages, in order.
    pub fn recv_n(&self, n: usize) -> Vec<Message> {
        (0..n).map(|_| self.recv()).collect()
    }

    /// Non-blocking: everything received so far.
    pub fn drain(&self) -> Vec<Message> {
        self.inbox.try_iter().collect()
    }

    /// Half-close, wait for the relay to close its side, and report how the
    /// reader ended.
    pub fn disconnect(self) -> ReaderExit {
        self.client.shutdown().expect("shutdown failed")
    }
}

/// A running relay plus the clients connected to it.
pub struct TestSession {
    pub handle: RelayHandle,
    pub addr: SocketAddr,
    pub clients: Vec<TestChatClient>,
}

/// Start a relay on a random port with `config`, connect `n` clients, and
/// wait until the relay has registered all of them.
pub fn start_session(config: RelayConfig, n: usize) -> TestSession {
    let (handle, addr) = start_relay(RelayConfig { port: 0, ..config }).unwrap();
    let clients = (0..n).map(|_| TestChatClient::connect(addr)).collect();
    wait_for_peers(handle.registry(), n);
    TestSession {
        handle,
        addr,
        clients,
    }
}

/// Block until the registry holds exactly `n` connections.
pub fn wait_for_peers(registry: &ConnectionRegistry, n: usize) {
    let start = Instant::now();
    while registry.len() != n {
        assert!(
            start.elapsed() < POLL_TIMEOUT,
            "timed out waiting for {n} registered connections (have {})",
            registry.len()
        );
        thread::sleep(POLL_INTERVAL);
    }
}
