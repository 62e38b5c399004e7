// moonlapse_relay: broadcast chat relay for Moonlapse.
//
// The relay is a thin message broker: it accepts TCP connections, decodes
// length-prefixed frames from each one, and writes every message back out
// to all connected peers (the sender included, unless configured off). It
// never interprets headers or bodies; that belongs to the game and UI
// layers built on top.
//
// Module overview:
// - `registry.rs`: `ConnectionRegistry`, the locked id -> connection table,
//                  and `Connection` with its per-peer write lock and state.
// - `server.rs`:   Listener thread, one reader thread per connection, and
//                  the `broadcast` fan-out. Uses `std::net` with blocking
//                  reads; no async runtime.
// - `client.rs`:   `NetClient` (one connection plus a background reader)
//                  and `run_interactive`, the line-per-message chat loop.
// - `config.rs`:   `RelayConfig` with defaults and JSON loading.
// - `error.rs`:    `RelayError` and `ClientError`.
//
// Dependencies: `moonlapse_protocol` (message type and framing).
//
// The relay runs as a standalone binary (`main.rs`) or embedded via
// `start_relay`; the `chat` binary (`bin/chat.rs`) is the console client.

pub mod client;
pub mod config;
pub mod error;
pub mod registry;
pub mod server;

pub use client::{NetClient, ReaderExit, run_interactive};
pub use config::RelayConfig;
pub use error::{ClientError, RelayError};
pub use registry::{Connection, ConnectionRegistry, ConnectionState};
pub use server::{RelayHandle, broadcast, start_relay};
