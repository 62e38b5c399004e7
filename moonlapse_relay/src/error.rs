// Error types for the relay crate.
//
// `RelayError` covers server startup and configuration. `ClientError` covers
// the chat client; any of its variants ends the client process. Per-peer
// failures inside a running server never become errors here: they only tear
// down that peer's connection (see `server.rs`).

use std::io;
use std::path::PathBuf;

/// Errors starting or configuring a relay server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors from the chat client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("background reader panicked")]
    ReaderPanicked,
}
