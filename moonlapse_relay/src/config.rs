// Relay server configuration.
//
// `RelayConfig` has a `Default` that reproduces the standard deployment
// (loopback, port 8081, one frame per read buffer of 1024 bytes, sender
// included in its own broadcasts) except that framing defaults to
// `Buffered`. It can also be loaded from a JSON file; missing keys fall back
// to the defaults, so `{}` is a valid config.

use std::path::Path;

use moonlapse_protocol::{DEFAULT_MAX_FIELD_LEN, FramingMode};
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Default listen / connect host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen / connect port.
pub const DEFAULT_PORT: u16 = 8081;

/// Size of a single transport read. In `PerRead` framing this is also the
/// largest frame a peer can send.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// Configuration for starting a relay server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: String,
    /// `0` lets the OS pick a free port (see the address `start_relay`
    /// returns).
    pub port: u16,
    pub framing: FramingMode,
    /// Whether a peer receives its own messages back.
    pub echo_to_sender: bool,
    pub read_buffer_size: usize,
    /// Largest single field accepted in `Buffered` framing.
    pub max_field_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            framing: FramingMode::default(),
            echo_to_sender: true,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_field_len: DEFAULT_MAX_FIELD_LEN,
        }
    }
}

impl RelayConfig {
    /// Parse a config from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path).map_err(|source| RelayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| RelayError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `host:port` suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_standard_deployment() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8081");
        assert!(config.echo_to_sender);
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.framing, FramingMode::Buffered);
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(RelayConfig::from_json_str("{}").unwrap(), RelayConfig::default());
    }

    #[test]
    fn partial_json_overrides_only_named_keys() {
        let json = r#"{"port": 9000, "framing": "per-read", "echo_to_sender": false}"#;
        let config = RelayConfig::from_json_str(json).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.framing, FramingMode::PerRead);
        assert!(!config.echo_to_sender);
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn bad_framing_mode_is_rejected() {
        assert!(RelayConfig::from_json_str(r#"{"framing": "lines"}"#).is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = RelayConfig::from_json_file(Path::new("/nonexistent/relay.json")).unwrap_err();
        assert!(matches!(err, RelayError::ConfigRead { .. }));
        assert!(err.to_string().contains("/nonexistent/relay.json"));
    }
}
