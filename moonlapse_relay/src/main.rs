// CLI entry point for the Moonlapse relay.
//
// Starts a standalone relay that chat clients connect to. See `server.rs`
// for the networking architecture and `registry.rs` for connection
// bookkeeping.
//
// Usage:
//   relay [OPTIONS]
//     --config <FILE>        JSON config file (flags below override it)
//     --host <HOST>          Listen host (default: 127.0.0.1)
//     --port <PORT>          Listen port (default: 8081)
//     --framing <MODE>       buffered | per-read (default: buffered)
//     --no-echo              Don't send peers their own messages
//
// Log verbosity follows RUST_LOG (default: info).

use std::path::PathBuf;

use clap::Parser;
use moonlapse_protocol::FramingMode;
use moonlapse_relay::config::RelayConfig;
use moonlapse_relay::error::RelayError;
use moonlapse_relay::server::start_relay;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Broadcast chat relay for Moonlapse")]
struct Cli {
    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// `buffered` or `per-read`.
    #[arg(long)]
    framing: Option<FramingMode>,
    /// Don't echo a message back to the peer that sent it.
    #[arg(long)]
    no_echo: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = match build_config(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let (_handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    println!("Relay listening on {addr}");
    println!("Press Ctrl+C to stop.");

    // Connections are not drained on exit; SIGINT/SIGTERM end the process.
    loop {
        std::thread::park();
    }
}

/// File config (or defaults), then command-line overrides.
fn build_config(cli: Cli) -> Result<RelayConfig, RelayError> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_json_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(framing) = cli.framing {
        config.framing = framing;
    }
    if cli.no_echo {
        config.echo_to_sender = false;
    }
    Ok(config)
}
