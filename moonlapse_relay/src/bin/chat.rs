// Interactive console client for the Moonlapse relay.
//
// Connects, prints every message the relay sends as `[sender] [header]
// body`, and sends each line typed as a `SAY` message. An empty line (or end
// of input) disconnects.
//
// Usage:
//   chat [--host <HOST>] [--port <PORT>]

use std::io;
use std::process::ExitCode;

use clap::Parser;
use moonlapse_relay::client::{NetClient, ReaderExit, run_interactive};
use moonlapse_relay::config::{DEFAULT_HOST, DEFAULT_PORT};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chat")]
#[command(about = "Interactive Moonlapse chat client")]
struct Cli {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() -> ExitCode {
    // Logs go to stderr so they don't mix with the chat transcript.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let addr = format!("{}:{}", cli.host, cli.port);

    let client = match NetClient::connect(&addr, |msg| println!("{msg}")) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    println!("Connected to {addr} as {}.", client.local_addr());
    println!("Type a message and press Enter. An empty line disconnects.");

    match run_interactive(client, io::stdin().lock()) {
        Ok(exit) => {
            match exit {
                ReaderExit::EndOfStream => {}
                ReaderExit::Malformed(e) => eprintln!("relay sent a {e}"),
                ReaderExit::Io(e) => eprintln!("connection error: {e}"),
            }
            println!("Disconnected.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
