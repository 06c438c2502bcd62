//! Entry point for `reliable-udp`.
//!
//! Parses CLI arguments and runs one whole session in either **send** or
//! **receive** mode: handshake, file transfer, teardown.  All protocol work
//! is delegated to the library; `main.rs` owns only process setup (logging,
//! argument parsing, opening files).

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};

use reliable_udp::{endpoint, receive_stream, send_stream, util, Completion, Config};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Connect to a receiver and send a file.
    Send {
        /// Local address to bind (e.g. 0.0.0.0:0).
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: String,
        /// Receiver address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        peer: String,
        /// File to send.
        #[arg(short, long)]
        file: PathBuf,
        /// Payload bytes per segment.
        #[arg(long, default_value_t = 1687)]
        chunk_size: usize,
        /// Give up after this many passes over the window.
        #[arg(long)]
        max_send_rounds: Option<u32>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Wait for one sender and write what it sends to a file.
    Receive {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: String,
        /// Where to write the received bytes.
        #[arg(short, long)]
        output: PathBuf,
        /// Window size to advertise; 1 is stop-and-wait.
        #[arg(short, long, default_value_t = 8)]
        window: u16,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Mark the last data segment instead of ending on an idle timeout.
    /// Both ends must agree.
    #[arg(long)]
    final_marker: bool,
}

impl CommonArgs {
    fn config(&self) -> Config {
        Config {
            completion: if self.final_marker {
                Completion::FinalMarker
            } else {
                Completion::IdleTimeout
            },
            ..Config::default()
        }
    }
}

fn host_port(text: &str) -> Result<(&str, u16)> {
    util::split_host_port(text).ok_or_else(|| anyhow!("expected host:port, got {text:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            bind,
            peer,
            file,
            chunk_size,
            max_send_rounds,
            common,
        } => {
            let (local_host, local_port) = host_port(&bind)?;
            let (remote_host, remote_port) = host_port(&peer)?;
            let config = Config {
                chunk_size,
                max_send_rounds,
                ..common.config()
            };
            let source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("opening {}", file.display()))?;

            log::info!("Sending {} to {peer}", file.display());
            let mut conn = endpoint::connect(local_host, local_port, remote_host, remote_port, config)
                .await
                .context("handshake failed")?;
            let stats = send_stream(&mut conn, source).await.context("transfer failed")?;
            conn.close().await.context("teardown failed")?;
            println!("sent {stats}");
        }
        Mode::Receive {
            bind,
            output,
            window,
            common,
        } => {
            let (local_host, local_port) = host_port(&bind)?;
            let config = Config {
                window_size: window,
                ..common.config()
            };
            let mut sink = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("creating {}", output.display()))?;

            log::info!("Receiving into {} on {bind}", output.display());
            let mut conn = endpoint::accept(local_host, local_port, config)
                .await
                .context("handshake failed")?;
            let peer = conn.peer_addr();
            let stats = receive_stream(&mut conn, &mut sink).await.context("transfer failed")?;
            conn.close().await.context("teardown failed")?;
            println!("received {stats} from {peer}");
        }
    }

    Ok(())
}
