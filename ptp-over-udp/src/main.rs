//! Entry point for `ptp`.
//!
//! Parses CLI arguments and dispatches into either **receiver** or **sender**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, argument parsing, file I/O).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ptp_over_udp::event_log::{EventLog, FileSink};
use ptp_over_udp::{Receiver, ReceiverConfig, Sender, SenderConfig, Socket};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for one connection and write the received stream to FILE.
    Receiver {
        /// Local UDP port.
        receiver_port: u16,
        /// Port the sender transmits from.
        sender_port: u16,
        /// Where the received stream is written.
        file: PathBuf,
        /// Forward-loss probability for DATA/SYN/FIN/RESET.
        flp: f64,
        /// Reverse-loss probability for ACK.
        rlp: f64,
        /// Address both endpoints bind to.
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        addr: IpAddr,
        /// Seed for reproducible loss.
        #[arg(long)]
        seed: Option<u64>,
        /// Linger after FIN, in milliseconds.
        #[arg(long, default_value_t = 2000)]
        linger_ms: u64,
        /// Event log file.
        #[arg(long, default_value = "Receiver_log.txt")]
        log: PathBuf,
    },
    /// Connect to a receiver and transfer FILE.
    Sender {
        /// Local UDP port.
        sender_port: u16,
        /// Receiver's UDP port.
        receiver_port: u16,
        /// File to transfer.
        file: PathBuf,
        /// Maximum unacknowledged bytes in flight.
        max_win: usize,
        /// Retransmission timeout, in milliseconds.
        rto: u64,
        /// Address both endpoints bind to.
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        addr: IpAddr,
        /// Event log file.
        #[arg(long, default_value = "Sender_log.txt")]
        log: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    match Cli::parse().mode {
        Mode::Receiver {
            receiver_port,
            sender_port,
            file,
            flp,
            rlp,
            addr,
            seed,
            linger_ms,
            log: log_path,
        } => {
            let config = ReceiverConfig {
                flp,
                rlp,
                linger: Duration::from_millis(linger_ms),
                seed,
                output: Some(file),
                expected_sender: Some(SocketAddr::new(addr, sender_port)),
            };
            let socket = Socket::bind(SocketAddr::new(addr, receiver_port))
                .await
                .with_context(|| format!("binding receiver to {addr}:{receiver_port}"))?;
            let events = event_log("receiver", &log_path)?;

            log::info!("Starting receiver on {}", socket.local_addr);
            let report = Receiver::new(socket, config, events)?
                .run()
                .await
                .context("receiving")?;
            log::info!("received {} bytes", report.data.len());
        }
        Mode::Sender {
            sender_port,
            receiver_port,
            file,
            max_win,
            rto,
            addr,
            log: log_path,
        } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let config = SenderConfig::new(max_win, Duration::from_millis(rto));
            let socket = Socket::bind(SocketAddr::new(addr, sender_port))
                .await
                .with_context(|| format!("binding sender to {addr}:{sender_port}"))?;
            let events = event_log("sender", &log_path)?;
            let peer = SocketAddr::new(addr, receiver_port);

            log::info!("Starting sender, connecting to {peer}");
            let report = Sender::new(socket, peer, config, events)?
                .send(&data)
                .await
                .with_context(|| format!("sending {}", file.display()))?;
            log::info!(
                "sent {} bytes, {} retransmissions",
                report.bytes,
                report.stats.retransmissions
            );
        }
    }
    Ok(())
}

fn event_log(role: &'static str, path: &Path) -> Result<EventLog> {
    let sink = FileSink::create(path)
        .with_context(|| format!("creating event log {}", path.display()))?;
    Ok(EventLog::new(role, Arc::new(sink)))
}
