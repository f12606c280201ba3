//! `ptp-over-udp` — a positive-acknowledgment reliable byte stream over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────────────────────┐   SYN/DATA/FIN/RESET   ┌──────────────────────┐
//!  │          Sender           │───────────────────────▶│       Receiver       │
//!  │  Driver ◀─Shared─▶ Listener│                        │  LossSimulator       │
//!  │      SendWindow           │◀───────────────────────│  ReassemblyBuffer    │
//!  └────────────┬──────────────┘       cumulative ACK   └──────────┬───────────┘
//!               │                                                  │
//!  ┌────────────▼──────────────────────────────────────────────────▼───────────┐
//!  │  Socket  (thin async wrapper around tokio UdpSocket, speaks Segment)     │
//!  └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]     — wire format (serialise / deserialise)
//! - [`seq`]         — 16-bit modular sequence arithmetic
//! - [`simulator`]   — forward/reverse loss applied by the receiver
//! - [`window`]      — send-side sliding window and retransmission queue
//! - [`reassembly`]  — receive-side out-of-order buffer and cumulative ACK
//! - [`sender`]      — Driver + Listener sender engine
//! - [`receiver`]    — single-task receiver engine
//! - [`state`]       — finite-state-machine types
//! - [`timer`]       — receiver linger timer
//! - [`event_log`]   — snd/rcv/drp protocol event log
//! - [`config`]      — role parameters and validation
//! - [`socket`]      — async UDP socket abstraction
//! - [`error`]       — crate error type

pub mod config;
pub mod error;
pub mod event_log;
pub mod reassembly;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod window;

pub use config::{ReceiverConfig, SenderConfig};
pub use error::{PtpError, Result};
pub use event_log::EventLog;
pub use receiver::{receive, Receiver, ReceiverReport};
pub use sender::{send, Sender, SenderReport};
pub use socket::Socket;
