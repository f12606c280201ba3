//! Tunable parameters for both roles.
//!
//! The CLI in `main.rs` fills these in; tests construct them directly.  Both
//! structs carry a [`Default`] matching the reference deployment and a
//! `validate` that rejects values the engines cannot honour.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::segment::MAX_PAYLOAD;

/// Exclusive upper bound on the sender window.
///
/// Outstanding bytes must stay well inside half the 16-bit sequence space,
/// otherwise a cumulative ACK could not be told apart from a stale one.
pub const MAX_WINDOW_LIMIT: usize = 1 << 15;

/// SYNs sent before the handshake is abandoned.
pub const SYN_ATTEMPTS: u32 = 3;

/// Receiver-side TIME_WAIT.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(2);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },
    #[error("max window {max_win} must be at least {mss} and below {limit} bytes")]
    Window {
        max_win: usize,
        mss: usize,
        limit: usize,
    },
    #[error("segment size {0} must be between 1 and {MAX_PAYLOAD} bytes")]
    SegmentSize(usize),
    #[error("retransmission timeout must be non-zero")]
    ZeroTimeout,
    #[error("at least one SYN attempt is required")]
    ZeroAttempts,
}

/// Sender parameters.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Maximum unacknowledged payload bytes in flight.
    pub max_win: usize,
    /// Retransmission timeout; also bounds every Listener receive.
    pub rto: Duration,
    /// SYNs sent before giving up with RESET.
    pub syn_attempts: u32,
    /// Payload bytes per DATA segment.
    pub mss: usize,
    /// Initial sequence number; `None` picks one at random.
    pub isn: Option<u16>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_win: 3000,
            rto: Duration::from_millis(300),
            syn_attempts: SYN_ATTEMPTS,
            mss: MAX_PAYLOAD,
            isn: None,
        }
    }
}

impl SenderConfig {
    pub fn new(max_win: usize, rto: Duration) -> Self {
        Self {
            max_win,
            rto,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mss == 0 || self.mss > MAX_PAYLOAD {
            return Err(ConfigError::SegmentSize(self.mss));
        }
        if self.max_win < self.mss || self.max_win >= MAX_WINDOW_LIMIT {
            return Err(ConfigError::Window {
                max_win: self.max_win,
                mss: self.mss,
                limit: MAX_WINDOW_LIMIT,
            });
        }
        if self.rto.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.syn_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(())
    }
}

/// Receiver parameters.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Forward-loss probability (DATA, SYN, FIN, RESET).
    pub flp: f64,
    /// Reverse-loss probability (ACK).
    pub rlp: f64,
    /// Delay between FIN receipt and teardown.
    pub linger: Duration,
    /// Seed for the loss simulator; `None` draws from entropy.
    pub seed: Option<u64>,
    /// Where the reassembled stream is written at FIN; `None` keeps it in
    /// memory only.
    pub output: Option<PathBuf>,
    /// Address the sender is expected to use; a SYN from elsewhere is still
    /// accepted but logged.
    pub expected_sender: Option<SocketAddr>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            flp: 0.0,
            rlp: 0.0,
            linger: DEFAULT_LINGER,
            seed: None,
            output: None,
            expected_sender: None,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_probability("flp", self.flp)?;
        check_probability("rlp", self.rlp)
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Probability { name, value })
    }
}
