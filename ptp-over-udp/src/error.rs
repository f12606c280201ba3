//! Crate-level error type.
//!
//! Transient network conditions (loss, reordering, duplication, timeout) are
//! absorbed inside the engines and never show up here.  Only the terminal
//! outcomes a caller must act on are represented.

use thiserror::Error;

use crate::config::ConfigError;
use crate::segment::SegmentError;
use crate::socket::SocketError;

#[derive(Debug, Error)]
pub enum PtpError {
    /// Received bytes could not be decoded into a segment.
    #[error("malformed segment: {0}")]
    MalformedSegment(#[from] SegmentError),

    /// No ACK arrived for any of the SYN attempts.
    #[error("handshake failed after {attempts} SYN attempts")]
    HandshakeFailed { attempts: u32 },

    /// The peer sent RESET.
    #[error("connection reset by peer")]
    PeerReset,

    #[error(transparent)]
    Socket(SocketError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A cooperating task stopped before the connection terminated.
    #[error("engine task aborted: {0}")]
    Aborted(String),
}

impl From<SocketError> for PtpError {
    fn from(e: SocketError) -> Self {
        match e {
            SocketError::Malformed { source, .. } => PtpError::MalformedSegment(source),
            other => PtpError::Socket(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PtpError>;
