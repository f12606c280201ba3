//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`Segment`] instead of raw bytes.  All protocol logic lives elsewhere;
//! this module owns only byte I/O.
//!
//! Every method takes `&self`, so one socket can be shared through an `Arc`
//! by the sender's Driver (which only sends) and Listener (which only
//! receives).

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::segment::{Segment, SegmentError, MAX_SEGMENT_LEN};

/// Receive buffer size; comfortably above the largest legal datagram.
const RECV_BUF: usize = 2 * MAX_SEGMENT_LEN;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The datagram arrived but could not be decoded as a segment.
    #[error("segment decode error from {from} ({len} bytes): {source}")]
    Malformed {
        from: SocketAddr,
        /// Raw datagram length.
        len: usize,
        #[source]
        source: SegmentError,
    },
}

/// An async, segment-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after the OS assigns a port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `segment` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, segment: &Segment, dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(&segment.encode(), dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it into a [`Segment`].
    ///
    /// Returns `(segment, sender_address)`.  Datagrams that fail to decode
    /// come back as [`SocketError::Malformed`]; the caller decides whether to
    /// keep reading.
    pub async fn recv_from(&self) -> Result<(Segment, SocketAddr), SocketError> {
        let mut buf = vec![0u8; RECV_BUF];
        let (n, from) = self.inner.recv_from(&mut buf).await?;
        let segment =
            Segment::decode(&buf[..n]).map_err(|source| SocketError::Malformed {
            from,
            len: n,
            source,
        })?;
        Ok((segment, from))
    }
}
