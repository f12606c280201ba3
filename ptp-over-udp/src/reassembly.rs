//! Receive-side reassembly state.
//!
//! [`ReassemblyBuffer`] turns DATA segments arriving in any order, possibly
//! duplicated, into one contiguous byte stream plus a cumulative ACK value.
//!
//! - Segments inside the acceptance window are stored keyed by sequence
//!   number; a duplicate simply overwrites its earlier copy.
//! - When the segment at `expected` arrives, the buffer walks forward through
//!   every contiguous stored entry in one pass, moving their bytes into the
//!   delivered stream and advancing `expected` past them.
//! - Segments behind `expected` (already delivered) are never stored again.
//!
//! `expected` never moves backwards.  Moving delivered bytes out of the map
//! keeps every key within one window of `expected`, so keys cannot alias even
//! when the stream is longer than the 16-bit sequence space.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility (see [`crate::receiver`]).

use std::collections::HashMap;

use crate::seq;

/// How far ahead of `expected` a segment may start and still be buffered.
pub const RECV_WINDOW: u32 = 1 << 15;

/// What happened to an arriving DATA segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Filled the gap at `expected`; the cumulative ACK moved.
    Advanced,
    /// Stored ahead of a gap.
    Buffered,
    /// Same sequence number already stored ahead of a gap; overwritten.
    Duplicate,
    /// Behind `expected` or outside the acceptance window; not stored.
    Stale,
}

/// Reassembly buffer for one connection.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    /// Sequence number of the first data byte (peer ISN + 1).
    start: u16,
    /// Next expected sequence number; the cumulative ACK value.
    expected: u16,
    /// Out-of-order payloads waiting for the gap before them to fill.
    pending: HashMap<u16, Vec<u8>>,
    /// Contiguous bytes from `start` up to `expected`.
    delivered: Vec<u8>,
}

impl ReassemblyBuffer {
    /// Create a buffer whose stream begins at sequence number `start`.
    pub fn new(start: u16) -> Self {
        Self {
            start,
            expected: start,
            pending: HashMap::new(),
            delivered: Vec::new(),
        }
    }

    /// Process one DATA segment.
    pub fn on_data(&mut self, seq: u16, payload: &[u8]) -> Delivery {
        if payload.is_empty() || !seq::in_window(seq, self.expected, RECV_WINDOW) {
            return Delivery::Stale;
        }

        let previous = self.pending.insert(seq, payload.to_vec());
        if seq != self.expected {
            return if previous.is_some() {
                Delivery::Duplicate
            } else {
                Delivery::Buffered
            };
        }

        while let Some(chunk) = self.pending.remove(&self.expected) {
            self.expected = seq::add(self.expected, chunk.len());
            self.delivered.extend_from_slice(&chunk);
        }
        Delivery::Advanced
    }

    /// Cumulative ACK value: everything before this has been received.
    pub fn ack_number(&self) -> u16 {
        self.expected
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    /// The contiguous stream reassembled so far.
    pub fn stream(&self) -> &[u8] {
        &self.delivered
    }

    /// Number of segments held behind a gap.
    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }

    /// Hand over the reassembled stream, leaving the buffer empty.
    pub fn take_stream(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.delivered)
    }
}
