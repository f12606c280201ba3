//! Send-side window bookkeeping.
//!
//! [`SendWindow`] owns every DATA segment of the transfer, built up front,
//! and tracks which of them are in flight, acknowledged, or queued for
//! retransmission.  It is the state the sender's Driver and Listener share
//! under one lock (see [`crate::sender`]).
//!
//! # Offsets and sequence numbers
//!
//! Internally everything is measured in 64-bit byte offsets from the start of
//! the stream; 16-bit sequence numbers only appear at the edges.  An incoming
//! ACK value is mapped onto an offset by its forward distance from the
//! frontier, and rejected if that lands beyond what has been sent.
//!
//! ```text
//!  acked (frontier)        sent                         total
//!      │                    │                             │
//!  ────┼────────────────────┼─────────────────────────────┼──▶ offset
//!      │ <── outstanding ──▶│ <── not yet sent ─────────▶ │
//! ```
//!
//! Invariants:
//! - `sent - acked <= max_win` (first transmissions only; retransmissions
//!   were already counted).
//! - outstanding segments are contiguous in send order.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::segment::Segment;
use crate::seq;

/// Duplicate ACKs at one frontier that trigger a fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

/// One DATA segment and its transmission history.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub segment: Segment,
    /// Offset of the first payload byte within the stream.
    pub offset: u64,
    /// Number of times this segment has been put on the wire.
    pub tx_count: u32,
    /// Time of the most recent transmission.
    pub sent_at: Option<Instant>,
}

/// Result of feeding one ACK to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The frontier moved forward by this many bytes.
    Advanced(u64),
    /// Every byte of the stream is now acknowledged.
    Complete,
    /// ACK repeats the current frontier while data is outstanding.
    Duplicate,
    /// Third duplicate: the frontier segment was queued for retransmission.
    FastRetransmit,
    /// Outside the outstanding range, or nothing outstanding.
    Ignored,
}

/// Counters reported at the end of a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    /// First transmissions of DATA segments.
    pub segments_sent: u64,
    pub retransmissions: u64,
    pub fast_retransmits: u64,
    pub timeouts: u64,
    pub duplicate_acks: u64,
}

/// Sliding-window state for one transfer.
#[derive(Debug)]
pub struct SendWindow {
    /// Every DATA segment, in assignment order.
    segments: Vec<Outgoing>,
    /// Sequence number of the first data byte.
    start: u16,
    total: u64,
    max_win: usize,
    /// Index of the next segment never sent.
    next_unsent: usize,
    /// Cumulatively acknowledged bytes; the frontier.
    acked: u64,
    /// Bytes sent at least once.
    sent: u64,
    /// Segment indices awaiting retransmission.
    retransmit: VecDeque<usize>,
    dup_acks: u32,
    stats: WindowStats,
}

impl SendWindow {
    /// Split `data` into segments of at most `mss` bytes starting at
    /// sequence number `start`.
    pub fn new(data: &[u8], start: u16, mss: usize, max_win: usize) -> Self {
        assert!(mss >= 1 && max_win >= mss, "window must fit one segment");
        let mut segments = Vec::with_capacity(data.len().div_ceil(mss));
        let mut offset = 0u64;
        let mut seq = start;
        for chunk in data.chunks(mss) {
            segments.push(Outgoing {
                segment: Segment::data(seq, chunk.to_vec()),
                offset,
                tx_count: 0,
                sent_at: None,
            });
            offset += chunk.len() as u64;
            seq = seq::add(seq, chunk.len());
        }
        Self {
            segments,
            start,
            total: offset,
            max_win,
            next_unsent: 0,
            acked: 0,
            sent: 0,
            retransmit: VecDeque::new(),
            dup_acks: 0,
            stats: WindowStats::default(),
        }
    }

    fn seq_at(&self, offset: u64) -> u16 {
        // Truncation to 16 bits is the modulus.
        seq::add(self.start, (offset & 0xffff) as usize)
    }

    /// Sequence number of the oldest unacknowledged byte.
    pub fn frontier_seq(&self) -> u16 {
        self.seq_at(self.acked)
    }

    /// Sequence number one past the last data byte; the FIN's sequence.
    pub fn end_seq(&self) -> u16 {
        self.seq_at(self.total)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Payload bytes sent but not yet acknowledged.
    pub fn outstanding(&self) -> u64 {
        self.sent - self.acked
    }

    pub fn is_complete(&self) -> bool {
        self.acked == self.total
    }

    pub fn stats(&self) -> WindowStats {
        self.stats
    }

    /// Index of the outstanding segment starting at `seq`.
    pub fn index_of_seq(&self, seq: u16) -> Option<usize> {
        let frontier = self.frontier_seq();
        if !seq::in_window(seq, frontier, self.outstanding() as u32) {
            return None;
        }
        let offset = self.acked + u64::from(seq::distance_forward(frontier, seq));
        self.segments
            .binary_search_by_key(&offset, |o| o.offset)
            .ok()
    }

    /// Take the next never-sent segment if the window has room for it.
    ///
    /// The segment counts as sent from `now`; the caller must transmit it.
    pub fn next_sendable(&mut self, now: Instant) -> Option<Segment> {
        let out = self.segments.get_mut(self.next_unsent)?;
        let len = out.segment.payload.len() as u64;
        if (self.sent - self.acked) + len > self.max_win as u64 {
            return None;
        }
        out.tx_count = 1;
        out.sent_at = Some(now);
        let segment = out.segment.clone();
        self.next_unsent += 1;
        self.sent += len;
        self.stats.segments_sent += 1;
        Some(segment)
    }

    /// `true` when nothing is queued for retransmission.
    pub fn retransmit_queue_is_empty(&self) -> bool {
        self.retransmit.is_empty()
    }

    /// Swap the retransmission queue for an empty one and return the queued
    /// segments that are still unacknowledged, marked as re-sent at `now`.
    pub fn drain_retransmits(&mut self, now: Instant) -> Vec<Segment> {
        let queued = std::mem::take(&mut self.retransmit);
        let mut out = Vec::with_capacity(queued.len());
        for idx in queued {
            let entry = &mut self.segments[idx];
            if entry.offset < self.acked {
                continue;
            }
            entry.tx_count += 1;
            entry.sent_at = Some(now);
            self.stats.retransmissions += 1;
            out.push(entry.segment.clone());
        }
        out
    }

    /// Process a cumulative ACK value.
    pub fn on_ack(&mut self, ack: u16) -> AckOutcome {
        let outstanding = self.outstanding();
        if outstanding == 0 {
            return AckOutcome::Ignored;
        }
        let advance = u64::from(seq::distance_forward(self.frontier_seq(), ack));
        if advance > outstanding {
            return AckOutcome::Ignored;
        }

        if advance == 0 {
            self.stats.duplicate_acks += 1;
            self.dup_acks += 1;
            if self.dup_acks < DUP_ACK_THRESHOLD {
                return AckOutcome::Duplicate;
            }
            self.dup_acks = 0;
            self.stats.fast_retransmits += 1;
            if let Some(idx) = self.index_of_seq(ack) {
                self.enqueue(idx);
            }
            return AckOutcome::FastRetransmit;
        }

        self.acked += advance;
        self.dup_acks = 0;
        if self.is_complete() {
            AckOutcome::Complete
        } else {
            AckOutcome::Advanced(advance)
        }
    }

    /// Receive timeout: queue the frontier segment.  Returns `false` when
    /// nothing is outstanding.
    pub fn on_timeout(&mut self) -> bool {
        let queued = self.enqueue_frontier();
        if queued {
            self.stats.timeouts += 1;
        }
        queued
    }

    /// Queue the frontier segment if its last transmission is older than
    /// `rto` at `now`.
    pub fn expire_frontier(&mut self, now: Instant, rto: Duration) -> bool {
        let stale = self
            .frontier_index()
            .and_then(|idx| self.segments[idx].sent_at)
            .is_some_and(|at| now.saturating_duration_since(at) >= rto);
        if stale {
            self.stats.timeouts += 1;
            self.enqueue_frontier()
        } else {
            false
        }
    }

    fn frontier_index(&self) -> Option<usize> {
        if self.outstanding() == 0 {
            return None;
        }
        self.index_of_seq(self.frontier_seq())
    }

    fn enqueue_frontier(&mut self) -> bool {
        match self.frontier_index() {
            Some(idx) => {
                self.enqueue(idx);
                true
            }
            None => false,
        }
    }

    fn enqueue(&mut self, idx: usize) {
        if !self.retransmit.contains(&idx) {
            self.retransmit.push_back(idx);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
