//! Wire-format definitions for PTP segments.
//!
//! Every datagram exchanged between sender and receiver is a [`Segment`].
//! This module is responsible for:
//! - Defining the on-wire binary layout (kind, sequence number, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`].
//!
//! No I/O and no protocol validation happens here; the engines decide what a
//! well-formed but unexpected segment means.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |             Kind              |        Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Payload (DATA only, 0..=1000)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::fmt;

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 4;

/// Largest payload a single DATA segment may carry.
pub const MAX_PAYLOAD: usize = 1000;

/// Largest datagram either role ever puts on the wire.
pub const MAX_SEGMENT_LEN: usize = HEADER_LEN + MAX_PAYLOAD;

const OFF_KIND: usize = 0;
const OFF_SEQ: usize = 2;

/// Segment kind, carried in the first two header bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Kind {
    Data = 0,
    Ack = 1,
    Syn = 2,
    Fin = 3,
    Reset = 4,
}

impl Kind {
    /// Numeric code used on the wire.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Parse a wire code; `None` for codes outside the closed set.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Kind::Data),
            1 => Some(Kind::Ack),
            2 => Some(Kind::Syn),
            3 => Some(Kind::Fin),
            4 => Some(Kind::Reset),
            _ => None,
        }
    }

    /// Name used in the event log.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Data => "DATA",
            Kind::Ack => "ACK",
            Kind::Syn => "SYN",
            Kind::Fin => "FIN",
            Kind::Reset => "RESET",
        }
    }

    /// `true` for kinds travelling sender → receiver.
    pub fn is_forward(self) -> bool {
        !matches!(self, Kind::Ack)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A complete protocol datagram.
///
/// Built once per logical unit of transmission and never mutated; a
/// retransmission re-sends the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: Kind,
    pub seq: u16,
    /// Empty unless `kind == Kind::Data`.
    pub payload: Vec<u8>,
}

impl Segment {
    /// Build a DATA segment.
    pub fn data(seq: u16, payload: Vec<u8>) -> Self {
        debug_assert!(
            payload.len() <= MAX_PAYLOAD,
            "DATA payload of {} bytes exceeds {MAX_PAYLOAD}",
            payload.len()
        );
        Self {
            kind: Kind::Data,
            seq,
            payload,
        }
    }

    /// Build a header-only segment (ACK, SYN, FIN or RESET).
    pub fn control(kind: Kind, seq: u16) -> Self {
        debug_assert!(kind != Kind::Data, "DATA segments need a payload");
        Self {
            kind,
            seq,
            payload: Vec::new(),
        }
    }

    pub fn ack(seq: u16) -> Self {
        Self::control(Kind::Ack, seq)
    }

    /// Number of payload bytes carried.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        buf[OFF_KIND..OFF_KIND + 2].copy_from_slice(&self.kind.code().to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.seq.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Everything after the header is taken as payload, whatever the kind.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::TooShort(buf.len()));
        }

        let code = u16::from_be_bytes([buf[OFF_KIND], buf[OFF_KIND + 1]]);
        let seq = u16::from_be_bytes([buf[OFF_SEQ], buf[OFF_SEQ + 1]]);
        let kind = Kind::from_code(code).ok_or(SegmentError::UnknownKind(code))?;

        Ok(Self {
            kind,
            seq,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} seq={} len={}", self.kind, self.seq, self.payload.len())
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// Fewer bytes than the fixed header.
    #[error("datagram of {0} bytes is too short to contain a header")]
    TooShort(usize),
    /// Kind code outside `0..=4`.
    #[error("unknown segment kind code {0}")]
    UnknownKind(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_roundtrip_keeps_payload() {
        let seg = Segment::data(4242, b"hello".to_vec());
        let decoded = Segment::decode(&seg.encode()).unwrap();
        assert_eq!(decoded, seg);
    }

    #[test]
    fn control_segments_are_exactly_header_len() {
        for kind in [Kind::Ack, Kind::Syn, Kind::Fin, Kind::Reset] {
            let bytes = Segment::control(kind, 7).encode();
            assert_eq!(bytes.len(), HEADER_LEN, "{kind} is not header-only");
        }
    }

    #[test]
    fn header_fields_big_endian_on_wire() {
        let bytes = Segment::control(Kind::Fin, 0x0102).encode();
        assert_eq!(bytes, vec![0x00, 0x03, 0x01, 0x02]);
    }

    #[test]
    fn kind_codes_match_wire_table() {
        assert_eq!(Kind::Data.code(), 0);
        assert_eq!(Kind::Ack.code(), 1);
        assert_eq!(Kind::Syn.code(), 2);
        assert_eq!(Kind::Fin.code(), 3);
        assert_eq!(Kind::Reset.code(), 4);
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Segment::decode(&[]), Err(SegmentError::TooShort(0)));
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(
            Segment::decode(&[0u8; HEADER_LEN - 1]),
            Err(SegmentError::TooShort(3))
        );
    }

    #[test]
    fn decode_unknown_kind_returns_error() {
        assert_eq!(
            Segment::decode(&[0x00, 0x09, 0x00, 0x01]),
            Err(SegmentError::UnknownKind(9))
        );
    }

    #[test]
    fn full_size_data_segment_fits_max_len() {
        let seg = Segment::data(0, vec![0xab; MAX_PAYLOAD]);
        assert_eq!(seg.encode().len(), MAX_SEGMENT_LEN);
    }

    #[test]
    fn kind_names_for_event_log() {
        assert_eq!(Kind::Data.to_string(), "DATA");
        assert_eq!(Kind::Reset.to_string(), "RESET");
        assert!(!Kind::Ack.is_forward());
        assert!(Kind::Syn.is_forward());
    }
}
