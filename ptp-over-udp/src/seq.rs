//! 16-bit sequence-number space.
//!
//! PTP sequence numbers count payload bytes modulo 65536.  There is no total
//! order over the space: "before" and "after" only make sense relative to a
//! known window start, so every comparison in the engines goes through
//! [`distance_forward`] or [`in_window`] instead of `<` on raw values.
//!
//! ```text
//!   start                    start + len
//!     │                          │
//!  ───┼──────── window ──────────┼────────▶ (wraps at 65536)
//! ```

/// Size of the sequence space.
pub const SEQ_SPACE: u32 = 1 << 16;

/// `(seq + n) mod 65536`.
#[inline]
pub fn add(seq: u16, n: usize) -> u16 {
    // Only the low 16 bits of `n` survive the modulus.
    seq.wrapping_add(n as u16)
}

/// Steps needed to walk forward from `a` to `b`, in `[0, 65535]`.
#[inline]
pub fn distance_forward(a: u16, b: u16) -> u16 {
    b.wrapping_sub(a)
}

/// `true` when `seq` lies in the `len`-wide window starting at `start`.
#[inline]
pub fn in_window(seq: u16, start: u16, len: u32) -> bool {
    u32::from(distance_forward(start, seq)) < len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_wraps_at_top_of_space() {
        assert_eq!(add(65535, 1), 0);
        assert_eq!(add(65000, 1000), 464);
        assert_eq!(add(10, 0), 10);
    }

    #[test]
    fn add_large_counts_reduce_modulo_space() {
        assert_eq!(add(5, SEQ_SPACE as usize), 5);
        assert_eq!(add(5, SEQ_SPACE as usize + 3), 8);
    }

    #[test]
    fn distance_forward_across_wrap() {
        assert_eq!(distance_forward(65530, 10), 16);
        assert_eq!(distance_forward(10, 65530), 65520);
        assert_eq!(distance_forward(100, 100), 0);
    }

    #[test]
    fn in_window_without_wrap() {
        assert!(in_window(100, 100, 10));
        assert!(in_window(109, 100, 10));
        assert!(!in_window(110, 100, 10));
        assert!(!in_window(99, 100, 10));
    }

    #[test]
    fn in_window_across_wrap_boundary() {
        // Window [65530, 65530 + 20) covers 65530..=65535 and 0..=13.
        assert!(in_window(65535, 65530, 20));
        assert!(in_window(0, 65530, 20));
        assert!(in_window(13, 65530, 20));
        assert!(!in_window(14, 65530, 20));
        assert!(!in_window(65529, 65530, 20));
    }

    #[test]
    fn empty_window_contains_nothing() {
        assert!(!in_window(0, 0, 0));
    }

    #[test]
    fn full_space_window_contains_everything() {
        assert!(in_window(12345, 54321, SEQ_SPACE));
    }
}
