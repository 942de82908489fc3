//! Shared plumbing for the byte-at-a-time frame synchronizers.
//!
//! Both bus protocols are half duplex and carry no frame delimiter beyond
//! silence on the line, so each synchronizer keeps an accumulation buffer
//! that is dropped whenever the gap between two bytes exceeds
//! [`RESYNC_TIMEOUT_MS`].

use crate::checksum::Mismatch;
use crate::prelude::*;

use bytes::BytesMut;

pub const RESYNC_TIMEOUT_MS: u32 = 50;

/// Outcome of feeding one byte.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Feed<F> {
    NeedMore,
    Complete(F),
    Invalid(Rejection),
}

/// Why the buffered bytes were thrown away.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Rejection {
    ErrorFlag(u8),
    InvalidHeader([u8; 2]),
    Oversize(usize),
    Checksum(Mismatch),
}

impl Rejection {
    pub fn is_checksum(&self) -> bool {
        matches!(self, Self::Checksum(_))
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ErrorFlag(b) => write!(f, "error flag set in byte 1 (0x{:02X})", b),
            Self::InvalidHeader(h) => write!(f, "invalid header {:02X}.{:02X}", h[0], h[1]),
            Self::Oversize(len) => write!(f, "declared data length {} too long", len),
            Self::Checksum(m) => write!(
                f,
                "checksum mismatch: computed 0x{:04X}, received 0x{:04X}",
                m.computed, m.received
            ),
        }
    }
}

/// Receive buffer with inter-byte timeout.
pub struct Accumulator {
    buffer: BytesMut,
    last_byte_ms: u32,
}

impl Accumulator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            last_byte_ms: 0,
        }
    }

    /// Drops a stale partial frame. Returns true if anything was discarded.
    pub fn expire(&mut self, now_ms: u32) -> bool {
        if self.buffer.is_empty()
            || transport::elapsed_ms(now_ms, self.last_byte_ms) <= RESYNC_TIMEOUT_MS
        {
            return false;
        }

        debug!(
            "discarding {} stale bytes: {}",
            self.buffer.len(),
            Utils::hex_dump(&self.buffer)
        );
        self.buffer.clear();
        true
    }

    /// Appends a byte, first dropping the buffer if it went stale.
    pub fn push(&mut self, byte: u8, now_ms: u32) {
        self.expire(now_ms);
        self.last_byte_ms = now_ms;
        self.buffer.extend_from_slice(&[byte]);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_timeout_only() {
        let mut acc = Accumulator::with_capacity(8);
        acc.push(1, 100);
        assert!(!acc.expire(150));
        assert_eq!(acc.len(), 1);
        assert!(acc.expire(151));
        assert!(acc.is_empty());
    }

    #[test]
    fn expiry_survives_clock_wrap() {
        let mut acc = Accumulator::with_capacity(8);
        acc.push(1, u32::MAX - 5);
        acc.push(2, 10);
        assert_eq!(acc.bytes(), &[1, 2]);
    }

    #[test]
    fn stale_byte_starts_new_buffer() {
        let mut acc = Accumulator::with_capacity(8);
        acc.push(1, 0);
        acc.push(2, 10);
        acc.push(3, 61);
        assert_eq!(acc.bytes(), &[3]);
    }
}
