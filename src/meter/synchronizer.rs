use crate::framing::{Accumulator, Feed, Rejection};
use crate::meter::packet::{Request, CRC_LEN, REQUEST_LEN};
use crate::prelude::*;

/// Reassembles fixed-size meter polls one byte at a time.
pub struct RequestSynchronizer {
    acc: Accumulator,
}

impl Default for RequestSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestSynchronizer {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::with_capacity(REQUEST_LEN),
        }
    }

    pub fn buffered(&self) -> usize {
        self.acc.len()
    }

    pub fn expire(&mut self, now_ms: u32) -> bool {
        self.acc.expire(now_ms)
    }

    pub fn feed(&mut self, byte: u8, now_ms: u32) -> Feed<Request> {
        self.acc.push(byte, now_ms);

        let buffer = self.acc.bytes();
        if buffer.len() < REQUEST_LEN {
            return Feed::NeedMore;
        }

        let covered = &buffer[..REQUEST_LEN - CRC_LEN];
        let r = match checksum::verify_crc16(covered, [buffer[6], buffer[7]]) {
            Ok(()) => Feed::Complete(Request {
                address: buffer[0],
                function: buffer[1],
                register: u16::from_be_bytes([buffer[2], buffer[3]]),
                count: u16::from_be_bytes([buffer[4], buffer[5]]),
            }),
            Err(mismatch) => Feed::Invalid(Rejection::Checksum(mismatch)),
        };

        self.acc.clear();
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::packet::{FunctionCode, Register};

    const POWER_POLL: [u8; 8] = [0x01, 0x04, 0x00, 0x0C, 0x00, 0x02, 0xB1, 0xC8];

    #[test]
    fn completes_on_eighth_byte() {
        let mut sync = RequestSynchronizer::new();
        for b in &POWER_POLL[..7] {
            assert_eq!(sync.feed(*b, 0), Feed::NeedMore);
        }
        assert_eq!(
            sync.feed(POWER_POLL[7], 0),
            Feed::Complete(Request::new(
                0x01,
                FunctionCode::ReadInputRegisters,
                Register::PowerFloat,
                2
            ))
        );
        assert_eq!(sync.buffered(), 0);
    }

    #[test]
    fn bad_crc_resets() {
        let mut sync = RequestSynchronizer::new();
        let mut bytes = POWER_POLL;
        bytes[3] = 0x0E;
        let results: Vec<_> = bytes.iter().map(|b| sync.feed(*b, 0)).collect();
        assert!(matches!(results.last(), Some(Feed::Invalid(r)) if r.is_checksum()));
        assert_eq!(sync.buffered(), 0);

        // next poll is picked up cleanly
        let results: Vec<_> = POWER_POLL.iter().map(|b| sync.feed(*b, 1)).collect();
        assert!(matches!(results.last(), Some(Feed::Complete(_))));
    }

    #[test]
    fn silence_drops_partial_poll() {
        let mut sync = RequestSynchronizer::new();
        for b in &POWER_POLL[..4] {
            sync.feed(*b, 0);
        }
        assert!(sync.expire(51));
        let results: Vec<_> = POWER_POLL.iter().map(|b| sync.feed(*b, 60)).collect();
        assert!(matches!(results.last(), Some(Feed::Complete(_))));
    }
}
