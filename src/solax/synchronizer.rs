use crate::framing::{Accumulator, Feed, Rejection};
use crate::prelude::*;
use crate::solax::packet::{Frame, Variant, CHECKSUM_LEN, HEADER, HEADER_LEN, MAX_DATA_LEN};

/// Reassembles Solax frames one byte at a time.
///
/// The length byte at offset 8 decides how many bytes to wait for; header
/// and checksum are only looked at once all of them have arrived.
pub struct FrameSynchronizer {
    variant: Variant,
    acc: Accumulator,
}

impl FrameSynchronizer {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            acc: Accumulator::with_capacity(HEADER_LEN + MAX_DATA_LEN + CHECKSUM_LEN),
        }
    }

    pub fn buffered(&self) -> usize {
        self.acc.len()
    }

    pub fn expire(&mut self, now_ms: u32) -> bool {
        self.acc.expire(now_ms)
    }

    pub fn feed(&mut self, byte: u8, now_ms: u32) -> Feed<Frame> {
        self.acc.push(byte, now_ms);

        let r = self.evaluate(self.acc.bytes());
        if !matches!(r, Feed::NeedMore) {
            self.acc.clear();
        }
        r
    }

    fn evaluate(&self, buffer: &[u8]) -> Feed<Frame> {
        let at = buffer.len() - 1;

        if at == 1 && self.variant == Variant::Mini && buffer[1] & 0x80 != 0 {
            return Feed::Invalid(Rejection::ErrorFlag(buffer[1]));
        }

        if at < HEADER_LEN - 1 {
            return Feed::NeedMore;
        }

        let data_len = buffer[HEADER_LEN - 1] as usize;
        if data_len > MAX_DATA_LEN {
            return Feed::Invalid(Rejection::Oversize(data_len));
        }

        let total = HEADER_LEN + data_len + CHECKSUM_LEN;
        if buffer.len() < total {
            return Feed::NeedMore;
        }

        if buffer[0..2] != HEADER {
            return Feed::Invalid(Rejection::InvalidHeader([buffer[0], buffer[1]]));
        }

        if let Err(mismatch) =
            checksum::verify_additive(&buffer[..total - CHECKSUM_LEN], [buffer[total - 2], buffer[total - 1]])
        {
            return Feed::Invalid(Rejection::Checksum(mismatch));
        }

        Feed::Complete(Frame {
            source: [buffer[2], buffer[3]],
            destination: [buffer[4], buffer[5]],
            control: buffer[6],
            function: buffer[7],
            data: buffer[HEADER_LEN..HEADER_LEN + data_len].to_vec(),
        })
    }
}
