use thiserror::Error;

/// Reasons a received frame or payload could not be turned into something useful.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("invalid header {0:02X?}")]
    InvalidHeader([u8; 2]),

    #[error("checksum mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    Checksum { computed: u16, received: u16 },

    #[error("declared data length {0} exceeds the 100 byte maximum")]
    Oversize(usize),

    #[error("invalid payload length for function 0x{function:02X}: {actual} bytes, expected {expected}")]
    InvalidLength {
        function: u8,
        expected: &'static str,
        actual: usize,
    },
}
