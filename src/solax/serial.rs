use crate::prelude::*;

use serde::{Serialize, Serializer};

pub const SERIAL_LEN: usize = 14;

/// The 14 byte serial number an inverter reports during discovery.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerialNumber([u8; SERIAL_LEN]);

impl SerialNumber {
    pub fn new(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SERIAL_LEN] = bytes.try_into().map_err(|_| {
            anyhow!(
                "serial number must be {} bytes, got {}",
                SERIAL_LEN,
                bytes.len()
            )
        })?;
        Ok(Self(bytes))
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl Default for SerialNumber {
    /// "12345677654321", what a factory fresh X1 mini answers with.
    fn default() -> Self {
        Self(*b"12345677654321")
    }
}

impl From<[u8; SERIAL_LEN]> for SerialNumber {
    fn from(bytes: [u8; SERIAL_LEN]) -> Self {
        Self(bytes)
    }
}

/// Accepts either the 14 ASCII characters or their 28 digit hex encoding.
impl FromStr for SerialNumber {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.len() {
            SERIAL_LEN => Self::new(s.as_bytes()),
            28 => Self::new(&hex::decode(s).map_err(|err| anyhow!("{}: {}", s, err))?),
            _ => bail!(
                "{} must be {} characters or {} hex digits",
                s,
                SERIAL_LEN,
                SERIAL_LEN * 2
            ),
        }
    }
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl std::fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self, self.to_hex())
    }
}

impl Serialize for SerialNumber {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
