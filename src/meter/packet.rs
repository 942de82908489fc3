use crate::error::FrameError;
use crate::prelude::*;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// address + function + register(2) + count(2) + crc(2)
pub const REQUEST_LEN: usize = 8;
pub const CRC_LEN: usize = 2;
/// Modbus address the inverter polls its meter on.
pub const DEFAULT_ADDRESS: u8 = 0x01;

// {{{ FunctionCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
}
// }}}

// {{{ Register
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Register {
    TotalEnergy = 0x08,
    Handshake = 0x0B,
    PowerFloat = 0x0C,
    PowerInt = 0x0E,
    EnergyImport = 0x48,
    EnergyExport = 0x4A,
}
// }}}

// {{{ Request
/// A register read sent by the inverter to its meter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    pub address: u8,
    pub function: u8,
    pub register: u16,
    pub count: u16,
}

impl Request {
    pub fn new(address: u8, function: FunctionCode, register: Register, count: u16) -> Self {
        Self {
            address,
            function: function.into(),
            register: u8::from(register) as u16,
            count,
        }
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() != REQUEST_LEN {
            return Err(FrameError::InvalidLength {
                function: input.get(1).copied().unwrap_or_default(),
                expected: "8",
                actual: input.len(),
            }
            .into());
        }

        let covered = &input[..REQUEST_LEN - CRC_LEN];
        if let Err(m) = checksum::verify_crc16(covered, [input[6], input[7]]) {
            return Err(FrameError::Checksum {
                computed: m.computed,
                received: m.received,
            }
            .into());
        }

        Ok(Self {
            address: input[0],
            function: input[1],
            register: u16::from_be_bytes([input[2], input[3]]),
            count: u16::from_be_bytes([input[4], input[5]]),
        })
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut r = Vec::with_capacity(REQUEST_LEN);
        r.push(self.address);
        r.push(self.function);
        r.extend_from_slice(&self.register.to_be_bytes());
        r.extend_from_slice(&self.count.to_be_bytes());
        append_crc(&mut r);
        r
    }

    /// The five bytes between address and checksum.
    pub fn data(&self) -> Vec<u8> {
        self.bytes()[1..REQUEST_LEN - CRC_LEN].to_vec()
    }

    /// Only the low register byte selects what is being read.
    pub fn register(&self) -> Result<Register> {
        Register::try_from(self.register as u8)
            .map_err(|_| anyhow!("unknown register 0x{:02X}", self.register))
    }
}
// }}}

// {{{ Response
/// Everything the emulated meter ever answers with.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Handshake { address: u8 },
    PowerFloat { address: u8, watts: f32 },
    PowerInt { address: u8, watts: i16 },
    EnergyImport { address: u8 },
    EnergyExport { address: u8 },
    TotalEnergy { address: u8 },
}

impl Response {
    pub fn address(&self) -> u8 {
        match self {
            Self::Handshake { address }
            | Self::PowerFloat { address, .. }
            | Self::PowerInt { address, .. }
            | Self::EnergyImport { address }
            | Self::EnergyExport { address }
            | Self::TotalEnergy { address } => *address,
        }
    }

    fn function(&self) -> FunctionCode {
        match self {
            Self::Handshake { .. } | Self::PowerInt { .. } | Self::TotalEnergy { .. } => {
                FunctionCode::ReadHoldingRegisters
            }
            Self::PowerFloat { .. } | Self::EnergyImport { .. } | Self::EnergyExport { .. } => {
                FunctionCode::ReadInputRegisters
            }
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Self::Handshake { .. } => vec![0x00, 0x00],
            Self::PowerFloat { watts, .. } => watts.to_be_bytes().to_vec(),
            Self::PowerInt { watts, .. } => watts.to_be_bytes().to_vec(),
            Self::EnergyImport { .. } | Self::EnergyExport { .. } => vec![0x00; 4],
            Self::TotalEnergy { .. } => vec![0x00; 8],
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut r = Vec::with_capacity(3 + payload.len() + CRC_LEN);
        r.push(self.address());
        r.push(self.function().into());
        r.push(payload.len() as u8);
        r.extend_from_slice(&payload);
        append_crc(&mut r);
        r
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::PowerFloat { .. } => "power (float)",
            Self::PowerInt { .. } => "power (int)",
            Self::EnergyImport { .. } => "energy import",
            Self::EnergyExport { .. } => "energy export",
            Self::TotalEnergy { .. } => "total energy",
        }
    }
}
// }}}

fn append_crc(buf: &mut Vec<u8>) {
    let crc = checksum::crc16_modbus(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}
