use crate::error::FrameError;
use crate::prelude::*;
use crate::solax::serial::SERIAL_LEN;

use enum_dispatch::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const HEADER: [u8; 2] = [0xAA, 0x55];
/// header(2) + source(2) + destination(2) + control + function + length
pub const HEADER_LEN: usize = 9;
pub const CHECKSUM_LEN: usize = 2;
pub const MAX_DATA_LEN: usize = 100;
pub const BROADCAST_ADDRESS: u8 = 0xFF;
/// Address handed out to an inverter nobody claimed during discovery.
pub const DEFAULT_ADDRESS: u8 = 0x0A;

const MASTER: [u8; 2] = [0x01, 0x00];
const NOBODY: [u8; 2] = [0x00, 0x00];

// {{{ ControlCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ControlCode {
    Register = 0x10,
    Read = 0x11,
}
// }}}

// {{{ FunctionCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    Discovery = 0x00,
    RegisterAddress = 0x01,
    QueryStatus = 0x02,
    QueryInfo = 0x03,
    QueryConfig = 0x04,
    // replies carry the request code with the top bit set
    DiscoveryReply = 0x80,
    StatusReport = 0x82,
    DeviceInfo = 0x83,
    ConfigSettings = 0x84,
}
// }}}

/// The two framings differ only in how early a bad frame is abandoned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Variant {
    /// First generation X1 bus.
    Classic,
    /// X1 mini and later firmware: a set top bit in byte 1 is dropped at once.
    Mini,
}

// {{{ Frame
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub source: [u8; 2],
    pub destination: [u8; 2],
    pub control: u8,
    pub function: u8,
    pub data: Vec<u8>,
}

impl Frame {
    /// Device address of the sender.
    pub fn address(&self) -> u8 {
        self.source[1]
    }

    pub fn is_broadcast(&self) -> bool {
        self.address() == BROADCAST_ADDRESS
    }

    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.data.len() + CHECKSUM_LEN
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut r = Vec::with_capacity(self.wire_len());

        r.extend_from_slice(&HEADER);
        r.extend_from_slice(&self.source);
        r.extend_from_slice(&self.destination);
        r.push(self.control);
        r.push(self.function);
        r.push(self.data.len() as u8);
        r.extend_from_slice(&self.data);

        let sum = checksum::additive(&r);
        r.extend_from_slice(&sum.to_be_bytes());

        r
    }

    /// Decodes one complete frame, verifying header, length and checksum.
    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(FrameError::TooShort {
                expected: HEADER_LEN + CHECKSUM_LEN,
                actual: input.len(),
            }
            .into());
        }

        if input[0..2] != HEADER {
            return Err(FrameError::InvalidHeader([input[0], input[1]]).into());
        }

        let data_len = input[8] as usize;
        if data_len > MAX_DATA_LEN {
            return Err(FrameError::Oversize(data_len).into());
        }

        let total = HEADER_LEN + data_len + CHECKSUM_LEN;
        if input.len() != total {
            bail!(
                "frame length mismatch: input.len()={}, declared={}",
                input.len(),
                total
            );
        }

        let body = &input[..HEADER_LEN + data_len];
        checksum::verify_additive(body, [input[total - 2], input[total - 1]]).map_err(|m| {
            FrameError::Checksum {
                computed: m.computed,
                received: m.received,
            }
        })?;

        Ok(Self {
            source: [input[2], input[3]],
            destination: [input[4], input[5]],
            control: input[6],
            function: input[7],
            data: input[HEADER_LEN..HEADER_LEN + data_len].to_vec(),
        })
    }
}
// }}}

#[enum_dispatch]
pub trait RequestCommon {
    fn source(&self) -> [u8; 2] {
        MASTER
    }
    fn destination(&self) -> [u8; 2];
    fn control(&self) -> ControlCode;
    fn function(&self) -> FunctionCode;
    fn data(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Everything the bus master ever sends on a Solax bus.
#[enum_dispatch(RequestCommon)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    QueryStatus(QueryStatus),
    QueryInfo(QueryInfo),
    QueryConfig(QueryConfig),
    Discovery(Discovery),
    RegisterAddress(RegisterAddress),
}

impl Request {
    pub fn frame(&self) -> Frame {
        Frame {
            source: self.source(),
            destination: self.destination(),
            control: self.control().into(),
            function: self.function().into(),
            data: self.data(),
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.frame().bytes()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::QueryStatus(_) => "status query",
            Self::QueryInfo(_) => "info query",
            Self::QueryConfig(_) => "config query",
            Self::Discovery(_) => "discovery",
            Self::RegisterAddress(_) => "address assignment",
        }
    }
}

impl TryFrom<&Frame> for Request {
    type Error = anyhow::Error;

    fn try_from(frame: &Frame) -> Result<Self> {
        let control = ControlCode::try_from(frame.control)?;
        let function = FunctionCode::try_from(frame.function)?;
        let address = frame.destination[1];

        let r = match (control, function) {
            (ControlCode::Read, FunctionCode::QueryStatus) => QueryStatus { address }.into(),
            (ControlCode::Read, FunctionCode::QueryInfo) => QueryInfo { address }.into(),
            (ControlCode::Read, FunctionCode::QueryConfig) => QueryConfig { address }.into(),
            (ControlCode::Register, FunctionCode::Discovery) => Discovery.into(),
            (ControlCode::Register, FunctionCode::RegisterAddress) => {
                if frame.data.len() != SERIAL_LEN + 1 {
                    bail!("address assignment with {} data bytes", frame.data.len());
                }
                RegisterAddress {
                    serial_number: SerialNumber::new(&frame.data[..SERIAL_LEN])?,
                    address: frame.data[SERIAL_LEN],
                }
                .into()
            }
            _ => bail!("not a request: control={:?} function={:?}", control, function),
        };

        Ok(r)
    }
}

// {{{ addressed queries
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueryStatus {
    pub address: u8,
}
impl RequestCommon for QueryStatus {
    fn destination(&self) -> [u8; 2] {
        [0x00, self.address]
    }
    fn control(&self) -> ControlCode {
        ControlCode::Read
    }
    fn function(&self) -> FunctionCode {
        FunctionCode::QueryStatus
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueryInfo {
    pub address: u8,
}
impl RequestCommon for QueryInfo {
    fn destination(&self) -> [u8; 2] {
        [0x00, self.address]
    }
    fn control(&self) -> ControlCode {
        ControlCode::Read
    }
    fn function(&self) -> FunctionCode {
        FunctionCode::QueryInfo
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct QueryConfig {
    pub address: u8,
}
impl RequestCommon for QueryConfig {
    fn destination(&self) -> [u8; 2] {
        [0x00, self.address]
    }
    fn control(&self) -> ControlCode {
        ControlCode::Read
    }
    fn function(&self) -> FunctionCode {
        FunctionCode::QueryConfig
    }
}
// }}}

// {{{ discovery / address assignment
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Discovery;
impl RequestCommon for Discovery {
    fn destination(&self) -> [u8; 2] {
        NOBODY
    }
    fn control(&self) -> ControlCode {
        ControlCode::Register
    }
    fn function(&self) -> FunctionCode {
        FunctionCode::Discovery
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegisterAddress {
    pub serial_number: SerialNumber,
    pub address: u8,
}
impl RequestCommon for RegisterAddress {
    fn source(&self) -> [u8; 2] {
        NOBODY
    }
    fn destination(&self) -> [u8; 2] {
        NOBODY
    }
    fn control(&self) -> ControlCode {
        ControlCode::Register
    }
    fn function(&self) -> FunctionCode {
        FunctionCode::RegisterAddress
    }
    fn data(&self) -> Vec<u8> {
        let mut r = self.serial_number.to_vec();
        r.push(self.address);
        r
    }
}
// }}}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_query_bytes() {
        let r = Request::from(QueryStatus { address: 0x0A });
        assert_eq!(
            r.bytes(),
            vec![0xAA, 0x55, 0x01, 0x00, 0x00, 0x0A, 0x11, 0x02, 0x00, 0x01, 0x1D]
        );
    }

    #[test]
    fn discovery_bytes() {
        assert_eq!(
            Request::from(Discovery).bytes(),
            vec![0xAA, 0x55, 0x01, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x01, 0x10]
        );
    }

    #[test]
    fn register_address_layout() {
        let r = Request::from(RegisterAddress {
            serial_number: SerialNumber::default(),
            address: 0x0A,
        });
        let bytes = r.bytes();
        assert_eq!(bytes.len(), HEADER_LEN + 15 + CHECKSUM_LEN);
        assert_eq!(&bytes[2..9], &[0x00, 0x00, 0x00, 0x00, 0x10, 0x01, 0x0F]);
        assert_eq!(&bytes[9..23], b"12345677654321");
        assert_eq!(bytes[23], 0x0A);
    }

    #[test]
    fn decode_rejects_bad_header() {
        let mut bytes = Request::from(QueryInfo { address: 1 }).bytes();
        bytes[0] = 0xAB;
        let err = Frame::decode(&bytes).unwrap_err();
        assert_eq!(
            err.downcast_ref::<FrameError>(),
            Some(&FrameError::InvalidHeader([0xAB, 0x55]))
        );
    }

    #[test]
    fn decode_reports_checksum() {
        let mut bytes = Request::from(QueryConfig { address: 1 }).bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = Frame::decode(&bytes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::Checksum { .. })
        ));
    }

    #[test]
    fn requests_survive_the_wire() {
        let requests: [Request; 5] = [
            QueryStatus { address: 0x0A }.into(),
            QueryInfo { address: 0x0B }.into(),
            QueryConfig { address: 0x0C }.into(),
            Discovery.into(),
            RegisterAddress {
                serial_number: SerialNumber::default(),
                address: 0x0D,
            }
            .into(),
        ];

        for request in requests {
            let frame = Frame::decode(&request.bytes()).unwrap();
            assert_eq!(Request::try_from(&frame).unwrap(), request, "{}", request.name());
        }
    }

    #[test]
    fn reply_is_not_a_request() {
        let frame = Frame {
            source: [0x00, 0x0A],
            destination: [0x01, 0x00],
            control: 0x11,
            function: 0x82,
            data: vec![],
        };
        assert!(Request::try_from(&frame).is_err());
    }
}
