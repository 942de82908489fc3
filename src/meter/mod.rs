//! Modbus-RTU side of the bus: the inverter polls a grid meter and we answer
//! in its place.

pub mod packet;
pub mod synchronizer;

pub use packet::{Request, Response};
