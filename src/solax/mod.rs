pub mod packet;
pub mod serial;
pub mod synchronizer;
pub mod telemetry;

pub use packet::{Frame, Request};
