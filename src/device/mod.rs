//! The things that live on a bus: inverters we poll and meters we pretend
//! to be.

use crate::prelude::*;
use crate::registry::Addressed;
use crate::solax::telemetry::Generation;

use enum_dispatch::*;

pub mod inverter;
pub mod meter_gateway;

pub use inverter::Inverter;
pub use meter_gateway::{Flavour, MeterGateway};

/// A validated frame handed to a device by its bus.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Solax(crate::solax::Frame),
    Meter(crate::meter::Request),
}

/// A frame a device wants written to its bus.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Solax(crate::solax::Request),
    Meter(crate::meter::Response),
}

impl Outbound {
    pub fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Solax(r) => r.bytes(),
            Self::Meter(r) => r.bytes(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Solax(r) => r.name(),
            Self::Meter(r) => r.name(),
        }
    }
}

impl From<crate::solax::Request> for Outbound {
    fn from(r: crate::solax::Request) -> Self {
        Self::Solax(r)
    }
}

impl From<crate::meter::Response> for Outbound {
    fn from(r: crate::meter::Response) -> Self {
        Self::Meter(r)
    }
}

/// Per-call scratch space. Devices never touch the transport, they queue
/// frames here and the bus writes them once the device returns.
pub struct Context {
    now_ms: u32,
    outbox: Vec<Outbound>,
}

impl Context {
    pub fn new(now_ms: u32) -> Self {
        Self {
            now_ms,
            outbox: Vec::new(),
        }
    }

    pub fn now_ms(&self) -> u32 {
        self.now_ms
    }

    pub fn send<O: Into<Outbound>>(&mut self, frame: O) {
        self.outbox.push(frame.into());
    }

    pub fn into_outbox(self) -> Vec<Outbound> {
        self.outbox
    }
}

#[enum_dispatch]
pub trait DeviceCommon {
    fn name(&self) -> &str;
    fn address(&self) -> u8;
    fn serial_number(&self) -> Option<SerialNumber> {
        None
    }
    fn dump_config(&self);
    /// Periodic poll.
    fn update(&mut self, ctx: &mut Context);
    fn on_frame(&mut self, inbound: &Inbound, ctx: &mut Context);
    fn apply(&mut self, command: &Command, ctx: &mut Context) -> Result<()>;
    /// True while a manual override short-circuits live data.
    fn is_suppressed_by_override(&self) -> bool {
        false
    }
}

#[enum_dispatch(DeviceCommon)]
pub enum Device {
    Inverter(Inverter),
    MeterGateway(MeterGateway),
}

impl Device {
    pub fn new(config: &config::Device, sender: mqtt::Sender) -> Self {
        use config::DeviceKind as Kind;

        match config.kind() {
            Kind::X1 => Inverter::new(config, Generation::Classic, sender).into(),
            Kind::X1Mini => Inverter::new(config, Generation::Mini, sender).into(),
            Kind::MeterGateway => MeterGateway::new(config, Flavour::Gateway, sender).into(),
            Kind::VirtualMeter => MeterGateway::new(config, Flavour::Virtual, sender).into(),
        }
    }
}

impl Addressed for Device {
    fn address(&self) -> u8 {
        DeviceCommon::address(self)
    }
}
