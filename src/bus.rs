use crate::device::{Context, Device, DeviceCommon, Inbound, Outbound};
use crate::framing::{Feed, Rejection};
use crate::meter::synchronizer::RequestSynchronizer;
use crate::prelude::*;
use crate::registry::{Registry, Route};
use crate::solax::packet::{
    ControlCode, Frame, FunctionCode, RegisterAddress, Request, Variant, BROADCAST_ADDRESS,
    DEFAULT_ADDRESS,
};
use crate::solax::serial::SERIAL_LEN;
use crate::solax::synchronizer::FrameSynchronizer;

use std::sync::Arc;

// {{{ BusStats
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BusStats {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub checksum_failures: u64,
    pub rejections: u64,
    pub resyncs: u64,
    pub unknown_address: u64,
    pub discovery_replies: u64,
    pub write_errors: u64,
}

impl BusStats {
    pub fn print_summary(&self, bus: &str) {
        info!("Bus {} statistics:", bus);
        info!("  Frames received: {}", self.frames_received);
        info!("  Frames sent: {}", self.frames_sent);
        info!("  Checksum failures: {}", self.checksum_failures);
        info!("  Other rejected frames: {}", self.rejections);
        info!("  Resyncs after silence: {}", self.resyncs);
        info!("  Frames from unknown addresses: {}", self.unknown_address);
        info!("  Discovery replies: {}", self.discovery_replies);
        info!("  Write errors: {}", self.write_errors);
    }
} // }}}

enum Framing {
    Solax(FrameSynchronizer),
    Meter(RequestSynchronizer),
}

impl Framing {
    fn expire(&mut self, now_ms: u32) -> bool {
        match self {
            Self::Solax(s) => s.expire(now_ms),
            Self::Meter(s) => s.expire(now_ms),
        }
    }
}

/// One serial line, the synchronizer reading it and every device on it.
pub struct Bus {
    name: String,
    framing: Framing,
    registry: Registry<Device>,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    flow_control: bool,
    stats: BusStats,
}

impl Bus {
    pub fn new(
        config: &config::Bus,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
        sender: mqtt::Sender,
    ) -> Self {
        let (framing, broadcast) = match config.protocol() {
            config::Protocol::SolaxClassic => (
                Framing::Solax(FrameSynchronizer::new(Variant::Classic)),
                Some(BROADCAST_ADDRESS),
            ),
            config::Protocol::SolaxMini => (
                Framing::Solax(FrameSynchronizer::new(Variant::Mini)),
                Some(BROADCAST_ADDRESS),
            ),
            config::Protocol::Meter => (Framing::Meter(RequestSynchronizer::new()), None),
        };

        let mut bus = Self {
            name: config.name().to_owned(),
            framing,
            registry: Registry::new(broadcast),
            transport,
            clock,
            flow_control: config.flow_control(),
            stats: BusStats::default(),
        };

        for device in config.devices() {
            bus.register(Device::new(device, sender.clone()));
        }

        bus
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn register(&mut self, device: Device) {
        device.dump_config();
        self.registry.register(device);
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.registry.iter()
    }

    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    /// Reads every byte currently buffered and dispatches whatever frames
    /// they complete. Never blocks.
    pub fn pump(&mut self) {
        if self.framing.expire(self.clock.now_ms()) {
            self.stats.resyncs += 1;
        }

        while let Some(byte) = self.transport.read_byte() {
            let now = self.clock.now_ms();
            if self.framing.expire(now) {
                self.stats.resyncs += 1;
            }

            match &mut self.framing {
                Framing::Solax(sync) => match sync.feed(byte, now) {
                    Feed::NeedMore => {}
                    Feed::Complete(frame) => self.on_solax_frame(frame, now),
                    Feed::Invalid(rejection) => self.on_rejection(rejection),
                },
                Framing::Meter(sync) => match sync.feed(byte, now) {
                    Feed::NeedMore => {}
                    Feed::Complete(request) => self.on_meter_request(request, now),
                    Feed::Invalid(rejection) => self.on_rejection(rejection),
                },
            }
        }
    }

    fn on_rejection(&mut self, rejection: Rejection) {
        if rejection.is_checksum() {
            self.stats.checksum_failures += 1;
            warn!("{}: {}", self.name, rejection);
        } else {
            self.stats.rejections += 1;
            debug!("{}: {}", self.name, rejection);
        }
    }

    fn on_solax_frame(&mut self, frame: Frame, now: u32) {
        trace!("{} RX <- {}", self.name, Utils::hex_dump(&frame.bytes()));
        self.stats.frames_received += 1;

        let address = frame.address();
        if !frame.is_broadcast() && frame.control != u8::from(ControlCode::Read) {
            warn!(
                "{}: unhandled control code 0x{:02X} from 0x{:02X}",
                self.name, frame.control, address
            );
            return;
        }

        let mut ctx = Context::new(now);
        let inbound = Inbound::Solax(frame);
        match self.registry.route(address, |d| d.on_frame(&inbound, &mut ctx)) {
            Route::Delivered(_) => {}
            Route::Broadcast => {
                if let Inbound::Solax(frame) = &inbound {
                    self.on_broadcast(frame, &mut ctx);
                }
            }
            Route::Unknown => {
                self.stats.unknown_address += 1;
                warn!("{}: frame from unknown address 0x{:02X}", self.name, address);
            }
        }

        self.flush(ctx);
    }

    /// Discovery replies come from the broadcast address and carry the
    /// serial number of an inverter waiting for an address.
    fn on_broadcast(&mut self, frame: &Frame, ctx: &mut Context) {
        let is_discovery_reply = frame.control == u8::from(ControlCode::Register)
            && frame.function == u8::from(FunctionCode::DiscoveryReply)
            && frame.data.len() == SERIAL_LEN;

        if !is_discovery_reply {
            warn!(
                "{}: unknown broadcast data: {}",
                self.name,
                Utils::hex_dump(&frame.data)
            );
            return;
        }

        let serial_number = match SerialNumber::new(&frame.data) {
            Ok(s) => s,
            Err(err) => {
                warn!("{}: {}", self.name, err);
                return;
            }
        };
        self.stats.discovery_replies += 1;

        let address = self
            .registry
            .iter()
            .find(|d| d.serial_number() == Some(serial_number))
            .map(|d| d.address())
            .unwrap_or(DEFAULT_ADDRESS);

        info!(
            "{}: inverter {:?} discovered, assigning address 0x{:02X}",
            self.name, serial_number, address
        );

        ctx.send(Request::from(RegisterAddress {
            serial_number,
            address,
        }));
    }

    fn on_meter_request(&mut self, request: crate::meter::Request, now: u32) {
        trace!("{} RX <- {}", self.name, Utils::hex_dump(&request.bytes()));
        self.stats.frames_received += 1;

        let address = request.address;
        let mut ctx = Context::new(now);
        let inbound = Inbound::Meter(request);
        if self.registry.route(address, |d| d.on_frame(&inbound, &mut ctx)) == Route::Unknown {
            self.stats.unknown_address += 1;
            warn!("{}: request for unknown address 0x{:02X}", self.name, address);
        }

        self.flush(ctx);
    }

    /// Runs the periodic poll of the device at `idx`.
    pub fn update_device(&mut self, idx: usize) {
        let mut ctx = Context::new(self.clock.now_ms());
        if let Some(device) = self.registry.get_mut(idx) {
            device.update(&mut ctx);
        }
        self.flush(ctx);
    }

    /// Hands a command to the device it names. Returns false when no device
    /// on this bus has that name.
    pub fn apply(&mut self, command: &Command) -> Result<bool> {
        let name = command.device().name();
        let mut ctx = Context::new(self.clock.now_ms());
        let mut found = false;
        let mut result = Ok(());

        for device in self.registry.iter_mut().filter(|d| d.name() == name) {
            found = true;
            if let Err(err) = device.apply(command, &mut ctx) {
                result = Err(err);
            }
        }

        self.flush(ctx);
        result.map(|_| found)
    }

    fn flush(&mut self, ctx: Context) {
        for frame in ctx.into_outbox() {
            self.send(&frame);
        }
    }

    fn send(&mut self, frame: &Outbound) {
        let bytes = frame.bytes();
        trace!("{} TX -> {} ({})", self.name, Utils::hex_dump(&bytes), frame.name());

        match self.transport.send(&bytes, self.flow_control) {
            Ok(()) => self.stats.frames_sent += 1,
            Err(err) => {
                self.stats.write_errors += 1;
                error!("{}: failed to send {}: {}", self.name, frame.name(), err);
            }
        }
    }
}
