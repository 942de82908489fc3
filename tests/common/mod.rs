#![allow(dead_code)]

use solax_bridge::coordinator::Coordinator;
use solax_bridge::prelude::*;
use solax_bridge::solax::packet::Frame;
use solax_bridge::transport::ManualClock;

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// {{{ MockTransport
#[derive(Default)]
struct MockState {
    rx: VecDeque<u8>,
    pending: Vec<u8>,
    written: Vec<Vec<u8>>,
    flow_control: Vec<bool>,
    fail_writes: bool,
}

/// In-memory serial line. Clones share the same buffers so a test can keep
/// one handle while the bus owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().unwrap().rx.extend(bytes.iter().copied());
    }

    /// Every flushed frame so far, emptying the log.
    pub fn take_written(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.lock().unwrap().written)
    }

    pub fn flow_control_log(&self) -> Vec<bool> {
        self.state.lock().unwrap().flow_control.clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }
}

impl Transport for MockTransport {
    fn read_byte(&mut self) -> Option<u8> {
        self.state.lock().unwrap().rx.pop_front()
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            bail!("mock write failure");
        }
        state.pending.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let frame = std::mem::take(&mut state.pending);
        state.written.push(frame);
        Ok(())
    }

    fn set_flow_control(&mut self, active: bool) -> Result<()> {
        self.state.lock().unwrap().flow_control.push(active);
        Ok(())
    }
}
// }}}

// {{{ Harness
pub struct Harness {
    pub coordinator: Coordinator,
    pub clock: ManualClock,
    pub transports: Vec<MockTransport>,
    pub channels: Channels,
    pub to_mqtt: broadcast::Receiver<mqtt::ChannelData>,
}

impl Harness {
    pub fn new(yaml: &str) -> Result<Self> {
        common_setup();

        let config = ConfigWrapper::from_config(config_from_yaml(yaml)?);
        let channels = Channels::new();
        let to_mqtt = channels.to_mqtt.subscribe();
        let clock = ManualClock::new(0);

        let mut transports = Vec::new();
        let coordinator = Coordinator::new(
            config,
            channels.clone(),
            Arc::new(clock.clone()),
            |_| {
                let t = MockTransport::default();
                transports.push(t.clone());
                Ok(Box::new(t) as Box<dyn Transport>)
            },
        )?;

        Ok(Self {
            coordinator,
            clock,
            transports,
            channels,
            to_mqtt,
        })
    }

    pub fn bus(&self) -> &MockTransport {
        &self.transports[0]
    }

    pub fn tick(&mut self) {
        self.coordinator.tick();
    }

    pub fn advance(&mut self, ms: u32) {
        self.clock.advance(ms);
        self.coordinator.tick();
    }

    /// Everything published since the last call.
    pub fn published(&mut self) -> Vec<mqtt::Message> {
        let mut r = Vec::new();
        while let Ok(data) = self.to_mqtt.try_recv() {
            if let mqtt::ChannelData::Message(m) = data {
                r.push(m);
            }
        }
        r
    }

    pub fn command(&mut self, topic: &str, payload: &str) -> Result<()> {
        self.coordinator.process_message(mqtt::Message {
            topic: topic.to_owned(),
            retain: false,
            payload: payload.to_owned(),
        })
    }
}
// }}}

pub fn config_from_yaml(yaml: &str) -> Result<Config> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(yaml.as_bytes())?;
    Config::new(file.path().to_string_lossy().into_owned())
}

/// The last payload published to `topic`, if any.
pub fn last_payload(messages: &[mqtt::Message], topic: &str) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.topic == topic)
        .map(|m| m.payload.clone())
}

pub fn count_topic(messages: &[mqtt::Message], topic: &str) -> usize {
    messages.iter().filter(|m| m.topic == topic).count()
}

/// Parses "AA.55.00" style dumps.
pub fn from_hex_dump(s: &str) -> Vec<u8> {
    s.split('.')
        .map(|b| u8::from_str_radix(b, 16).unwrap())
        .collect()
}

/// A reply from an inverter at `address` to the bus master.
pub fn inverter_reply(address: u8, control: u8, function: u8, data: Vec<u8>) -> Vec<u8> {
    Frame {
        source: [0x00, address],
        destination: [0x01, 0x00],
        control,
        function,
        data,
    }
    .bytes()
}

/// 52 byte status report payload with the given totals and mode.
pub fn status_payload(energy_total_raw: u32, runtime_total: u32, mode: u8) -> Vec<u8> {
    let mut data = vec![0u8; 52];
    data[0..2].copy_from_slice(&25u16.to_be_bytes());
    data[14..16].copy_from_slice(&2300u16.to_be_bytes());
    data[16..18].copy_from_slice(&5000u16.to_be_bytes());
    data[22..26].copy_from_slice(&energy_total_raw.to_be_bytes());
    data[26..30].copy_from_slice(&runtime_total.to_be_bytes());
    data[31] = mode;
    data
}
