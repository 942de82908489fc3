use crate::prelude::*;

use serialport::SerialPort;
use std::io::Read;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Byte-level access to one half-duplex serial line.
pub trait Transport: Send {
    /// Next buffered byte, if any. Never blocks.
    fn read_byte(&mut self) -> Option<u8>;
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    /// Drives the RS-485 transmitter enable line.
    fn set_flow_control(&mut self, active: bool) -> Result<()>;

    /// Writes a whole frame, holding the flow control line for its duration
    /// when `flow_control` is set. The line is released even if the write fails.
    fn send(&mut self, bytes: &[u8], flow_control: bool) -> Result<()> {
        if flow_control {
            self.set_flow_control(true)?;
        }

        let result = self.write_bytes(bytes).and_then(|_| self.flush());

        if flow_control {
            if let Err(err) = self.set_flow_control(false) {
                error!("failed to release flow control: {}", err);
                return result.and(Err(err));
            }
        }

        result
    }
}

/// Millisecond clock. Wraps around after ~49 days, so timestamps taken from
/// it are only compared through [`elapsed_ms`].
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u32;
}

/// Milliseconds from `since_ms` to `now_ms`, across a clock wrap.
pub fn elapsed_ms(now_ms: u32, since_ms: u32) -> u32 {
    now_ms.wrapping_sub(since_ms)
}

// {{{ SystemClock
pub struct SystemClock {
    started: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }
} // }}}

// {{{ ManualClock
/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
} // }}}

// {{{ SerialTransport
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(bus: &config::Bus) -> Result<Self> {
        info!(
            "opening {} for bus {} at {} baud (8N1)",
            bus.port(),
            bus.name(),
            bus.baud_rate()
        );

        let port = serialport::new(bus.port(), bus.baud_rate())
            .timeout(Duration::from_millis(10))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|err| anyhow!("failed to open {}: {}", bus.port(), err))?;

        Ok(Self {
            name: bus.port().to_owned(),
            port,
        })
    }
}

impl Transport for SerialTransport {
    fn read_byte(&mut self) -> Option<u8> {
        match self.port.bytes_to_read() {
            Ok(0) => None,
            Ok(_) => {
                let mut buf = [0u8; 1];
                match self.port.read(&mut buf) {
                    Ok(1) => Some(buf[0]),
                    Ok(_) => None,
                    Err(err) => {
                        warn!("{}: read failed: {}", self.name, err);
                        None
                    }
                }
            }
            Err(err) => {
                warn!("{}: unable to query input buffer: {}", self.name, err);
                None
            }
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .write_all(bytes)
            .map_err(|err| anyhow!("{}: write failed: {}", self.name, err))
    }

    fn flush(&mut self) -> Result<()> {
        self.port
            .flush()
            .map_err(|err| anyhow!("{}: flush failed: {}", self.name, err))
    }

    fn set_flow_control(&mut self, active: bool) -> Result<()> {
        self.port
            .write_request_to_send(active)
            .map_err(|err| anyhow!("{}: unable to set RTS: {}", self.name, err))
    }
} // }}}
