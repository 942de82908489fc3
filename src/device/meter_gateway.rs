use crate::device::{Context, DeviceCommon, Inbound};
use crate::meter::packet::{Register, Response};
use crate::prelude::*;
use crate::sensor::{self, Sensor, SensorFactory, TextSensor};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flavour {
    /// Full gateway with manual mode and a manual power demand.
    Gateway,
    /// Answers with the live reading only and reports "On".
    Virtual,
}

struct MeterSensors {
    power_demand: Option<Sensor>,
    operation_mode: Option<TextSensor>,
    manual_mode: Option<TextSensor>,
    emergency_power_off: Option<TextSensor>,
    manual_power_demand: Option<Sensor>,
}

/// Stands in for the grid meter an inverter expects on its Modbus port,
/// feeding it the power demand taken from an external sensor.
pub struct MeterGateway {
    name: String,
    address: u8,
    flavour: Flavour,
    manual_mode: bool,
    emergency_power_off: bool,
    manual_limits: config::ManualPowerDemand,
    manual_power_demand: f64,
    power_demand: f64,
    last_power_received_ms: u32,
    timeout_ms: u32,
    sensors: MeterSensors,
}

impl MeterGateway {
    pub fn new(config: &config::Device, flavour: Flavour, sender: mqtt::Sender) -> Self {
        let f = SensorFactory::new(config, sender);
        let manual_limits = config.manual_power_demand();
        let gateway = flavour == Flavour::Gateway;

        Self {
            name: config.name().to_owned(),
            address: config.address(),
            flavour,
            manual_mode: gateway && config.manual_mode(),
            emergency_power_off: config.emergency_power_off(),
            manual_power_demand: manual_limits.initial(),
            manual_limits,
            power_demand: 0.0,
            last_power_received_ms: 0,
            timeout_ms: config
                .power_sensor_inactivity_timeout()
                .as_millis()
                .min(u32::MAX as u128) as u32,
            sensors: MeterSensors {
                power_demand: f.sensor("power_demand"),
                operation_mode: f.text_sensor("operation_mode"),
                manual_mode: if gateway { f.text_sensor("manual_mode") } else { None },
                emergency_power_off: f.text_sensor("emergency_power_off"),
                manual_power_demand: if gateway { f.sensor("manual_power_demand") } else { None },
            },
        }
    }

    fn inactivity_timeout(&self, now_ms: u32) -> bool {
        if self.timeout_ms == 0 || self.manual_mode {
            return false;
        }

        transport::elapsed_ms(now_ms, self.last_power_received_ms) > self.timeout_ms
    }

    fn set_operation_mode(&self, mode: &str) {
        sensor::publish_text(&self.sensors.operation_mode, mode);
    }

    fn publish_controls(&self) {
        let s = &self.sensors;
        sensor::publish_text(&s.emergency_power_off, on_off(self.emergency_power_off));
        sensor::publish_text(&s.manual_mode, on_off(self.manual_mode));
        sensor::publish(&s.manual_power_demand, self.manual_power_demand);
    }

    fn on_request(&mut self, request: &crate::meter::Request, ctx: &mut Context) {
        if self.inactivity_timeout(ctx.now_ms()) {
            self.set_operation_mode("Meter fault");
            sensor::publish(&self.sensors.power_demand, f64::NAN);
            warn!(
                "{}: no power sensor update received for {} ms, reporting a meter fault",
                self.name, self.timeout_ms
            );
            return;
        }

        if self.is_suppressed_by_override() {
            if self.emergency_power_off {
                self.set_operation_mode("Off");
                sensor::publish(&self.sensors.power_demand, 0.0);
                return;
            }

            // only a gateway can be in manual mode
            self.set_operation_mode("Manual");
            self.power_demand = self.manual_power_demand;
        } else if self.flavour == Flavour::Gateway {
            self.set_operation_mode("Auto");
        }

        let address = self.address;
        let response = match request.register() {
            Ok(Register::Handshake) => Response::Handshake { address },
            Ok(Register::PowerFloat) => {
                self.publish_power_demand();
                Response::PowerFloat {
                    address,
                    watts: self.power_demand as f32,
                }
            }
            Ok(Register::PowerInt) => {
                self.publish_power_demand();
                // float to int casts saturate and map NaN to 0
                Response::PowerInt {
                    address,
                    watts: self.power_demand as i16,
                }
            }
            Ok(Register::EnergyImport) => Response::EnergyImport { address },
            Ok(Register::EnergyExport) => Response::EnergyExport { address },
            Ok(Register::TotalEnergy) => Response::TotalEnergy { address },
            Err(_) => {
                let data = request.data();
                warn!(
                    "{}: unhandled register 0x{:02X} with length {} requested: {}",
                    self.name,
                    request.register,
                    data[4],
                    Utils::hex_dump(&data)
                );
                return;
            }
        };

        ctx.send(response);
    }

    fn publish_power_demand(&self) {
        sensor::publish(&self.sensors.power_demand, self.power_demand);
        if self.flavour == Flavour::Virtual {
            self.set_operation_mode("On");
        }
    }

    fn on_power_reading(&mut self, watts: f64, now_ms: u32) {
        if watts.is_nan() {
            trace!("{}: ignoring NaN power reading", self.name);
            return;
        }

        if self.manual_mode {
            return;
        }

        self.power_demand = watts;
        self.last_power_received_ms = now_ms;
    }

    fn require_gateway(&self, command: &Command) -> Result<()> {
        if self.flavour != Flavour::Gateway {
            bail!("{} does not support {:?}", self.name, command);
        }
        Ok(())
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}

impl DeviceCommon for MeterGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn dump_config(&self) {
        info!("Meter {} ({:?}):", self.name, self.flavour);
        info!("  Address: 0x{:02X}", self.address);
        info!("  Power sensor inactivity timeout: {} ms", self.timeout_ms);
        if self.flavour == Flavour::Gateway {
            info!(
                "  Manual power demand: {} ({}..{})",
                self.manual_power_demand, self.manual_limits.min, self.manual_limits.max
            );
            info!("  Manual mode: {}", on_off(self.manual_mode));
        }
        info!("  Emergency power off: {}", on_off(self.emergency_power_off));
    }

    fn update(&mut self, _ctx: &mut Context) {
        self.publish_controls();
    }

    fn on_frame(&mut self, inbound: &Inbound, ctx: &mut Context) {
        match inbound {
            Inbound::Meter(request) => self.on_request(request, ctx),
            Inbound::Solax(frame) => warn!("{}: ignoring solax frame {:?}", self.name, frame),
        }
    }

    fn apply(&mut self, command: &Command, ctx: &mut Context) -> Result<()> {
        match command {
            Command::PowerReading(_, watts) => self.on_power_reading(*watts, ctx.now_ms()),
            Command::SetEmergencyPowerOff(_, state) => {
                self.emergency_power_off = *state;
                sensor::publish_text(&self.sensors.emergency_power_off, on_off(*state));
            }
            Command::SetManualMode(_, state) => {
                self.require_gateway(command)?;
                self.manual_mode = *state;
                sensor::publish_text(&self.sensors.manual_mode, on_off(*state));
            }
            Command::SetManualPowerDemand(_, watts) => {
                self.require_gateway(command)?;
                if watts.is_nan() {
                    bail!("{}: manual power demand cannot be NaN", self.name);
                }
                self.manual_power_demand = self.manual_limits.clamp(*watts);
                sensor::publish(&self.sensors.manual_power_demand, self.manual_power_demand);
            }
            _ => bail!("{} does not support {:?}", self.name, command),
        }

        Ok(())
    }

    fn is_suppressed_by_override(&self) -> bool {
        self.emergency_power_off || self.manual_mode
    }
}
