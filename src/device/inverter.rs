use crate::device::{Context, DeviceCommon, Inbound};
use crate::liveness::{Liveness, PollAction};
use crate::prelude::*;
use crate::sensor::{self, Sensor, SensorFactory, TextSensor};
use crate::solax::packet::{Discovery, FunctionCode, QueryConfig, QueryInfo, QueryStatus, Request};
use crate::solax::telemetry::{ConfigSettings, DeviceInfo, Generation, StatusReport};

// {{{ InverterSensors
struct InverterSensors {
    temperature: Option<Sensor>,
    energy_today: Option<Sensor>,
    energy_total: Option<Sensor>,
    dc1_voltage: Option<Sensor>,
    dc2_voltage: Option<Sensor>,
    dc1_current: Option<Sensor>,
    dc2_current: Option<Sensor>,
    ac_current: Option<Sensor>,
    ac_voltage: Option<Sensor>,
    ac_frequency: Option<Sensor>,
    ac_power: Option<Sensor>,
    runtime_total: Option<Sensor>,
    mode: Option<Sensor>,
    error_bits: Option<Sensor>,
    grid_voltage_fault: Option<Sensor>,
    grid_frequency_fault: Option<Sensor>,
    dc_injection_fault: Option<Sensor>,
    temperature_fault: Option<Sensor>,
    pv1_voltage_fault: Option<Sensor>,
    pv2_voltage_fault: Option<Sensor>,
    gfc_fault: Option<Sensor>,
    mode_name: Option<TextSensor>,
    errors: Option<TextSensor>,
}

impl InverterSensors {
    fn new(f: &SensorFactory) -> Self {
        Self {
            temperature: f.sensor("temperature"),
            energy_today: f.sensor("energy_today"),
            energy_total: f.sensor("energy_total"),
            dc1_voltage: f.sensor("dc1_voltage"),
            dc2_voltage: f.sensor("dc2_voltage"),
            dc1_current: f.sensor("dc1_current"),
            dc2_current: f.sensor("dc2_current"),
            ac_current: f.sensor("ac_current"),
            ac_voltage: f.sensor("ac_voltage"),
            ac_frequency: f.sensor("ac_frequency"),
            ac_power: f.sensor("ac_power"),
            runtime_total: f.sensor("runtime_total"),
            mode: f.sensor("mode"),
            error_bits: f.sensor("error_bits"),
            grid_voltage_fault: f.sensor("grid_voltage_fault"),
            grid_frequency_fault: f.sensor("grid_frequency_fault"),
            dc_injection_fault: f.sensor("dc_injection_fault"),
            temperature_fault: f.sensor("temperature_fault"),
            pv1_voltage_fault: f.sensor("pv1_voltage_fault"),
            pv2_voltage_fault: f.sensor("pv2_voltage_fault"),
            gfc_fault: f.sensor("gfc_fault"),
            mode_name: f.text_sensor("mode_name"),
            errors: f.text_sensor("errors"),
        }
    }
} // }}}

/// A polled Solax X1 inverter, classic or mini.
pub struct Inverter {
    name: String,
    address: u8,
    serial_number: Option<SerialNumber>,
    generation: Generation,
    liveness: Liveness,
    factory: SensorFactory,
    sensors: InverterSensors,
}

impl Inverter {
    pub fn new(config: &config::Device, generation: Generation, sender: mqtt::Sender) -> Self {
        let factory = SensorFactory::new(config, sender);
        let sensors = InverterSensors::new(&factory);

        Self {
            name: config.name().to_owned(),
            address: config.address(),
            serial_number: config.serial_number(),
            generation,
            liveness: Liveness::default(),
            factory,
            sensors,
        }
    }

    fn decode_status_report(&mut self, data: &[u8]) -> Result<()> {
        let report = StatusReport::decode(data, self.generation)?;
        self.publish_status(&report);
        self.liveness.reset();
        Ok(())
    }

    fn decode_device_info(&mut self, data: &[u8]) -> Result<()> {
        let info = DeviceInfo::decode(data)?;
        info.log();
        self.factory.publish_json("info", &info)?;
        self.liveness.reset();
        Ok(())
    }

    fn decode_config_settings(&mut self, data: &[u8]) -> Result<()> {
        let settings = ConfigSettings::decode(data)?;
        settings.log();
        self.factory.publish_json("config", &settings)?;
        self.liveness.reset();
        Ok(())
    }

    fn publish_status(&self, r: &StatusReport) {
        let s = &self.sensors;

        sensor::publish(&s.temperature, r.temperature as f64);
        sensor::publish(&s.energy_today, r.energy_today);
        sensor::publish(&s.dc1_voltage, r.dc1_voltage);
        sensor::publish(&s.dc2_voltage, r.dc2_voltage);
        sensor::publish(&s.dc1_current, r.dc1_current);
        sensor::publish(&s.dc2_current, r.dc2_current);
        sensor::publish(&s.ac_current, r.ac_current);
        sensor::publish(&s.ac_voltage, r.ac_voltage);
        sensor::publish(&s.ac_frequency, r.ac_frequency);
        sensor::publish(&s.ac_power, r.ac_power as f64);

        // the inverter reports 0 once a day after booting, which would
        // reset any cumulative counter downstream
        if r.energy_total > 0.0 {
            sensor::publish(&s.energy_total, r.energy_total);
        }
        if r.runtime_total > 0 {
            sensor::publish(&s.runtime_total, r.runtime_total as f64);
        }

        sensor::publish(&s.mode, r.mode as f64);
        sensor::publish_text(&s.mode_name, r.mode_name(self.generation));

        sensor::publish(&s.error_bits, r.error_bits as f64);
        sensor::publish_text(&s.errors, &r.errors(self.generation));

        sensor::publish(&s.grid_voltage_fault, r.grid_voltage_fault);
        sensor::publish(&s.grid_frequency_fault, r.grid_frequency_fault);
        sensor::publish(&s.dc_injection_fault, r.dc_injection_fault);
        sensor::publish(&s.temperature_fault, r.temperature_fault as f64);
        sensor::publish(&s.pv1_voltage_fault, r.pv1_voltage_fault);
        sensor::publish(&s.pv2_voltage_fault, r.pv2_voltage_fault);
        sensor::publish(&s.gfc_fault, r.gfc_fault);

        if let Some(ct_power) = r.ct_power {
            debug!("{}: CT Pgrid {} W", self.name, ct_power);
        }
    }

    fn publish_offline(&self) {
        let s = &self.sensors;

        sensor::publish(&s.mode, -1.0);
        sensor::publish_text(&s.mode_name, "Offline");

        sensor::publish(&s.temperature, f64::NAN);
        sensor::publish(&s.ac_voltage, f64::NAN);
        sensor::publish(&s.ac_frequency, f64::NAN);

        sensor::publish(&s.dc1_voltage, 0.0);
        sensor::publish(&s.dc2_voltage, 0.0);
        sensor::publish(&s.dc1_current, 0.0);
        sensor::publish(&s.dc2_current, 0.0);
        sensor::publish(&s.ac_current, 0.0);
        sensor::publish(&s.ac_power, 0.0);

        for fault in [
            &s.grid_voltage_fault,
            &s.grid_frequency_fault,
            &s.dc_injection_fault,
            &s.temperature_fault,
            &s.pv1_voltage_fault,
            &s.pv2_voltage_fault,
            &s.gfc_fault,
        ] {
            sensor::publish(fault, f64::NAN);
        }
    }
}

impl DeviceCommon for Inverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn serial_number(&self) -> Option<SerialNumber> {
        self.serial_number
    }

    fn dump_config(&self) {
        info!("Inverter {}:", self.name);
        info!("  Generation: {:?}", self.generation);
        info!("  Address: 0x{:02X}", self.address);
        if let Some(serial) = self.serial_number {
            info!("  Serial number: {:?}", serial);
        }
    }

    fn update(&mut self, ctx: &mut Context) {
        match self.liveness.tick() {
            PollAction::Rediscover => {
                debug!("{}: no response, rediscovering", self.name);
                self.publish_offline();
                ctx.send(Request::from(Discovery));
            }
            PollAction::Query => ctx.send(Request::from(QueryStatus {
                address: self.address,
            })),
        }
    }

    fn on_frame(&mut self, inbound: &Inbound, _ctx: &mut Context) {
        let frame = match inbound {
            Inbound::Solax(frame) => frame,
            Inbound::Meter(request) => {
                warn!("{}: ignoring meter request {:?}", self.name, request);
                return;
            }
        };

        let result = match FunctionCode::try_from(frame.function) {
            Ok(FunctionCode::StatusReport) => self.decode_status_report(&frame.data),
            Ok(FunctionCode::DeviceInfo) => self.decode_device_info(&frame.data),
            Ok(FunctionCode::ConfigSettings) => self.decode_config_settings(&frame.data),
            _ => {
                warn!(
                    "{}: unhandled solax frame 0x{:02X}: {}",
                    self.name,
                    frame.function,
                    Utils::hex_dump(&frame.data)
                );
                return;
            }
        };

        if let Err(err) = result {
            warn!("{}: {}", self.name, err);
        }
    }

    fn apply(&mut self, command: &Command, ctx: &mut Context) -> Result<()> {
        match command {
            Command::ReadInfo(_) => ctx.send(Request::from(QueryInfo {
                address: self.address,
            })),
            Command::ReadConfig(_) => ctx.send(Request::from(QueryConfig {
                address: self.address,
            })),
            _ => bail!("{} does not support {:?}", self.name, command),
        }

        Ok(())
    }
}
