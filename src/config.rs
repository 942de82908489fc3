use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,

    #[serde(default = "Vec::new")]
    pub buses: Vec<Bus>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// Bus {{{
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    SolaxClassic,
    SolaxMini,
    Meter,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Bus {
    pub name: String,
    pub port: String,
    #[serde(default = "Config::default_baud_rate")]
    pub baud_rate: u32,
    pub protocol: Protocol,
    #[serde(default)]
    pub flow_control: bool,
    #[serde(default = "Vec::new")]
    pub devices: Vec<Device>,
}
impl Bus {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn flow_control(&self) -> bool {
        self.flow_control
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }
} // }}}

// Device {{{
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    X1,
    X1Mini,
    MeterGateway,
    VirtualMeter,
}
impl DeviceKind {
    pub fn is_meter(&self) -> bool {
        matches!(self, Self::MeterGateway | Self::VirtualMeter)
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::X1 => Protocol::SolaxClassic,
            Self::X1Mini => Protocol::SolaxMini,
            Self::MeterGateway | Self::VirtualMeter => Protocol::Meter,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ManualPowerDemand {
    #[serde(default = "Config::default_manual_min")]
    pub min: f64,
    #[serde(default = "Config::default_manual_max")]
    pub max: f64,
    pub initial: Option<f64>,
}
impl Default for ManualPowerDemand {
    fn default() -> Self {
        Self {
            min: Config::default_manual_min(),
            max: Config::default_manual_max(),
            initial: None,
        }
    }
}
impl ManualPowerDemand {
    /// Starts at `min` unless told otherwise.
    pub fn initial(&self) -> f64 {
        self.initial.unwrap_or(self.min)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Device {
    pub name: String,
    pub kind: DeviceKind,

    #[serde(default, deserialize_with = "de_address")]
    pub address: Option<u8>,
    #[serde(default, deserialize_with = "de_serial")]
    pub serial_number: Option<SerialNumber>,

    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub update_interval: Option<Duration>,

    pub sensors: Option<Vec<String>>,

    pub power_topic: Option<String>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    pub power_sensor_inactivity_timeout: Option<Duration>,
    pub manual_power_demand: Option<ManualPowerDemand>,
    pub manual_mode: Option<bool>,
    pub emergency_power_off: Option<bool>,
}
impl Device {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn address(&self) -> u8 {
        self.address.unwrap_or(if self.kind.is_meter() {
            crate::meter::packet::DEFAULT_ADDRESS
        } else {
            crate::solax::packet::DEFAULT_ADDRESS
        })
    }

    pub fn serial_number(&self) -> Option<SerialNumber> {
        self.serial_number
    }

    /// Inverters are polled every 30s by default, meters only ever answer.
    pub fn update_interval(&self) -> Option<Duration> {
        if self.kind.is_meter() {
            self.update_interval
        } else {
            Some(self.update_interval.unwrap_or(Duration::from_secs(30)))
        }
    }

    pub fn sensors(&self) -> &Option<Vec<String>> {
        &self.sensors
    }

    pub fn power_topic(&self) -> Option<&str> {
        self.power_topic.as_deref()
    }

    /// Zero disables the guard.
    pub fn power_sensor_inactivity_timeout(&self) -> Duration {
        self.power_sensor_inactivity_timeout
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn manual_power_demand(&self) -> ManualPowerDemand {
        self.manual_power_demand.clone().unwrap_or_default()
    }

    pub fn manual_mode(&self) -> bool {
        self.manual_mode == Some(true)
    }

    pub fn emergency_power_off(&self) -> bool {
        self.emergency_power_off == Some(true)
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        // a panic while holding the lock cannot leave the config half-written
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mqtt(&self) -> Mqtt {
        self.lock().mqtt.clone()
    }

    pub fn buses(&self) -> Vec<Bus> {
        self.lock().buses.clone()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.lock()
            .buses
            .iter()
            .flat_map(|b| b.devices.iter().cloned())
            .collect()
    }

    pub fn device_with_name(&self, name: &str) -> Option<Device> {
        self.devices().into_iter().find(|d| d.name() == name)
    }

    pub fn devices_for_message(&self, message: &mqtt::Message) -> Result<Vec<Device>> {
        let (target, _) = message.split_cmd_topic()?;

        match target {
            mqtt::TargetDevice::All => Ok(self.devices()),
            mqtt::TargetDevice::Name(name) => match self.device_with_name(&name) {
                Some(device) => Ok(vec![device]),
                None => bail!("no device named {}", name),
            },
        }
    }

    /// Meters fed by the given power sensor topic.
    pub fn devices_with_power_topic(&self, topic: &str) -> Vec<Device> {
        self.devices()
            .into_iter()
            .filter(|d| d.power_topic() == Some(topic))
            .collect()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;

        info!("Configuration loaded successfully:");
        info!("  Buses: {} configured", config.buses.len());
        for (i, bus) in config.buses.iter().enumerate() {
            info!("    Bus[{}]:", i);
            info!("      Name: {}", bus.name);
            info!("      Port: {}", bus.port);
            info!("      Baud Rate: {}", bus.baud_rate);
            info!("      Protocol: {:?}", bus.protocol);
            info!("      Flow Control: {}", bus.flow_control);
            for dev in &bus.devices {
                info!(
                    "      Device {}: {:?} at 0x{:02X}, serial {}",
                    dev.name,
                    dev.kind,
                    dev.address(),
                    dev.serial_number.map(|s| s.to_string()).unwrap_or_default()
                );
            }
        }

        info!("  MQTT: {}", if config.mqtt.enabled { "enabled" } else { "disabled" });
        if config.mqtt.enabled {
            info!("    Host: {}", config.mqtt.host);
            info!("    Port: {}", config.mqtt.port);
            info!("    Namespace: {}", config.mqtt.namespace);
        }

        info!("  Log Level: {}", config.loglevel);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                bail!("MQTT host cannot be empty");
            }
        }

        let mut buses = HashSet::new();
        let mut devices = HashSet::new();

        for (i, bus) in self.buses.iter().enumerate() {
            if !buses.insert(bus.name.as_str()) {
                bail!("bus[{}]: duplicate bus name {}", i, bus.name);
            }
            if bus.port.is_empty() {
                bail!("bus {}: port cannot be empty", bus.name);
            }
            if bus.baud_rate == 0 {
                bail!("bus {}: baud_rate cannot be 0", bus.name);
            }

            for dev in &bus.devices {
                if !devices.insert(dev.name.as_str()) {
                    bail!("duplicate device name {}", dev.name);
                }
                if dev.kind.protocol() != bus.protocol {
                    bail!(
                        "device {}: a {:?} cannot live on a {:?} bus",
                        dev.name,
                        dev.kind,
                        bus.protocol
                    );
                }
                if dev.update_interval == Some(Duration::ZERO) {
                    bail!("device {}: update_interval cannot be 0", dev.name);
                }

                if let Some(demand) = &dev.manual_power_demand {
                    if demand.min > demand.max {
                        bail!(
                            "device {}: manual_power_demand min ({}) is greater than max ({})",
                            dev.name,
                            demand.min,
                            demand.max
                        );
                    }
                    if let Some(initial) = demand.initial {
                        if initial < demand.min || initial > demand.max {
                            bail!(
                                "device {}: manual_power_demand initial ({}) outside {}..{}",
                                dev.name,
                                initial,
                                demand.min,
                                demand.max
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: false,
            host: "localhost".to_string(),
            port: Self::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Self::default_mqtt_namespace(),
        }
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "solax".to_string()
    }

    fn default_baud_rate() -> u32 {
        9600
    }

    fn default_manual_min() -> f64 {
        0.0
    }

    fn default_manual_max() -> f64 {
        600.0
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAddress {
    Int(u8),
    Str(String),
}

fn de_address<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<RawAddress>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(RawAddress::Int(a)) => Ok(Some(a)),
        Some(RawAddress::Str(s)) => {
            let digits = s.trim_start_matches("0x").trim_start_matches("0X");
            u8::from_str_radix(digits, 16)
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid address {}", s)))
        }
    }
}

fn de_serial<'de, D>(deserializer: D) -> Result<Option<SerialNumber>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    if s.is_empty() {
        Ok(None)
    } else {
        SerialNumber::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}
