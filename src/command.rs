use crate::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ReadInfo(config::Device),
    ReadConfig(config::Device),
    SetManualMode(config::Device, bool),
    SetEmergencyPowerOff(config::Device, bool),
    SetManualPowerDemand(config::Device, f64),
    /// A new value from the external power sensor a meter is fed by.
    PowerReading(config::Device, f64),
}

impl Command {
    pub fn device(&self) -> &config::Device {
        use Command::*;

        match self {
            ReadInfo(device)
            | ReadConfig(device)
            | SetManualMode(device, _)
            | SetEmergencyPowerOff(device, _)
            | SetManualPowerDemand(device, _)
            | PowerReading(device, _) => device,
        }
    }

    pub fn to_result_topic(&self) -> String {
        use Command::*;

        let rest = match self {
            ReadInfo(device) => format!("{}/read/info", device.name()),
            ReadConfig(device) => format!("{}/read/config", device.name()),
            SetManualMode(device, _) => format!("{}/set/manual_mode", device.name()),
            SetEmergencyPowerOff(device, _) => format!("{}/set/emergency_power_off", device.name()),
            SetManualPowerDemand(device, _) => format!("{}/set/manual_power_demand", device.name()),
            PowerReading(device, _) => format!("{}/power", device.name()),
        };

        format!("result/{}", rest)
    }
}
