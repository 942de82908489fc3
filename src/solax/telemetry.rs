use crate::error::FrameError;
use crate::prelude::*;
use crate::solax::packet::FunctionCode;

use nom::bytes::complete::take;
use nom::number::complete::{le_u32, u8 as be_u8};
use nom_derive::{Nom, Parse};
use serde::Serialize;

/// Which inverter family produced a payload. They share layouts but not
/// every table or accepted length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Generation {
    Classic,
    Mini,
}

pub const STATUS_REPORT_LEN_CLASSIC: usize = 52;
pub const STATUS_REPORT_LENS_MINI: [usize; 3] = [50, 52, 56];
pub const DEVICE_INFO_LEN: usize = 58;
pub const CONFIG_SETTINGS_LEN: usize = 68;

// {{{ StatusReport
#[derive(PartialEq, Clone, Debug, Serialize, Nom)]
#[nom(BigEndian)]
pub struct StatusReport {
    pub temperature: i16,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub energy_today: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub dc1_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub dc2_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub dc1_current: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub dc2_current: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub ac_current: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub ac_voltage: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub ac_frequency: f64,
    pub ac_power: u16,

    #[nom(SkipBefore(2))] // unused
    #[nom(Parse = "Utils::be_u32_div10")]
    pub energy_total: f64,
    pub runtime_total: u32,

    #[nom(SkipBefore(1))] // only the low byte carries the mode
    pub mode: u8,

    #[nom(Parse = "Utils::be_u16_div10")]
    pub grid_voltage_fault: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub grid_frequency_fault: f64,
    #[nom(Parse = "Utils::be_u16_div1000")]
    pub dc_injection_fault: f64,
    pub temperature_fault: u16,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub pv1_voltage_fault: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub pv2_voltage_fault: f64,
    #[nom(Parse = "Utils::be_u16_div1000")]
    pub gfc_fault: f64,

    // the one little-endian field in the frame
    #[nom(Parse = "le_u32")]
    pub error_bits: u32,

    // 52 and 56 byte generations append the CT reading
    #[nom(Parse = "Utils::be_u16_opt")]
    pub ct_power: Option<u16>,
}

impl StatusReport {
    pub fn decode(data: &[u8], generation: Generation) -> Result<Self> {
        let valid = match generation {
            Generation::Classic => data.len() == STATUS_REPORT_LEN_CLASSIC,
            Generation::Mini => STATUS_REPORT_LENS_MINI.contains(&data.len()),
        };
        if !valid {
            return Err(FrameError::InvalidLength {
                function: FunctionCode::StatusReport.into(),
                expected: match generation {
                    Generation::Classic => "52",
                    Generation::Mini => "50, 52 or 56",
                },
                actual: data.len(),
            }
            .into());
        }

        let (_, report) = Self::parse(data).map_err(|err| anyhow!("status report: {}", err))?;
        Ok(report)
    }

    pub fn mode_name(&self, generation: Generation) -> &'static str {
        ModeString::from_value(generation, self.mode)
    }

    pub fn errors(&self, generation: Generation) -> String {
        ErrorCodeString::from_value(generation, self.error_bits)
    }
}
// }}}

// {{{ DeviceInfo
#[derive(PartialEq, Eq, Clone, Debug, Serialize)]
pub struct DeviceInfo {
    pub device_type: u8,
    pub rated_power: String,
    pub firmware_version: String,
    pub module_name: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub rated_bus_voltage: String,
}

impl DeviceInfo {
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != DEVICE_INFO_LEN {
            return Err(FrameError::InvalidLength {
                function: FunctionCode::DeviceInfo.into(),
                expected: "58",
                actual: data.len(),
            }
            .into());
        }

        Self::parse_fields(data)
            .map(|(_, info)| info)
            .map_err(|err| anyhow!("device info: {}", err))
    }

    fn parse_fields(i: &[u8]) -> nom::IResult<&[u8], Self> {
        let (i, device_type) = be_u8(i)?;
        let (i, rated_power) = take(6usize)(i)?;
        let (i, firmware_version) = take(5usize)(i)?;
        let (i, module_name) = take(14usize)(i)?;
        let (i, manufacturer) = take(14usize)(i)?;
        let (i, serial_number) = take(14usize)(i)?;
        let (i, rated_bus_voltage) = take(4usize)(i)?;

        Ok((
            i,
            Self {
                device_type,
                rated_power: Utils::ascii(rated_power),
                firmware_version: Utils::ascii(firmware_version),
                module_name: Utils::ascii(module_name),
                manufacturer: Utils::ascii(manufacturer),
                serial_number: Utils::ascii(serial_number),
                rated_bus_voltage: Utils::ascii(rated_bus_voltage),
            },
        ))
    }

    pub fn log(&self) {
        info!("Device info frame received");
        info!("  Device type: {}", self.device_type);
        info!("  Rated power: {}", self.rated_power);
        info!("  Firmware version: {}", self.firmware_version);
        info!("  Module name: {}", self.module_name);
        info!("  Manufacturer: {}", self.manufacturer);
        info!("  Serial number: {}", self.serial_number);
        info!("  Rated bus voltage: {}", self.rated_bus_voltage);
    }
}
// }}}

// {{{ ConfigSettings
#[derive(PartialEq, Clone, Debug, Serialize, Nom)]
#[nom(BigEndian)]
pub struct ConfigSettings {
    #[nom(Parse = "Utils::be_u16_div10")]
    pub pv_start_voltage: f64,
    pub start_time: u16,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub vac_min_protect: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub vac_max_protect: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub fac_min_protect: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub fac_max_protect: f64,
    pub dci_limit: u16,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub grid_10min_avg_protect: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub vac_min_slow_protect: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub vac_max_slow_protect: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub fac_min_slow_protect: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub fac_max_slow_protect: f64,
    pub safety: u16,

    pub power_factor_mode: u8,
    pub power_factor_data: u8,
    pub upper_limit: u8,
    pub lower_limit: u8,
    pub power_low: u8,
    pub power_up: u8,

    pub q_power_set: u16,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub freq_set_point: f64,
    pub freq_drop_rate: u16,
    pub qu_v_up_rate: u16,
    pub qu_v_low_rate: u16,
    pub power_limit_percent: u16,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub w_gradient: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub wv2: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub wv3: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub wv4: f64,
    pub qu_range_v1: u16,
    pub qu_range_v4: u16,
    pub battery_voltage_power_limit: u16,
    pub power_manager_enable: u16,
    pub global_mppt_search: u16,
    pub freq_protect_restrictive: u16,
    pub qu_delay_timer: u16,
    pub freq_active_power_delay_timer: u16,
}

impl ConfigSettings {
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != CONFIG_SETTINGS_LEN {
            return Err(FrameError::InvalidLength {
                function: FunctionCode::ConfigSettings.into(),
                expected: "68",
                actual: data.len(),
            }
            .into());
        }

        let (_, settings) =
            Self::parse(data).map_err(|err| anyhow!("config settings: {}", err))?;
        Ok(settings)
    }

    pub fn safety_name(&self) -> &'static str {
        SafetyString::from_value(self.safety)
    }

    pub fn log(&self) {
        info!("Config settings frame received");
        info!("  PV start voltage: {} V", self.pv_start_voltage);
        info!("  Start time: {} s", self.start_time);
        info!("  AC voltage protect: {} - {} V", self.vac_min_protect, self.vac_max_protect);
        info!("  AC frequency protect: {} - {} Hz", self.fac_min_protect, self.fac_max_protect);
        info!("  DCI limit: {} mA", self.dci_limit);
        info!("  Grid 10min average protect: {} V", self.grid_10min_avg_protect);
        info!(
            "  AC voltage slow protect: {} - {} V",
            self.vac_min_slow_protect, self.vac_max_slow_protect
        );
        info!(
            "  AC frequency slow protect: {} - {} Hz",
            self.fac_min_slow_protect, self.fac_max_slow_protect
        );
        info!("  Safety: {} ({})", self.safety, self.safety_name());
        info!(
            "  Power factor mode/data: {}/{}",
            self.power_factor_mode, self.power_factor_data
        );
        info!("  Upper/lower limit: {}/{}", self.upper_limit, self.lower_limit);
        info!("  Power low/up: {}/{}", self.power_low, self.power_up);
        info!("  Q power set: {}", self.q_power_set);
        info!("  Frequency set point: {} Hz", self.freq_set_point);
        info!("  Frequency drop rate: {}", self.freq_drop_rate);
        info!("  QU V-up/V-low rate: {}/{}", self.qu_v_up_rate, self.qu_v_low_rate);
        info!("  Power limit: {} %", self.power_limit_percent);
        info!("  W gradient: {} %", self.w_gradient);
        info!("  Wv2/Wv3/Wv4: {}/{}/{} V", self.wv2, self.wv3, self.wv4);
        info!("  QU range V1/V4: {}/{} %", self.qu_range_v1, self.qu_range_v4);
        info!("  Battery voltage power limit: {}", self.battery_voltage_power_limit);
        info!("  Power manager enable: {}", self.power_manager_enable);
        info!("  Global MPPT search: {}", self.global_mppt_search);
        info!("  Restrictive frequency protection: {}", self.freq_protect_restrictive);
        info!("  QU delay timer: {} s", self.qu_delay_timer);
        info!(
            "  Frequency active power delay timer: {} ms",
            self.freq_active_power_delay_timer
        );
    }
}
// }}}

pub struct ModeString;
impl ModeString {
    pub fn from_value(generation: Generation, mode: u8) -> &'static str {
        match (generation, mode) {
            (_, 0) => "Wait",
            (_, 1) => "Check",
            (_, 2) => "Normal",
            (_, 3) => "Fault",
            (_, 4) => "Permanent Fault",
            (_, 5) => "Update",
            (Generation::Classic, 6) => "EPS check",
            (Generation::Classic, 7) => "EPS",
            (Generation::Classic, 8) => "Self Test",
            (Generation::Classic, 9) => "Idle",
            (Generation::Mini, 6) => "Self Test",

            _ => "Unknown",
        }
    }
}

/// Renders the error bitmask as the names of every set bit, joined with `;`.
pub struct ErrorCodeString;
impl ErrorCodeString {
    pub fn from_value(generation: Generation, value: u32) -> String {
        (0..32)
            .filter(|bit| value & (1 << bit) != 0)
            .map(|bit| Self::from_bit(generation, bit))
            .collect::<Vec<_>>()
            .join(";")
    }

    fn from_bit(generation: Generation, bit: u32) -> &'static str {
        match generation {
            Generation::Classic => CLASSIC_ERRORS[bit as usize],
            Generation::Mini => MINI_ERRORS[bit as usize],
        }
    }
}

const CLASSIC_ERRORS: [&str; 32] = [
    "Tz Protection Fault",
    "Mains Lost Fault",
    "Grid Voltage Fault",
    "Grid Frequency Fault",
    "PLL Lost Fault",
    "Bus Voltage Fault",
    "Error Bit 06",
    "Oscillator Fault",
    "DCI OCP Fault",
    "Residual Current Fault",
    "PV Voltage Fault",
    "Ac10Mins Voltage Fault",
    "Isolation Fault",
    "Over Temperature Fault",
    "Ventilator Fault",
    "Error Bit 15",
    "SPI Communication Fault",
    "SCI Communication Fault",
    "Error Bit 18",
    "Input Configuration Fault",
    "EEPROM Fault",
    "Relay Fault",
    "Sample Consistence Fault",
    "Residual-Current Device Fault",
    "Error Bit 24",
    "Error Bit 25",
    "Error Bit 26",
    "Error Bit 27",
    "Error Bit 28",
    "DCI Device Fault",
    "Other Device Fault",
    "Error Bit 31",
];

const MINI_ERRORS: [&str; 32] = [
    "TZ Protect Fault",
    "Grid Lost Fault",
    "Grid Voltage Fault",
    "Grid Frequency Fault",
    "PLL Lost Fault",
    "Bus Voltage Fault",
    "Error (Bit 6)",
    "Oscillator Fault",
    "DCI Over Current Protection Fault",
    "Residual Current Fault",
    "PV Voltage Fault",
    "AC voltage out of range since 10 minutes",
    "Isolation Fault",
    "Over Temperature Fault",
    "Fan Fault",
    "Error (Bit 15)",
    "SPI Communication Fault",
    "SCI Communication Fault",
    "Error (Bit 18)",
    "Input Configuration Fault",
    "EEPROM Fault",
    "Relay Fault",
    "Sample Consistence Fault",
    "Residual Current Device Fault",
    "Error (Bit 24)",
    "Error (Bit 25)",
    "Error (Bit 26)",
    "Error (Bit 27)",
    "Error (Bit 28)",
    "DCI Device Fault",
    "Other Device Fault",
    "Error (Bit 31)",
];

/// Grid code the inverter was commissioned with.
pub struct SafetyString;
impl SafetyString {
    pub fn from_value(safety: u16) -> &'static str {
        match safety {
            0 => "VDE0126",
            1 => "VDE4105",
            2 => "AS4777",
            3 => "G98",
            4 => "C10_11",
            5 => "TOR",
            6 => "EN50438_NL",
            7 => "Denmark2019_W",
            8 => "CEB",
            9 => "Cyprus2019",
            10 => "cNRS097_2_1",
            11 => "VDE0126_Greece",
            12 => "UTE_C15_712_Fr",
            13 => "IEC61727",
            14 => "G99",
            15 => "CQC",
            16 => "VDE0126_Greece_is",
            17 => "C15_712_Fr_island_50",
            18 => "C15_712_Fr_island_60",
            19 => "Guyana",
            20 => "MEA_Thailand",
            21 => "PEA_Thailand",
            22 => "cNewZealand",
            23 => "cIreland",
            24 => "cCE10_21",
            25 => "cRD1699",
            26 => "EN50438_Sweden",
            27 => "EN50549_PL",
            28 => "Czech PPDS",
            29 => "EN50438_Norway",
            30 => "EN50438_Portug",
            31 => "cCQC_WideRange",
            32 => "BRAZIL",
            33 => "EN50438_CEZ",
            34 => "IEC_Chile",
            35 => "Sri_Lanka",
            36 => "BRAZIL_240",
            37 => "EN50549-SK",
            38 => "EN50549_EU",
            39 => "G98/NI",
            40 => "Denmark2019_E",
            41 => "RD1699_island",

            _ => "Unknown",
        }
    }
}
