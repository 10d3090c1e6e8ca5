use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Uplink the sensor uses to report occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommMode {
    #[default]
    #[serde(rename = "LoRaWAN")]
    LoRaWan,
    #[serde(rename = "NB-IoT")]
    NbIot,
}

impl fmt::Display for CommMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommMode::LoRaWan => write!(f, "LoRaWAN"),
            CommMode::NbIot => write!(f, "NB-IoT"),
        }
    }
}

impl FromStr for CommMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lora" | "lorawan" => Ok(CommMode::LoRaWan),
            "nb" | "nbiot" | "nb-iot" => Ok(CommMode::NbIot),
            other => Err(format!("unknown comm mode '{other}'")),
        }
    }
}

/// Mounting orientation, affects how the radar interprets distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParkingType {
    #[default]
    Horizontal,
    Vertical,
}

impl ParkingType {
    pub fn code(&self) -> u8 {
        match self {
            ParkingType::Horizontal => 0,
            ParkingType::Vertical => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ParkingType::Horizontal),
            1 => Some(ParkingType::Vertical),
            _ => None,
        }
    }
}

/// Sensor configuration as edited locally and as last reported by the device.
///
/// Both the LoRaWAN and NB-IoT field sets are kept regardless of `comm_mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub comm_mode: CommMode,
    pub parking_type: ParkingType,
    pub target_threshold: i32,
    pub cover_threshold: i32,
    pub radar_enabled: bool,

    // LoRaWAN identity
    pub dev_eui: String,
    pub app_eui: String,
    pub dev_addr: String,
    pub app_key: String,
    pub nwk_key: String,
    pub region: String,
    pub frequency: u32,
    pub spreading_factor: u8,
    pub bandwidth: u32,

    // NB-IoT
    pub apn: String,
    pub mqtt_host: String,
    /// Kept as text, the device echoes whatever was configured.
    pub mqtt_port: String,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_clean: i32,
    pub mqtt_keep_alive: i32,
    pub nb_status: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            comm_mode: CommMode::LoRaWan,
            parking_type: ParkingType::Horizontal,
            target_threshold: 150,
            cover_threshold: 4000,
            radar_enabled: true,
            dev_eui: String::new(),
            app_eui: String::new(),
            dev_addr: String::new(),
            app_key: String::new(),
            nwk_key: String::new(),
            region: "CN470".to_string(),
            frequency: 470_000_000,
            spreading_factor: 7,
            bandwidth: 125,
            apn: String::new(),
            mqtt_host: String::new(),
            mqtt_port: "1883".to_string(),
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            mqtt_clean: 0,
            mqtt_keep_alive: 120,
            nb_status: 0,
        }
    }
}

impl DeviceConfig {
    /// Set a field by its name, parsing `value` to the field's type.
    ///
    /// Used by text front ends; names match the struct fields.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), String> {
        fn num<T: FromStr>(field: &str, value: &str) -> Result<T, String> {
            value
                .trim()
                .parse()
                .map_err(|_| format!("invalid value '{value}' for {field}"))
        }

        match field {
            "comm_mode" => self.comm_mode = value.parse()?,
            "parking_type" => {
                self.parking_type = ParkingType::from_code(num(field, value)?)
                    .ok_or_else(|| format!("parking_type must be 0 or 1, got '{value}'"))?
            }
            "target_threshold" => self.target_threshold = num(field, value)?,
            "cover_threshold" => self.cover_threshold = num(field, value)?,
            "radar_enabled" => self.radar_enabled = num(field, value)?,
            "dev_eui" => self.dev_eui = value.to_string(),
            "app_eui" => self.app_eui = value.to_string(),
            "dev_addr" => self.dev_addr = value.to_string(),
            "app_key" => self.app_key = value.to_string(),
            "nwk_key" => self.nwk_key = value.to_string(),
            "region" => self.region = value.to_string(),
            "frequency" => self.frequency = num(field, value)?,
            "spreading_factor" => self.spreading_factor = num(field, value)?,
            "bandwidth" => self.bandwidth = num(field, value)?,
            "apn" => self.apn = value.to_string(),
            "mqtt_host" => self.mqtt_host = value.to_string(),
            "mqtt_port" => self.mqtt_port = value.to_string(),
            "mqtt_user" => self.mqtt_user = value.to_string(),
            "mqtt_pass" => self.mqtt_pass = value.to_string(),
            "mqtt_clean" => self.mqtt_clean = num(field, value)?,
            "mqtt_keep_alive" => self.mqtt_keep_alive = num(field, value)?,
            other => return Err(format!("unknown config field '{other}'")),
        }
        Ok(())
    }
}
