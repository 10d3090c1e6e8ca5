use std::fmt;

use crate::device_config::{DeviceConfig, ParkingType};

/// Outbound AT commands understood by the sensor firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RadarInit,
    Query,
    RadarStatus,
    Calibrate,
    Reboot,
    RadarEnable(bool),
    ParkType(ParkingType),
    TargetThreshold(i32),
    CoverThreshold(i32),
    QueryApn,
    SetApn(String),
    QueryMqtt,
    SetMqtt {
        host: String,
        port: String,
        user: String,
        pass: String,
        clean: i32,
        keep_alive: i32,
    },
    DevEui(String),
    AppKey(String),
    Region(String),
    /// Typed by hand in the console, sent as-is.
    Raw(String),
}

impl Command {
    pub fn to_ascii(&self) -> String {
        match self {
            Command::RadarInit => "AT+SWRDINIT".to_string(),
            Command::Query => "AT+SWQUERY?".to_string(),
            Command::RadarStatus => "AT+SWRDSTATUS?".to_string(),
            Command::Calibrate => "AT+SWRDCALI".to_string(),
            Command::Reboot => "AT+SWREBOOT".to_string(),
            Command::RadarEnable(on) => format!("AT+SWRDENABLE={}", u8::from(*on)),
            Command::ParkType(kind) => format!("AT+SWRDPARKTYPE={}", kind.code()),
            Command::TargetThreshold(th) => format!("AT+SWRDTARTH={th}"),
            Command::CoverThreshold(th) => format!("AT+SWRDAVGTH={th}"),
            Command::QueryApn => "AT+NBAPN?".to_string(),
            Command::SetApn(apn) => format!("AT+NBAPN={apn}"),
            Command::QueryMqtt => "AT+NBMQTT?".to_string(),
            Command::SetMqtt {
                host,
                port,
                user,
                pass,
                clean,
                keep_alive,
            } => format!("AT+NBMQTT={host},{port},{user},{pass},{clean},{keep_alive}"),
            Command::DevEui(eui) => format!("AT+DEVEUI={eui}"),
            Command::AppKey(key) => format!("AT+APPKEY={key}"),
            Command::Region(region) => format!("AT+REGION={region}"),
            Command::Raw(text) => text.clone(),
        }
    }

    /// MQTT settings from the local config, in the firmware's parameter order.
    pub fn set_mqtt_from(config: &DeviceConfig) -> Self {
        Command::SetMqtt {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port.clone(),
            user: config.mqtt_user.clone(),
            pass: config.mqtt_pass.clone(),
            clean: config.mqtt_clean,
            keep_alive: config.mqtt_keep_alive,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ascii())
    }
}

/// Bytes to put on the wire, `\r\n` appended unless already present.
pub fn frame(command: &str) -> Vec<u8> {
    if command.ends_with("\r\n") {
        command.as_bytes().to_vec()
    } else {
        format!("{command}\r\n").into_bytes()
    }
}
