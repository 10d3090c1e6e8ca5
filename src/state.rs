use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::device_config::{CommMode, DeviceConfig};
use crate::parser::{HexBlock, MqttSettings, RadarStatus, Record};
use crate::telemetry::{ActivityLog, EventType, SensorTelemetry};

/// Lock shared state, carrying on past a panicked holder.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Searching,
    Connecting,
    Connected,
}

/// Screen the presentation layer currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Data,
    Settings,
    Logs,
}

/// Which aggregate a record was merged into, with its state afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Telemetry(SensorTelemetry),
    Config(DeviceConfig),
}

#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    pub telemetry: SensorTelemetry,
    pub config: DeviceConfig,
    pub log: ActivityLog,
    pub connection: ConnectionState,
    pub view: View,
    // (view, mode) the NB-IoT config was last fetched for
    pub nb_queried: Option<(View, CommMode)>,
}

impl DeviceState {
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            log: ActivityLog::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Merge a decoded record into the aggregate it belongs to.
    pub fn apply(&mut self, record: Record) -> Applied {
        match record {
            Record::RadarStatus(status) => {
                merge_radar_status(&mut self.telemetry, &status);
                Applied::Telemetry(self.telemetry.clone())
            }
            Record::HexBlock(block) => {
                merge_hex_block(&mut self.telemetry, block);
                Applied::Telemetry(self.telemetry.clone())
            }
            Record::Rssi(rssi) => {
                self.telemetry.rssi = rssi;
                Applied::Telemetry(self.telemetry.clone())
            }
            Record::Apn(apn) => {
                self.config.apn = apn;
                Applied::Config(self.config.clone())
            }
            Record::Mqtt(mqtt) => {
                merge_mqtt(&mut self.config, mqtt);
                Applied::Config(self.config.clone())
            }
        }
    }

    /// Back to session-start values after the link drops. Config and log survive.
    pub fn reset_after_disconnect(&mut self) {
        self.telemetry = SensorTelemetry::default();
        self.connection = ConnectionState::Disconnected;
        self.nb_queried = None;
    }
}

fn merge_radar_status(t: &mut SensorTelemetry, s: &RadarStatus) {
    t.event_type = EventType::from_code(s.event_type);
    t.is_parked = s.is_parked;
    t.mag_x = s.mag_x;
    t.mag_y = s.mag_y;
    t.mag_z = s.mag_z;
    t.magnetic_strength = s.magnetic_strength;
    t.rssi = s.rssi;
    t.cover_strength = s.cover_strength;
    t.distance = s.distance;
    t.is_valid = s.is_valid;
    t.err_code = s.err_code;
}

fn merge_hex_block(t: &mut SensorTelemetry, b: HexBlock) {
    t.temperature = b.temperature;
    t.battery_soc = b.battery_soc;
    t.status_raw_hex = b.status_raw_hex;
    t.parking_count_24h = b.parking_count_24h;
    t.current_hour_count = b.current_hour_count;
    t.magnetic_strength = b.magnetic_strength;
    t.rssi = b.rssi;
    t.cover_strength = b.cover_strength;
    t.distance = b.distance;
    t.magnet_high = b.magnet_high;
    t.battery_low = b.battery_low;
    t.cover_open = b.cover_open;
    t.rssi_low = b.rssi_low;
}

fn merge_mqtt(c: &mut DeviceConfig, m: MqttSettings) {
    c.mqtt_host = m.host;
    c.mqtt_port = m.port;
    c.mqtt_user = m.user;
    c.mqtt_pass = m.pass;
    c.mqtt_clean = m.clean;
    c.mqtt_keep_alive = m.keep_alive;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_line;

    fn apply_line(state: &mut DeviceState, line: &str) -> Option<Applied> {
        parse_line(line).map(|record| state.apply(record))
    }

    #[test]
    fn hex_block_never_touches_occupancy() {
        let mut state = DeviceState::default();
        apply_line(&mut state, "+MRSTATUS:1,0,10,20,30,100,-70,50,200,1,0");
        assert!(state.telemetry.is_parked);
        assert_eq!(state.telemetry.event_type, EventType::Entry);
        assert_eq!(state.telemetry.err_code, 0);

        let applied = apply_line(&mut state, "+SWQUERY:1A558A0702640038FF10002C01");
        let Some(Applied::Telemetry(t)) = applied else {
            panic!("hex block should merge into telemetry");
        };
        assert!(t.is_parked);
        assert_eq!(t.event_type, EventType::Entry);
        assert_eq!(t.err_code, 0);
        assert_eq!(t.temperature, 26);
        assert_eq!(t.distance, 300);
        assert_eq!(t.status_raw_hex, "8A");
    }

    #[test]
    fn hex_block_leaves_error_code_sentinel() {
        let mut state = DeviceState::default();
        apply_line(&mut state, "+SWQUERY:1A558A0702640038FF10002C01");
        assert_eq!(state.telemetry.err_code, 1);
        assert!(!state.telemetry.is_parked);
    }

    #[test]
    fn radar_status_keeps_hex_only_fields() {
        let mut state = DeviceState::default();
        apply_line(&mut state, "+SWQUERY:1A558A0702640038FF10002C01");
        apply_line(&mut state, "+SWRDSTATUS:2,1,1,2,3,4,-75,6,7,1,3");

        let t = &state.telemetry;
        assert!(!t.is_parked);
        assert_eq!(t.err_code, 3);
        assert_eq!(t.battery_soc, 85);
        assert_eq!(t.parking_count_24h, 7);
        assert!(t.rssi_low);
        assert_eq!(t.rssi, -75);
    }

    #[test]
    fn short_hex_block_leaves_state_unchanged() {
        let mut state = DeviceState::default();
        apply_line(&mut state, "+MRSTATUS:1,0,10,20,30,100,-70,50,200,1,0");
        let before = state.telemetry.clone();

        assert_eq!(apply_line(&mut state, "+SWQUERY:1A558A07"), None);
        assert_eq!(state.telemetry, before);
    }

    #[test]
    fn rssi_updates_only_rssi() {
        let mut state = DeviceState::default();
        apply_line(&mut state, "+MRSTATUS:1,0,10,20,30,100,-70,50,200,1,0");
        apply_line(&mut state, "+SWRSSI:-60");
        assert_eq!(state.telemetry.rssi, -60);
        assert_eq!(state.telemetry.distance, 200);
    }

    #[test]
    fn nb_records_route_to_config() {
        let mut state = DeviceState::default();
        let applied = apply_line(&mut state, "+NBAPN:cmnet");
        assert!(matches!(applied, Some(Applied::Config(ref c)) if c.apn == "cmnet"));

        apply_line(&mut state, "+NBMQTT:broker.local,8883,,,1,90");
        assert_eq!(state.config.mqtt_host, "broker.local");
        assert_eq!(state.config.mqtt_port, "8883");
        assert_eq!(state.config.mqtt_user, "");
        assert_eq!(state.config.mqtt_clean, 1);
        assert_eq!(state.config.mqtt_keep_alive, 90);
        assert_eq!(state.telemetry, SensorTelemetry::default());
    }

    #[test]
    fn disconnect_resets_telemetry_but_keeps_config() {
        let mut state = DeviceState::default();
        state.connection = ConnectionState::Connected;
        state.nb_queried = Some((View::Settings, CommMode::NbIot));
        apply_line(&mut state, "+MRSTATUS:1,0,10,20,30,100,-70,50,200,1,0");
        apply_line(&mut state, "+NBAPN:cmnet");

        state.reset_after_disconnect();

        assert_eq!(state.telemetry, SensorTelemetry::default());
        assert_eq!(state.connection, ConnectionState::Disconnected);
        assert_eq!(state.nb_queried, None);
        assert_eq!(state.config.apn, "cmnet");
    }
}
