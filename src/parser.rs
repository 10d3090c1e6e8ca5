use bytemuck::{Pod, Zeroable};
use tracing::{debug, warn};

/// Minimum `+SWQUERY:` payload, 13 bytes as hex.
pub const HEX_BLOCK_MIN_CHARS: usize = 26;
pub const RADAR_FIELDS: usize = 11;
pub const MQTT_FIELDS: usize = 6;

// Status byte alarm bits
const STATUS_MAGNET_HIGH: u8 = 0x02;
const STATUS_BATTERY_LOW: u8 = 0x04;
const STATUS_COVER_OPEN: u8 = 0x08;
const STATUS_RSSI_LOW: u8 = 0x80;

/// One decoded message from the sensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `+MRSTATUS:` / `+SWRDSTATUS:`
    RadarStatus(RadarStatus),
    /// `+SWRSSI:`
    Rssi(i32),
    /// `+SWQUERY:`
    HexBlock(HexBlock),
    /// `+NBAPN:`
    Apn(String),
    /// `+NBMQTT:`
    Mqtt(MqttSettings),
}

/// Radar status line. The only source of occupancy, event and error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadarStatus {
    pub event_type: i32,
    pub is_parked: bool,
    pub mag_x: i32,
    pub mag_y: i32,
    pub mag_z: i32,
    pub magnetic_strength: i32,
    pub rssi: i32,
    pub cover_strength: i32,
    pub distance: i32,
    pub is_valid: bool,
    pub err_code: i32,
}

/// Packed telemetry block. Has no occupancy fields at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBlock {
    pub temperature: i32,
    pub battery_soc: u8,
    pub status_raw_hex: String,
    pub parking_count_24h: u32,
    pub current_hour_count: u32,
    pub magnetic_strength: i32,
    pub rssi: i32,
    pub cover_strength: i32,
    pub distance: i32,
    pub magnet_high: bool,
    pub battery_low: bool,
    pub cover_open: bool,
    pub rssi_low: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: String,
    pub user: String,
    pub pass: String,
    pub clean: i32,
    pub keep_alive: i32,
}

/// Wire layout of the `+SWQUERY:` payload, 16-bit fields little-endian.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawHexBlock {
    temperature: u8,
    battery_soc: u8,
    status: u8,
    parking_count_24h: u8,
    current_hour_count: u8,
    magnetic_strength: u16,
    rssi: u16,
    cover_strength: u16,
    distance: u16,
}

impl RawHexBlock {
    pub const SIZE: usize = std::mem::size_of::<RawHexBlock>();
}

impl From<&RawHexBlock> for HexBlock {
    fn from(raw: &RawHexBlock) -> Self {
        let status = raw.status;
        Self {
            temperature: i32::from(raw.temperature),
            battery_soc: raw.battery_soc,
            status_raw_hex: format!("{status:02X}"),
            parking_count_24h: u32::from(raw.parking_count_24h),
            current_hour_count: u32::from(raw.current_hour_count),
            magnetic_strength: i32::from(u16::from_le(raw.magnetic_strength)),
            rssi: i32::from(u16::from_le(raw.rssi)),
            cover_strength: i32::from(u16::from_le(raw.cover_strength)),
            distance: i32::from(u16::from_le(raw.distance)),
            magnet_high: status & STATUS_MAGNET_HIGH != 0,
            battery_low: status & STATUS_BATTERY_LOW != 0,
            cover_open: status & STATUS_COVER_OPEN != 0,
            rssi_low: status & STATUS_RSSI_LOW != 0,
        }
    }
}

/// Decode a logical line. Unknown or malformed input gives `None`.
pub fn parse_line(line: &str) -> Option<Record> {
    if let Some(rest) = line
        .strip_prefix("+MRSTATUS:")
        .or_else(|| line.strip_prefix("+SWRDSTATUS:"))
    {
        return parse_radar_status(rest).map(Record::RadarStatus);
    }
    if let Some(rest) = line.strip_prefix("+SWQUERY:") {
        return parse_hex_block(rest).map(Record::HexBlock);
    }
    if let Some(rest) = line.strip_prefix("+SWRSSI:") {
        return rest.trim().parse().ok().map(Record::Rssi);
    }
    if let Some(rest) = line.strip_prefix("+NBAPN:") {
        let apn = rest.trim();
        return (!apn.is_empty()).then(|| Record::Apn(apn.to_string()));
    }
    if let Some(rest) = line.strip_prefix("+NBMQTT:") {
        return parse_mqtt(rest).map(Record::Mqtt);
    }
    None
}

/// Format: "eventType,parkStatus,magX,magY,magZ,magStrength,rssi,cover,distance,valid,errCode"
pub fn parse_radar_status(payload: &str) -> Option<RadarStatus> {
    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() < RADAR_FIELDS {
        debug!(count = fields.len(), "radar status too short");
        return None;
    }

    let v: Vec<i32> = fields[..RADAR_FIELDS]
        .iter()
        .map(|f| f.trim().parse())
        .collect::<Result<_, _>>()
        .ok()?;

    let event_type = v[0];
    let park_status = v[1];

    // Entry/exit events override the reported park status
    let is_parked = match event_type {
        1 => true,
        2 => false,
        _ => park_status == 1,
    };

    Some(RadarStatus {
        event_type,
        is_parked,
        mag_x: v[2],
        mag_y: v[3],
        mag_z: v[4],
        magnetic_strength: v[5],
        rssi: v[6],
        cover_strength: v[7],
        distance: v[8],
        is_valid: v[9] == 1,
        err_code: v[10],
    })
}

pub fn parse_hex_block(payload: &str) -> Option<HexBlock> {
    let hex = payload.trim();
    if hex.len() < HEX_BLOCK_MIN_CHARS {
        warn!(len = hex.len(), "hex telemetry block too short");
        return None;
    }

    let bytes = match hex::decode(hex) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "hex telemetry block is not valid hex");
            return None;
        }
    };

    let raw = bytemuck::try_from_bytes::<RawHexBlock>(&bytes[..RawHexBlock::SIZE]).ok()?;
    Some(raw.into())
}

/// Format: "host,port,user,pass,clean,keepalive"
pub fn parse_mqtt(payload: &str) -> Option<MqttSettings> {
    let v: Vec<&str> = payload.split(',').map(str::trim).collect();
    if v.len() < MQTT_FIELDS {
        debug!(count = v.len(), "mqtt config too short");
        return None;
    }

    Some(MqttSettings {
        host: v[0].to_string(),
        port: v[1].to_string(),
        user: v[2].to_string(),
        pass: v[3].to_string(),
        clean: v[4].parse().ok()?,
        keep_alive: v[5].parse().ok()?,
    })
}
