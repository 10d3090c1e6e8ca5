use chrono::{DateTime, Local, SubsecRound};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use crate::config::MAX_LOG_MESSAGES;

/// Radar event reported alongside the occupancy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EventType {
    #[default]
    None,
    Entry,
    Exit,
    Movement,
    /// Code outside the documented range, kept so nothing is lost.
    Other(i32),
}

impl EventType {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => EventType::None,
            1 => EventType::Entry,
            2 => EventType::Exit,
            3 => EventType::Movement,
            other => EventType::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            EventType::None => 0,
            EventType::Entry => 1,
            EventType::Exit => 2,
            EventType::Movement => 3,
            EventType::Other(code) => *code,
        }
    }
}

/// Latest known sensor readings, merged field by field from decoded records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorTelemetry {
    pub temperature: i32,
    pub battery_soc: u8,
    pub status_raw_hex: String,
    pub parking_count_24h: u32,
    pub current_hour_count: u32,
    // Magnetometer, milligauss
    pub magnetic_strength: i32,
    pub mag_x: i32,
    pub mag_y: i32,
    pub mag_z: i32,
    pub rssi: i32,
    pub cover_strength: i32,
    pub distance: i32,
    // Radar-derived; hex blocks never touch these three
    pub is_parked: bool,
    pub event_type: EventType,
    pub err_code: i32,
    pub is_valid: bool,
    // Alarm bits from the hex block status byte
    pub magnet_high: bool,
    pub battery_low: bool,
    pub cover_open: bool,
    pub rssi_low: bool,
}

impl Default for SensorTelemetry {
    fn default() -> Self {
        Self {
            temperature: 0,
            battery_soc: 0,
            status_raw_hex: "00".to_string(),
            parking_count_24h: 0,
            current_hour_count: 0,
            magnetic_strength: 0,
            mag_x: 0,
            mag_y: 0,
            mag_z: 0,
            rssi: 0,
            cover_strength: 0,
            distance: 0,
            is_parked: false,
            event_type: EventType::None,
            // 1 means "not reported yet"
            err_code: 1,
            is_valid: false,
            magnet_high: false,
            battery_low: false,
            cover_open: false,
            rssi_low: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => write!(f, ">>"),
            Direction::Received => write!(f, "<<"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    pub content: String,
}

impl LogEntry {
    pub fn new(direction: Direction, content: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().trunc_subsecs(0),
            direction,
            content: content.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format("%H:%M:%S"),
            self.direction,
            self.content
        )
    }
}

/// Bounded, insertion-ordered record of traffic on the link.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(MAX_LOG_MESSAGES)
    }
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn push_sent(&mut self, content: impl Into<String>) {
        self.push(LogEntry::new(Direction::Sent, content));
    }

    pub fn push_received(&mut self, content: impl Into<String>) {
        self.push(LogEntry::new(Direction::Received, content));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}
