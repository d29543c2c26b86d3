// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Per-tick sensor readings.
//!
//! A snapshot is an ordered slice of [`SensorReading`]: all board sensors
//! first, then one entry per monitored transceiver port. Position `i` of a
//! snapshot is compared against position `i` of every threshold table.

use std::fmt;

/// Where a reading comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Temperature sensor on the main or CPU board.
    Board,
    /// DOM temperature of an optical transceiver.
    Transceiver,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Board => f.write_str("board"),
            SensorKind::Transceiver => f.write_str("transceiver"),
        }
    }
}

/// A single temperature reading taken during one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub kind: SensorKind,
    /// Sensor index for board sensors, front-panel port number for transceivers.
    pub id: usize,
    /// Name used in log messages.
    pub label: String,
    /// Temperature in millidegrees Celsius, `None` when the read failed.
    pub temp_mc: Option<i32>,
    /// Always true for board sensors.
    pub present: bool,
}

impl SensorReading {
    pub fn board(id: usize, label: impl Into<String>, temp_mc: Option<i32>) -> Self {
        Self {
            kind: SensorKind::Board,
            id,
            label: label.into(),
            temp_mc,
            present: true,
        }
    }

    pub fn transceiver(port: usize, present: bool, temp_mc: i32) -> Self {
        Self {
            kind: SensorKind::Transceiver,
            id: port,
            label: format!("port {port}"),
            temp_mc: Some(temp_mc),
            present,
        }
    }

    /// Whether this position takes part in the evaluation. Absent
    /// transceivers are skipped unless readings are being injected.
    pub fn is_monitored(&self, injected: bool) -> bool {
        injected || self.present
    }
}

/// Number of positions that must agree for a level-down transition.
pub fn monitored_count(snapshot: &[SensorReading], injected: bool) -> usize {
    snapshot.iter().filter(|r| r.is_monitored(injected)).count()
}

/// Format millidegrees as degrees with one decimal, for logs.
pub fn celsius(mc: i32) -> f64 {
    mc as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_transceiver_is_skipped_unless_injected() {
        let r = SensorReading::transceiver(5, false, 0);
        assert!(!r.is_monitored(false));
        assert!(r.is_monitored(true));
    }

    #[test]
    fn monitored_count_includes_all_board_sensors() {
        let snapshot = vec![
            SensorReading::board(0, "a", Some(30_000)),
            SensorReading::board(1, "b", None),
            SensorReading::transceiver(5, true, 40_000),
            SensorReading::transceiver(6, false, 0),
        ];
        assert_eq!(monitored_count(&snapshot, false), 3);
        assert_eq!(monitored_count(&snapshot, true), 4);
    }
}
