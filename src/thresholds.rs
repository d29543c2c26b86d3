// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Direction-specific threshold tables.
//!
//! Every table of a [`ThresholdSet`] holds one entry per snapshot position:
//! the board sensors in a fixed order, then one entry per monitored
//! transceiver port sharing a single replicated threshold. The set is
//! validated as a whole so that position `i` refers to the same physical
//! sensor in every table of a direction.

use crate::error::{Error, Result};
use crate::sensor::{SensorKind, SensorReading};
use std::collections::BTreeMap;
use std::fmt;

/// Board sensors covered by the built-in tables: six main-board LM75s,
/// the CPU core and the CPU-board LM75.
pub const BOARD_SENSOR_COUNT: usize = 8;

/// Chassis airflow direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Back-to-front (intake).
    Afi,
    /// Front-to-back (exhaust).
    Afo,
}

impl Direction {
    /// Majority vote over the present fans. Ties go to AFI.
    pub fn from_fan_counts(afi: usize, afo: usize) -> Self {
        if afi >= afo { Direction::Afi } else { Direction::Afo }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Afi => f.write_str("AFI"),
            Direction::Afo => f.write_str("AFO"),
        }
    }
}

/// A named level or alarm transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Transition {
    MinToMid,
    MidToMax,
    MaxToMid,
    MidToMin,
    MaxToRedAlarm,
    RedAlarmToShutdown,
}

impl Transition {
    pub fn name(self) -> &'static str {
        match self {
            Transition::MinToMid => "min_to_mid",
            Transition::MidToMax => "mid_to_max",
            Transition::MaxToMid => "max_to_mid",
            Transition::MidToMin => "mid_to_min",
            Transition::MaxToRedAlarm => "max_to_red_alarm",
            Transition::RedAlarmToShutdown => "red_alarm_to_shutdown",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdEntry {
    pub kind: SensorKind,
    /// Millidegrees Celsius.
    pub threshold_mc: i32,
}

/// Ordered thresholds for one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdTable {
    transition: Transition,
    entries: Vec<ThresholdEntry>,
}

impl ThresholdTable {
    /// Board thresholds in sensor order, followed by `ports` copies of the
    /// transceiver threshold.
    pub fn new(
        transition: Transition,
        board_mc: &[i32],
        transceiver_mc: i32,
        ports: usize,
    ) -> Self {
        let board = board_mc.iter().map(|&threshold_mc| ThresholdEntry {
            kind: SensorKind::Board,
            threshold_mc,
        });
        let transceivers = std::iter::repeat_n(
            ThresholdEntry {
                kind: SensorKind::Transceiver,
                threshold_mc: transceiver_mc,
            },
            ports,
        );
        Self {
            transition,
            entries: board.chain(transceivers).collect(),
        }
    }

    pub fn entries(&self) -> &[ThresholdEntry] {
        &self.entries
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, position: usize) -> Option<&ThresholdEntry> {
        self.entries.get(position)
    }
}

/// All tables that govern one airflow direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdSet {
    direction: Direction,
    board_sensors: usize,
    ports: usize,
    tables: BTreeMap<Transition, ThresholdTable>,
}

impl ThresholdSet {
    pub fn new(direction: Direction, board_sensors: usize, ports: usize) -> Self {
        Self {
            direction,
            board_sensors,
            ports,
            tables: BTreeMap::new(),
        }
    }

    pub fn with_table(mut self, table: ThresholdTable) -> Self {
        self.tables.insert(table.transition, table);
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Snapshot positions expected by every table.
    pub fn positions(&self) -> usize {
        self.board_sensors + self.ports
    }

    pub fn table(&self, transition: Transition) -> Option<&ThresholdTable> {
        self.tables.get(&transition)
    }

    /// Threshold for `transition` at snapshot `position`, in millidegrees.
    pub fn threshold(&self, transition: Transition, position: usize) -> Option<i32> {
        self.table(transition)
            .and_then(|t| t.get(position))
            .map(|e| e.threshold_mc)
    }

    /// Check that every `required` table exists and that all tables share
    /// the board-then-transceiver layout.
    pub fn validate(&self, required: &[Transition]) -> Result<()> {
        for transition in required {
            if !self.tables.contains_key(transition) {
                return Err(Error::MissingTable {
                    direction: self.direction.to_string(),
                    transition: transition.to_string(),
                });
            }
        }

        for table in self.tables.values() {
            if table.len() != self.positions() {
                return Err(Error::TableLength {
                    direction: self.direction.to_string(),
                    transition: table.transition.to_string(),
                    actual: table.len(),
                    expected: self.positions(),
                });
            }
            for (position, entry) in table.entries.iter().enumerate() {
                if entry.kind != self.kind_at(position) {
                    return Err(Error::TableLayout {
                        direction: self.direction.to_string(),
                        transition: table.transition.to_string(),
                        position,
                        found: entry.kind.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Check that a snapshot lines up position by position with the tables.
    pub fn check_snapshot(&self, snapshot: &[SensorReading]) -> Result<()> {
        if snapshot.len() != self.positions() {
            return Err(Error::SnapshotLayout {
                position: snapshot.len().min(self.positions()),
            });
        }
        match snapshot
            .iter()
            .enumerate()
            .find(|(position, reading)| reading.kind != self.kind_at(*position))
        {
            Some((position, _)) => Err(Error::SnapshotLayout { position }),
            None => Ok(()),
        }
    }

    fn kind_at(&self, position: usize) -> SensorKind {
        if position < self.board_sensors {
            SensorKind::Board
        } else {
            SensorKind::Transceiver
        }
    }

    /// Built-in back-to-front tables.
    pub fn afi(ports: usize) -> Self {
        use Transition::*;
        Self::new(Direction::Afi, BOARD_SENSOR_COUNT, ports)
            .with_table(ThresholdTable::new(
                MidToMax,
                &[51500, 44500, 43500, 43500, 40000, 42500, 45000, 35500],
                65000,
                ports,
            ))
            .with_table(ThresholdTable::new(
                MaxToMid,
                &[45500, 39500, 37500, 38500, 34500, 37000, 40000, 30500],
                62000,
                ports,
            ))
            .with_table(ThresholdTable::new(
                MaxToRedAlarm,
                &[65000, 58000, 57000, 57000, 57000, 60000, 60000, 50000],
                75000,
                ports,
            ))
            .with_table(ThresholdTable::new(
                RedAlarmToShutdown,
                &[71000, 64000, 63000, 63000, 63000, 66000, 66000, 56000],
                82000,
                ports,
            ))
    }

    /// Built-in front-to-back tables.
    pub fn afo(ports: usize) -> Self {
        use Transition::*;
        Self::new(Direction::Afo, BOARD_SENSOR_COUNT, ports)
            .with_table(ThresholdTable::new(
                MinToMid,
                &[63000, 63000, 63000, 63000, 63000, 63000, 73000, 50000],
                65000,
                ports,
            ))
            .with_table(ThresholdTable::new(
                MidToMax,
                &[68000, 68000, 68000, 68000, 68000, 68000, 77000, 55000],
                70000,
                ports,
            ))
            .with_table(ThresholdTable::new(
                MaxToMid,
                &[47000, 47000, 47000, 47000, 47000, 47000, 55000, 40000],
                60000,
                ports,
            ))
            .with_table(ThresholdTable::new(
                MidToMin,
                &[40000, 40000, 40000, 40000, 40000, 40000, 50000, 33000],
                55000,
                ports,
            ))
            .with_table(ThresholdTable::new(
                MaxToRedAlarm,
                &[72000, 72000, 72000, 72000, 72000, 72000, 81000, 60000],
                75000,
                ports,
            ))
            .with_table(ThresholdTable::new(
                RedAlarmToShutdown,
                &[78000, 78000, 78000, 78000, 78000, 78000, 87000, 70000],
                82000,
                ports,
            ))
    }
}
