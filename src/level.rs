// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Discrete cooling levels and their fan settings.

use std::fmt;

/// Duty cycle commanded at the highest level and on any fail-safe path.
pub const MAX_DUTY_CYCLE: u8 = 100;

/// Fan-speed tier chosen by the policy engine. Ordered from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoolingLevel {
    Min,
    Mid,
    Max,
}

impl fmt::Display for CoolingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoolingLevel::Min => f.write_str("min"),
            CoolingLevel::Mid => f.write_str("mid"),
            CoolingLevel::Max => f.write_str("max"),
        }
    }
}

/// What a level commands on the fan controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelSetting {
    /// Duty cycle in percent (0-100).
    pub duty_cycle: u8,
    /// Fan LED/pattern bitmask. Opaque to the engine.
    pub pattern: u8,
}

/// The levels available for one airflow direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTable {
    entries: Vec<(CoolingLevel, LevelSetting)>,
}

impl LevelTable {
    /// Front-to-back airflow: min, mid and max.
    pub fn afo() -> Self {
        Self {
            entries: vec![
                (CoolingLevel::Min, LevelSetting { duty_cycle: 50, pattern: 0x7 }),
                (CoolingLevel::Mid, LevelSetting { duty_cycle: 75, pattern: 0xb }),
                (CoolingLevel::Max, LevelSetting { duty_cycle: 100, pattern: 0xf }),
            ],
        }
    }

    /// Back-to-front airflow has no min level.
    pub fn afi() -> Self {
        Self {
            entries: vec![
                (CoolingLevel::Mid, LevelSetting { duty_cycle: 75, pattern: 0xb }),
                (CoolingLevel::Max, LevelSetting { duty_cycle: 100, pattern: 0xf }),
            ],
        }
    }

    pub fn get(&self, level: CoolingLevel) -> Option<LevelSetting> {
        self.entries
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, setting)| *setting)
    }

    pub fn contains(&self, level: CoolingLevel) -> bool {
        self.get(level).is_some()
    }

    /// Duty cycle for `level`. Unknown levels and a zero duty cycle both fall
    /// back to [`MAX_DUTY_CYCLE`] so the fans are never commanded to stop.
    pub fn duty_cycle(&self, level: CoolingLevel) -> u8 {
        match self.get(level) {
            Some(setting) if setting.duty_cycle > 0 => setting.duty_cycle,
            _ => MAX_DUTY_CYCLE,
        }
    }

    pub fn levels(&self) -> impl Iterator<Item = CoolingLevel> + '_ {
        self.entries.iter().map(|(l, _)| *l)
    }
}
