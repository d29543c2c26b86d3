// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Thermal policy engine.
//!
//! Each evaluation takes the current [`ControlState`] and one snapshot and
//! returns an [`Evaluation`] describing the next cooling level, the alarm
//! state and whether a shutdown is required. The engine never touches
//! hardware; the monitor applies the result.
//!
//! Level-up transitions fire on the first offending position in scan order.
//! Level-down transitions need every monitored position to agree in the
//! same tick.

use crate::error::{Error, Result};
use crate::level::{CoolingLevel, LevelTable, MAX_DUTY_CYCLE};
use crate::platform::{PowerSource, TransceiverHandle};
use crate::sensor::{SensorReading, celsius, monitored_count};
use crate::thresholds::{Direction, ThresholdSet, Transition};
use std::fmt;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Operator-visible alarm level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlarmState {
    #[default]
    Clear,
    Red,
}

impl AlarmState {
    /// Value written to the alarm file.
    pub fn code(self) -> u8 {
        match self {
            AlarmState::Clear => 0,
            AlarmState::Red => 4,
        }
    }
}

/// Everything the poll loop carries from one tick to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub level: CoolingLevel,
    pub alarm: AlarmState,
    /// Set when a red alarm is raised, reset only by a level-down from max.
    pub red_alarm_sent: bool,
    /// Polls since the last evaluation.
    pub polls: u32,
    /// Last duty cycle commanded by the monitor.
    pub duty_cycle: u8,
    /// Airflow direction, detected once.
    pub direction: Option<Direction>,
    /// Monitored ports, captured together with the direction.
    pub ports: Vec<TransceiverHandle>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            level: CoolingLevel::Max,
            alarm: AlarmState::Clear,
            red_alarm_sent: false,
            polls: 0,
            duty_cycle: MAX_DUTY_CYCLE,
            direction: None,
            ports: Vec::new(),
        }
    }
}

impl ControlState {
    /// Fold an evaluation back into the state. Returns true when the alarm
    /// state changed and needs to be published.
    pub fn apply(&mut self, eval: &Evaluation) -> bool {
        let alarm_changed = self.alarm != eval.alarm;
        self.level = eval.level;
        self.alarm = eval.alarm;
        self.red_alarm_sent = eval.red_alarm_sent;
        alarm_changed
    }
}

/// Outcome of the PSU full-load check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsuLoad {
    Normal,
    /// A supply has failed and a surviving one draws more than the limit.
    FullLoad,
    /// A read failed; neither forces nor permits the min level.
    Unknown,
}

/// A sensor that crossed a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub transition: Transition,
    pub label: String,
    pub temp_mc: i32,
    pub threshold_mc: i32,
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {:.1}C ({} threshold {:.1}C)",
            self.label,
            celsius(self.temp_mc),
            self.transition,
            celsius(self.threshold_mc)
        )
    }
}

/// Inputs to a single evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Tick<'a> {
    pub snapshot: &'a [SensorReading],
    /// Readings were injected; every port counts as present.
    pub injected: bool,
    pub psu: PsuLoad,
}

impl Tick<'_> {
    /// Monitored positions that produced a reading.
    fn readings(&self) -> impl Iterator<Item = (usize, &SensorReading, i32)> + '_ {
        let injected = self.injected;
        self.snapshot
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.is_monitored(injected))
            .filter_map(|(i, r)| r.temp_mc.map(|t| (i, r, t)))
    }

    fn monitored(&self) -> usize {
        monitored_count(self.snapshot, self.injected)
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub level: CoolingLevel,
    pub alarm: AlarmState,
    pub red_alarm_sent: bool,
    /// First breach that raised the cooling level this tick.
    pub escalated: Option<Breach>,
    /// Breach that raised the red alarm this tick.
    pub raised: Option<Breach>,
    /// The alarm was cleared by a level-down this tick.
    pub cleared: bool,
    /// Breach that requires powering off the chassis.
    pub shutdown: Option<Breach>,
}

impl Evaluation {
    fn unchanged(state: &ControlState) -> Self {
        Self {
            level: state.level,
            alarm: state.alarm,
            red_alarm_sent: state.red_alarm_sent,
            escalated: None,
            raised: None,
            cleared: false,
            shutdown: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Direction policies
// ---------------------------------------------------------------------------

/// Level state machine for one airflow direction.
pub trait AirflowPolicy {
    fn direction(&self) -> Direction;
    fn thresholds(&self) -> &ThresholdSet;
    fn levels(&self) -> &LevelTable;
    fn evaluate(&self, state: &ControlState, tick: &Tick<'_>) -> Evaluation;
}

/// Build and validate the built-in policy for `direction`.
pub fn policy_for(direction: Direction, ports: usize) -> Result<Box<dyn AirflowPolicy>> {
    Ok(match direction {
        Direction::Afi => Box::new(AfiPolicy::new(ThresholdSet::afi(ports))?),
        Direction::Afo => Box::new(AfoPolicy::new(ThresholdSet::afo(ports))?),
    })
}

/// Back-to-front airflow: mid and max only.
pub struct AfiPolicy {
    thresholds: ThresholdSet,
    levels: LevelTable,
}

impl AfiPolicy {
    pub fn new(thresholds: ThresholdSet) -> Result<Self> {
        expect_direction(&thresholds, Direction::Afi)?;
        thresholds.validate(&[
            Transition::MidToMax,
            Transition::MaxToMid,
            Transition::MaxToRedAlarm,
            Transition::RedAlarmToShutdown,
        ])?;
        Ok(Self {
            thresholds,
            levels: LevelTable::afi(),
        })
    }
}

impl AirflowPolicy for AfiPolicy {
    fn direction(&self) -> Direction {
        Direction::Afi
    }

    fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    fn levels(&self) -> &LevelTable {
        &self.levels
    }

    fn evaluate(&self, state: &ControlState, tick: &Tick<'_>) -> Evaluation {
        let mut eval = Evaluation::unchanged(state);
        match state.level {
            CoolingLevel::Max => evaluate_max(&self.thresholds, tick, &mut eval),
            CoolingLevel::Mid => {
                if let Some(breach) = first_breach(&self.thresholds, Transition::MidToMax, tick) {
                    log::warn!("{breach}, raising cooling level");
                    eval.level = CoolingLevel::Max;
                    eval.escalated = Some(breach);
                }
            }
            CoolingLevel::Min => {
                log::debug!("AFI has no min level, moving to mid");
                eval.level = CoolingLevel::Mid;
            }
        }
        eval
    }
}

/// Front-to-back airflow: min, mid and max, with the PSU load override.
pub struct AfoPolicy {
    thresholds: ThresholdSet,
    levels: LevelTable,
}

impl AfoPolicy {
    pub fn new(thresholds: ThresholdSet) -> Result<Self> {
        expect_direction(&thresholds, Direction::Afo)?;
        thresholds.validate(&[
            Transition::MinToMid,
            Transition::MidToMax,
            Transition::MaxToMid,
            Transition::MidToMin,
            Transition::MaxToRedAlarm,
            Transition::RedAlarmToShutdown,
        ])?;
        Ok(Self {
            thresholds,
            levels: LevelTable::afo(),
        })
    }

    fn evaluate_mid(&self, tick: &Tick<'_>, eval: &mut Evaluation) {
        let set = &self.thresholds;
        let mut cool = 0;
        for (position, reading, temp) in tick.readings() {
            let breach = check_at_or_above(set, Transition::MidToMax, position, reading, temp);
            if let Some(breach) = breach {
                log::warn!("{breach}, raising cooling level");
                eval.level = CoolingLevel::Max;
                eval.escalated = Some(breach);
                return;
            }
            if tick.psu == PsuLoad::Normal
                && set
                    .threshold(Transition::MidToMin, position)
                    .is_some_and(|threshold| temp <= threshold)
            {
                cool += 1;
            }
        }

        if tick.psu == PsuLoad::Normal && cool == tick.monitored() {
            eval.level = CoolingLevel::Min;
            log::info!("All sensors below the mid_to_min thresholds");
        }
    }

    fn evaluate_min(&self, tick: &Tick<'_>, eval: &mut Evaluation) {
        if tick.psu == PsuLoad::FullLoad {
            log::debug!("PSU at full load, forcing mid level");
            eval.level = CoolingLevel::Mid;
        }
        // Every offending sensor is reported, not just the first.
        let set = &self.thresholds;
        for (position, reading, temp) in tick.readings() {
            let breach = check_at_or_above(set, Transition::MinToMid, position, reading, temp);
            if let Some(breach) = breach {
                log::warn!("{breach}, raising cooling level");
                eval.level = CoolingLevel::Mid;
                eval.escalated.get_or_insert(breach);
            }
        }
    }
}

impl AirflowPolicy for AfoPolicy {
    fn direction(&self) -> Direction {
        Direction::Afo
    }

    fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    fn levels(&self) -> &LevelTable {
        &self.levels
    }

    fn evaluate(&self, state: &ControlState, tick: &Tick<'_>) -> Evaluation {
        let mut eval = Evaluation::unchanged(state);
        match state.level {
            CoolingLevel::Max => evaluate_max(&self.thresholds, tick, &mut eval),
            CoolingLevel::Mid => self.evaluate_mid(tick, &mut eval),
            CoolingLevel::Min => self.evaluate_min(tick, &mut eval),
        }
        eval
    }
}

fn expect_direction(set: &ThresholdSet, direction: Direction) -> Result<()> {
    if set.direction() == direction {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} thresholds given to the {direction} policy",
            set.direction()
        )))
    }
}

fn check_at_or_above(
    set: &ThresholdSet,
    transition: Transition,
    position: usize,
    reading: &SensorReading,
    temp_mc: i32,
) -> Option<Breach> {
    let threshold_mc = set.threshold(transition, position)?;
    (temp_mc >= threshold_mc).then(|| Breach {
        transition,
        label: reading.label.clone(),
        temp_mc,
        threshold_mc,
    })
}

fn first_breach(set: &ThresholdSet, transition: Transition, tick: &Tick<'_>) -> Option<Breach> {
    tick.readings().find_map(|(position, reading, temp)| {
        check_at_or_above(set, transition, position, reading, temp)
    })
}

/// Max level, shared by both directions: count positions cool enough to
/// drop to mid and escalate the alarm. Once a position raises the red
/// alarm, every later position in the same scan is checked for shutdown.
fn evaluate_max(set: &ThresholdSet, tick: &Tick<'_>, eval: &mut Evaluation) {
    let mut cool = 0;
    for (position, reading, temp) in tick.readings() {
        if set
            .threshold(Transition::MaxToMid, position)
            .is_some_and(|threshold| temp <= threshold)
        {
            cool += 1;
        }

        match eval.alarm {
            AlarmState::Clear if !eval.red_alarm_sent => {
                let breach =
                    check_at_or_above(set, Transition::MaxToRedAlarm, position, reading, temp);
                if let Some(breach) = breach {
                    log::warn!("{breach}, raising red alarm");
                    eval.alarm = AlarmState::Red;
                    eval.red_alarm_sent = true;
                    eval.raised = Some(breach);
                }
            }
            AlarmState::Red if eval.shutdown.is_none() => {
                eval.shutdown =
                    check_at_or_above(set, Transition::RedAlarmToShutdown, position, reading, temp);
            }
            _ => {}
        }
    }

    if cool == tick.monitored() {
        eval.level = CoolingLevel::Mid;
        if eval.alarm != AlarmState::Clear {
            eval.alarm = AlarmState::Clear;
            eval.red_alarm_sent = false;
            eval.cleared = true;
        }
        log::info!("All sensors below the max_to_mid thresholds");
    }
}

// ---------------------------------------------------------------------------
// PSU load
// ---------------------------------------------------------------------------

/// Decide whether the surviving supplies are running at full load. Only
/// consulted when at least one supply has lost power-good.
pub fn assess_psu_load(power: &dyn PowerSource, limit_mw: u64) -> PsuLoad {
    match psu_full_load(power, limit_mw) {
        Ok(true) => PsuLoad::FullLoad,
        Ok(false) => PsuLoad::Normal,
        Err(e) => {
            log::warn!("PSU load unknown this tick: {e}");
            PsuLoad::Unknown
        }
    }
}

fn psu_full_load(power: &dyn PowerSource, limit_mw: u64) -> Result<bool> {
    let power_good = (0..power.count())
        .map(|i| power.is_power_good(i))
        .collect::<Result<Vec<_>>>()?;

    if power_good.iter().all(|good| *good) {
        return Ok(false);
    }

    for (index, _) in power_good.iter().enumerate().filter(|(_, good)| **good) {
        if power.input_power_mw(index)? > limit_mw || power.output_power_mw(index)? > limit_mw {
            log::debug!("PSU {} above {} mW with a failed peer", index + 1, limit_mw);
            return Ok(true);
        }
    }
    Ok(false)
}
