// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Hardware collaborators the monitor talks to.
//!
//! Indices are zero-based everywhere in this crate; implementations that
//! expose one-based sysfs nodes translate at the boundary.

use crate::error::Result;
use crate::policy::AlarmState;
use crate::thresholds::Direction;

/// Board temperature sensors, in threshold-table order.
pub trait SensorSource {
    fn count(&self) -> usize;
    fn label(&self, index: usize) -> String;
    /// Current reading in millidegrees Celsius.
    fn temperature_mc(&self, index: usize) -> Result<i32>;
}

/// Main-board fan trays and the shared duty-cycle control.
pub trait FanSource {
    fn count(&self) -> usize;
    fn is_present(&self, index: usize) -> Result<bool>;
    fn direction(&self, index: usize) -> Result<Direction>;
    /// False when the fan is reported failed.
    fn is_operational(&self, index: usize) -> Result<bool>;
    fn duty_cycle(&self) -> Result<u8>;
    fn set_duty_cycle(&self, percent: u8) -> Result<()>;
}

/// Power supplies. Power values are in milliwatts.
pub trait PowerSource {
    fn count(&self) -> usize;
    fn is_power_good(&self, index: usize) -> Result<bool>;
    fn input_power_mw(&self, index: usize) -> Result<u64>;
    fn output_power_mw(&self, index: usize) -> Result<u64>;
}

/// Identity of a monitored front-panel port, captured once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverHandle {
    pub port: usize,
    /// Interface name, e.g. `Ethernet32`.
    pub name: String,
}

/// Optical transceivers and their DOM telemetry.
pub trait TransceiverSource {
    fn handle(&self, port: usize) -> TransceiverHandle;
    fn is_present(&self, handle: &TransceiverHandle) -> Result<bool>;
    /// Module temperature in millidegrees Celsius, `None` while telemetry
    /// is not available.
    fn temperature_mc(&self, handle: &TransceiverHandle) -> Result<Option<i32>>;
}

/// Operator-visible alarm flag.
#[cfg_attr(test, mockall::automock)]
pub trait AlarmSink {
    fn publish(&self, state: AlarmState) -> Result<()>;
    /// Remove the persisted flag on graceful exit.
    fn remove(&self) -> Result<()>;
}

/// Orderly chassis power-off. The caller waits for the disks to settle
/// between the two steps.
#[cfg_attr(test, mockall::automock)]
pub trait ShutdownActuator {
    /// Flush and quiesce storage. Best effort.
    fn prepare(&self) -> Result<()>;
    fn power_off(&self) -> Result<()>;
}

/// Every collaborator the monitor needs, boxed so tests can swap any of them.
pub struct Platform {
    pub sensors: Box<dyn SensorSource>,
    pub fans: Box<dyn FanSource>,
    pub power: Box<dyn PowerSource>,
    pub transceivers: Box<dyn TransceiverSource>,
    pub alarm: Box<dyn AlarmSink>,
    pub shutdown: Box<dyn ShutdownActuator>,
}
