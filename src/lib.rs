// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Closed-loop thermal control for switch chassis fans.
//!
//! The monitor polls board temperature sensors and transceiver DOM readings,
//! moves the fans between cooling levels according to the airflow
//! direction's threshold tables, raises a red alarm on overheat and powers
//! the chassis off when the alarm does not help.

pub mod alarm;
pub mod config;
pub mod error;
pub mod level;
pub mod monitor;
pub mod platform;
pub mod policy;
pub mod sensor;
pub mod shutdown;
pub mod sysfs;
pub mod thresholds;
pub mod transceiver;

pub use error::{Error, Result};
