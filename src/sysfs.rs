// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! sysfs-backed platform sources.
//!
//! Board sensors are hwmon `tempN_input` files, fans and the duty cycle are
//! exposed by the fan CPLD, PSU status and power by the PSU drivers, and
//! transceiver presence and EEPROMs by the port CPLD and optoe drivers.

use crate::alarm::FileAlarmSink;
use crate::config::{Config, PsuConfig, SensorConfig, TransceiverConfig};
use crate::error::{Error, Result};
use crate::platform::{
    FanSource, Platform, PowerSource, SensorSource, TransceiverHandle, TransceiverSource,
};
use crate::shutdown::CommandShutdown;
use crate::thresholds::Direction;
use crate::transceiver::{self, EEPROM_READ_LEN};
use std::fmt::Display;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Build the production platform from configuration.
pub fn platform(config: &Config) -> Platform {
    Platform {
        sensors: Box::new(SysfsSensors::new(config.sensors.clone())),
        fans: Box::new(SysfsFans::new(&config.fans.sysfs_dir, config.fans.count)),
        power: Box::new(SysfsPsus::new(config.psus.clone())),
        transceivers: Box::new(SysfsTransceivers::new(config.transceivers.clone())),
        alarm: Box::new(FileAlarmSink::from_config(&config.daemon)),
        shutdown: Box::new(CommandShutdown::new(config.shutdown.clone())),
    }
}

// ---------------------------------------------------------------------------
// Board sensors
// ---------------------------------------------------------------------------

pub struct SysfsSensors {
    sensors: Vec<SensorConfig>,
}

impl SysfsSensors {
    pub fn new(sensors: Vec<SensorConfig>) -> Self {
        Self { sensors }
    }
}

impl SensorSource for SysfsSensors {
    fn count(&self) -> usize {
        self.sensors.len()
    }

    fn label(&self, index: usize) -> String {
        self.sensors
            .get(index)
            .map(|s| s.label.clone())
            .unwrap_or_else(|| format!("sensor {}", index + 1))
    }

    fn temperature_mc(&self, index: usize) -> Result<i32> {
        let sensor = self.sensors.get(index).ok_or_else(|| {
            Error::Config(format!("no board sensor at index {index}"))
        })?;
        read_value(&resolve(&sensor.path)?)
    }
}

// ---------------------------------------------------------------------------
// Fans
// ---------------------------------------------------------------------------

pub struct SysfsFans {
    dir: PathBuf,
    count: usize,
}

impl SysfsFans {
    pub fn new(dir: &Path, count: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            count,
        }
    }

    fn node(&self, index: usize, attr: &str) -> PathBuf {
        self.dir.join(format!("fan{}_{attr}", index + 1))
    }
}

impl FanSource for SysfsFans {
    fn count(&self) -> usize {
        self.count
    }

    fn is_present(&self, index: usize) -> Result<bool> {
        read_flag(&self.node(index, "present"))
    }

    /// `fanN_direction`: 1 is back-to-front, 0 front-to-back.
    fn direction(&self, index: usize) -> Result<Direction> {
        let path = self.node(index, "direction");
        match read_trimmed(&path)?.as_str() {
            "1" => Ok(Direction::Afi),
            "0" => Ok(Direction::Afo),
            other => Err(Error::Malformed {
                path,
                value: other.to_string(),
            }),
        }
    }

    fn is_operational(&self, index: usize) -> Result<bool> {
        Ok(self.is_present(index)? && !read_flag(&self.node(index, "fault"))?)
    }

    fn duty_cycle(&self) -> Result<u8> {
        read_value(&self.dir.join("fan_duty_cycle_percentage"))
    }

    fn set_duty_cycle(&self, percent: u8) -> Result<()> {
        write_value(&self.dir.join("fan_duty_cycle_percentage"), percent.min(100))
    }
}

// ---------------------------------------------------------------------------
// Power supplies
// ---------------------------------------------------------------------------

pub struct SysfsPsus {
    psus: Vec<PsuConfig>,
}

impl SysfsPsus {
    pub fn new(psus: Vec<PsuConfig>) -> Self {
        Self { psus }
    }

    fn psu(&self, index: usize) -> Result<&PsuConfig> {
        self.psus
            .get(index)
            .ok_or_else(|| Error::Config(format!("no PSU at index {index}")))
    }
}

impl PowerSource for SysfsPsus {
    fn count(&self) -> usize {
        self.psus.len()
    }

    fn is_power_good(&self, index: usize) -> Result<bool> {
        read_flag(&self.psu(index)?.power_good)
    }

    fn input_power_mw(&self, index: usize) -> Result<u64> {
        read_value(&self.psu(index)?.power_in)
    }

    fn output_power_mw(&self, index: usize) -> Result<u64> {
        read_value(&self.psu(index)?.power_out)
    }
}

// ---------------------------------------------------------------------------
// Transceivers
// ---------------------------------------------------------------------------

pub struct SysfsTransceivers {
    config: TransceiverConfig,
}

impl SysfsTransceivers {
    pub fn new(config: TransceiverConfig) -> Self {
        Self { config }
    }

    fn present_path(&self, port: usize) -> PathBuf {
        PathBuf::from(self.config.present_path.replace("{port}", &port.to_string()))
    }

    fn eeprom_path(&self, port: usize) -> PathBuf {
        let bus = self.config.eeprom_bus_base + port.saturating_sub(1);
        PathBuf::from(
            self.config
                .eeprom_path
                .replace("{bus}", &bus.to_string())
                .replace("{port}", &port.to_string()),
        )
    }
}

impl TransceiverSource for SysfsTransceivers {
    fn handle(&self, port: usize) -> TransceiverHandle {
        TransceiverHandle {
            port,
            name: format!("Ethernet{}", port.saturating_sub(1) * self.config.lanes_per_port),
        }
    }

    fn is_present(&self, handle: &TransceiverHandle) -> Result<bool> {
        read_flag(&self.present_path(handle.port))
    }

    fn temperature_mc(&self, handle: &TransceiverHandle) -> Result<Option<i32>> {
        let path = self.eeprom_path(handle.port);
        let mut eeprom = Vec::with_capacity(EEPROM_READ_LEN);
        File::open(&path)
            .and_then(|f| f.take(EEPROM_READ_LEN as u64).read_to_end(&mut eeprom))
            .map_err(|e| Error::read(&path, e))?;
        Ok(transceiver::module_temperature_mc(&eeprom))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand path components ending in `*` (e.g. `hwmon*`) to the first
/// matching directory entry, in sorted order.
pub fn resolve(pattern: &Path) -> Result<PathBuf> {
    let mut resolved = PathBuf::new();
    for component in pattern.components() {
        let Component::Normal(name) = component else {
            resolved.push(component.as_os_str());
            continue;
        };
        let name = name.to_string_lossy();
        let Some(prefix) = name.strip_suffix('*') else {
            resolved.push(&*name);
            continue;
        };

        let mut matches: Vec<String> = fs::read_dir(&resolved)
            .map_err(|e| Error::read(&resolved, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|entry| entry.starts_with(prefix))
            .collect();
        matches.sort();

        match matches.into_iter().next() {
            Some(first) => resolved.push(first),
            None => {
                return Err(Error::Unresolved {
                    pattern: pattern.to_path_buf(),
                });
            }
        }
    }
    Ok(resolved)
}

fn read_trimmed(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::read(path, e))
}

fn read_value<T: FromStr>(path: &Path) -> Result<T> {
    let raw = read_trimmed(path)?;
    raw.parse::<T>().map_err(|_| Error::Malformed {
        path: path.to_path_buf(),
        value: raw,
    })
}

fn read_flag(path: &Path) -> Result<bool> {
    Ok(read_value::<u8>(path)? != 0)
}

fn write_value(path: &Path, value: impl Display) -> Result<()> {
    fs::write(path, value.to_string()).map_err(|e| Error::write(path, e))
}
