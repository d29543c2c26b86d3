// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Describes where the monitor finds its sensors, fans, supplies and
//! transceivers, and how it shuts the chassis down. Defaults match the
//! AS9716-32D board. Default path: `/etc/thermal-monitor/config.toml`

use crate::error::{Error, Result};
use crate::thresholds::BOARD_SENSOR_COUNT;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/thermal-monitor/config.toml";

/// Default poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Evaluate the policy on every n-th poll.
pub const DEFAULT_EVALUATE_EVERY: u32 = 3;

/// Surviving-PSU draw above which the fans may not drop to min.
pub const DEFAULT_PSU_FULL_LOAD_WATTS: u64 = 800;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Board sensors in threshold-table order.
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,

    #[serde(default)]
    pub fans: FanConfig,

    #[serde(default = "default_psus")]
    pub psus: Vec<PsuConfig>,

    #[serde(default)]
    pub transceivers: TransceiverConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Daemon-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_evaluate_every")]
    pub evaluate_every: u32,

    /// Platform identifier, e.g. `x86_64-accton_as9716_32d-r0`. Read from
    /// `machine.conf` when unset.
    #[serde(default)]
    pub platform: Option<String>,

    /// Explicit alarm file, overriding the platform-derived path.
    #[serde(default)]
    pub alarm_file: Option<PathBuf>,

    #[serde(default = "default_psu_full_load_watts")]
    pub psu_full_load_watts: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            evaluate_every: DEFAULT_EVALUATE_EVERY,
            platform: None,
            alarm_file: None,
            psu_full_load_watts: DEFAULT_PSU_FULL_LOAD_WATTS,
        }
    }
}

/// A board temperature sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub label: String,
    /// `tempN_input` file in millidegrees. A `hwmon*` component is resolved
    /// against the directory contents at read time.
    pub path: PathBuf,
}

/// Fan CPLD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanConfig {
    pub sysfs_dir: PathBuf,
    /// Fans on the main board.
    pub count: usize,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            sysfs_dir: PathBuf::from("/sys/bus/i2c/devices/17-0066"),
            count: 6,
        }
    }
}

/// A power supply's status and power nodes (milliwatts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PsuConfig {
    pub power_good: PathBuf,
    pub power_in: PathBuf,
    pub power_out: PathBuf,
}

/// Monitored optical ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransceiverConfig {
    pub ports: Vec<usize>,
    /// Presence node, `{port}` is replaced by the port number.
    pub present_path: String,
    /// EEPROM node, `{bus}` is replaced by `eeprom_bus_base + port - 1`.
    pub eeprom_path: String,
    pub eeprom_bus_base: usize,
    /// Lanes per port, used to derive `Ethernet<N>` interface names.
    pub lanes_per_port: usize,
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            present_path: "/sys/bus/i2c/devices/19-0060/module_present_{port}".to_string(),
            eeprom_path: "/sys/bus/i2c/devices/{bus}-0050/eeprom".to_string(),
            eeprom_bus_base: 25,
            lanes_per_port: 8,
        }
    }
}

/// How the chassis is powered off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Wait between the shutdown decision and the power-off sequence.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Wait after the prepare commands, before cutting power.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    /// Commands run after the filesystem sync, e.g. `fstrim -av`.
    #[serde(default = "default_prepare")]
    pub prepare: Vec<Vec<String>>,

    #[serde(default = "default_power_off")]
    pub power_off: Vec<String>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            settle_secs: default_settle_secs(),
            prepare: default_prepare(),
            power_off: default_power_off(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            sensors: default_sensors(),
            fans: FanConfig::default(),
            psus: default_psus(),
            transceivers: TransceiverConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl Config {
    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.daemon.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be positive".into()));
        }
        if self.daemon.evaluate_every == 0 {
            return Err(Error::Config("evaluate_every must be positive".into()));
        }
        if self.sensors.len() != BOARD_SENSOR_COUNT {
            return Err(Error::Config(format!(
                "expected {BOARD_SENSOR_COUNT} board sensors, found {}",
                self.sensors.len()
            )));
        }
        if self.fans.count == 0 {
            return Err(Error::Config("at least one fan is required".into()));
        }

        let mut seen = HashSet::new();
        for &port in &self.transceivers.ports {
            if port == 0 {
                return Err(Error::Config("port numbers start at 1".into()));
            }
            if !seen.insert(port) {
                return Err(Error::Config(format!("port {port} listed twice")));
            }
        }

        if self.shutdown.power_off.is_empty() {
            return Err(Error::Config("shutdown.power_off must name a command".into()));
        }
        Ok(())
    }

    /// Snapshot positions: board sensors then monitored ports.
    pub fn positions(&self) -> usize {
        self.sensors.len() + self.transceivers.ports.len()
    }
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    let config: Config = toml::from_str(&contents).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    config.validate()?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Save config to a TOML file, creating parent directories if needed.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::write(parent, e))?;
    }

    let contents =
        toml::to_string_pretty(config).map_err(|e| Error::ConfigSerialize(e.to_string()))?;

    fs::write(path, contents).map_err(|e| Error::write(path, e))?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_evaluate_every() -> u32 {
    DEFAULT_EVALUATE_EVERY
}

fn default_psu_full_load_watts() -> u64 {
    DEFAULT_PSU_FULL_LOAD_WATTS
}

fn default_grace_secs() -> u64 {
    2
}

fn default_settle_secs() -> u64 {
    3
}

fn default_prepare() -> Vec<Vec<String>> {
    vec![vec!["/sbin/fstrim".to_string(), "-av".to_string()]]
}

fn default_power_off() -> Vec<String> {
    ["i2cset", "-y", "-f", "19", "0x60", "0x60", "0x10"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ports() -> Vec<usize> {
    vec![5, 6, 11, 12, 19, 20, 31, 32]
}

fn default_sensors() -> Vec<SensorConfig> {
    let lm75 = |label: &str, bus_addr: &str| SensorConfig {
        label: label.to_string(),
        path: PathBuf::from(format!(
            "/sys/bus/i2c/devices/{bus_addr}/hwmon/hwmon*/temp1_input"
        )),
    };
    vec![
        lm75("MB LM75 (0x48)", "18-0048"),
        lm75("MB LM75 (0x49)", "18-0049"),
        lm75("MB LM75 (0x4A)", "18-004a"),
        lm75("MB LM75 (0x4C)", "18-004c"),
        lm75("MB LM75 (0x4E)", "18-004e"),
        lm75("MB LM75 (0x4F)", "18-004f"),
        SensorConfig {
            label: "CPU core".to_string(),
            path: PathBuf::from("/sys/devices/platform/coretemp.0/hwmon/hwmon*/temp1_input"),
        },
        lm75("CPU LM75 (0x4B)", "15-004b"),
    ]
}

fn default_psus() -> Vec<PsuConfig> {
    vec![
        PsuConfig {
            power_good: PathBuf::from("/sys/bus/i2c/devices/9-0050/psu_power_good"),
            power_in: PathBuf::from("/sys/bus/i2c/devices/9-0058/psu_p_in"),
            power_out: PathBuf::from("/sys/bus/i2c/devices/9-0058/psu_p_out"),
        },
        PsuConfig {
            power_good: PathBuf::from("/sys/bus/i2c/devices/10-0051/psu_power_good"),
            power_in: PathBuf::from("/sys/bus/i2c/devices/10-0059/psu_p_in"),
            power_out: PathBuf::from("/sys/bus/i2c/devices/10-0059/psu_p_out"),
        },
    ]
}
