// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! File-backed alarm flag.
//!
//! The rest of the platform reads the alarm level from
//! `/usr/share/sonic/device/<platform>/platform_monitor_alarm`: `0` when
//! clear, `4` during a red alarm. The file is removed when the monitor exits.

use crate::config::DaemonConfig;
use crate::error::{Error, Result};
use crate::platform::AlarmSink;
use crate::policy::AlarmState;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DEVICE_ROOT: &str = "/usr/share/sonic/device";
const ALARM_FILE_NAME: &str = "platform_monitor_alarm";
const MACHINE_CONF_PATHS: [&str; 2] = ["/host/machine.conf", "/etc/machine.conf"];

pub struct FileAlarmSink {
    path: Option<PathBuf>,
}

impl FileAlarmSink {
    /// Sink writing to `path`. `None` disables the sink.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Explicit `alarm_file`, else derived from the configured or detected
    /// platform identifier.
    pub fn from_config(daemon: &DaemonConfig) -> Self {
        let path = daemon.alarm_file.clone().or_else(|| {
            let platform = daemon.platform.clone().or_else(detect_platform)?;
            Some(alarm_path(&platform))
        });
        if path.is_none() {
            log::warn!("Platform identifier unknown, alarm file disabled");
        }
        Self::new(path)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl AlarmSink for FileAlarmSink {
    fn publish(&self, state: AlarmState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        fs::write(path, state.code().to_string()).map_err(|e| Error::write(path, e))?;
        log::debug!("Alarm file {} set to {}", path.display(), state.code());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::write(path, e)),
        }
    }
}

/// Alarm file location for a platform identifier.
pub fn alarm_path(platform: &str) -> PathBuf {
    Path::new(DEVICE_ROOT).join(platform).join(ALARM_FILE_NAME)
}

/// Platform identifier from the first readable `machine.conf`.
pub fn detect_platform() -> Option<String> {
    MACHINE_CONF_PATHS
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .find_map(|contents| parse_machine_conf(&contents))
}

/// `onie_platform=` or `aboot_platform=` value from a `machine.conf` body.
pub fn parse_machine_conf(contents: &str) -> Option<String> {
    contents.lines().find_map(|line| {
        let (key, value) = line.trim().split_once('=')?;
        matches!(key, "onie_platform" | "aboot_platform")
            .then(|| value.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}
