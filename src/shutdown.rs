// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Chassis power-off.
//!
//! Flushes filesystems and runs the configured prepare commands, then issues
//! the power-off command (a CPLD register write on Accton boards). The
//! settle delay between the two is the monitor's to wait out.

use crate::config::ShutdownConfig;
use crate::error::{Error, Result};
use crate::platform::ShutdownActuator;
use std::process::Command;

pub struct CommandShutdown {
    config: ShutdownConfig,
}

impl CommandShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        Self { config }
    }
}

impl ShutdownActuator for CommandShutdown {
    fn prepare(&self) -> Result<()> {
        nix::unistd::sync();

        // Every command runs; the first failure is reported.
        let mut first_error = None;
        for argv in &self.config.prepare {
            if let Err(e) = run(argv) {
                log::warn!("{e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn power_off(&self) -> Result<()> {
        run(&self.config.power_off)
    }
}

fn run(argv: &[String]) -> Result<()> {
    let (program, args) = argv.split_first().ok_or_else(|| Error::Command {
        command: String::new(),
        reason: "empty command".to_string(),
    })?;

    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| Error::Command {
            command: argv.join(" "),
            reason: e.to_string(),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::Command {
            command: argv.join(" "),
            reason: status.to_string(),
        })
    }
}
