// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! thermal-monitord: system service that owns the chassis fan duty cycle,
//! publishes the thermal alarm and powers the switch off on overheat.

use anyhow::Context;
use clap::Parser;
use nix::sys::signal::Signal;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use switch_thermal_monitor::config::{self, Config};
use switch_thermal_monitor::monitor::{Monitor, Settings};
use switch_thermal_monitor::sysfs;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "thermal-monitord", about = "Switch chassis thermal monitor")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Append log output to this file instead of stderr.
    #[arg(short, long = "lfile")]
    log_file: Option<PathBuf>,

    /// Replace live readings with fixed temperatures in degrees Celsius:
    /// one per board sensor, then one per monitored port.
    #[arg(
        short,
        long,
        num_args = 1..,
        value_name = "CELSIUS",
        allow_negative_numbers = true
    )]
    test_temps: Option<Vec<i32>>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    write_config: bool,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    // Injected temperatures are a debugging aid, log everything.
    let level = if cli.debug || cli.test_temps.is_some() {
        "debug"
    } else {
        "info"
    };
    let env = env_logger::Env::default().default_filter_or(level);
    let mut builder = env_logger::Builder::from_env(env);

    if let Some(path) = &cli.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("cannot open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config_path = config::resolve_config_path(Some(&cli.config));
    let cfg = config::load_config(&config_path).unwrap_or_else(|e| {
        log::warn!("Could not load config: {e}, using defaults");
        Config::default()
    });

    if cli.write_config {
        config::save_config(&config_path, &cfg)?;
        return Ok(());
    }

    let settings = Settings::from_config(&cfg, cli.test_temps.as_deref())?;
    if let Some(temps) = &cli.test_temps {
        log::info!("Test temperatures: {temps:?}");
    }

    // SIGTERM/SIGINT only raise the flag; the loop checks it once per tick.
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [Signal::SIGTERM, Signal::SIGINT] {
        signal_hook::flag::register(signal as i32, Arc::clone(&stop))
            .with_context(|| format!("cannot register {signal} handler"))?;
    }

    log::info!(
        "Polling every {}s, evaluating every {} poll(s)",
        cfg.daemon.poll_interval_secs,
        cfg.daemon.evaluate_every
    );

    let mut monitor = Monitor::new(sysfs::platform(&cfg), settings);
    monitor.run(&stop).await;

    log::info!("Thermal monitor stopped");
    Ok(())
}
