// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Poll loop.
//!
//! One actor owns the [`ControlState`]. Every period it takes a snapshot,
//! feeds it to the direction policy, applies the resulting duty cycle and
//! alarm state, and hands a shutdown decision to the actuator. The first
//! poll only detects the airflow direction; after that the policy runs on
//! every `evaluate_every`-th poll.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::level::{CoolingLevel, LevelTable, MAX_DUTY_CYCLE};
use crate::platform::{FanSource, Platform, TransceiverHandle};
use crate::policy::{self, AirflowPolicy, Breach, ControlState, Evaluation, PsuLoad, Tick};
use crate::sensor::SensorReading;
use crate::thresholds::Direction;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{self, Duration, MissedTickBehavior};

/// Runtime settings derived from the configuration and command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub poll_interval: Duration,
    pub evaluate_every: u32,
    /// Monitored front-panel ports, in snapshot order.
    pub ports: Vec<usize>,
    pub psu_full_load_mw: u64,
    pub shutdown_grace: Duration,
    /// Wait between storage preparation and cutting power.
    pub shutdown_settle: Duration,
    /// Injected readings in millidegrees, one per snapshot position.
    pub injected: Option<Vec<i32>>,
}

impl Settings {
    /// `test_temps` are whole degrees Celsius replacing live readings.
    pub fn from_config(config: &Config, test_temps: Option<&[i32]>) -> Result<Self> {
        let injected = match test_temps {
            Some(temps) if temps.len() != config.positions() => {
                return Err(Error::Config(format!(
                    "expected {} test temperatures, got {}",
                    config.positions(),
                    temps.len()
                )));
            }
            Some(temps) => Some(temps.iter().map(|c| c * 1000).collect()),
            None => None,
        };

        Ok(Self {
            poll_interval: Duration::from_secs(config.daemon.poll_interval_secs),
            evaluate_every: config.daemon.evaluate_every,
            ports: config.transceivers.ports.clone(),
            psu_full_load_mw: config.daemon.psu_full_load_watts * 1000,
            shutdown_grace: Duration::from_secs(config.shutdown.grace_secs),
            shutdown_settle: Duration::from_secs(config.shutdown.settle_secs),
            injected,
        })
    }

    fn is_injected(&self) -> bool {
        self.injected.is_some()
    }
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Direction detected and ports captured.
    Initialized,
    /// Nothing evaluated this poll.
    Skipped,
    Evaluated(Evaluation),
    /// The chassis must be powered off.
    Shutdown(Breach),
}

pub struct Monitor {
    platform: Platform,
    settings: Settings,
    state: ControlState,
    policy: Option<Box<dyn AirflowPolicy>>,
}

impl Monitor {
    pub fn new(platform: Platform, settings: Settings) -> Self {
        Self {
            platform,
            settings,
            state: ControlState::default(),
            policy: None,
        }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Command full speed and publish a clear alarm before the first poll.
    pub fn start(&mut self) {
        if let Err(e) = self.platform.fans.set_duty_cycle(MAX_DUTY_CYCLE) {
            log::warn!("Failed to set initial duty cycle: {e}");
        }
        self.state.duty_cycle = MAX_DUTY_CYCLE;
        if let Err(e) = self.platform.alarm.publish(self.state.alarm) {
            log::warn!("Failed to publish alarm state: {e}");
        }
        if self.settings.is_injected() {
            log::info!("Using injected temperatures, fan failures are ignored");
        }
    }

    /// Run until `stop` is set, then remove the alarm file.
    pub async fn run(&mut self, stop: &AtomicBool) {
        self.start();

        let mut interval = time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if stop.load(Ordering::Relaxed) {
                log::info!("Termination requested, leaving poll loop");
                break;
            }
            if let TickOutcome::Shutdown(breach) = self.poll() {
                self.power_off(&breach).await;
            }
        }

        self.finish();
    }

    /// One poll cycle.
    pub fn poll(&mut self) -> TickOutcome {
        if self.policy.is_none() {
            return self.initialize();
        }

        self.state.polls += 1;
        if self.state.polls < self.settings.evaluate_every {
            return TickOutcome::Skipped;
        }
        self.state.polls = 0;
        self.evaluate()
    }

    /// Log, wait out the grace period, prepare storage, let it settle and
    /// power the chassis off.
    pub async fn power_off(&self, breach: &Breach) {
        log::error!("{breach}, powering the chassis off");
        time::sleep(self.settings.shutdown_grace).await;

        let shutdown = &self.platform.shutdown;
        if let Err(e) = shutdown.prepare() {
            log::warn!("Storage preparation incomplete: {e}");
        }
        time::sleep(self.settings.shutdown_settle).await;
        if let Err(e) = shutdown.power_off() {
            log::error!("Power-off failed: {e}");
        }
    }

    /// Cleanup on graceful exit.
    pub fn finish(&self) {
        match self.platform.alarm.remove() {
            Ok(()) => log::info!("Alarm file removed"),
            Err(e) => log::warn!("Failed to remove alarm file: {e}"),
        }
    }

    fn initialize(&mut self) -> TickOutcome {
        let direction = self.detect_direction();
        let policy = match policy::policy_for(direction, self.settings.ports.len()) {
            Ok(policy) => policy,
            Err(e) => {
                log::error!("Cannot build {direction} policy: {e}");
                return TickOutcome::Skipped;
            }
        };

        self.state.direction = Some(direction);
        self.state.ports = self
            .settings
            .ports
            .iter()
            .map(|&port| self.platform.transceivers.handle(port))
            .collect();
        self.policy = Some(policy);

        log::info!(
            "Airflow {direction}, monitoring {} sensors and {} ports",
            self.platform.sensors.count(),
            self.state.ports.len()
        );
        TickOutcome::Initialized
    }

    /// Majority vote over present fans. AFI when no fan answered, so thermal
    /// limits are still enforced.
    fn detect_direction(&self) -> Direction {
        let fans = &self.platform.fans;
        let (mut afi, mut afo) = (0, 0);
        for index in 0..fans.count() {
            match fans.is_present(index) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    log::debug!("fan {}: {e}", index + 1);
                    continue;
                }
            }
            match fans.direction(index) {
                Ok(Direction::Afi) => afi += 1,
                Ok(Direction::Afo) => afo += 1,
                Err(e) => log::debug!("fan {}: {e}", index + 1),
            }
        }
        log::debug!("fan directions: afi={afi} afo={afo}");

        if afi + afo == 0 {
            log::warn!("No fan reported an airflow direction, assuming AFI");
        }
        Direction::from_fan_counts(afi, afo)
    }

    /// Board sensors followed by the monitored ports.
    pub fn snapshot(&self) -> Vec<SensorReading> {
        let sensors = &self.platform.sensors;
        let injected = self.settings.injected.as_deref();
        let board_count = sensors.count();

        let board = (0..board_count).map(|index| {
            let temp = match injected {
                Some(temps) => temps.get(index).copied(),
                None => sensors
                    .temperature_mc(index)
                    .map_err(|e| log::debug!("{}: {e}", sensors.label(index)))
                    .ok(),
            };
            SensorReading::board(index, sensors.label(index), temp)
        });

        let ports = self.state.ports.iter().enumerate().map(|(slot, handle)| {
            let (present, temp) = match injected {
                Some(temps) => (true, temps.get(board_count + slot).copied().unwrap_or(0)),
                None => self.read_port(handle),
            };
            let mut reading = SensorReading::transceiver(handle.port, present, temp);
            reading.label = format!("port {} ({})", handle.port, handle.name);
            reading
        });

        board.chain(ports).collect()
    }

    fn read_port(&self, handle: &TransceiverHandle) -> (bool, i32) {
        let transceivers = &self.platform.transceivers;
        let present = transceivers.is_present(handle).unwrap_or_else(|e| {
            log::debug!("{}: {e}", handle.name);
            false
        });
        if !present {
            return (false, 0);
        }
        match transceivers.temperature_mc(handle) {
            Ok(Some(temp)) => (true, temp),
            Ok(None) => (true, 0),
            Err(e) => {
                log::debug!("{} DOM unavailable: {e}", handle.name);
                (true, 0)
            }
        }
    }

    fn evaluate(&mut self) -> TickOutcome {
        let snapshot = self.snapshot();
        let Some(policy) = self.policy.as_deref() else {
            return TickOutcome::Skipped;
        };
        if let Err(e) = policy.thresholds().check_snapshot(&snapshot) {
            log::error!("{e}, skipping evaluation");
            return TickOutcome::Skipped;
        }
        log::debug!("snapshot: {snapshot:?}");

        let psu = match policy.direction() {
            Direction::Afo => {
                let limit_mw = self.settings.psu_full_load_mw;
                policy::assess_psu_load(self.platform.power.as_ref(), limit_mw)
            }
            Direction::Afi => PsuLoad::Normal,
        };
        let tick = Tick {
            snapshot: &snapshot,
            injected: self.settings.is_injected(),
            psu,
        };

        let mut eval = policy.evaluate(&self.state, &tick);
        let previous = self.state.level;
        if self.state.apply(&eval) {
            if let Err(e) = self.platform.alarm.publish(self.state.alarm) {
                log::warn!("Failed to publish alarm state: {e}");
            }
            if eval.cleared {
                log::info!("Red alarm cleared");
            }
        }

        let fan_failed = fan_failure_override(
            self.platform.fans.as_ref(),
            &mut self.state,
            self.settings.is_injected(),
        );
        actuate(
            self.platform.fans.as_ref(),
            &mut self.state,
            policy.levels(),
            previous,
            fan_failed,
        );

        match eval.shutdown.take() {
            Some(breach) => TickOutcome::Shutdown(breach),
            None => TickOutcome::Evaluated(eval),
        }
    }
}

/// Command full speed while any fan reports failure. Returns true when the
/// override is active.
fn fan_failure_override(fans: &dyn FanSource, state: &mut ControlState, injected: bool) -> bool {
    for index in 0..fans.count() {
        match fans.is_operational(index) {
            Ok(true) => {}
            Ok(false) if injected => {
                log::debug!("fan {} failed, ignored with injected temperatures", index + 1);
            }
            Ok(false) => {
                log::debug!("fan {} failed, duty cycle to {MAX_DUTY_CYCLE}", index + 1);
                if let Err(e) = fans.set_duty_cycle(MAX_DUTY_CYCLE) {
                    log::warn!("Failed to set duty cycle: {e}");
                }
                state.duty_cycle = MAX_DUTY_CYCLE;
                return true;
            }
            Err(e) => log::debug!("fan {} status unknown: {e}", index + 1),
        }
    }
    false
}

/// Apply a level change to the fans unless the failure override holds them.
fn actuate(
    fans: &dyn FanSource,
    state: &mut ControlState,
    levels: &LevelTable,
    previous: CoolingLevel,
    fan_failed: bool,
) {
    if state.level == previous {
        return;
    }

    let from = levels.duty_cycle(previous);
    let duty = levels.duty_cycle(state.level);
    let level = state.level;
    if level > previous {
        log::warn!("Raising fan duty cycle from {from}% to {duty}% ({previous} -> {level})");
    } else {
        log::info!("Lowering fan duty cycle from {from}% to {duty}% ({previous} -> {level})");
    }
    if let Some(setting) = levels.get(state.level) {
        log::debug!("fan pattern {:#x}", setting.pattern);
    }

    if fan_failed {
        return;
    }
    if fans.duty_cycle().ok() != Some(duty) {
        if let Err(e) = fans.set_duty_cycle(duty) {
            log::warn!("Failed to set duty cycle: {e}");
            return;
        }
    }
    state.duty_cycle = duty;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{
        AlarmSink, MockAlarmSink, MockShutdownActuator, PowerSource, SensorSource,
        TransceiverSource,
    };
    use crate::policy::AlarmState;
    use mockall::Sequence;
    use mockall::predicate::eq;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use std::io;
    use std::rc::Rc;

    // -- Fakes ----------------------------------------------------------------

    struct FakeSensors {
        temps: RefCell<Vec<Option<i32>>>,
    }

    impl SensorSource for Rc<FakeSensors> {
        fn count(&self) -> usize {
            self.temps.borrow().len()
        }
        fn label(&self, index: usize) -> String {
            format!("sensor {}", index + 1)
        }
        fn temperature_mc(&self, index: usize) -> crate::Result<i32> {
            self.temps.borrow()[index]
                .ok_or_else(|| Error::read("temp_input", io::ErrorKind::NotFound.into()))
        }
    }

    struct FakeFans {
        present: Vec<bool>,
        direction: Vec<Direction>,
        operational: RefCell<Vec<bool>>,
        duty: Cell<u8>,
        writes: RefCell<Vec<u8>>,
    }

    impl FanSource for Rc<FakeFans> {
        fn count(&self) -> usize {
            self.present.len()
        }
        fn is_present(&self, index: usize) -> crate::Result<bool> {
            Ok(self.present[index])
        }
        fn direction(&self, index: usize) -> crate::Result<Direction> {
            Ok(self.direction[index])
        }
        fn is_operational(&self, index: usize) -> crate::Result<bool> {
            Ok(self.operational.borrow()[index])
        }
        fn duty_cycle(&self) -> crate::Result<u8> {
            Ok(self.duty.get())
        }
        fn set_duty_cycle(&self, percent: u8) -> crate::Result<()> {
            self.duty.set(percent);
            self.writes.borrow_mut().push(percent);
            Ok(())
        }
    }

    struct FakePower {
        good: RefCell<Vec<bool>>,
        draw_mw: u64,
    }

    impl PowerSource for Rc<FakePower> {
        fn count(&self) -> usize {
            self.good.borrow().len()
        }
        fn is_power_good(&self, index: usize) -> crate::Result<bool> {
            Ok(self.good.borrow()[index])
        }
        fn input_power_mw(&self, _: usize) -> crate::Result<u64> {
            Ok(self.draw_mw)
        }
        fn output_power_mw(&self, _: usize) -> crate::Result<u64> {
            Ok(self.draw_mw)
        }
    }

    struct FakeTransceivers {
        present: HashMap<usize, bool>,
        temps: HashMap<usize, i32>,
    }

    impl TransceiverSource for FakeTransceivers {
        fn handle(&self, port: usize) -> TransceiverHandle {
            TransceiverHandle {
                port,
                name: format!("Ethernet{}", (port - 1) * 8),
            }
        }
        fn is_present(&self, handle: &TransceiverHandle) -> crate::Result<bool> {
            Ok(self.present.get(&handle.port).copied().unwrap_or(false))
        }
        fn temperature_mc(&self, handle: &TransceiverHandle) -> crate::Result<Option<i32>> {
            match self.temps.get(&handle.port) {
                Some(t) => Ok(Some(*t)),
                None => Err(Error::read("eeprom", io::ErrorKind::NotFound.into())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingAlarm {
        published: RefCell<Vec<AlarmState>>,
        removed: Cell<bool>,
    }

    impl AlarmSink for Rc<RecordingAlarm> {
        fn publish(&self, state: AlarmState) -> crate::Result<()> {
            self.published.borrow_mut().push(state);
            Ok(())
        }
        fn remove(&self) -> crate::Result<()> {
            self.removed.set(true);
            Ok(())
        }
    }

    struct Rig {
        sensors: Rc<FakeSensors>,
        fans: Rc<FakeFans>,
        power: Rc<FakePower>,
        alarm: Rc<RecordingAlarm>,
        monitor: Monitor,
    }

    fn c(celsius: f64) -> i32 {
        (celsius * 1000.0) as i32
    }

    fn settings(ports: Vec<usize>) -> Settings {
        Settings {
            poll_interval: Duration::from_millis(1),
            evaluate_every: 1,
            ports,
            psu_full_load_mw: 800_000,
            shutdown_grace: Duration::ZERO,
            shutdown_settle: Duration::ZERO,
            injected: None,
        }
    }

    fn rig_with(
        direction: Direction,
        settings: Settings,
        transceivers: FakeTransceivers,
        shutdown: Box<dyn crate::platform::ShutdownActuator>,
    ) -> Rig {
        let sensors = Rc::new(FakeSensors {
            temps: RefCell::new(vec![Some(c(30.0)); 8]),
        });
        let fans = Rc::new(FakeFans {
            present: vec![true; 6],
            direction: vec![direction; 6],
            operational: RefCell::new(vec![true; 6]),
            duty: Cell::new(100),
            writes: RefCell::new(Vec::new()),
        });
        let power = Rc::new(FakePower {
            good: RefCell::new(vec![true, true]),
            draw_mw: 900_000,
        });
        let alarm = Rc::new(RecordingAlarm::default());
        let platform = Platform {
            sensors: Box::new(sensors.clone()),
            fans: Box::new(fans.clone()),
            power: Box::new(power.clone()),
            transceivers: Box::new(transceivers),
            alarm: Box::new(alarm.clone()),
            shutdown,
        };
        Rig {
            sensors,
            fans,
            power,
            alarm,
            monitor: Monitor::new(platform, settings),
        }
    }

    /// AFO chassis, board sensors plus one absent transceiver on port 5.
    fn afo_rig() -> Rig {
        let transceivers = FakeTransceivers {
            present: HashMap::new(),
            temps: HashMap::new(),
        };
        let mut rig = rig_with(
            Direction::Afo,
            settings(vec![5]),
            transceivers,
            Box::new(MockShutdownActuator::new()),
        );
        assert_eq!(rig.monitor.poll(), TickOutcome::Initialized);
        rig
    }

    impl Rig {
        fn set_all(&self, mc: i32) {
            self.sensors.temps.borrow_mut().iter_mut().for_each(|t| *t = Some(mc));
        }
    }

    // -- Initialisation -------------------------------------------------------

    #[test]
    fn first_poll_detects_direction_and_captures_ports() {
        let rig = afo_rig();
        let state = rig.monitor.state();
        assert_eq!(state.direction, Some(Direction::Afo));
        assert_eq!(state.level, CoolingLevel::Max);
        assert_eq!(
            state.ports,
            vec![TransceiverHandle {
                port: 5,
                name: "Ethernet32".into()
            }]
        );
        assert!(rig.fans.writes.borrow().is_empty());
    }

    #[test]
    fn majority_of_present_fans_decides_direction() {
        let transceivers = FakeTransceivers {
            present: HashMap::new(),
            temps: HashMap::new(),
        };
        let mut rig = rig_with(
            Direction::Afo,
            settings(vec![]),
            transceivers,
            Box::new(MockShutdownActuator::new()),
        );
        let fans = Rc::new(FakeFans {
            present: vec![true, true, true, false, false],
            direction: vec![
                Direction::Afi,
                Direction::Afi,
                Direction::Afo,
                Direction::Afo,
                Direction::Afo,
            ],
            operational: RefCell::new(vec![true; 5]),
            duty: Cell::new(100),
            writes: RefCell::new(Vec::new()),
        });
        rig.monitor.platform.fans = Box::new(fans);
        rig.monitor.poll();
        assert_eq!(rig.monitor.state().direction, Some(Direction::Afi));
    }

    #[test]
    fn absent_fans_fall_back_to_afi_and_still_shut_down() {
        let transceivers = FakeTransceivers {
            present: HashMap::new(),
            temps: HashMap::new(),
        };
        let mut rig = rig_with(
            Direction::Afi,
            settings(vec![]),
            transceivers,
            Box::new(MockShutdownActuator::new()),
        );
        rig.monitor.platform.fans = Box::new(Rc::new(FakeFans {
            present: vec![false; 6],
            direction: vec![Direction::Afi; 6],
            operational: RefCell::new(vec![true; 6]),
            duty: Cell::new(100),
            writes: RefCell::new(Vec::new()),
        }));
        rig.set_all(c(100.0));

        assert_eq!(rig.monitor.poll(), TickOutcome::Initialized);
        assert_eq!(rig.monitor.state().direction, Some(Direction::Afi));
        assert!(matches!(rig.monitor.poll(), TickOutcome::Shutdown(_)));
        assert_eq!(rig.monitor.state().alarm, AlarmState::Red);
    }

    #[test]
    fn evaluation_runs_every_nth_poll() {
        let mut rig = afo_rig();
        rig.monitor.settings.evaluate_every = 3;
        assert_eq!(rig.monitor.poll(), TickOutcome::Skipped);
        assert_eq!(rig.monitor.poll(), TickOutcome::Skipped);
        assert!(matches!(rig.monitor.poll(), TickOutcome::Evaluated(_)));
        assert_eq!(rig.monitor.state().polls, 0);
    }

    // -- Snapshot -------------------------------------------------------------

    #[test]
    fn snapshot_substitutes_safe_defaults() {
        let transceivers = FakeTransceivers {
            present: HashMap::from([(5, true), (6, false), (11, true)]),
            temps: HashMap::from([(5, c(41.0)), (6, c(99.0))]),
        };
        let mut rig = rig_with(
            Direction::Afo,
            settings(vec![5, 6, 11]),
            transceivers,
            Box::new(MockShutdownActuator::new()),
        );
        rig.sensors.temps.borrow_mut()[1] = None;
        rig.monitor.poll();

        let snap = rig.monitor.snapshot();
        assert_eq!(snap.len(), 11);
        assert_eq!(snap[0].temp_mc, Some(c(30.0)));
        assert_eq!(snap[1].temp_mc, None);
        // present with DOM
        assert_eq!((snap[8].present, snap[8].temp_mc), (true, Some(c(41.0))));
        // absent
        assert_eq!((snap[9].present, snap[9].temp_mc), (false, Some(0)));
        // present, DOM not available yet
        assert_eq!((snap[10].present, snap[10].temp_mc), (true, Some(0)));
        assert_eq!(snap[8].label, "port 5 (Ethernet32)");
    }

    #[test]
    fn injected_temperatures_replace_live_readings() {
        let transceivers = FakeTransceivers {
            present: HashMap::new(),
            temps: HashMap::new(),
        };
        let mut s = settings(vec![5]);
        s.injected = Some((1..=9).map(|i| i * 1000).collect());
        let shutdown = Box::new(MockShutdownActuator::new());
        let mut rig = rig_with(Direction::Afo, s, transceivers, shutdown);
        rig.monitor.poll();

        let snap = rig.monitor.snapshot();
        assert_eq!(snap[0].temp_mc, Some(1000));
        assert_eq!(snap[7].temp_mc, Some(8000));
        assert!(snap[8].present);
        assert_eq!(snap[8].temp_mc, Some(9000));
    }

    #[test]
    fn settings_reject_wrong_number_of_test_temperatures() {
        let cfg = Config::default();
        assert!(Settings::from_config(&cfg, Some(&[40; 15])).is_err());
        let s = Settings::from_config(&cfg, Some(&[40; 16])).unwrap();
        assert_eq!(s.injected.as_deref().map(|t| t[0]), Some(40_000));
        assert_eq!(s.psu_full_load_mw, 800_000);
    }

    // -- Policy scenarios -----------------------------------------------------

    #[test]
    fn red_alarm_at_72c_keeps_max_duty() {
        let mut rig = afo_rig();
        rig.set_all(c(72.0));

        // The CPU-board sensor is past its 70C shutdown limit, so the tick
        // that raises the alarm also decides the shutdown.
        let TickOutcome::Shutdown(breach) = rig.monitor.poll() else {
            panic!("expected a shutdown decision");
        };
        assert_eq!(breach.label, "sensor 8");
        let state = rig.monitor.state();
        assert_eq!(state.alarm, AlarmState::Red);
        assert!(state.red_alarm_sent);
        assert_eq!(state.level, CoolingLevel::Max);
        assert_eq!(state.duty_cycle, 100);
        assert_eq!(*rig.alarm.published.borrow(), vec![AlarmState::Red]);
        assert!(rig.fans.writes.borrow().is_empty());

        // Still red on the next tick, nothing published again.
        assert!(matches!(rig.monitor.poll(), TickOutcome::Shutdown(_)));
        assert_eq!(rig.alarm.published.borrow().len(), 1);
    }

    #[test]
    fn alarm_publish_failure_does_not_stop_evaluation() {
        let mut rig = afo_rig();
        let mut alarm = MockAlarmSink::new();
        alarm
            .expect_publish()
            .with(eq(AlarmState::Red))
            .times(1)
            .returning(|_| {
                Err(Error::write("/run/alarm", io::ErrorKind::PermissionDenied.into()))
            });
        rig.monitor.platform.alarm = Box::new(alarm);
        rig.set_all(c(72.0));
        rig.sensors.temps.borrow_mut()[7] = Some(c(60.0));

        assert!(matches!(rig.monitor.poll(), TickOutcome::Evaluated(_)));
        assert_eq!(rig.monitor.state().alarm, AlarmState::Red);
    }

    #[test]
    fn cool_chassis_drops_from_max_to_mid() {
        let mut rig = afo_rig();
        rig.set_all(c(46.0));
        rig.sensors.temps.borrow_mut()[7] = Some(c(40.0));

        rig.monitor.poll();
        assert_eq!(rig.monitor.state().level, CoolingLevel::Mid);
        assert_eq!(rig.monitor.state().duty_cycle, 75);
        assert_eq!(*rig.fans.writes.borrow(), vec![75]);
    }

    #[test]
    fn hot_sensor_raises_mid_to_max() {
        let mut rig = afo_rig();
        rig.monitor.state.level = CoolingLevel::Mid;
        rig.fans.duty.set(75);
        rig.sensors.temps.borrow_mut()[2] = Some(c(69.0));
        rig.sensors.temps.borrow_mut()[5] = Some(c(75.0));

        let TickOutcome::Evaluated(eval) = rig.monitor.poll() else {
            panic!("expected an evaluation");
        };
        assert_eq!(eval.escalated.map(|b| b.label).as_deref(), Some("sensor 3"));
        assert_eq!(rig.monitor.state().level, CoolingLevel::Max);
        assert_eq!(*rig.fans.writes.borrow(), vec![100]);
    }

    #[test]
    fn clearing_alarm_publishes_clear() {
        let mut rig = afo_rig();
        rig.set_all(c(72.0));
        rig.monitor.poll();
        rig.set_all(c(30.0));
        rig.monitor.poll();

        assert_eq!(rig.monitor.state().alarm, AlarmState::Clear);
        assert!(!rig.monitor.state().red_alarm_sent);
        assert_eq!(
            *rig.alarm.published.borrow(),
            vec![AlarmState::Red, AlarmState::Clear]
        );
    }

    #[test]
    fn psu_full_load_lifts_min_to_mid() {
        let mut rig = afo_rig();
        rig.monitor.state.level = CoolingLevel::Min;
        rig.fans.duty.set(50);
        rig.power.good.borrow_mut()[0] = false;

        rig.monitor.poll();
        assert_eq!(rig.monitor.state().level, CoolingLevel::Mid);
        assert_eq!(*rig.fans.writes.borrow(), vec![75]);
    }

    // -- Fan failure ----------------------------------------------------------

    #[test]
    fn failed_fans_force_max_duty_without_changing_level() {
        let mut rig = afo_rig();
        rig.monitor.state.level = CoolingLevel::Mid;
        rig.set_all(c(45.0));
        rig.fans.duty.set(75);
        rig.fans.operational.borrow_mut().iter_mut().for_each(|ok| *ok = false);

        rig.monitor.poll();
        assert_eq!(rig.monitor.state().level, CoolingLevel::Mid);
        assert_eq!(rig.monitor.state().duty_cycle, 100);
        assert_eq!(*rig.fans.writes.borrow(), vec![100]);
    }

    #[test]
    fn fan_failure_suppresses_level_duty_write() {
        let mut rig = afo_rig();
        rig.set_all(c(30.0));
        rig.fans.operational.borrow_mut()[3] = false;

        rig.monitor.poll();
        assert_eq!(rig.monitor.state().level, CoolingLevel::Mid);
        assert_eq!(*rig.fans.writes.borrow(), vec![100]);
        assert_eq!(rig.monitor.state().duty_cycle, 100);
    }

    #[test]
    fn injected_mode_ignores_fan_failures() {
        let transceivers = FakeTransceivers {
            present: HashMap::new(),
            temps: HashMap::new(),
        };
        let mut s = settings(vec![5]);
        s.injected = Some(vec![30_000; 9]);
        let shutdown = Box::new(MockShutdownActuator::new());
        let mut rig = rig_with(Direction::Afo, s, transceivers, shutdown);
        rig.monitor.poll();
        rig.fans.operational.borrow_mut()[0] = false;

        rig.monitor.poll();
        assert_eq!(rig.monitor.state().level, CoolingLevel::Mid);
        assert_eq!(*rig.fans.writes.borrow(), vec![75]);
    }

    // -- Shutdown and exit ----------------------------------------------------

    fn afi_rig_with_shutdown(shutdown: MockShutdownActuator) -> Rig {
        let transceivers = FakeTransceivers {
            present: HashMap::new(),
            temps: HashMap::new(),
        };
        let mut rig = rig_with(Direction::Afi, settings(vec![]), transceivers, Box::new(shutdown));
        rig.monitor.poll();
        rig
    }

    #[tokio::test]
    async fn hot_chassis_raises_alarm_and_powers_off_in_one_tick() {
        let mut seq = Sequence::new();
        let mut shutdown = MockShutdownActuator::new();
        shutdown
            .expect_prepare()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        shutdown
            .expect_power_off()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let mut rig = afi_rig_with_shutdown(shutdown);

        rig.set_all(c(66.0));
        let TickOutcome::Shutdown(breach) = rig.monitor.poll() else {
            panic!("expected a shutdown decision");
        };
        assert_eq!(rig.monitor.state().alarm, AlarmState::Red);
        assert_eq!(breach.label, "sensor 2");
        rig.monitor.power_off(&breach).await;
    }

    #[tokio::test]
    async fn power_off_proceeds_when_preparation_fails() {
        let mut shutdown = MockShutdownActuator::new();
        shutdown.expect_prepare().times(1).returning(|| {
            Err(Error::Command {
                command: "fstrim -av".into(),
                reason: "exit status: 1".into(),
            })
        });
        shutdown.expect_power_off().times(1).returning(|| Ok(()));
        let mut rig = afi_rig_with_shutdown(shutdown);

        rig.set_all(c(66.0));
        let TickOutcome::Shutdown(breach) = rig.monitor.poll() else {
            panic!("expected a shutdown decision");
        };
        rig.monitor.power_off(&breach).await;
    }

    #[tokio::test]
    async fn run_exits_on_stop_flag_and_removes_alarm() {
        let mut rig = afo_rig();
        let stop = AtomicBool::new(true);
        rig.monitor.run(&stop).await;

        assert!(rig.alarm.removed.get());
        assert_eq!(*rig.alarm.published.borrow(), vec![AlarmState::Clear]);
        assert_eq!(*rig.fans.writes.borrow(), vec![100]);
    }
}
