use alloc::vec::Vec;

use log::{error, info};
use serde::Serialize;

use crate::command::{Command, CommandSet};
use crate::config::{Config, ConfigParams};
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::logbook::{LogData, LogEntry, RingLog};
use crate::machine::{Actions, Context, Event, Machine, StateId};
use crate::operation::Operation;
use crate::sensor::{SensorKind, SensorReading, Temperature};
use crate::store::Store;
use crate::timestamp::{Clock, TimestampGenerator};

// Specific heat capacity of water, in J/(kg·K).
const WATER_HEAT_CAPACITY: u64 = 4186;

/// Sensor orchestration.
///
/// A readout is split in two halves so the control loop can let the
/// conversion time elapse between them. Failures never surface as errors:
/// they are reflected in the sensor status.
pub trait Sensors {
    /// Resolves the configured sensors on the bus.
    ///
    /// Called at startup and again whenever the configuration changes.
    fn setup(&mut self, config: &ConfigParams);

    /// Starts a temperature conversion.
    fn initiate_readout(&mut self);

    /// Collects the conversion results into the operational parameters.
    fn complete_readout(&mut self, op: &mut Operation);
}

/// A snapshot of the appliance, pushed to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Status {
    /// Current leaf state.
    pub state: StateId,
    /// Commands accepted in the current state.
    pub commands: CommandSet,
    /// Seconds spent in the current state.
    pub state_secs: u32,
    /// Heating seconds accumulated since startup.
    pub heating_secs: u32,
    /// Estimated seconds left before the cutout temperature is reached,
    /// zero when not heating.
    pub remaining_secs: u32,
    /// Last reading of each sensor.
    pub sensors: [SensorReading; 2],
}

impl Status {
    /// Checks whether two snapshots differ in anything but their time
    /// counters.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        self.state != other.state
            || self.commands != other.commands
            || self.sensors != other.sensors
    }
}

/// Something the operator must be told about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "kebab-case")]
pub enum Notification {
    /// A log entry not delivered yet.
    Entry(LogEntry),
    /// A status snapshot.
    Status(Status),
}

/// Debounces status notifications.
///
/// A changed status is pushed at most once per minimum interval, an
/// unchanged one at least once per maximum interval.
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: Option<(Status, u32)>,
}

impl StatusTracker {
    /// Creates a [`StatusTracker`] that pushes the first status it sees.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Decides whether `status` must be pushed at `now_secs`, and if so
    /// remembers it as the last pushed one.
    pub fn poll(&mut self, status: &Status, now_secs: u32, config: &ConfigParams) -> bool {
        let due = match &self.last {
            None => true,
            Some((last, since)) if now_secs < *since => last.differs_from(status),
            Some((last, since)) => {
                let elapsed = now_secs - since;
                elapsed >= u32::from(config.status_max_secs)
                    || (elapsed >= u32::from(config.status_min_secs) && last.differs_from(status))
            }
        };

        if due {
            self.last = Some((status.clone(), now_secs));
        }
        due
    }
}

/// Estimates the seconds needed to heat the tank up to the cutout
/// temperature.
#[must_use]
pub fn remaining_secs(config: &ConfigParams, tank: Temperature) -> u32 {
    let delta = i32::from(config.cutout.centi()) - i32::from(tank.centi());
    let Ok(delta) = u64::try_from(delta) else {
        return 0;
    };
    if config.heater_watts == 0 {
        return 0;
    }

    let joules = u64::from(config.tank_litres) * WATER_HEAT_CAPACITY * delta / 100;
    u32::try_from(joules / u64::from(config.heater_watts)).unwrap_or(u32::MAX)
}

/// The control loop.
///
/// Each [`Controller::cycle`] completes the sensor readout, evaluates the
/// state machine against the pending operator command, fires the most
/// urgent candidate event, records temperatures while logging is enabled,
/// starts the next readout and collects the notifications.
pub struct Controller<S, C, N, A> {
    store: S,
    layout: Layout,
    config: Config,
    log: RingLog<C>,
    machine: Machine,
    op: Operation,
    sensors: N,
    actions: A,
    status: StatusTracker,
    recorded: Option<(Temperature, Temperature, bool)>,
}

impl<S, C, N, A> Controller<S, C, N, A>
where
    S: Store,
    C: Clock,
    N: Sensors,
    A: Actions,
{
    /// Creates a [`Controller`].
    ///
    /// Nothing touches the store until [`Controller::start`] is called.
    #[must_use]
    pub fn new(store: S, clock: C, sensors: N, actions: A, layout: Layout) -> Self {
        Self {
            store,
            layout,
            config: Config::new(layout.config_base()),
            log: RingLog::new(
                layout.log_base(),
                layout.slots(),
                TimestampGenerator::new(clock),
            ),
            machine: Machine::new(),
            op: Operation::new(),
            sensors,
            actions,
            status: StatusTracker::new(),
            recorded: None,
        }
    }

    /// Starts the appliance.
    ///
    /// The store is probed first, then the configuration is loaded, the log
    /// recovered, the sensors set up and the state machine started.
    ///
    /// # Errors
    ///
    /// Every error is fatal: the firmware must halt.
    pub fn start(&mut self) -> Result<(), S::Error> {
        let available = self.store.len();
        let required = self.layout.end();
        if available < required {
            error!("The persisted layout needs {required} bytes, the store has {available}");
            return Err(Error::OutOfBounds {
                required,
                available,
            });
        }
        let _ = self.store.read_byte(self.layout.base())?;

        self.config.load(&mut self.store)?;
        self.log.init(&mut self.store)?;

        self.sensors.setup(self.config.params());
        self.sensors.initiate_readout();

        let Self {
            store,
            config,
            log,
            machine,
            op,
            actions,
            ..
        } = self;
        machine.start(&mut Context {
            store,
            log,
            config,
            op,
            actions,
        })?;

        info!(
            "Controller started with {} log entries out of {}",
            self.log.count(),
            self.log.capacity()
        );

        Ok(())
    }

    /// Runs one control cycle with an optional operator command.
    ///
    /// Returns the notifications to deliver: every log entry not delivered
    /// yet, followed by a status snapshot when one is due.
    ///
    /// # Blocking
    ///
    /// May block up to one second per appended entry, see
    /// [`TimestampGenerator::timestamp`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn cycle(&mut self, command: Option<Command>) -> Result<Vec<Notification>, S::Error> {
        self.sensors.complete_readout(&mut self.op);

        let pending = command.as_ref().map(|command| Event::from(command.id));
        self.op.command = command;

        let candidates = self.machine.evaluate(self.config.params(), &self.op);
        let params = *self.config.params();

        {
            let Self {
                store,
                config,
                log,
                machine,
                op,
                actions,
                ..
            } = self;
            let mut ctx = Context {
                store,
                log,
                config,
                op,
                actions,
            };

            // A command not accepted here is reported as illegal.
            if let Some(event) = pending
                && !candidates.contains(event)
            {
                let _ = machine.transition(event, &mut ctx)?;
            }

            if let Some(event) = candidates.highest_priority() {
                let _ = machine.transition(event, &mut ctx)?;
            }
        }

        self.op.command = None;

        if *self.config.params() != params {
            self.sensors.setup(self.config.params());
        }

        self.record_temperatures()?;
        self.sensors.initiate_readout();

        self.notifications()
    }

    /// Reads the most recent log entries, newest first, or all of them when
    /// `max` is zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn recent_entries(&mut self, max: u16) -> Result<Vec<LogEntry>, S::Error> {
        self.log.most_recent(&mut self.store, max).collect()
    }

    /// Returns the current status snapshot.
    #[must_use]
    pub fn status(&self) -> Status {
        let now_secs = self.log.now_secs();
        let params = self.config.params();

        let remaining_secs = match self.op.primary().usable() {
            Some(tank) if self.machine.state() == StateId::Heating => {
                remaining_secs(params, tank)
            }
            _ => 0,
        };

        Status {
            state: self.machine.state(),
            commands: self.machine.user_commands(),
            state_secs: now_secs.saturating_sub(self.op.state_since.seconds()),
            heating_secs: self.op.total_heating_secs(now_secs),
            remaining_secs,
            sensors: self.op.sensors,
        }
    }

    /// Returns the current leaf state.
    #[must_use]
    pub const fn state(&self) -> StateId {
        self.machine.state()
    }

    /// Returns the commands accepted in the current state.
    #[must_use]
    pub fn user_commands(&self) -> CommandSet {
        self.machine.user_commands()
    }

    /// Returns the configuration parameters.
    #[must_use]
    pub const fn config(&self) -> &ConfigParams {
        self.config.params()
    }

    /// Returns the operational parameters.
    #[must_use]
    pub const fn operation(&self) -> &Operation {
        &self.op
    }

    /// Returns the audit log.
    #[must_use]
    pub const fn log(&self) -> &RingLog<C> {
        &self.log
    }

    /// Returns the persistent store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the physical effects.
    #[must_use]
    pub const fn actions(&self) -> &A {
        &self.actions
    }

    /// Returns the physical effects mutably.
    #[must_use]
    pub const fn actions_mut(&mut self) -> &mut A {
        &mut self.actions
    }

    /// Returns the sensors mutably.
    #[must_use]
    pub const fn sensors_mut(&mut self) -> &mut N {
        &mut self.sensors
    }

    /// Consumes the [`Controller`] and returns its store.
    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    fn record_temperatures(&mut self) -> Result<(), S::Error> {
        if !self.op.logging_enabled {
            self.recorded = None;
            return Ok(());
        }

        let current = (
            self.op.sensor(SensorKind::Primary).temperature,
            self.op.sensor(SensorKind::Secondary).temperature,
            self.op.heater_on,
        );
        if self.recorded == Some(current) {
            return Ok(());
        }

        let (primary, secondary, heater_on) = current;
        let _ = self.log.append(
            &mut self.store,
            LogData::Temperatures {
                primary,
                secondary,
                heater_on,
            },
        )?;
        self.recorded = Some(current);

        Ok(())
    }

    fn notifications(&mut self) -> Result<Vec<Notification>, S::Error> {
        let mut notifications = self
            .log
            .unnotified(&mut self.store)
            .map(|entry| entry.map(Notification::Entry))
            .collect::<Result<Vec<_>, _>>()?;

        let status = self.status();
        if self
            .status
            .poll(&status, self.log.now_secs(), self.config.params())
        {
            notifications.push(Notification::Status(status));
        }

        Ok(notifications)
    }
}

#[cfg(test)]
mod tests {
    use alloc::collections::VecDeque;
    use alloc::vec::Vec;

    use crate::command::{Command, CommandId, CommandSet};
    use crate::config::ConfigParams;
    use crate::error::Error;
    use crate::layout::Layout;
    use crate::logbook::LogData;
    use crate::machine::{Event, StateId};
    use crate::operation::Operation;
    use crate::sensor::{SensorKind, Temperature};
    use crate::store::MemoryStore;
    use crate::testing::{ManualClock, RecordingActions};

    use super::{Controller, Notification, Sensors, Status, StatusTracker, remaining_secs};

    // Replays queued tank temperatures, `None` for a missing sensor.
    #[derive(Default)]
    struct ScriptedSensors {
        tank: VecDeque<Option<Temperature>>,
        last: Option<Temperature>,
        readouts: usize,
        setups: Vec<ConfigParams>,
    }

    impl Sensors for ScriptedSensors {
        fn setup(&mut self, config: &ConfigParams) {
            self.setups.push(*config);
        }

        fn initiate_readout(&mut self) {
            self.readouts += 1;
        }

        fn complete_readout(&mut self, op: &mut Operation) {
            if let Some(next) = self.tank.pop_front() {
                self.last = next;
            }
            let primary = op.sensor_mut(SensorKind::Primary);
            *primary = primary.measured(self.last);
            let secondary = op.sensor_mut(SensorKind::Secondary);
            *secondary = secondary.measured(Some(Temperature::from_degrees(12)));
        }
    }

    type TestController = Controller<MemoryStore, ManualClock, ScriptedSensors, RecordingActions>;

    const LAYOUT: Layout = Layout::new(0, 16);

    fn controller(store: MemoryStore, tank: Option<Temperature>) -> TestController {
        let sensors = ScriptedSensors {
            last: tank,
            ..ScriptedSensors::default()
        };
        let mut controller = Controller::new(
            store,
            ManualClock::new(0),
            sensors,
            RecordingActions::default(),
            LAYOUT,
        );
        controller.start().unwrap();
        controller
    }

    fn tick(controller: &mut TestController, secs: u32) {
        controller.log.generator_mut().clock_mut().advance(secs);
    }

    fn run(controller: &mut TestController, command: &str) -> Vec<Notification> {
        tick(controller, 5);
        controller.cycle(Some(command.parse::<Command>().unwrap())).unwrap()
    }

    fn entries(notifications: &[Notification]) -> Vec<LogData> {
        notifications
            .iter()
            .filter_map(|notification| match notification {
                Notification::Entry(entry) => Some(entry.data),
                Notification::Status(_) => None,
            })
            .collect()
    }

    fn statuses(notifications: &[Notification]) -> usize {
        notifications
            .iter()
            .filter(|notification| matches!(notification, Notification::Status(_)))
            .count()
    }

    #[test]
    fn test_store_too_small() {
        let mut controller = Controller::new(
            MemoryStore::erased(LAYOUT.end() - 1),
            ManualClock::new(0),
            ScriptedSensors::default(),
            RecordingActions::default(),
            LAYOUT,
        );

        assert_eq!(
            controller.start(),
            Err(Error::OutOfBounds {
                required: LAYOUT.end(),
                available: LAYOUT.end() - 1
            })
        );
    }

    #[test]
    fn test_first_cycle() {
        let mut controller = controller(
            MemoryStore::erased(LAYOUT.end()),
            Some(Temperature::from_degrees(23)),
        );
        assert_eq!(controller.state(), StateId::Init);
        assert_eq!(*controller.config(), ConfigParams::DEFAULT);

        let notifications = controller.cycle(None).unwrap();
        assert_eq!(controller.state(), StateId::Idle);

        let records = entries(&notifications);
        assert!(matches!(records[0], LogData::Created { slots: 16 }));
        assert!(matches!(records[1], LogData::CapacityChanged { current: 16, .. }));
        assert_eq!(
            records[2],
            LogData::StateChange {
                from: StateId::Init,
                to: StateId::Idle,
                event: Event::Ready
            }
        );
        assert_eq!(records.len(), 3);
        assert!(matches!(
            notifications.last(),
            Some(Notification::Status(Status {
                state: StateId::Idle,
                ..
            }))
        ));
        assert_eq!(controller.sensors_mut().readouts, 2);
    }

    #[test]
    fn test_heating_session() {
        let mut controller = controller(
            MemoryStore::erased(LAYOUT.end()),
            Some(Temperature::from_degrees(23)),
        );
        let _ = controller.cycle(None).unwrap();

        let notifications = run(&mut controller, "start");
        assert_eq!(controller.state(), StateId::Standby);
        assert!(controller.operation().logging_enabled);
        assert!(
            entries(&notifications)
                .iter()
                .any(|data| matches!(data, LogData::Temperatures { heater_on: false, .. }))
        );

        let _ = run(&mut controller, "on");
        assert_eq!(controller.state(), StateId::Heating);
        assert_eq!(controller.actions().heater, [true]);

        let status = controller.status();
        assert_eq!(
            status.commands,
            CommandSet::READ_ONLY.union(CommandSet::of(&[CommandId::Stop, CommandId::Off]))
        );
        // 80 l from 23 °C to 75 °C at 2 kW.
        assert_eq!(status.remaining_secs, 80 * 4186 * 52 / 2000);

        // Temperatures are only recorded when they change.
        tick(&mut controller, 5);
        let quiet = controller.cycle(None).unwrap();
        assert!(entries(&quiet).is_empty());

        controller.sensors_mut().tank.push_back(Some(Temperature::from_degrees(24)));
        tick(&mut controller, 5);
        let warmer = controller.cycle(None).unwrap();
        assert_eq!(
            entries(&warmer),
            [LogData::Temperatures {
                primary: Temperature::from_degrees(24),
                secondary: Temperature::from_degrees(12),
                heater_on: true
            }]
        );

        let _ = run(&mut controller, "off");
        assert_eq!(controller.state(), StateId::Standby);
        assert_eq!(controller.actions().heater, [true, false]);
        assert_eq!(controller.operation().heating_secs, 15);
    }

    #[test]
    fn test_config_change_reaches_the_sensors() {
        let mut controller = controller(
            MemoryStore::erased(LAYOUT.end()),
            Some(Temperature::from_degrees(23)),
        );
        let _ = controller.cycle(None).unwrap();
        assert_eq!(controller.sensors_mut().setups.len(), 1);

        let _ = run(&mut controller, "help");
        assert_eq!(controller.sensors_mut().setups.len(), 1);

        let _ = run(&mut controller, "set tank 120");
        let setups = &controller.sensors_mut().setups;
        assert_eq!(setups.len(), 2);
        assert_eq!(setups[1].tank_litres, 120);

        // A rejected change leaves the sensors alone.
        let _ = run(&mut controller, "set tank lots");
        assert_eq!(controller.sensors_mut().setups.len(), 2);
    }

    #[test]
    fn test_overheating_cuts_the_heater() {
        let mut controller = controller(
            MemoryStore::erased(LAYOUT.end()),
            Some(Temperature::from_degrees(70)),
        );
        let _ = controller.cycle(None).unwrap();
        let _ = run(&mut controller, "start");
        let _ = run(&mut controller, "on");

        controller.sensors_mut().tank.push_back(Some(Temperature::from_degrees(76)));
        let _ = run(&mut controller, "off");

        // The cutout wins over the command.
        assert_eq!(controller.state(), StateId::Overheated);
        assert_eq!(controller.actions().heater, [true, false]);

        let _ = run(&mut controller, "reset");
        assert_eq!(controller.state(), StateId::Standby);
    }

    #[test]
    fn test_unaccepted_command_is_reported_once() {
        let mut controller = controller(
            MemoryStore::erased(LAYOUT.end()),
            Some(Temperature::from_degrees(23)),
        );
        let _ = controller.cycle(None).unwrap();

        let first = run(&mut controller, "on");
        assert_eq!(
            entries(&first),
            [LogData::IllegalTransition {
                state: StateId::Idle,
                event: Event::HeaterOn
            }]
        );

        let second = run(&mut controller, "on");
        assert!(entries(&second).is_empty());
        assert_eq!(controller.state(), StateId::Idle);
    }

    #[test]
    fn test_read_only_commands_are_requested() {
        let mut controller = controller(
            MemoryStore::erased(LAYOUT.end()),
            Some(Temperature::from_degrees(23)),
        );
        let _ = controller.cycle(None).unwrap();

        let _ = run(&mut controller, "log");
        let _ = run(&mut controller, "stat");
        assert_eq!(
            controller.actions().requests,
            [crate::machine::Request::Log, crate::machine::Request::Stat]
        );

        let recent = controller.recent_entries(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp > recent[1].timestamp);
    }

    #[test]
    fn test_sensor_loss_while_heating() {
        let mut controller = controller(
            MemoryStore::erased(LAYOUT.end()),
            Some(Temperature::from_degrees(40)),
        );
        let _ = controller.cycle(None).unwrap();
        let _ = run(&mut controller, "start");
        let _ = run(&mut controller, "on");

        controller.sensors_mut().tank.push_back(None);
        tick(&mut controller, 5);
        let _ = controller.cycle(None).unwrap();

        assert_eq!(controller.state(), StateId::SensorsFailed);
        assert!(!controller.operation().heater_on);
        assert_eq!(
            controller.user_commands(),
            CommandSet::READ_ONLY
        );
    }

    #[test]
    fn test_status_is_debounced() {
        let mut controller = controller(
            MemoryStore::erased(LAYOUT.end()),
            Some(Temperature::from_degrees(23)),
        );
        assert_eq!(statuses(&controller.cycle(None).unwrap()), 1);

        // Unchanged: nothing until the maximum interval elapsed.
        for _ in 0..10 {
            tick(&mut controller, 30);
            assert_eq!(statuses(&controller.cycle(None).unwrap()), 0);
        }
        tick(&mut controller, 300);
        assert_eq!(statuses(&controller.cycle(None).unwrap()), 1);

        // Changed: held back until the minimum interval elapsed.
        controller.sensors_mut().tank.push_back(Some(Temperature::from_degrees(24)));
        tick(&mut controller, 5);
        assert_eq!(statuses(&controller.cycle(None).unwrap()), 0);
        tick(&mut controller, 10);
        assert_eq!(statuses(&controller.cycle(None).unwrap()), 1);
    }

    #[test]
    fn test_restart_resumes_the_log() {
        let mut controller = controller(
            MemoryStore::erased(LAYOUT.end()),
            Some(Temperature::from_degrees(23)),
        );
        let _ = controller.cycle(None).unwrap();
        let _ = run(&mut controller, "start");
        let before = controller.recent_entries(1).unwrap()[0];
        let count = controller.log().count();

        // Power cycle: same bytes, clock back at zero.
        let mut restarted = self::controller(
            controller.into_store(),
            Some(Temperature::from_degrees(23)),
        );
        assert_eq!(restarted.log().count(), count);
        assert_eq!(restarted.state(), StateId::Init);

        let notifications = restarted.cycle(None).unwrap();
        let records = entries(&notifications);
        // Only the new state change is delivered.
        assert_eq!(records.len(), 1);
        assert!(restarted.recent_entries(1).unwrap()[0].timestamp > before.timestamp);
    }

    #[test]
    fn test_status_tracker_pushes_first_status() {
        let mut tracker = StatusTracker::new();
        let status = Status {
            state: StateId::Idle,
            commands: CommandSet::READ_ONLY,
            state_secs: 0,
            heating_secs: 0,
            remaining_secs: 0,
            sensors: Operation::new().sensors,
        };
        let config = ConfigParams::DEFAULT;

        assert!(tracker.poll(&status, 100, &config));
        assert!(!tracker.poll(&status, 101, &config));

        let mut later = status.clone();
        later.state_secs = 50;
        assert!(!later.differs_from(&status));
    }

    #[test]
    fn test_remaining_secs() {
        let config = ConfigParams::DEFAULT;

        assert_eq!(remaining_secs(&config, Temperature::from_degrees(75)), 0);
        assert_eq!(remaining_secs(&config, Temperature::from_degrees(80)), 0);
        assert_eq!(
            remaining_secs(&config, Temperature::from_degrees(65)),
            80 * 4186 * 10 / 2000
        );
    }

    #[cfg(feature = "deserialize")]
    #[test]
    fn test_notification_json() {
        use crate::logbook::LogEntry;
        use crate::timestamp::Timestamp;
        use crate::{deserialize, serialize};

        let notification = Notification::Entry(LogEntry {
            timestamp: Timestamp::from_seconds(3),
            data: LogData::StateChange {
                from: StateId::Standby,
                to: StateId::Heating,
                event: Event::HeaterOn,
            },
        });

        let value = serialize(notification.clone());
        assert_eq!(
            value,
            serde_json::json!({
                "entry": {
                    "timestamp": 48,
                    "data": {
                        "state-change": {
                            "from": "standby",
                            "to": "heating",
                            "event": "heater-on"
                        }
                    }
                }
            })
        );
        assert_eq!(deserialize::<Notification>(value), notification);
    }
}
