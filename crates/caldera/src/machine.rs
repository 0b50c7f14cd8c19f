use core::fmt;

use log::{info, warn};
use serde::Serialize;

use crate::command::{CommandId, CommandSet};
use crate::config::{Config, ConfigChange, ConfigParams};
use crate::error::Result;
use crate::logbook::{LogData, RingLog};
use crate::operation::Operation;
use crate::store::Store;
use crate::timestamp::Clock;

/// Operating modes of the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "kebab-case")]
pub enum StateId {
    /// Waiting for the first sensor readout.
    Init,
    /// The tank sensor cannot be trusted.
    SensorsFailed,
    /// Sensors are usable. Contains [`StateId::Idle`] and
    /// [`StateId::Recording`].
    Ready,
    /// Not recording.
    Idle,
    /// Recording temperatures. Contains [`StateId::Standby`],
    /// [`StateId::Heating`] and [`StateId::Overheated`].
    Recording,
    /// Recording with the heater off.
    Standby,
    /// Recording with the heater on.
    Heating,
    /// The tank exceeded the cutout temperature.
    Overheated,
}

/// Static description of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateDescriptor {
    /// State identifier.
    pub id: StateId,
    /// Containing state, if any.
    pub parent: Option<StateId>,
    /// Substate entered with this state, if it is composite.
    pub initial: Option<StateId>,
    /// Commands accepted by this state on its own.
    pub commands: CommandSet,
    /// State name.
    pub name: &'static str,
}

const NO_COMMANDS: CommandSet = CommandSet::EMPTY;

// Indexed by `StateId`.
static STATES: [StateDescriptor; StateId::COUNT] = [
    StateDescriptor {
        id: StateId::Init,
        parent: None,
        initial: None,
        commands: NO_COMMANDS,
        name: "init",
    },
    StateDescriptor {
        id: StateId::SensorsFailed,
        parent: None,
        initial: None,
        commands: CommandSet::READ_ONLY,
        name: "sensors-failed",
    },
    StateDescriptor {
        id: StateId::Ready,
        parent: None,
        initial: Some(StateId::Idle),
        commands: CommandSet::READ_ONLY,
        name: "ready",
    },
    StateDescriptor {
        id: StateId::Idle,
        parent: Some(StateId::Ready),
        initial: None,
        commands: CommandSet::of(&[CommandId::Start, CommandId::Set]),
        name: "idle",
    },
    StateDescriptor {
        id: StateId::Recording,
        parent: Some(StateId::Ready),
        initial: Some(StateId::Standby),
        commands: CommandSet::of(&[CommandId::Stop]),
        name: "recording",
    },
    StateDescriptor {
        id: StateId::Standby,
        parent: Some(StateId::Recording),
        initial: None,
        commands: CommandSet::of(&[CommandId::On]),
        name: "standby",
    },
    StateDescriptor {
        id: StateId::Heating,
        parent: Some(StateId::Recording),
        initial: None,
        commands: CommandSet::of(&[CommandId::Off]),
        name: "heating",
    },
    StateDescriptor {
        id: StateId::Overheated,
        parent: Some(StateId::Recording),
        initial: None,
        commands: CommandSet::of(&[CommandId::Reset]),
        name: "overheated",
    },
];

impl StateId {
    /// Number of states.
    pub const COUNT: usize = 8;

    /// All [`StateId`]s, in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Init,
        Self::SensorsFailed,
        Self::Ready,
        Self::Idle,
        Self::Recording,
        Self::Standby,
        Self::Heating,
        Self::Overheated,
    ];

    /// Returns the static description of the state.
    #[must_use]
    pub fn descriptor(self) -> &'static StateDescriptor {
        &STATES[self as usize]
    }

    /// Returns the containing state, if any.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        self.descriptor().parent
    }

    /// Returns the state name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Returns the code identifying the state inside log records.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Finds a [`StateId`] by its log record code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Checks whether `other` is this state or one of its substates,
    /// at any depth.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        chain(other).any(|state| state == self)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

// The state followed by all of its containers, innermost first.
fn chain(state: StateId) -> impl Iterator<Item = StateId> {
    core::iter::successors(Some(state), |state| state.parent())
}

/// Stimuli triggering state transitions.
///
/// The declaration order is the priority order: when several events are
/// candidates at once, the first declared one fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "kebab-case")]
pub enum Event {
    /// The tank sensor became unusable.
    SensorsFailed,
    /// The tank exceeded the cutout temperature.
    TempOver,
    /// The tank sensor is usable again.
    SensorsOk,
    /// The first readout of the tank sensor succeeded.
    Ready,
    /// The tank cooled down to the recovery temperature.
    TempSafe,
    /// Operator command `off`.
    HeaterOff,
    /// Operator command `stop`.
    StopRecording,
    /// Operator command `reset`.
    Reset,
    /// Operator command `on`.
    HeaterOn,
    /// Operator command `start`.
    StartRecording,
    /// Operator command `set`.
    ChangeConfig,
    /// Operator command `help`.
    Help,
    /// Operator command `log`.
    ShowLog,
    /// Operator command `config`.
    ShowConfig,
    /// Operator command `stat`.
    ShowStat,
}

impl Event {
    /// Number of events.
    pub const COUNT: usize = 15;

    /// All [`Event`]s, by decreasing priority.
    pub const ALL: [Self; Self::COUNT] = [
        Self::SensorsFailed,
        Self::TempOver,
        Self::SensorsOk,
        Self::Ready,
        Self::TempSafe,
        Self::HeaterOff,
        Self::StopRecording,
        Self::Reset,
        Self::HeaterOn,
        Self::StartRecording,
        Self::ChangeConfig,
        Self::Help,
        Self::ShowLog,
        Self::ShowConfig,
        Self::ShowStat,
    ];

    /// Returns the priority rank, lower is more urgent.
    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    /// Returns the code identifying the event inside log records.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Finds an [`Event`] by its log record code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Returns the event name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SensorsFailed => "sensors-failed",
            Self::TempOver => "temp-over",
            Self::SensorsOk => "sensors-ok",
            Self::Ready => "ready",
            Self::TempSafe => "temp-safe",
            Self::HeaterOff => "heater-off",
            Self::StopRecording => "stop-recording",
            Self::Reset => "reset",
            Self::HeaterOn => "heater-on",
            Self::StartRecording => "start-recording",
            Self::ChangeConfig => "change-config",
            Self::Help => "help",
            Self::ShowLog => "show-log",
            Self::ShowConfig => "show-config",
            Self::ShowStat => "show-stat",
        }
    }

    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

impl From<CommandId> for Event {
    fn from(command: CommandId) -> Self {
        match command {
            CommandId::Help => Self::Help,
            CommandId::Log => Self::ShowLog,
            CommandId::Config => Self::ShowConfig,
            CommandId::Stat => Self::ShowStat,
            CommandId::Start => Self::StartRecording,
            CommandId::Stop => Self::StopRecording,
            CommandId::On => Self::HeaterOn,
            CommandId::Off => Self::HeaterOff,
            CommandId::Reset => Self::Reset,
            CommandId::Set => Self::ChangeConfig,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

/// A set of [`Event`]s that could legally fire right now.
///
/// It never tells which one will fire: the caller picks one by priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventCandidates(u16);

impl EventCandidates {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Adds an [`Event`].
    pub const fn insert(&mut self, event: Event) {
        self.0 |= event.bit();
    }

    /// Checks whether an [`Event`] is in the set.
    #[must_use]
    pub const fn contains(&self, event: Event) -> bool {
        self.0 & event.bit() != 0
    }

    /// Returns the union of two sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Checks whether the set is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns the number of events in the set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns the most urgent event of the set.
    #[must_use]
    pub fn highest_priority(&self) -> Option<Event> {
        Event::from_code(u8::try_from(self.0.trailing_zeros()).ok()?)
    }

    /// Iterates over the events in the set, by decreasing priority.
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        Event::ALL
            .into_iter()
            .filter(|event| self.contains(*event))
    }
}

impl FromIterator<Event> for EventCandidates {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        let mut candidates = Self::EMPTY;
        for event in iter {
            candidates.insert(event);
        }
        candidates
    }
}

/// Deferred operator-facing reads requested by the read-only commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "kebab-case")]
pub enum Request {
    /// List the accepted commands.
    Help,
    /// Show the most recent log entries.
    Log,
    /// Show the configuration.
    Config,
    /// Show the operating statistics.
    Stat,
}

impl Request {
    /// All requests, in the order they are served.
    pub const ALL: [Self; 4] = [Self::Help, Self::Log, Self::Config, Self::Stat];
}

/// Physical effects triggered by the state machine.
pub trait Actions {
    /// Turns the heater on or off.
    fn set_heater(&mut self, on: bool);

    /// Records an operator-facing read to be served after the cycle.
    fn request(&mut self, request: Request);
}

/// Everything a transition may touch, borrowed for one cycle.
pub struct Context<'a, S, C, A> {
    /// Persistent store.
    pub store: &'a mut S,
    /// Audit log.
    pub log: &'a mut RingLog<C>,
    /// Configuration.
    pub config: &'a mut Config,
    /// Operational parameters.
    pub op: &'a mut Operation,
    /// Physical effects.
    pub actions: &'a mut A,
}

/// The result of a [`Machine::transition`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The current state changed.
    Transitioned {
        /// Leaf state before the transition.
        from: StateId,
        /// Leaf state after the transition.
        to: StateId,
    },
    /// The event has been handled without leaving the current state.
    Handled,
    /// No state handles the event in the current state.
    Ignored,
}

// How a state reacts to an event.
enum Handler {
    Internal,
    External(StateId),
}

fn trans(state: StateId, event: Event) -> Option<Handler> {
    use Handler::{External, Internal};

    let handler = match (state, event) {
        (StateId::Init, Event::Ready) => External(StateId::Ready),
        (StateId::Init, Event::SensorsFailed) => External(StateId::SensorsFailed),
        (StateId::SensorsFailed, Event::SensorsOk) => External(StateId::Ready),
        (
            StateId::SensorsFailed | StateId::Ready,
            Event::Help | Event::ShowLog | Event::ShowConfig | Event::ShowStat,
        ) => Internal,
        (StateId::Ready, Event::SensorsFailed) => External(StateId::SensorsFailed),
        (StateId::Idle, Event::StartRecording) => External(StateId::Recording),
        (StateId::Idle, Event::ChangeConfig) => Internal,
        (StateId::Recording, Event::StopRecording) => External(StateId::Idle),
        (StateId::Standby, Event::HeaterOn) => External(StateId::Heating),
        (StateId::Heating, Event::TempOver) => External(StateId::Overheated),
        (StateId::Heating, Event::HeaterOff) => External(StateId::Standby),
        (StateId::Overheated, Event::TempSafe) => External(StateId::Heating),
        (StateId::Overheated, Event::Reset) => External(StateId::Standby),
        _ => return None,
    };

    Some(handler)
}

// Conditions checked by each state on its own.
fn eval(state: StateId, config: &ConfigParams, op: &Operation) -> EventCandidates {
    use crate::sensor::SensorStatus;

    let mut candidates = EventCandidates::EMPTY;
    let primary = op.primary();

    match state {
        StateId::Init => match primary.status {
            SensorStatus::Ok => candidates.insert(Event::Ready),
            SensorStatus::Implausible | SensorStatus::Absent => {
                candidates.insert(Event::SensorsFailed);
            }
            SensorStatus::Unknown => {}
        },
        StateId::SensorsFailed => {
            if primary.status.is_usable() {
                candidates.insert(Event::SensorsOk);
            }
        }
        StateId::Ready => {
            if !primary.status.is_usable() {
                candidates.insert(Event::SensorsFailed);
            }
        }
        StateId::Heating => {
            if let Some(temperature) = primary.usable()
                && temperature > config.cutout
            {
                candidates.insert(Event::TempOver);
            }
        }
        StateId::Overheated => {
            if let Some(temperature) = primary.usable()
                && temperature <= config.recovery
            {
                candidates.insert(Event::TempSafe);
            }
        }
        StateId::Idle | StateId::Recording | StateId::Standby => {}
    }

    candidates
}

fn entry<S: Store, C: Clock, A: Actions>(
    state: StateId,
    ctx: &mut Context<'_, S, C, A>,
) -> Result<(), S::Error> {
    match state {
        StateId::Recording => ctx.op.logging_enabled = true,
        StateId::Heating => {
            ctx.actions.set_heater(true);
            ctx.op.heater_on = true;
            ctx.op.heating_since = Some(ctx.log.now_secs());
        }
        _ => {}
    }
    Ok(())
}

fn exit<S: Store, C: Clock, A: Actions>(
    state: StateId,
    ctx: &mut Context<'_, S, C, A>,
) -> Result<(), S::Error> {
    match state {
        StateId::Recording => ctx.op.logging_enabled = false,
        StateId::Heating => {
            ctx.actions.set_heater(false);
            ctx.op.heater_on = false;

            if let Some(since) = ctx.op.heating_since.take() {
                let elapsed_secs = ctx.log.now_secs().saturating_sub(since);
                ctx.op.heating_secs = ctx.op.heating_secs.saturating_add(elapsed_secs);
                let _ = ctx.log.append(
                    ctx.store,
                    LogData::HeatingStopped {
                        elapsed_secs,
                        total_secs: ctx.op.heating_secs,
                    },
                )?;
            }
        }
        _ => {}
    }
    Ok(())
}

// Side effects of the handlers not leaving their state.
fn internal<S: Store, C: Clock, A: Actions>(
    event: Event,
    ctx: &mut Context<'_, S, C, A>,
) -> Result<(), S::Error> {
    match event {
        Event::Help => ctx.actions.request(Request::Help),
        Event::ShowLog => ctx.actions.request(Request::Log),
        Event::ShowConfig => ctx.actions.request(Request::Config),
        Event::ShowStat => ctx.actions.request(Request::Stat),
        Event::ChangeConfig => change_config(ctx)?,
        _ => {}
    }
    Ok(())
}

fn change_config<S: Store, C: Clock, A: Actions>(
    ctx: &mut Context<'_, S, C, A>,
) -> Result<(), S::Error> {
    let argument = ctx
        .op
        .command
        .as_ref()
        .map(|command| command.argument.as_str())
        .unwrap_or_default();

    let change = argument.parse::<ConfigChange>().and_then(|change| {
        ctx.config.params_mut().set(change.field, change.value)?;
        Ok(change)
    });

    match change {
        Ok(ConfigChange { field, value }) => {
            ctx.config.save(ctx.store)?;
            info!("Configuration `{field}` set to {}", field.format_value(value));
            let _ = ctx
                .log
                .append(ctx.store, LogData::ConfigChanged { field, value })?;
        }
        Err(e) => warn!("Ignoring configuration change `{argument}`: {e}"),
    }

    Ok(())
}

/// The hierarchical state machine of the appliance.
///
/// Exactly one leaf state is current. Its containers are implicitly
/// active: they contribute their conditions to [`Machine::evaluate`],
/// their commands to [`Machine::user_commands`] and their handlers to
/// [`Machine::transition`].
#[derive(Debug)]
pub struct Machine {
    current: StateId,
    illegal_logged: [EventCandidates; StateId::COUNT],
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    /// Creates a [`Machine`] in the [`StateId::Init`] state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: StateId::Init,
            illegal_logged: [EventCandidates::EMPTY; StateId::COUNT],
        }
    }

    /// Returns the current leaf state.
    #[must_use]
    pub const fn state(&self) -> StateId {
        self.current
    }

    /// Checks whether `state` is the current state or one of its
    /// containers.
    #[must_use]
    pub fn is_in(&self, state: StateId) -> bool {
        state.contains(self.current)
    }

    /// Enters the [`StateId::Init`] state and stamps the state start time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn start<S: Store, C: Clock, A: Actions>(
        &mut self,
        ctx: &mut Context<'_, S, C, A>,
    ) -> Result<(), S::Error> {
        self.current = StateId::Init;
        entry(StateId::Init, ctx)?;
        self.current = descend(StateId::Init, ctx)?;
        ctx.op.state_since = ctx.log.timestamp();

        info!("State machine started in `{}`", self.current);

        Ok(())
    }

    /// Returns the commands accepted in the current state.
    ///
    /// Commands accumulate outward: a container's commands are accepted in
    /// every one of its substates.
    #[must_use]
    pub fn user_commands(&self) -> CommandSet {
        chain(self.current).fold(CommandSet::EMPTY, |commands, state| {
            commands.union(state.descriptor().commands)
        })
    }

    /// Computes every event that could legally fire right now.
    ///
    /// The current state and all of its containers contribute their
    /// conditions. The pending operator command contributes its event when
    /// the command is accepted in the current state.
    #[must_use]
    pub fn evaluate(&self, config: &ConfigParams, op: &Operation) -> EventCandidates {
        let mut candidates = chain(self.current).fold(EventCandidates::EMPTY, |candidates, state| {
            candidates.union(eval(state, config, op))
        });

        if let Some(command) = &op.command
            && self.user_commands().contains(command.id)
        {
            candidates.insert(Event::from(command.id));
        }

        candidates
    }

    /// Fires an event.
    ///
    /// The innermost state handling the event runs its handler. An
    /// external handler exits states from the current leaf outward, up to
    /// the first container of the destination, enters states down to the
    /// destination and then down its initial substates, stamps the state
    /// start time and appends a [`LogData::StateChange`] record.
    ///
    /// An event no state handles is illegal: it is ignored, and reported
    /// once per state and event for the whole life of the machine.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn transition<S: Store, C: Clock, A: Actions>(
        &mut self,
        event: Event,
        ctx: &mut Context<'_, S, C, A>,
    ) -> Result<Outcome, S::Error> {
        let Some(handler) = chain(self.current).find_map(|state| trans(state, event)) else {
            self.illegal(event, ctx)?;
            return Ok(Outcome::Ignored);
        };

        let target = match handler {
            Handler::Internal => {
                internal(event, ctx)?;
                return Ok(Outcome::Handled);
            }
            Handler::External(target) => target,
        };

        let from = self.current;

        // Exit up to the innermost state containing the destination.
        let mut top = Some(from);
        while let Some(state) = top
            && !state.contains(target)
        {
            exit(state, ctx)?;
            top = state.parent();
        }

        enter_down(top, target, ctx)?;
        let to = descend(target, ctx)?;
        self.current = to;

        ctx.op.state_since = ctx
            .log
            .append(ctx.store, LogData::StateChange { from, to, event })?;

        info!("State changed from `{from}` to `{to}` on `{event}`");

        Ok(Outcome::Transitioned { from, to })
    }

    fn illegal<S: Store, C: Clock, A: Actions>(
        &mut self,
        event: Event,
        ctx: &mut Context<'_, S, C, A>,
    ) -> Result<(), S::Error> {
        let state = self.current;
        let logged = &mut self.illegal_logged[state as usize];
        if logged.contains(event) {
            return Ok(());
        }
        logged.insert(event);

        warn!("Illegal event `{event}` in state `{state}`");
        let _ = ctx
            .log
            .append(ctx.store, LogData::IllegalTransition { state, event })?;

        Ok(())
    }
}

// Enters every state from just below `top` down to `target`, outermost
// first.
fn enter_down<S: Store, C: Clock, A: Actions>(
    top: Option<StateId>,
    target: StateId,
    ctx: &mut Context<'_, S, C, A>,
) -> Result<(), S::Error> {
    if Some(target) == top {
        return Ok(());
    }
    if let Some(parent) = target.parent() {
        enter_down(top, parent, ctx)?;
    }
    entry(target, ctx)
}

// Enters initial substates down to a leaf, which is returned.
fn descend<S: Store, C: Clock, A: Actions>(
    state: StateId,
    ctx: &mut Context<'_, S, C, A>,
) -> Result<StateId, S::Error> {
    let mut state = state;
    while let Some(initial) = state.descriptor().initial {
        entry(initial, ctx)?;
        state = initial;
    }
    Ok(state)
}
