use core::fmt;
use core::str::FromStr;

use alloc::string::{String, ToString};

use serde::Serialize;

/// All [`CommandId`]s.
pub const ALL_COMMANDS: &[CommandId] = &[
    CommandId::Help,
    CommandId::Log,
    CommandId::Config,
    CommandId::Stat,
    CommandId::Start,
    CommandId::Stop,
    CommandId::On,
    CommandId::Off,
    CommandId::Reset,
    CommandId::Set,
];

/// Identifiers of all operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "lowercase")]
pub enum CommandId {
    /// Lists the accepted commands.
    Help,
    /// Shows the most recent log entries.
    Log,
    /// Shows the configuration.
    Config,
    /// Shows the operating statistics.
    Stat,
    /// Starts recording temperatures.
    Start,
    /// Stops recording temperatures.
    Stop,
    /// Turns the heater on.
    On,
    /// Turns the heater off.
    Off,
    /// Acknowledges an overheating.
    Reset,
    /// Changes a configuration field.
    Set,
}

impl CommandId {
    /// Returns the [`CommandId`] name, as typed by an operator.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Log => "log",
            Self::Config => "config",
            Self::Stat => "stat",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::On => "on",
            Self::Off => "off",
            Self::Reset => "reset",
            Self::Set => "set",
        }
    }

    /// Returns the [`CommandId`] description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Help => "List the accepted commands.",
            Self::Log => "Show the most recent log entries.",
            Self::Config => "Show the configuration.",
            Self::Stat => "Show the operating statistics.",
            Self::Start => "Start recording temperatures.",
            Self::Stop => "Stop recording temperatures.",
            Self::On => "Turn the heater on.",
            Self::Off => "Turn the heater off.",
            Self::Reset => "Acknowledge an overheating and return to standby.",
            Self::Set => "Change a configuration field: `set <field> <value>`.",
        }
    }

    /// Checks whether the command only reads data.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Help | Self::Log | Self::Config | Self::Stat)
    }

    /// Finds a [`CommandId`] by name, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_COMMANDS
            .iter()
            .copied()
            .find(|command| command.name().eq_ignore_ascii_case(name))
    }

    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

/// A set of [`CommandId`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CommandSet(u16);

impl CommandSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// The read-only commands.
    pub const READ_ONLY: Self = Self::of(&[
        CommandId::Help,
        CommandId::Log,
        CommandId::Config,
        CommandId::Stat,
    ]);

    /// Creates a [`CommandSet`] from a slice of [`CommandId`]s.
    #[must_use]
    pub const fn of(commands: &[CommandId]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < commands.len() {
            bits |= commands[i].bit();
            i += 1;
        }
        Self(bits)
    }

    /// Adds a [`CommandId`].
    pub const fn insert(&mut self, command: CommandId) {
        self.0 |= command.bit();
    }

    /// Checks whether a [`CommandId`] is in the set.
    #[must_use]
    pub const fn contains(&self, command: CommandId) -> bool {
        self.0 & command.bit() != 0
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

    /// Returns the number of commands in the set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates over the commands in the set, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = CommandId> + '_ {
        ALL_COMMANDS
            .iter()
            .copied()
            .filter(|command| self.contains(*command))
    }
}

impl FromIterator<CommandId> for CommandSet {
    fn from_iter<I: IntoIterator<Item = CommandId>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for command in iter {
            set.insert(command);
        }
        set
    }
}

impl fmt::Display for CommandSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, command) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            command.fmt(f)?;
        }
        Ok(())
    }
}

impl Serialize for CommandSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(feature = "deserialize")]
impl<'de> serde::Deserialize<'de> for CommandSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let commands = alloc::vec::Vec::<CommandId>::deserialize(deserializer)?;
        Ok(commands.into_iter().collect())
    }
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command identifier.
    pub id: CommandId,
    /// Argument text following the command name, trimmed.
    pub argument: String,
}

impl Command {
    /// Creates a [`Command`] without argument.
    #[must_use]
    pub const fn new(id: CommandId) -> Self {
        Self {
            id,
            argument: String::new(),
        }
    }

    /// Creates a [`Command`] with an argument.
    #[must_use]
    pub fn with_argument(id: CommandId, argument: &str) -> Self {
        Self {
            id,
            argument: argument.trim().to_string(),
        }
    }
}

/// An operator line that is not a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCommandError {
    /// The line is blank.
    Empty,
    /// The first word is not a command name.
    Unknown(String),
}

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty command"),
            Self::Unknown(name) => write!(f, "unknown command `{name}`, try `help`"),
        }
    }
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        if line.is_empty() {
            return Err(ParseCommandError::Empty);
        }

        let (name, argument) = line
            .split_once(char::is_whitespace)
            .unwrap_or((line, ""));

        CommandId::from_name(name)
            .map(|id| Self::with_argument(id, argument))
            .ok_or_else(|| ParseCommandError::Unknown(name.to_string()))
    }
}
