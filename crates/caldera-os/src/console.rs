use std::io::{self, Write};

use serde::Serialize;

use caldera::command::CommandId;
use caldera::config::ConfigParams;
use caldera::controller::{Controller, Notification, Sensors, Status};
use caldera::error::Result;
use caldera::logbook::LogEntry;
use caldera::machine::{Actions, Request};
use caldera::store::Store;
use caldera::timestamp::Clock;

// Entries shown by `log` when no count is given.
const DEFAULT_LOG_ENTRIES: u16 = 10;

/// Description of an accepted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandHelp {
    /// Command name.
    pub command: &'static str,
    /// What the command does.
    pub description: &'static str,
}

/// The answer to an operator request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reply {
    /// Commands accepted in the current state.
    Help(Vec<CommandHelp>),
    /// Most recent log entries, newest first.
    Log(Vec<LogEntry>),
    /// Configuration parameters.
    Config(ConfigParams),
    /// Operating statistics.
    Stat(Status),
    /// A line that could not be understood.
    Rejected(String),
}

/// Serves the requests raised during a cycle.
///
/// `argument` is the argument of the command that raised them, `log`
/// accepts the maximum number of entries to show.
///
/// # Errors
///
/// Returns an error if the log cannot be read.
pub fn serve<S, C, N, A>(
    controller: &mut Controller<S, C, N, A>,
    requests: &[Request],
    argument: &str,
) -> Result<Vec<Reply>, S::Error>
where
    S: Store,
    C: Clock,
    N: Sensors,
    A: Actions,
{
    requests
        .iter()
        .map(|request| {
            Ok(match request {
                Request::Help => Reply::Help(
                    controller
                        .user_commands()
                        .iter()
                        .map(help)
                        .collect(),
                ),
                Request::Log => {
                    let max = argument.parse().unwrap_or(DEFAULT_LOG_ENTRIES);
                    Reply::Log(controller.recent_entries(max)?)
                }
                Request::Config => Reply::Config(*controller.config()),
                Request::Stat => Reply::Stat(controller.status()),
            })
        })
        .collect()
}

fn help(command: CommandId) -> CommandHelp {
    CommandHelp {
        command: command.name(),
        description: command.description(),
    }
}

/// Writes notifications and replies as one JSON document per line.
pub struct Console<W> {
    out: W,
}

impl<W: Write> Console<W> {
    /// Creates a [`Console`] writing on `out`.
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be written.
    pub fn notify(&mut self, notification: &Notification) -> io::Result<()> {
        self.emit(notification)
    }

    /// Writes a reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be written.
    pub fn reply(&mut self, reply: &Reply) -> io::Result<()> {
        self.emit(reply)
    }

    fn emit<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        writeln!(self.out)?;
        self.out.flush()
    }
}
