//! Runs the `caldera` firmware on an operating system.
//!
//! The persistent store is a file, the clock counts the seconds since the
//! process started and the heater warms a simulated water tank. Operator
//! commands are read from the standard input, one per line, while
//! notifications and replies are written on the standard output as one
//! JSON document per line. Diagnostics go to the standard error.

mod clock;
mod console;
mod store;
mod tank;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use tracing::{error, info, warn};

use caldera::command::{Command, ParseCommandError};
use caldera::config::ConfigParams;
use caldera::controller::Controller;
use caldera::layout::Layout;
use caldera::sensor::Temperature;

use crate::clock::SystemClock;
use crate::console::{Console, Reply};
use crate::store::FileStore;
use crate::tank::{Tank, TankActions, TankSensors};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// File emulating the persistent memory.
    #[arg(long, default_value = "caldera.eeprom")]
    store: PathBuf,

    /// Size in bytes of the persistent memory.
    #[arg(long, default_value_t = 4096)]
    size: usize,

    /// How many times faster than real time the appliance runs.
    #[arg(long, default_value_t = 1)]
    speed: u32,

    /// Ambient temperature in degrees Celsius.
    #[arg(long, default_value_t = 15)]
    ambient: i16,
}

fn interval(config: &ConfigParams, clock: &SystemClock) -> Interval {
    let period = clock.real(Duration::from_secs(u64::from(config.cycle_secs)));
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let store = FileStore::open(&cli.store, cli.size)?;
    let clock = SystemClock::new(cli.speed);
    info!(
        "Starting with store {} at {}x speed",
        cli.store.display(),
        clock.speed()
    );
    let tank = Rc::new(RefCell::new(Tank::new(Temperature::from_degrees(
        cli.ambient,
    ))));

    let mut controller = Controller::new(
        store,
        clock,
        TankSensors::new(Rc::clone(&tank), clock),
        TankActions::new(tank),
        Layout::default(),
    );
    controller.start()?;

    let mut console = Console::new(std::io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending = VecDeque::new();

    let mut cycle_secs = controller.config().cycle_secs;
    let mut ticks = interval(controller.config(), &clock);

    loop {
        // A cycle runs to completion before input is polled again. Issuing a
        // timestamp may sleep the runtime thread until the next second when
        // more than 16 log entries fall within one second, the standard
        // input is only buffered meanwhile.
        tokio::select! {
            _ = ticks.tick() => {
                let command: Option<Command> = pending.pop_front();
                let argument = command
                    .as_ref()
                    .map(|command| command.argument.clone())
                    .unwrap_or_default();

                for notification in controller.cycle(command)? {
                    console.notify(&notification)?;
                }

                let requests = controller.actions_mut().take_requests();
                for reply in console::serve(&mut controller, &requests, &argument)? {
                    console.reply(&reply)?;
                }

                if controller.config().cycle_secs != cycle_secs {
                    cycle_secs = controller.config().cycle_secs;
                    ticks = interval(controller.config(), &clock);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("End of input, stopping");
                    return Ok(());
                };
                match line.parse::<Command>() {
                    Ok(command) => pending.push_back(command),
                    Err(ParseCommandError::Empty) => {}
                    Err(e) => {
                        warn!("{e}");
                        console.reply(&Reply::Rejected(e.to_string()))?;
                    }
                }
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error, halting: {e}");
            ExitCode::FAILURE
        }
    }
}
