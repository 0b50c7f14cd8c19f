use crate::command::Command;
use crate::sensor::{SensorKind, SensorReading};
use crate::timestamp::Timestamp;

/// The in-memory operational parameters.
///
/// Owned by the control loop, lent by exclusive reference to the state
/// machine for one evaluation and transition cycle. Nothing here is
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operation {
    /// Last reading of each sensor, indexed by [`SensorKind::index`].
    pub sensors: [SensorReading; 2],
    /// Whether the heater is currently on.
    pub heater_on: bool,
    /// Adjusted seconds at which the heater was last turned on, while it
    /// is still on.
    pub heating_since: Option<u32>,
    /// Accumulated heating seconds since startup.
    pub heating_secs: u32,
    /// Whether temperatures are being recorded into the log.
    pub logging_enabled: bool,
    /// The operator command pending for the current cycle.
    pub command: Option<Command>,
    /// Timestamp of the most recent state change.
    pub state_since: Timestamp,
}

impl Operation {
    /// Creates an [`Operation`] with unknown sensors and the heater off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last reading of a sensor.
    #[must_use]
    pub const fn sensor(&self, kind: SensorKind) -> &SensorReading {
        &self.sensors[kind.index()]
    }

    /// Returns the last reading of a sensor mutably.
    #[must_use]
    pub const fn sensor_mut(&mut self, kind: SensorKind) -> &mut SensorReading {
        &mut self.sensors[kind.index()]
    }

    /// Returns the last reading of the tank sensor.
    #[must_use]
    pub const fn primary(&self) -> &SensorReading {
        self.sensor(SensorKind::Primary)
    }

    /// Returns the heating seconds including the current heating period.
    #[must_use]
    pub fn total_heating_secs(&self, now_secs: u32) -> u32 {
        let current = self
            .heating_since
            .map_or(0, |since| now_secs.saturating_sub(since));
        self.heating_secs.saturating_add(current)
    }
}
