use core::fmt;
use core::str::FromStr;

use alloc::string::{String, ToString};

use log::{debug, info};
use serde::Serialize;

use crate::sensor::{SensorId, Temperature};
use crate::store::Store;

/// Marker stored in the first byte of an initialized configuration region.
pub const MAGIC: u8 = 0xCA;

/// Version of the byte shape of [`ConfigParams`].
///
/// Bump it whenever the parameter layout changes in a way that still reads
/// the previous bytes sensibly. An incompatible change needs a new
/// [`MAGIC`] instead.
pub const LAYOUT_VERSION: u8 = 2;

// Magic byte and layout version.
const HEADER_LEN: usize = 2;

/// Size in bytes of the serialized [`ConfigParams`].
pub const PARAMS_LEN: usize = 29;

/// Size in bytes of the whole configuration region.
pub const REGION_LEN: usize = HEADER_LEN + PARAMS_LEN;

/// Operational thresholds and sensor identities.
///
/// The field order is the persisted byte order. A field holding zero in
/// storage has never been set and receives its default on
/// [`Config::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct ConfigParams {
    /// Bus identity of the tank sensor.
    pub primary_sensor: SensorId,
    /// Bus identity of the inlet sensor.
    pub secondary_sensor: SensorId,
    /// Temperature above which heating stops.
    pub cutout: Temperature,
    /// Temperature at or below which an overheated tank heats again.
    pub recovery: Temperature,
    /// Tank volume in litres.
    pub tank_litres: u16,
    /// Heating element power in watts.
    pub heater_watts: u16,
    /// Minimum interval between two status notifications.
    pub status_min_secs: u16,
    /// Maximum interval between two status notifications.
    pub status_max_secs: u16,
    /// Interval between two control cycles.
    pub cycle_secs: u8,
}

impl Default for ConfigParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl ConfigParams {
    /// Documented defaults.
    pub const DEFAULT: Self = Self {
        primary_sensor: SensorId::ANY,
        secondary_sensor: SensorId::ANY,
        cutout: Temperature::from_degrees(75),
        recovery: Temperature::from_degrees(65),
        tank_litres: 80,
        heater_watts: 2000,
        status_min_secs: 15,
        status_max_secs: 600,
        cycle_secs: 5,
    };

    /// Every field at its zero sentinel.
    pub const ZERO: Self = Self {
        primary_sensor: SensorId::UNSET,
        secondary_sensor: SensorId::UNSET,
        cutout: Temperature::from_centi(0),
        recovery: Temperature::from_centi(0),
        tank_litres: 0,
        heater_watts: 0,
        status_min_secs: 0,
        status_max_secs: 0,
        cycle_secs: 0,
    };

    /// Serializes the parameters into their persisted layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PARAMS_LEN] {
        let mut bytes = [0; PARAMS_LEN];
        let mut writer = Writer::new(&mut bytes);
        writer.put(&self.primary_sensor.0);
        writer.put(&self.secondary_sensor.0);
        writer.put(&self.cutout.centi().to_le_bytes());
        writer.put(&self.recovery.centi().to_le_bytes());
        writer.put(&self.tank_litres.to_le_bytes());
        writer.put(&self.heater_watts.to_le_bytes());
        writer.put(&self.status_min_secs.to_le_bytes());
        writer.put(&self.status_max_secs.to_le_bytes());
        writer.put(&[self.cycle_secs]);
        bytes
    }

    /// Deserializes the parameters from their persisted layout.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; PARAMS_LEN]) -> Self {
        let mut reader = Reader::new(bytes);
        Self {
            primary_sensor: SensorId(reader.take()),
            secondary_sensor: SensorId(reader.take()),
            cutout: Temperature::from_centi(i16::from_le_bytes(reader.take())),
            recovery: Temperature::from_centi(i16::from_le_bytes(reader.take())),
            tank_litres: u16::from_le_bytes(reader.take()),
            heater_watts: u16::from_le_bytes(reader.take()),
            status_min_secs: u16::from_le_bytes(reader.take()),
            status_max_secs: u16::from_le_bytes(reader.take()),
            cycle_secs: u8::from_le_bytes(reader.take()),
        }
    }

    /// Assigns its default to every field still at its zero sentinel.
    ///
    /// Returns `true` if at least one field has been defaulted.
    pub fn apply_defaults(&mut self) -> bool {
        let defaults = Self::DEFAULT;
        let mut changed = false;

        if self.primary_sensor.is_unset() {
            self.primary_sensor = defaults.primary_sensor;
            changed = true;
        }
        if self.secondary_sensor.is_unset() {
            self.secondary_sensor = defaults.secondary_sensor;
            changed = true;
        }
        if self.cutout.is_zero() {
            self.cutout = defaults.cutout;
            changed = true;
        }
        if self.recovery.is_zero() {
            self.recovery = defaults.recovery;
            changed = true;
        }

        for (value, default) in [
            (&mut self.tank_litres, defaults.tank_litres),
            (&mut self.heater_watts, defaults.heater_watts),
            (&mut self.status_min_secs, defaults.status_min_secs),
            (&mut self.status_max_secs, defaults.status_max_secs),
        ] {
            if *value == 0 {
                *value = default;
                changed = true;
            }
        }

        if self.cycle_secs == 0 {
            self.cycle_secs = defaults.cycle_secs;
            changed = true;
        }

        changed
    }

    /// Returns the current value of a settable field.
    #[must_use]
    pub fn get(&self, field: ConfigField) -> i32 {
        match field {
            ConfigField::Cutout => i32::from(self.cutout.centi()),
            ConfigField::Recovery => i32::from(self.recovery.centi()),
            ConfigField::TankLitres => i32::from(self.tank_litres),
            ConfigField::HeaterWatts => i32::from(self.heater_watts),
            ConfigField::StatusMinSecs => i32::from(self.status_min_secs),
            ConfigField::StatusMaxSecs => i32::from(self.status_max_secs),
            ConfigField::CycleSecs => i32::from(self.cycle_secs),
        }
    }

    /// Changes a settable field.
    ///
    /// Temperatures are expressed in hundredths of a degree.
    ///
    /// # Errors
    ///
    /// Fails without changing anything when the value is zero, does not fit
    /// the field, would leave the recovery threshold at or above the
    /// cutout threshold, or would leave the minimum status interval above
    /// the maximum one.
    pub fn set(&mut self, field: ConfigField, value: i32) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue(field);
        if value == 0 {
            return Err(invalid());
        }

        let mut params = *self;
        match field {
            ConfigField::Cutout => {
                params.cutout = Temperature::from_centi(i16::try_from(value).map_err(|_| invalid())?);
            }
            ConfigField::Recovery => {
                params.recovery =
                    Temperature::from_centi(i16::try_from(value).map_err(|_| invalid())?);
            }
            ConfigField::TankLitres => {
                params.tank_litres = u16::try_from(value).map_err(|_| invalid())?;
            }
            ConfigField::HeaterWatts => {
                params.heater_watts = u16::try_from(value).map_err(|_| invalid())?;
            }
            ConfigField::StatusMinSecs => {
                params.status_min_secs = u16::try_from(value).map_err(|_| invalid())?;
            }
            ConfigField::StatusMaxSecs => {
                params.status_max_secs = u16::try_from(value).map_err(|_| invalid())?;
            }
            ConfigField::CycleSecs => {
                params.cycle_secs = u8::try_from(value).map_err(|_| invalid())?;
            }
        }

        if params.recovery >= params.cutout {
            return Err(ConfigError::RecoveryNotBelowCutout);
        }
        if params.status_min_secs > params.status_max_secs {
            return Err(ConfigError::StatusMinAboveMax);
        }

        *self = params;
        Ok(())
    }
}

/// Operator-settable [`ConfigParams`] fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "kebab-case")]
pub enum ConfigField {
    /// [`ConfigParams::cutout`].
    Cutout = 1,
    /// [`ConfigParams::recovery`].
    Recovery = 2,
    /// [`ConfigParams::tank_litres`].
    TankLitres = 3,
    /// [`ConfigParams::heater_watts`].
    HeaterWatts = 4,
    /// [`ConfigParams::status_min_secs`].
    StatusMinSecs = 5,
    /// [`ConfigParams::status_max_secs`].
    StatusMaxSecs = 6,
    /// [`ConfigParams::cycle_secs`].
    CycleSecs = 7,
}

impl ConfigField {
    /// All [`ConfigField`]s.
    pub const ALL: [Self; 7] = [
        Self::Cutout,
        Self::Recovery,
        Self::TankLitres,
        Self::HeaterWatts,
        Self::StatusMinSecs,
        Self::StatusMaxSecs,
        Self::CycleSecs,
    ];

    /// Returns the [`ConfigField`] name, as typed by an operator.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cutout => "cutout",
            Self::Recovery => "recovery",
            Self::TankLitres => "tank",
            Self::HeaterWatts => "power",
            Self::StatusMinSecs => "status-min",
            Self::StatusMaxSecs => "status-max",
            Self::CycleSecs => "cycle",
        }
    }

    /// Returns the code identifying the field inside log records.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Finds a [`ConfigField`] by its log record code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.code() == code)
    }

    /// Checks whether the field holds a [`Temperature`].
    #[must_use]
    pub const fn is_temperature(self) -> bool {
        matches!(self, Self::Cutout | Self::Recovery)
    }

    /// Parses an operator value for this field.
    ///
    /// Temperatures are typed in degrees and returned in hundredths of a
    /// degree, every other field is a plain integer.
    ///
    /// # Errors
    ///
    /// Fails when the text is not a number of the expected shape.
    pub fn parse_value(self, text: &str) -> Result<i32, ConfigError> {
        if self.is_temperature() {
            text.parse::<Temperature>()
                .map(|temperature| i32::from(temperature.centi()))
                .map_err(|_| ConfigError::InvalidValue(self))
        } else {
            text.trim()
                .parse::<u16>()
                .map(i32::from)
                .map_err(|_| ConfigError::InvalidValue(self))
        }
    }

    /// Formats a value of this field for display.
    #[must_use]
    pub fn format_value(self, value: i32) -> String {
        match i16::try_from(value) {
            Ok(centi) if self.is_temperature() => Temperature::from_centi(centi).to_string(),
            _ => value.to_string(),
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

impl FromStr for ConfigField {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownField(s.to_string()))
    }
}

/// An operator change of a configuration field, typed as
/// `<field> <value>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChange {
    /// Field to change.
    pub field: ConfigField,
    /// New value, temperatures in hundredths of a degree.
    pub value: i32,
}

impl FromStr for ConfigChange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, value) = s
            .trim()
            .split_once(char::is_whitespace)
            .ok_or(ConfigError::Malformed)?;

        let field: ConfigField = field.parse()?;
        let value = field.parse_value(value)?;

        Ok(Self { field, value })
    }
}

/// Errors raised by operator configuration changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The change is not shaped as `<field> <value>`.
    Malformed,
    /// The field name is unknown.
    UnknownField(String),
    /// The value does not suit the field.
    InvalidValue(ConfigField),
    /// The recovery threshold would not be below the cutout threshold.
    RecoveryNotBelowCutout,
    /// The minimum status interval would exceed the maximum one.
    StatusMinAboveMax,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("expected `<field> <value>`"),
            Self::UnknownField(name) => write!(f, "unknown configuration field `{name}`"),
            Self::InvalidValue(field) => write!(f, "invalid value for `{field}`"),
            Self::RecoveryNotBelowCutout => {
                f.write_str("recovery temperature must stay below the cutout temperature")
            }
            Self::StatusMinAboveMax => {
                f.write_str("minimum status interval must not exceed the maximum one")
            }
        }
    }
}

impl core::error::Error for ConfigError {}

/// The versioned persistent configuration.
///
/// The region starts at a caller-supplied base offset and holds the
/// [`MAGIC`] byte, the [`LAYOUT_VERSION`] byte and the serialized
/// [`ConfigParams`].
#[derive(Debug)]
pub struct Config {
    base: usize,
    params: ConfigParams,
}

impl Config {
    /// Creates a [`Config`] whose region starts at `base`.
    ///
    /// Parameters are zero until [`Config::load`] is called.
    #[must_use]
    pub const fn new(base: usize) -> Self {
        Self {
            base,
            params: ConfigParams::ZERO,
        }
    }

    /// Returns the base offset of the region.
    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Returns the in-memory parameters.
    #[must_use]
    pub const fn params(&self) -> &ConfigParams {
        &self.params
    }

    /// Returns the in-memory parameters mutably.
    ///
    /// Changes are persisted by [`Config::save`].
    #[must_use]
    pub const fn params_mut(&mut self) -> &mut ConfigParams {
        &mut self.params
    }

    /// Loads the parameters from the store.
    ///
    /// A missing [`MAGIC`] byte zero-fills the whole region before reading.
    /// A stale [`LAYOUT_VERSION`] only rewrites the version byte, keeping
    /// the stored values. Every field left at zero receives its default,
    /// in which case the whole record is saved again.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn load<S: Store>(&mut self, store: &mut S) -> Result<(), S::Error> {
        if store.read_byte(self.base)? != MAGIC {
            info!("Configuration not initialized, applying defaults");
            store.fill(self.base, REGION_LEN, 0)?;
            store.update_byte(self.base, MAGIC)?;
            store.update_byte(self.base + 1, LAYOUT_VERSION)?;
        } else {
            let version = store.read_byte(self.base + 1)?;
            if version != LAYOUT_VERSION {
                info!("Migrating configuration layout from version {version} to {LAYOUT_VERSION}");
                store.update_byte(self.base + 1, LAYOUT_VERSION)?;
            }
        }

        self.read(store)?;

        if self.params.apply_defaults() {
            debug!("Configuration fields defaulted, saving");
            self.save(store)?;
        }

        Ok(())
    }

    /// Saves the parameters, writing only the bytes that changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn save<S: Store>(&self, store: &mut S) -> Result<(), S::Error> {
        store.update_bytes(self.base + HEADER_LEN, &self.params.to_bytes())
    }

    /// Zero-fills the whole region, header included, and reads it back.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn clear<S: Store>(&mut self, store: &mut S) -> Result<(), S::Error> {
        store.fill(self.base, REGION_LEN, 0)?;
        self.read(store)
    }

    fn read<S: Store>(&mut self, store: &mut S) -> Result<(), S::Error> {
        let mut bytes = [0; PARAMS_LEN];
        store.read_bytes(self.base + HEADER_LEN, &mut bytes)?;
        self.params = ConfigParams::from_bytes(&bytes);
        Ok(())
    }
}

// Sequential little helpers over fixed-size buffers.
struct Writer<'a> {
    bytes: &'a mut [u8],
    position: usize,
}

impl<'a> Writer<'a> {
    const fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn put(&mut self, value: &[u8]) {
        let end = self.position + value.len();
        self.bytes[self.position..end].copy_from_slice(value);
        self.position = end;
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut value = [0; N];
        value.copy_from_slice(&self.bytes[self.position..self.position + N]);
        self.position += N;
        value
    }
}
