use core::fmt;
use core::str::FromStr;

use serde::Serialize;

// Measurement range of the tank sensors, in hundredths of a degree.
const PLAUSIBLE_MIN: i16 = -55_00;
const PLAUSIBLE_MAX: i16 = 125_00;
// Power-on value reported by a sensor whose conversion never completed.
const POWER_ON_RESET: i16 = 85_00;

/// A temperature in hundredths of a degree Celsius.
///
/// `Temperature::from_centi(2300)` is 23.00 °C.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Temperature(i16);

impl Temperature {
    /// Creates a [`Temperature`] from hundredths of a degree Celsius.
    #[must_use]
    pub const fn from_centi(centi: i16) -> Self {
        Self(centi)
    }

    /// Creates a [`Temperature`] from whole degrees Celsius.
    ///
    /// Values outside the representable range are saturated.
    #[must_use]
    pub const fn from_degrees(degrees: i16) -> Self {
        Self(degrees.saturating_mul(100))
    }

    /// Returns the temperature in hundredths of a degree Celsius.
    #[must_use]
    pub const fn centi(self) -> i16 {
        self.0
    }

    /// Checks whether the temperature is the zero sentinel.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checks whether a sensor can physically report this temperature.
    #[must_use]
    pub const fn is_plausible(self) -> bool {
        self.0 >= PLAUSIBLE_MIN && self.0 <= PLAUSIBLE_MAX && self.0 != POWER_ON_RESET
    }

    /// Returns the temperature increased by `centi` hundredths of a degree.
    #[must_use]
    pub const fn offset(self, centi: i16) -> Self {
        Self(self.0.saturating_add(centi))
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// A malformed temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseTemperatureError;

impl fmt::Display for ParseTemperatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid temperature, expected degrees such as `72.5`")
    }
}

impl FromStr for Temperature {
    type Err = ParseTemperatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole, fraction) = match digits.split_once('.') {
            Some((whole, fraction)) if !fraction.is_empty() => (whole, fraction),
            Some(_) => return Err(ParseTemperatureError),
            None => (digits, ""),
        };
        let is_number = |text: &str| text.bytes().all(|byte| byte.is_ascii_digit());
        if whole.is_empty() || fraction.len() > 2 || !is_number(whole) || !is_number(fraction) {
            return Err(ParseTemperatureError);
        }

        let whole: i32 = whole.parse().map_err(|_| ParseTemperatureError)?;
        let fraction: i32 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i32>().map_err(|_| ParseTemperatureError)? * 10,
            _ => fraction.parse().map_err(|_| ParseTemperatureError)?,
        };

        let centi = whole
            .checked_mul(100)
            .and_then(|centi| centi.checked_add(fraction))
            .ok_or(ParseTemperatureError)?;
        let centi = if negative { -centi } else { centi };

        i16::try_from(centi)
            .map(Self)
            .map_err(|_| ParseTemperatureError)
    }
}

/// The status of a temperature sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "kebab-case")]
pub enum SensorStatus {
    /// The sensor has never been read.
    #[default]
    Unknown,
    /// The last reading is valid.
    Ok,
    /// The sensor answered with a value it cannot physically measure.
    Implausible,
    /// The sensor did not answer.
    Absent,
}

impl SensorStatus {
    /// Checks whether readings from this sensor can be trusted.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Returns the [`SensorStatus`] name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ok => "ok",
            Self::Implausible => "implausible",
            Self::Absent => "absent",
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

/// The last reading of a temperature sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct SensorReading {
    /// Sensor status.
    pub status: SensorStatus,
    /// Last temperature, meaningful only when the status is
    /// [`SensorStatus::Ok`].
    pub temperature: Temperature,
}

impl SensorReading {
    /// Creates a [`SensorReading`] from a completed conversion.
    ///
    /// A missing measurement marks the sensor as absent, an impossible one
    /// as implausible. In both cases the previous temperature is kept.
    #[must_use]
    pub const fn measured(self, measurement: Option<Temperature>) -> Self {
        match measurement {
            None => Self {
                status: SensorStatus::Absent,
                temperature: self.temperature,
            },
            Some(temperature) if !temperature.is_plausible() => Self {
                status: SensorStatus::Implausible,
                temperature: self.temperature,
            },
            Some(temperature) => Self {
                status: SensorStatus::Ok,
                temperature,
            },
        }
    }

    /// Returns the temperature when the reading is usable.
    #[must_use]
    pub const fn usable(&self) -> Option<Temperature> {
        if self.status.is_usable() {
            Some(self.temperature)
        } else {
            None
        }
    }
}

/// The temperature sensors of the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "kebab-case")]
pub enum SensorKind {
    /// The tank sensor, driving every regulation decision.
    Primary,
    /// The inlet sensor, informative only.
    Secondary,
}

impl SensorKind {
    /// All [`SensorKind`]s, in storage order.
    pub const ALL: [Self; 2] = [Self::Primary, Self::Secondary];

    /// Returns the position of the sensor in per-sensor arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// The 64-bit bus identity of a sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct SensorId(pub [u8; 8]);

impl SensorId {
    /// The zero sentinel: never configured.
    pub const UNSET: Self = Self([0; 8]);
    /// Matches the first sensor found on the bus.
    pub const ANY: Self = Self([0xFF; 8]);

    /// Checks whether the identity is the zero sentinel.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }

    /// Checks whether the identity matches any sensor.
    #[must_use]
    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A malformed sensor identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseSensorIdError;

impl fmt::Display for ParseSensorIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid sensor identity, expected 8 hexadecimal bytes")
    }
}

impl FromStr for SensorId {
    type Err = ParseSensorIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut id = [0u8; 8];
        let mut count = 0;

        for part in s.trim().split(['-', ':']) {
            let byte = id.get_mut(count).ok_or(ParseSensorIdError)?;
            if part.len() != 2 {
                return Err(ParseSensorIdError);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ParseSensorIdError)?;
            count += 1;
        }

        if count == id.len() {
            Ok(Self(id))
        } else {
            Err(ParseSensorIdError)
        }
    }
}
