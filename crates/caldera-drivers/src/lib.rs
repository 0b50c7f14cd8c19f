//! `caldera-drivers` is a library crate that provides architecture-agnostic
//! drivers for the peripherals of a `caldera` water-heating appliance.
//!
//! All drivers are implemented using only the [`embedded-hal`] traits,
//! ensuring compatibility with any platform that supports these
//! abstractions.
//!
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

/// The `AT24C` I²C EEPROM driver.
#[cfg(feature = "at24c")]
pub mod at24c;

/// The heater relay driver.
#[cfg(feature = "relay")]
pub mod relay;

/// The fatal failure signal.
#[cfg(feature = "signal")]
pub mod signal;
