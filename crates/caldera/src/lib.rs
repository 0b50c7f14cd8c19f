//! The firmware core of a `caldera` water-heating appliance controller.
//!
//! This crate provides APIs to:
//!
//! - Generate strictly ascending timestamps that survive restarts, even
//!   though the only available clock restarts from zero at every power cycle.
//! - Persist a versioned configuration record on a small byte-addressable
//!   non-volatile store, with first-use detection, layout migration and
//!   write-minimization.
//! - Keep a crash-recoverable ring-buffer log directly on the same store,
//!   read either most-recent-first or oldest-unnotified-first.
//! - Run the hierarchical state machine encoding the appliance operating
//!   modes, together with the control loop that feeds it sensor readings and
//!   operator commands and collects notifications.
//!
//! Every hardware concern is expressed through traits: a [`store::Store`]
//! for the non-volatile memory, a [`timestamp::Clock`] for elapsed time,
//! [`machine::Actions`] for physical effects and [`controller::Sensors`]
//! for sensor orchestration. Architecture-specific implementations live in
//! separate crates.
//!
//! The whole core is single-threaded and blocking. The only waits are the
//! bounded one inside [`timestamp::TimestampGenerator::timestamp`] and the
//! fatal halt performed by the firmware when a storage invariant is broken.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Operator commands and command sets.
pub mod command;
/// Versioned persistent configuration.
pub mod config;
/// The control loop and the notification surface.
pub mod controller;
/// Error management.
pub mod error;
/// Persisted layout of the non-volatile store.
pub mod layout;
/// The crash-recoverable ring-buffer log.
pub mod logbook;
/// The hierarchical state machine.
pub mod machine;
/// Operational parameters shared by the control loop and the state machine.
pub mod operation;
/// Sensor readings and temperatures.
pub mod sensor;
/// The persistent store adapter.
pub mod store;
/// Monotonic timestamps.
pub mod timestamp;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
#[cfg(feature = "deserialize")]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
#[cfg(feature = "deserialize")]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
