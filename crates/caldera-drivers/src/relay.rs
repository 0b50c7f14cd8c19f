//! # Heater Relay Driver
//!
//! This module provides an architecture-agnostic driver for the relay that
//! switches the heating element, together with [`RelayActions`], the
//! [`Actions`] implementation a firmware hands to the `caldera` state
//! machine.
//!
//! Relay modules are commonly driven either active-high or active-low, so
//! the logic level that closes the contact is configurable.

use core::result::Result::{self, Ok};

use embedded_hal::digital::{OutputPin, PinState};

use log::error;

use caldera::machine::{Actions, Request};

/// Logic level that closes the relay contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// A high level turns the heater on.
    ActiveHigh,
    /// A low level turns the heater on.
    ActiveLow,
}

impl Polarity {
    const fn level(self, on: bool) -> PinState {
        match (self, on) {
            (Self::ActiveHigh, true) | (Self::ActiveLow, false) => PinState::High,
            (Self::ActiveHigh, false) | (Self::ActiveLow, true) => PinState::Low,
        }
    }
}

/// The heater relay driver.
pub struct Relay<P>
where
    P: OutputPin,
{
    pin: P,
    polarity: Polarity,
    on: bool,
}

impl<P> Relay<P>
where
    P: OutputPin,
{
    /// Creates a [`Relay`] and opens its contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be driven.
    pub fn new(pin: P, polarity: Polarity) -> Result<Self, P::Error> {
        let mut relay = Self {
            pin,
            polarity,
            on: false,
        };
        relay.set(false)?;
        Ok(relay)
    }

    /// Closes or opens the relay contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be driven.
    pub fn set(&mut self, on: bool) -> Result<(), P::Error> {
        self.pin.set_state(self.polarity.level(on))?;
        self.on = on;
        Ok(())
    }

    /// Checks whether the relay contact was last closed.
    #[must_use]
    pub const fn is_on(&self) -> bool {
        self.on
    }

    /// Releases the pin.
    #[must_use]
    pub fn release(self) -> P {
        self.pin
    }
}

/// A set of pending [`Request`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requests(u8);

impl Requests {
    /// Adds a request.
    pub fn insert(&mut self, request: Request) {
        self.0 |= Self::bit(request);
    }

    /// Checks whether a request is pending.
    #[must_use]
    pub const fn contains(&self, request: Request) -> bool {
        self.0 & Self::bit(request) != 0
    }

    /// Checks whether no request is pending.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Returns the pending requests in serving order.
    pub fn iter(self) -> impl Iterator<Item = Request> {
        Request::ALL
            .into_iter()
            .filter(move |request| self.contains(*request))
    }

    const fn bit(request: Request) -> u8 {
        1 << request as u8
    }
}

/// The [`Actions`] of an appliance whose heater is switched by a [`Relay`].
///
/// Operator requests are collected until the firmware takes them after
/// each cycle.
pub struct RelayActions<P>
where
    P: OutputPin,
{
    relay: Relay<P>,
    requests: Requests,
}

impl<P> RelayActions<P>
where
    P: OutputPin,
{
    /// Creates a [`RelayActions`] driving the given relay.
    #[must_use]
    pub fn new(relay: Relay<P>) -> Self {
        Self {
            relay,
            requests: Requests::default(),
        }
    }

    /// Returns the relay.
    #[must_use]
    pub const fn relay(&self) -> &Relay<P> {
        &self.relay
    }

    /// Takes the pending requests, leaving none behind.
    pub fn take_requests(&mut self) -> Requests {
        core::mem::take(&mut self.requests)
    }
}

impl<P> Actions for RelayActions<P>
where
    P: OutputPin,
{
    fn set_heater(&mut self, on: bool) {
        if let Err(e) = self.relay.set(on) {
            error!("Impossible to switch the heater relay: {e:?}");
        }
    }

    fn request(&mut self, request: Request) {
        self.requests.insert(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;
    use std::vec::Vec;

    use embedded_hal_mock::eh1::MockError;
    use std::io::ErrorKind;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State, Transaction as PinTransaction,
    };

    #[test]
    fn test_active_high() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
        ];
        let pin = PinMock::new(&expectations);

        let mut relay = Relay::new(pin, Polarity::ActiveHigh).unwrap();
        assert!(!relay.is_on());
        relay.set(true).unwrap();
        assert!(relay.is_on());
        relay.set(false).unwrap();

        relay.release().done();
    }

    #[test]
    fn test_active_low() {
        let expectations = [
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
        ];
        let pin = PinMock::new(&expectations);

        let mut relay = Relay::new(pin, Polarity::ActiveLow).unwrap();
        relay.set(true).unwrap();

        relay.release().done();
    }

    #[test]
    fn test_failed_switch_keeps_state() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High).with_error(MockError::Io(ErrorKind::Other)),
        ];
        let pin = PinMock::new(&expectations);

        let mut actions = RelayActions::new(Relay::new(pin, Polarity::ActiveHigh).unwrap());
        actions.set_heater(true);
        assert!(!actions.relay().is_on());

        actions.relay.release().done();
    }

    #[test]
    fn test_requests_are_taken_in_order() {
        let expectations = [PinTransaction::set(State::Low)];
        let pin = PinMock::new(&expectations);

        let mut actions = RelayActions::new(Relay::new(pin, Polarity::ActiveHigh).unwrap());
        actions.request(Request::Stat);
        actions.request(Request::Help);
        actions.request(Request::Stat);

        let requests = actions.take_requests();
        assert!(requests.contains(Request::Help));
        assert!(!requests.contains(Request::Log));
        assert_eq!(
            requests.iter().collect::<Vec<_>>(),
            [Request::Help, Request::Stat]
        );
        assert!(actions.take_requests().is_empty());

        actions.relay.release().done();
    }
}
