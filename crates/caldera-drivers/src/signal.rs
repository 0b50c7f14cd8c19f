//! # Failure Signal
//!
//! When the firmware meets an unrecoverable failure, such as an unreadable
//! store or a corrupted log, it parks itself forever blinking the
//! international distress pattern `SOS` on an indicator light, so the
//! appliance never acts on inconsistent state.

use core::result::Result::{self, Ok};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

// Morse timings, expressed in units of `UNIT_MS`.
const UNIT_MS: u32 = 200;
const DOT: u32 = 1;
const DASH: u32 = 3;
const SYMBOL_GAP: u32 = 1;
const LETTER_GAP: u32 = 3;
const WORD_GAP: u32 = 7;

const SOS: [&[u32]; 3] = [&[DOT, DOT, DOT], &[DASH, DASH, DASH], &[DOT, DOT, DOT]];

/// Blinks the `SOS` pattern once, ending with the light off after the
/// pause between words.
///
/// # Errors
///
/// Returns an error if the pin cannot be driven.
pub fn blink_sos<P, D>(pin: &mut P, delay: &mut D) -> Result<(), P::Error>
where
    P: OutputPin,
    D: DelayNs,
{
    for (index, letter) in SOS.iter().enumerate() {
        if index > 0 {
            delay.delay_ms((LETTER_GAP - SYMBOL_GAP) * UNIT_MS);
        }
        for symbol in *letter {
            pin.set_high()?;
            delay.delay_ms(symbol * UNIT_MS);
            pin.set_low()?;
            delay.delay_ms(SYMBOL_GAP * UNIT_MS);
        }
    }
    delay.delay_ms((WORD_GAP - SYMBOL_GAP) * UNIT_MS);
    Ok(())
}

/// Halts the firmware, blinking `SOS` forever.
///
/// Pin errors are ignored: there is nothing left to report them to.
pub fn halt<P, D>(mut pin: P, mut delay: D) -> !
where
    P: OutputPin,
    D: DelayNs,
{
    loop {
        if blink_sos(&mut pin, &mut delay).is_err() {
            delay.delay_ms(WORD_GAP * UNIT_MS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;
    use std::vec::Vec;

    use embedded_hal_mock::eh1::MockError;
    use std::io::ErrorKind;
    use embedded_hal_mock::eh1::delay::{CheckedDelay, NoopDelay, Transaction as DelayTransaction};
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State, Transaction as PinTransaction,
    };

    fn pulses() -> Vec<PinTransaction> {
        (0..9)
            .flat_map(|_| {
                [
                    PinTransaction::set(State::High),
                    PinTransaction::set(State::Low),
                ]
            })
            .collect()
    }

    #[test]
    fn test_blink_sos_pulses() {
        let mut pin = PinMock::new(&pulses());

        blink_sos(&mut pin, &mut NoopDelay).unwrap();

        pin.done();
    }

    #[test]
    fn test_blink_sos_timing() {
        let mut pin = PinMock::new(&pulses());

        let mut timings = Vec::new();
        for (index, length) in [200, 600, 200].into_iter().enumerate() {
            if index > 0 {
                timings.push(DelayTransaction::delay_ms(400));
            }
            for _ in 0..3 {
                timings.push(DelayTransaction::delay_ms(length));
                timings.push(DelayTransaction::delay_ms(200));
            }
        }
        timings.push(DelayTransaction::delay_ms(1200));
        let mut delay = CheckedDelay::new(&timings);

        blink_sos(&mut pin, &mut delay).unwrap();

        pin.done();
        delay.done();
    }

    #[test]
    fn test_blink_sos_stops_on_pin_error() {
        let expectations = [PinTransaction::set(State::High).with_error(MockError::Io(ErrorKind::Other))];
        let mut pin = PinMock::new(&expectations);

        assert!(blink_sos(&mut pin, &mut NoopDelay).is_err());

        pin.done();
    }
}
