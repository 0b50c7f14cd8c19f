//! # AT24C Driver
//!
//! This module provides an architecture-agnostic driver for the `AT24C`
//! family of I²C serial `EEPROM`s, exposed as a [`Store`] so the persistent
//! configuration and log of `caldera` can live on it.
//!
//! Only the devices addressed with two memory address bytes are supported,
//! from the 32 Kbit `AT24C32` up to the 512 Kbit `AT24C512`.
//!
//! Every byte write is followed by the device internal write cycle, during
//! which the memory does not acknowledge its address. The driver waits for
//! the maximum cycle duration before returning, so consecutive accesses
//! never collide with an ongoing write.
//!
//! For detailed specifications, refer to the
//! [datasheet](https://ww1.microchip.com/downloads/en/DeviceDoc/AT24C32D-AT24C64D-I2C-Compatible-Two-Wire-Serial-EEPROM-32-Kbit-64-Kbit-20006049C.pdf).

use core::fmt;
use core::result::Result::{self, Err, Ok};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use caldera::store::Store;

// Maximum duration of the internal write cycle.
const WRITE_CYCLE_MS: u32 = 5;
// Base I²C address, before the hardware address pins are applied.
const BASE_ADDRESS: u8 = 0x50;

/// Memory size of the supported devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// `AT24C32`, 4 KiB.
    At24c32,
    /// `AT24C64`, 8 KiB.
    At24c64,
    /// `AT24C128`, 16 KiB.
    At24c128,
    /// `AT24C256`, 32 KiB.
    At24c256,
    /// `AT24C512`, 64 KiB.
    At24c512,
}

impl Capacity {
    /// Returns the memory size in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::At24c32 => 4 * 1024,
            Self::At24c64 => 8 * 1024,
            Self::At24c128 => 16 * 1024,
            Self::At24c256 => 32 * 1024,
            Self::At24c512 => 64 * 1024,
        }
    }
}

/// Errors that may occur when interacting with the `AT24C` memory.
#[derive(Debug)]
pub enum At24cError<E> {
    /// I²C bus error.
    I2c(E),
    /// Access beyond the end of the memory.
    OutOfRange {
        /// The requested offset.
        offset: usize,
    },
}

impl<E> From<E> for At24cError<E> {
    fn from(e: E) -> Self {
        At24cError::I2c(e)
    }
}

impl<E: fmt::Debug> fmt::Display for At24cError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I2c(e) => write!(f, "I²C bus error: {e:?}"),
            Self::OutOfRange { offset } => write!(f, "offset {offset} is outside the memory"),
        }
    }
}

/// The `AT24C` driver.
pub struct At24c<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    i2c: I2C,
    delay: D,
    address: u8,
    capacity: Capacity,
}

impl<I2C, D> At24c<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    /// Creates an [`At24c`] driver.
    ///
    /// `pins` is the state of the `A2`, `A1` and `A0` hardware address
    /// pins, only the three lowest bits are used.
    #[must_use]
    pub fn new(i2c: I2C, delay: D, capacity: Capacity, pins: u8) -> Self {
        Self {
            i2c,
            delay,
            address: BASE_ADDRESS | (pins & 0x07),
            capacity,
        }
    }

    /// Returns the I²C address of the memory.
    #[must_use]
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Releases the bus and the delay provider.
    #[must_use]
    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    fn check(&self, offset: usize, len: usize) -> Result<[u8; 2], At24cError<I2C::Error>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.capacity.bytes() => {
                // Bounded by the capacity, so the offset fits in two bytes.
                let [_, _, hi, lo] = (offset as u32).to_be_bytes();
                Ok([hi, lo])
            }
            _ => Err(At24cError::OutOfRange { offset }),
        }
    }
}

impl<I2C, D> Store for At24c<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    type Error = At24cError<I2C::Error>;

    fn len(&self) -> usize {
        self.capacity.bytes()
    }

    fn read_byte(&mut self, offset: usize) -> Result<u8, Self::Error> {
        let mut buf = [0];
        self.read_bytes(offset, &mut buf)?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), Self::Error> {
        let [hi, lo] = self.check(offset, 1)?;
        self.i2c.write(self.address, &[hi, lo, value])?;
        self.delay.delay_ms(WRITE_CYCLE_MS);
        Ok(())
    }

    // A random read followed by a sequential read covers any length.
    fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        if buf.is_empty() {
            return Ok(());
        }
        let address = self.check(offset, buf.len())?;
        self.i2c.write_read(self.address, &address, buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern crate std;
    use std::vec;

    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    #[test]
    fn test_address_pins() {
        let i2c = I2cMock::new(&[]);
        let at24c = At24c::new(i2c, NoopDelay, Capacity::At24c32, 0b1111_1101);
        assert_eq!(at24c.address(), 0x55);

        let (mut i2c, _) = at24c.release();
        i2c.done();
    }

    #[test]
    fn test_read_byte() {
        let expectations = [I2cTransaction::write_read(
            0x50,
            vec![0x01, 0x2C],
            vec![0xAB],
        )];
        let i2c = I2cMock::new(&expectations);
        let mut at24c = At24c::new(i2c, NoopDelay, Capacity::At24c32, 0);

        assert_eq!(at24c.read_byte(300).unwrap(), 0xAB);

        at24c.i2c.done();
    }

    #[test]
    fn test_sequential_read() {
        let expectations = [I2cTransaction::write_read(
            0x50,
            vec![0x00, 0x10],
            vec![1, 2, 3, 4],
        )];
        let i2c = I2cMock::new(&expectations);
        let mut at24c = At24c::new(i2c, NoopDelay, Capacity::At24c64, 0);

        let mut buf = [0; 4];
        at24c.read_bytes(16, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        at24c.i2c.done();
    }

    #[test]
    fn test_write_byte() {
        let expectations = [I2cTransaction::write(0x50, vec![0x0F, 0xFF, 0x5A])];
        let i2c = I2cMock::new(&expectations);
        let mut at24c = At24c::new(i2c, NoopDelay, Capacity::At24c32, 0);

        at24c.write_byte(4095, 0x5A).unwrap();

        at24c.i2c.done();
    }

    #[test]
    fn test_update_skips_unchanged_byte() {
        let expectations = [
            I2cTransaction::write_read(0x50, vec![0x00, 0x02], vec![0x5A]),
            I2cTransaction::write_read(0x50, vec![0x00, 0x03], vec![0x00]),
            I2cTransaction::write(0x50, vec![0x00, 0x03, 0x5A]),
        ];
        let i2c = I2cMock::new(&expectations);
        let mut at24c = At24c::new(i2c, NoopDelay, Capacity::At24c32, 0);

        at24c.update_byte(2, 0x5A).unwrap();
        at24c.update_byte(3, 0x5A).unwrap();

        at24c.i2c.done();
    }

    #[test]
    fn test_out_of_range() {
        let i2c = I2cMock::new(&[]);
        let mut at24c = At24c::new(i2c, NoopDelay, Capacity::At24c32, 0);

        assert_eq!(at24c.len(), 4096);
        assert!(matches!(
            at24c.write_byte(4096, 0),
            Err(At24cError::OutOfRange { offset: 4096 })
        ));
        let mut buf = [0; 2];
        assert!(matches!(
            at24c.read_bytes(4095, &mut buf),
            Err(At24cError::OutOfRange { offset: 4095 })
        ));

        at24c.i2c.done();
    }

    #[test]
    fn test_bus_error() {
        let expectations =
            [I2cTransaction::write_read(0x50, vec![0x00, 0x00], vec![0x00])
                .with_error(ErrorKind::Other)];
        let i2c = I2cMock::new(&expectations);
        let mut at24c = At24c::new(i2c, NoopDelay, Capacity::At24c32, 0);

        assert!(matches!(
            at24c.read_byte(0),
            Err(At24cError::I2c(ErrorKind::Other))
        ));

        at24c.i2c.done();
    }
}
