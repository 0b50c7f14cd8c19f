use core::fmt;

use alloc::vec;
use alloc::vec::Vec;

/// A byte-addressable non-volatile store with limited write endurance.
///
/// The core never assumes a particular store size: every persistence
/// operation is expressed as byte offsets relative to a caller-supplied
/// base offset, and checked against [`Store::len`] once at startup.
pub trait Store {
    /// Error type of the underlying memory.
    type Error: fmt::Debug;

    /// Returns the store size in bytes.
    fn len(&self) -> usize;

    /// Reads the byte at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying memory cannot be read.
    fn read_byte(&mut self, offset: usize) -> Result<u8, Self::Error>;

    /// Writes `value` at `offset` unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying memory cannot be written.
    fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), Self::Error>;

    /// Writes `value` at `offset` only if the stored byte differs.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying memory cannot be read or written.
    fn update_byte(&mut self, offset: usize, value: u8) -> Result<(), Self::Error> {
        if self.read_byte(offset)? != value {
            self.write_byte(offset, value)?;
        }
        Ok(())
    }

    /// Checks whether the store has no bytes at all.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying memory cannot be read.
    fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(offset + i)?;
        }
        Ok(())
    }

    /// Updates the bytes starting at `offset`, skipping those already
    /// holding the desired value.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying memory cannot be read or written.
    fn update_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Self::Error> {
        for (i, byte) in bytes.iter().enumerate() {
            self.update_byte(offset + i, *byte)?;
        }
        Ok(())
    }

    /// Sets `len` bytes starting at `offset` to `value`, skipping those
    /// already holding it.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying memory cannot be read or written.
    fn fill(&mut self, offset: usize, len: usize, value: u8) -> Result<(), Self::Error> {
        for i in 0..len {
            self.update_byte(offset + i, value)?;
        }
        Ok(())
    }
}

/// An access outside the bounds of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRange {
    /// The requested offset.
    pub offset: usize,
    /// The store size.
    pub len: usize,
}

impl fmt::Display for OutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "offset {} is outside a store of {} bytes",
            self.offset, self.len
        )
    }
}

/// A volatile [`Store`] kept in memory.
///
/// It counts the physical writes it receives, which makes it suitable to
/// verify write-minimization and to simulate restarts by reusing the same
/// bytes with fresh subsystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStore {
    bytes: Vec<u8>,
    writes: usize,
}

impl MemoryStore {
    /// Creates a [`MemoryStore`] of `len` bytes, all set to `0xFF` as an
    /// erased `EEPROM`.
    #[must_use]
    pub fn erased(len: usize) -> Self {
        Self::with_bytes(vec![0xFF; len])
    }

    /// Creates a [`MemoryStore`] of `len` bytes, all set to zero.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::with_bytes(vec![0; len])
    }

    /// Creates a [`MemoryStore`] holding the given bytes.
    #[must_use]
    pub const fn with_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes, writes: 0 }
    }

    /// Returns the stored bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the number of physical byte writes received so far.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.writes
    }

    /// Consumes the [`MemoryStore`] and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn check(&self, offset: usize) -> Result<(), OutOfRange> {
        if offset < self.bytes.len() {
            Ok(())
        } else {
            Err(OutOfRange {
                offset,
                len: self.bytes.len(),
            })
        }
    }
}

impl Store for MemoryStore {
    type Error = OutOfRange;

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read_byte(&mut self, offset: usize) -> Result<u8, Self::Error> {
        self.check(offset)?;
        Ok(self.bytes[offset])
    }

    fn write_byte(&mut self, offset: usize, value: u8) -> Result<(), Self::Error> {
        self.check(offset)?;
        self.bytes[offset] = value;
        self.writes += 1;
        Ok(())
    }
}
