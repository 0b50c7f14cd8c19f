use core::fmt;

/// Structural corruption detected while recovering the log.
///
/// Every variant is fatal: the firmware must halt and wait for an operator
/// to erase and reinitialize the persistent store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// No slot with an all-zero timestamp exists, so the write head is lost.
    NoHead,
    /// Every slot is empty, so the oldest surviving entry is lost.
    NoTail,
    /// The most recent entry, located just before the head, is empty.
    ZeroTimestamp {
        /// Index of the slot holding the zero timestamp.
        slot: u16,
    },
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHead => f.write_str("no write head found"),
            Self::NoTail => f.write_str("no surviving entry found"),
            Self::ZeroTimestamp { slot } => {
                write!(f, "most recent entry at slot {slot} has a zero timestamp")
            }
        }
    }
}

/// Errors raised by the persistence-dependent subsystems.
///
/// `E` is the error type of the underlying [`crate::store::Store`].
#[derive(Debug, PartialEq)]
pub enum Error<E> {
    /// The persistent store adapter failed.
    Store(E),
    /// The persisted layout does not fit into the store.
    OutOfBounds {
        /// Number of bytes required by the layout.
        required: usize,
        /// Number of bytes offered by the store.
        available: usize,
    },
    /// The persisted log is structurally corrupted.
    Corrupted(Corruption),
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Error::Store(e)
    }
}

impl<E: fmt::Display> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::OutOfBounds {
                required,
                available,
            } => write!(
                f,
                "layout requires {required} bytes but the store has {available}"
            ),
            Self::Corrupted(corruption) => write!(f, "log corrupted: {corruption}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> core::error::Error for Error<E> {}

/// A specialized [`Result`](core::result::Result) type for persistence
/// operations.
pub type Result<T, E> = core::result::Result<T, Error<E>>;
