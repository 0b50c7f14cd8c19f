use crate::config;
use crate::logbook;

/// Number of log slots built into the firmware.
///
/// Changing it clears the log at the next startup.
pub const LOG_SLOTS: u16 = 256;

/// Offset of the first persisted byte.
pub const STORE_BASE: usize = 0;

/// Placement of the persisted regions on the store.
///
/// The configuration region comes first, the log region right after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    base: usize,
    slots: u16,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(STORE_BASE, LOG_SLOTS)
    }
}

impl Layout {
    /// Creates a [`Layout`] starting at `base` with a log of `slots` slots.
    ///
    /// At least two slots are always used.
    #[must_use]
    pub const fn new(base: usize, slots: u16) -> Self {
        let slots = if slots < 2 { 2 } else { slots };
        Self { base, slots }
    }

    /// Returns the offset of the first persisted byte.
    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    /// Returns the number of log slots.
    #[must_use]
    pub const fn slots(&self) -> u16 {
        self.slots
    }

    /// Returns the offset of the configuration region.
    #[must_use]
    pub const fn config_base(&self) -> usize {
        self.base
    }

    /// Returns the offset of the log region.
    #[must_use]
    pub const fn log_base(&self) -> usize {
        self.base + config::REGION_LEN
    }

    /// Returns the total size in bytes of the persisted regions.
    #[must_use]
    pub const fn len(&self) -> usize {
        config::REGION_LEN + logbook::region_len(self.slots)
    }

    /// Returns the offset right after the last persisted byte.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.base + self.len()
    }
}
