use core::fmt;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::ConfigField;
use crate::error::{Corruption, Error, Result};
use crate::machine::{Event, StateId};
use crate::sensor::Temperature;
use crate::store::Store;
use crate::timestamp::{Clock, Timestamp, TimestampGenerator};

/// Size in bytes of a serialized [`LogEntry`].
pub const SLOT_LEN: usize = 13;

/// Size in bytes of the opaque payload of a [`LogEntry`].
pub const PAYLOAD_LEN: usize = 8;

// Timestamp, then type discriminator, then payload.
const KIND_OFFSET: usize = 4;
const PAYLOAD_OFFSET: usize = 5;

// Stored slot count, then persisted last-notified index.
const HEADER_LEN: usize = 4;
const NOTIFIED_OFFSET: usize = 2;

/// Returns the size in bytes of a log region of `slots` slots.
#[must_use]
pub const fn region_len(slots: u16) -> usize {
    HEADER_LEN + slots as usize * SLOT_LEN
}

/// The typed content of a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "kebab-case")]
pub enum LogData {
    /// Bootstrap record written whenever the log is cleared.
    Created {
        /// Configured slot count.
        slots: u16,
    },
    /// The configured slot count differs from the stored one, so the log
    /// has been cleared.
    CapacityChanged {
        /// Stored slot count.
        previous: u16,
        /// Configured slot count.
        current: u16,
    },
    /// A state transition.
    StateChange {
        /// Leaf state before the transition.
        from: StateId,
        /// Leaf state after the transition.
        to: StateId,
        /// Event that fired the transition.
        event: Event,
    },
    /// An event not handled by the current state.
    IllegalTransition {
        /// Leaf state receiving the event.
        state: StateId,
        /// Unhandled event.
        event: Event,
    },
    /// Temperatures recorded while logging is enabled.
    Temperatures {
        /// Tank temperature.
        primary: Temperature,
        /// Inlet temperature.
        secondary: Temperature,
        /// Whether the heater was on.
        heater_on: bool,
    },
    /// An operator changed a configuration field.
    ConfigChanged {
        /// Changed field.
        field: ConfigField,
        /// New value, temperatures in hundredths of a degree.
        value: i32,
    },
    /// The heater has been turned off.
    HeatingStopped {
        /// Duration of the heating period, in seconds.
        elapsed_secs: u32,
        /// Heating seconds accumulated since startup.
        total_secs: u32,
    },
    /// A record whose type is unknown to this firmware.
    Unknown {
        /// Type discriminator.
        kind: u8,
        /// Raw payload.
        payload: [u8; PAYLOAD_LEN],
    },
}

impl LogData {
    /// Returns the type discriminator.
    #[must_use]
    pub const fn kind(&self) -> u8 {
        match self {
            Self::Created { .. } => 1,
            Self::CapacityChanged { .. } => 2,
            Self::StateChange { .. } => 3,
            Self::IllegalTransition { .. } => 4,
            Self::Temperatures { .. } => 5,
            Self::ConfigChanged { .. } => 6,
            Self::HeatingStopped { .. } => 7,
            Self::Unknown { kind, .. } => *kind,
        }
    }

    fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut payload = [0; PAYLOAD_LEN];
        match *self {
            Self::Created { slots } => payload[..2].copy_from_slice(&slots.to_le_bytes()),
            Self::CapacityChanged { previous, current } => {
                payload[..2].copy_from_slice(&previous.to_le_bytes());
                payload[2..4].copy_from_slice(&current.to_le_bytes());
            }
            Self::StateChange { from, to, event } => {
                payload[0] = from.code();
                payload[1] = to.code();
                payload[2] = event.code();
            }
            Self::IllegalTransition { state, event } => {
                payload[0] = state.code();
                payload[1] = event.code();
            }
            Self::Temperatures {
                primary,
                secondary,
                heater_on,
            } => {
                payload[..2].copy_from_slice(&primary.centi().to_le_bytes());
                payload[2..4].copy_from_slice(&secondary.centi().to_le_bytes());
                payload[4] = u8::from(heater_on);
            }
            Self::ConfigChanged { field, value } => {
                payload[0] = field.code();
                payload[1..5].copy_from_slice(&value.to_le_bytes());
            }
            Self::HeatingStopped {
                elapsed_secs,
                total_secs,
            } => {
                payload[..4].copy_from_slice(&elapsed_secs.to_le_bytes());
                payload[4..].copy_from_slice(&total_secs.to_le_bytes());
            }
            Self::Unknown { payload: raw, .. } => payload = raw,
        }
        payload
    }

    fn decode(kind: u8, payload: [u8; PAYLOAD_LEN]) -> Self {
        let u16_at = |i: usize| u16::from_le_bytes([payload[i], payload[i + 1]]);
        let i16_at = |i: usize| i16::from_le_bytes([payload[i], payload[i + 1]]);
        let u32_at = |i: usize| {
            u32::from_le_bytes([payload[i], payload[i + 1], payload[i + 2], payload[i + 3]])
        };

        let data = match kind {
            1 => Some(Self::Created { slots: u16_at(0) }),
            2 => Some(Self::CapacityChanged {
                previous: u16_at(0),
                current: u16_at(2),
            }),
            3 => StateId::from_code(payload[0]).and_then(|from| {
                Some(Self::StateChange {
                    from,
                    to: StateId::from_code(payload[1])?,
                    event: Event::from_code(payload[2])?,
                })
            }),
            4 => StateId::from_code(payload[0]).and_then(|state| {
                Some(Self::IllegalTransition {
                    state,
                    event: Event::from_code(payload[1])?,
                })
            }),
            5 => Some(Self::Temperatures {
                primary: Temperature::from_centi(i16_at(0)),
                secondary: Temperature::from_centi(i16_at(2)),
                heater_on: payload[4] != 0,
            }),
            6 => ConfigField::from_code(payload[0]).map(|field| Self::ConfigChanged {
                field,
                value: u32_at(1).cast_signed(),
            }),
            7 => Some(Self::HeatingStopped {
                elapsed_secs: u32_at(0),
                total_secs: u32_at(4),
            }),
            _ => None,
        };

        data.unwrap_or(Self::Unknown { kind, payload })
    }
}

impl fmt::Display for LogData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { slots } => write!(f, "log created with {slots} slots"),
            Self::CapacityChanged { previous, current } => {
                write!(f, "log capacity changed from {previous} to {current} slots")
            }
            Self::StateChange { from, to, event } => write!(f, "{from} -> {to} on {event}"),
            Self::IllegalTransition { state, event } => {
                write!(f, "illegal event {event} in {state}")
            }
            Self::Temperatures {
                primary,
                secondary,
                heater_on,
            } => write!(
                f,
                "tank {primary} °C, inlet {secondary} °C, heater {}",
                if *heater_on { "on" } else { "off" }
            ),
            Self::ConfigChanged { field, value } => {
                write!(f, "{field} set to {}", field.format_value(*value))
            }
            Self::HeatingStopped {
                elapsed_secs,
                total_secs,
            } => write!(f, "heated for {elapsed_secs} s, {total_secs} s in total"),
            Self::Unknown { kind, .. } => write!(f, "unknown record of type {kind}"),
        }
    }
}

/// A timestamped log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct LogEntry {
    /// Record timestamp.
    pub timestamp: Timestamp,
    /// Record content.
    pub data: LogData,
}

impl LogEntry {
    /// Serializes the entry into its slot layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SLOT_LEN] {
        let mut bytes = [0; SLOT_LEN];
        bytes[..KIND_OFFSET].copy_from_slice(&self.timestamp.raw().to_le_bytes());
        bytes[KIND_OFFSET] = self.data.kind();
        bytes[PAYLOAD_OFFSET..].copy_from_slice(&self.data.encode());
        bytes
    }

    /// Deserializes an entry from its slot layout.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; SLOT_LEN]) -> Self {
        let mut payload = [0; PAYLOAD_LEN];
        payload.copy_from_slice(&bytes[PAYLOAD_OFFSET..]);

        Self {
            timestamp: Timestamp::from_raw(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            data: LogData::decode(bytes[KIND_OFFSET], payload),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp, self.data)
    }
}

/// A crash-recoverable ring-buffer log kept directly on a [`Store`].
///
/// The region starts at a caller-supplied base offset and holds the stored
/// slot count, the persisted last-notified index and the slot array. The
/// slot at the write head always holds a zero timestamp, so one slot is
/// never usable and the log keeps at most `slots - 1` entries. When the log
/// is full, every append evicts the oldest entry.
///
/// The log owns the [`TimestampGenerator`] that stamps its entries, and
/// reseeds it from the most recent entry on [`RingLog::init`].
#[derive(Debug)]
pub struct RingLog<C> {
    base: usize,
    slots: u16,
    head: u16,
    tail: u16,
    last_notified: u16,
    generator: TimestampGenerator<C>,
}

impl<C: Clock> RingLog<C> {
    /// Creates a [`RingLog`] of `slots` slots whose region starts at `base`.
    ///
    /// At least two slots are always used. The log must be initialized with
    /// [`RingLog::init`] before use.
    #[must_use]
    pub fn new(base: usize, slots: u16, generator: TimestampGenerator<C>) -> Self {
        let slots = slots.max(2);
        Self {
            base,
            slots,
            head: 0,
            tail: 0,
            last_notified: slots - 1,
            generator,
        }
    }

    /// Returns the configured slot count.
    #[must_use]
    pub const fn slots(&self) -> u16 {
        self.slots
    }

    /// Returns the maximum number of entries the log can hold.
    #[must_use]
    pub const fn capacity(&self) -> u16 {
        self.slots - 1
    }

    /// Returns the index of the next slot to be written.
    #[must_use]
    pub const fn head(&self) -> u16 {
        self.head
    }

    /// Returns the index of the oldest surviving entry.
    #[must_use]
    pub const fn tail(&self) -> u16 {
        self.tail
    }

    /// Returns the index of the last entry delivered by
    /// [`RingLog::unnotified`].
    #[must_use]
    pub const fn last_notified(&self) -> u16 {
        self.last_notified
    }

    /// Returns the number of entries currently held.
    #[must_use]
    pub const fn count(&self) -> u16 {
        self.distance(self.tail, self.head)
    }

    /// Returns the adjusted seconds of the timestamp generator.
    #[must_use]
    pub fn now_secs(&self) -> u32 {
        self.generator.now_secs()
    }

    /// Returns the timestamp generator.
    #[must_use]
    pub const fn generator(&self) -> &TimestampGenerator<C> {
        &self.generator
    }

    /// Returns the timestamp generator mutably.
    #[must_use]
    pub const fn generator_mut(&mut self) -> &mut TimestampGenerator<C> {
        &mut self.generator
    }

    /// Issues a timestamp without appending any entry.
    ///
    /// # Blocking
    ///
    /// May block up to one second, see [`TimestampGenerator::timestamp`].
    pub fn timestamp(&mut self) -> Timestamp {
        self.generator.timestamp()
    }

    /// Recovers the log state after a restart.
    ///
    /// When the stored slot count differs from the configured one, the log
    /// is cleared and a [`LogData::CapacityChanged`] record is appended.
    /// Otherwise the write head is the first slot with a zero timestamp and
    /// the tail is the first non-empty slot following it. The timestamp
    /// generator is then adjusted past the most recent entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] when no head, no tail or no most recent
    /// timestamp can be found. This is fatal: the store must be erased.
    pub fn init<S: Store>(&mut self, store: &mut S) -> Result<(), S::Error> {
        let stored = read_u16(store, self.base)?;
        if stored != self.slots {
            info!(
                "Log capacity changed from {stored} to {} slots, clearing the log",
                self.slots
            );
            self.clear(store)?;
            let _ = self.append(
                store,
                LogData::CapacityChanged {
                    previous: stored,
                    current: self.slots,
                },
            )?;
            return Ok(());
        }

        let mut head = None;
        for slot in 0..self.slots {
            if self.read_timestamp(store, slot)?.is_zero() {
                head = Some(slot);
                break;
            }
        }
        let Some(head) = head else {
            return Err(corrupted(Corruption::NoHead));
        };

        let mut tail = None;
        let mut slot = self.next(head);
        while slot != head {
            if !self.read_timestamp(store, slot)?.is_zero() {
                tail = Some(slot);
                break;
            }
            slot = self.next(slot);
        }
        let Some(tail) = tail else {
            return Err(corrupted(Corruption::NoTail));
        };

        let newest = self.previous(head);
        let most_recent = self.read_timestamp(store, newest)?;
        if most_recent.is_zero() {
            return Err(corrupted(Corruption::ZeroTimestamp { slot: newest }));
        }

        self.head = head;
        self.tail = tail;
        self.generator.adjust(most_recent);

        let last_notified = read_u16(store, self.base + NOTIFIED_OFFSET)?;
        self.last_notified = if last_notified < self.slots {
            last_notified
        } else {
            self.slots - 1
        };

        debug!(
            "Log recovered with head {head}, tail {tail}, most recent {most_recent}, time base {}",
            self.generator.base()
        );

        Ok(())
    }

    /// Erases every entry and appends a [`LogData::Created`] record.
    ///
    /// The stored slot count is invalidated first and written last, so an
    /// interrupted clear is detected as a capacity change on the next
    /// [`RingLog::init`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn clear<S: Store>(&mut self, store: &mut S) -> Result<(), S::Error> {
        store.update_bytes(self.base, &0u16.to_le_bytes())?;
        store.fill(self.slot_offset(0), usize::from(self.slots) * SLOT_LEN, 0)?;

        self.head = 0;
        self.tail = 0;
        self.set_last_notified(store, self.slots - 1)?;
        self.generator.reset();

        let _ = self.append(store, LogData::Created { slots: self.slots })?;
        store.update_bytes(self.base, &self.slots.to_le_bytes())?;

        debug!("Log cleared");

        Ok(())
    }

    /// Appends a record stamped with the next timestamp.
    ///
    /// When the log is full, the oldest entry is evicted. When the timestamp
    /// range is exhausted after a time base adjustment, the log is cleared
    /// first so that timestamps keep ascending.
    ///
    /// # Blocking
    ///
    /// May block up to one second, see [`TimestampGenerator::timestamp`].
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn append<S: Store>(&mut self, store: &mut S, data: LogData) -> Result<Timestamp, S::Error> {
        if self.generator.is_exhausted() && self.generator.base() > 0 {
            warn!("Timestamp range exhausted, clearing the log");
            self.clear(store)?;
        }

        let timestamp = self.generator.timestamp();
        let next = self.next(self.head);

        // The slot past the head is emptied before the head is filled.
        store.fill(self.slot_offset(next), SLOT_LEN, 0)?;
        if next == self.tail {
            let evicted = self.tail;
            self.tail = self.next(evicted);
            // The next entry to deliver is gone, deliver from the new tail.
            if self.next(self.last_notified) == evicted {
                self.set_last_notified(store, evicted)?;
            }
        }

        let bytes = LogEntry { timestamp, data }.to_bytes();
        let offset = self.slot_offset(self.head);
        store.update_bytes(offset + KIND_OFFSET, &bytes[KIND_OFFSET..])?;
        store.update_bytes(offset, &bytes[..KIND_OFFSET])?;

        self.head = next;

        Ok(timestamp)
    }

    /// Reads the most recent entries, newest first.
    ///
    /// At most `max` entries are returned, or every entry when `max` is
    /// zero. Reading has no persistent side effect.
    pub fn most_recent<'a, S: Store>(
        &'a self,
        store: &'a mut S,
        max: u16,
    ) -> MostRecent<'a, S, C> {
        let count = self.count();
        let remaining = if max == 0 { count } else { max.min(count) };

        MostRecent {
            log: self,
            store,
            slot: self.head,
            remaining,
        }
    }

    /// Reads the entries not yet delivered, oldest first.
    ///
    /// Each consumed entry is marked as notified on the store, so it is never
    /// delivered again. Entries evicted before being delivered are lost.
    pub fn unnotified<'a, S: Store>(&'a mut self, store: &'a mut S) -> Unnotified<'a, S, C> {
        let next = self.next(self.last_notified);
        let slot = if next == self.head || self.is_live(next) {
            next
        } else {
            self.tail
        };

        Unnotified {
            log: self,
            store,
            slot,
            failed: false,
        }
    }

    const fn next(&self, slot: u16) -> u16 {
        (slot + 1) % self.slots
    }

    const fn previous(&self, slot: u16) -> u16 {
        if slot == 0 { self.slots - 1 } else { slot - 1 }
    }

    // Number of steps forward from `from` to `to`.
    const fn distance(&self, from: u16, to: u16) -> u16 {
        if to >= from {
            to - from
        } else {
            self.slots - from + to
        }
    }

    const fn is_live(&self, slot: u16) -> bool {
        self.distance(self.tail, slot) < self.count()
    }

    const fn slot_offset(&self, slot: u16) -> usize {
        self.base + HEADER_LEN + slot as usize * SLOT_LEN
    }

    fn read_timestamp<S: Store>(&self, store: &mut S, slot: u16) -> Result<Timestamp, S::Error> {
        let mut bytes = [0; KIND_OFFSET];
        store.read_bytes(self.slot_offset(slot), &mut bytes)?;
        Ok(Timestamp::from_raw(u32::from_le_bytes(bytes)))
    }

    fn read_entry<S: Store>(&self, store: &mut S, slot: u16) -> Result<LogEntry, S::Error> {
        let mut bytes = [0; SLOT_LEN];
        store.read_bytes(self.slot_offset(slot), &mut bytes)?;
        Ok(LogEntry::from_bytes(&bytes))
    }

    fn set_last_notified<S: Store>(&mut self, store: &mut S, slot: u16) -> Result<(), S::Error> {
        self.last_notified = slot;
        store.update_bytes(self.base + NOTIFIED_OFFSET, &slot.to_le_bytes())?;
        Ok(())
    }
}

/// Reader over the most recent entries, newest first.
///
/// Created by [`RingLog::most_recent`].
pub struct MostRecent<'a, S, C> {
    log: &'a RingLog<C>,
    store: &'a mut S,
    slot: u16,
    remaining: u16,
}

impl<S: Store, C: Clock> Iterator for MostRecent<'_, S, C> {
    type Item = Result<LogEntry, S::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.slot = self.log.previous(self.slot);

        Some(self.log.read_entry(self.store, self.slot))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::from(self.remaining);
        (remaining, Some(remaining))
    }
}

/// Reader over the entries not yet delivered, oldest first.
///
/// Created by [`RingLog::unnotified`].
pub struct Unnotified<'a, S, C> {
    log: &'a mut RingLog<C>,
    store: &'a mut S,
    slot: u16,
    failed: bool,
}

impl<S: Store, C: Clock> Iterator for Unnotified<'_, S, C> {
    type Item = Result<LogEntry, S::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.slot == self.log.head {
            return None;
        }

        let slot = self.slot;
        let entry = self
            .log
            .read_entry(self.store, slot)
            .and_then(|entry| {
                self.log.set_last_notified(self.store, slot)?;
                Ok(entry)
            });

        self.failed = entry.is_err();
        self.slot = self.log.next(slot);

        Some(entry)
    }
}

fn corrupted<E>(corruption: Corruption) -> Error<E> {
    error!("Log corrupted: {corruption}");
    Error::Corrupted(corruption)
}

fn read_u16<S: Store>(store: &mut S, offset: usize) -> Result<u16, S::Error> {
    let mut bytes = [0; 2];
    store.read_bytes(offset, &mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}
