//! Ledger slot source
//!
//! Multisig approvals carry a deadline slot. The worker asks a `SlotClock`
//! for the current slot to decide which approvals are still live.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Source of the ledger's current slot
pub trait SlotClock: Send + Sync + std::fmt::Debug {
    fn current_slot(&self) -> u64;
}

/// Slot derived from wall-clock time since a genesis timestamp
#[derive(Debug, Clone)]
pub struct GenesisSlotClock {
    genesis: DateTime<Utc>,
    slot_duration: Duration,
}

impl GenesisSlotClock {
    pub const DEFAULT_SLOT_DURATION: Duration = Duration::from_secs(180);

    pub fn new(genesis: DateTime<Utc>, slot_duration: Duration) -> Self {
        Self {
            genesis,
            slot_duration,
        }
    }

    fn slot_at(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = (now - self.genesis).num_milliseconds().max(0) as u64;
        let slot_ms = self.slot_duration.as_millis().max(1) as u64;
        elapsed / slot_ms
    }
}

impl Default for GenesisSlotClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default(), Self::DEFAULT_SLOT_DURATION)
    }
}

impl SlotClock for GenesisSlotClock {
    fn current_slot(&self) -> u64 {
        self.slot_at(Utc::now())
    }
}

/// Manually driven clock
#[derive(Debug, Default)]
pub struct FixedSlotClock {
    slot: AtomicU64,
}

impl FixedSlotClock {
    pub fn new(slot: u64) -> Self {
        Self {
            slot: AtomicU64::new(slot),
        }
    }

    pub fn set(&self, slot: u64) {
        self.slot.store(slot, Ordering::SeqCst);
    }
}

impl SlotClock for FixedSlotClock {
    fn current_slot(&self) -> u64 {
        self.slot.load(Ordering::SeqCst)
    }
}
