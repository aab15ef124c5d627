//! Battery Slot Store
//!
//! One slot per battery, each behind its own mutex. The map of slots is only
//! locked for lookup, insertion and removal, so readings for different
//! batteries never wait on each other:
//!
//! ```text
//! RwLock<HashMap>          (held for lookup only)
//!   ├── "pack-1" → Arc<Mutex<BatterySlot>>   ← thread 1
//!   ├── "pack-2" → Arc<Mutex<BatterySlot>>   ← thread 2
//!   └── "pack-3" → Arc<Mutex<BatterySlot>>
//! ```
//!
//! Lock order is always slot then map, and the map lock is never held while
//! waiting for a slot.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use crate::{
    config::BatteryProfile,
    harness::EvalHistory,
    pipeline::BatteryPipeline,
    reading::BatteryId,
    state::{BatterySnapshot, BatteryState},
    time::Timestamp,
};

/// Everything held for one battery
#[derive(Debug)]
pub struct BatterySlot {
    /// Battery this slot belongs to
    pub battery_id: BatteryId,
    /// Profile in effect
    pub profile: BatteryProfile,
    /// Estimators built from `profile`
    pub pipeline: BatteryPipeline,
    /// Estimation state, created by the first accepted reading
    pub state: Option<BatteryState>,
    /// Scorecard history
    pub history: EvalHistory,
    /// Timestamp of the last well-formed reading routed here, accepted or not
    pub last_seen: Option<Timestamp>,
    /// Set once the slot was removed from its store
    pub evicted: bool,
}

impl BatterySlot {
    /// Empty slot, no reading accepted yet
    pub fn new(
        battery_id: BatteryId,
        profile: BatteryProfile,
        pipeline: BatteryPipeline,
        history: EvalHistory,
    ) -> Self {
        Self {
            battery_id,
            profile,
            pipeline,
            state: None,
            history,
            last_seen: None,
            evicted: false,
        }
    }

    /// Latest reading time known for this battery
    ///
    /// Falls back to `last_seen` for batteries that never got state, such as
    /// ones halted by a bad capacity.
    pub fn last_activity(&self) -> Option<Timestamp> {
        self.state
            .as_ref()
            .map(|state| state.last_timestamp)
            .or(self.last_seen)
    }

    /// Copy for inspection
    pub fn snapshot(&self) -> BatterySnapshot {
        BatterySnapshot {
            battery_id: self.battery_id.clone(),
            profile: self.profile.clone(),
            state: self.state.clone(),
            history_len: self.history.len(),
        }
    }
}

/// Slot shared between the store and ingesting threads
pub type SharedSlot = Arc<Mutex<BatterySlot>>;

/// Lock a slot, recovering from a panicked holder
///
/// Pipeline steps commit atomically, so a poisoned slot still holds
/// consistent state.
pub fn lock_slot(slot: &SharedSlot) -> MutexGuard<'_, BatterySlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Storage for battery slots
pub trait StateStore: Send + Sync {
    /// Slot for a battery, if present
    fn get(&self, battery_id: &BatteryId) -> Option<SharedSlot>;

    /// Slot for a battery, creating it with `make` when absent
    fn get_or_insert_with(
        &self,
        battery_id: &BatteryId,
        make: &dyn Fn() -> BatterySlot,
    ) -> SharedSlot;

    /// Remove a battery's slot
    fn remove(&self, battery_id: &BatteryId) -> Option<SharedSlot>;

    /// Ids of all stored batteries, sorted
    fn battery_ids(&self) -> Vec<BatteryId>;

    /// Number of stored batteries
    fn len(&self) -> usize;

    /// Check if nothing is stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    slots: RwLock<HashMap<BatteryId, SharedSlot>>,
}

impl InMemoryStore {
    /// Create empty
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStore {
    fn get(&self, battery_id: &BatteryId) -> Option<SharedSlot> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(battery_id).cloned()
    }

    fn get_or_insert_with(
        &self,
        battery_id: &BatteryId,
        make: &dyn Fn() -> BatterySlot,
    ) -> SharedSlot {
        if let Some(slot) = self.get(battery_id) {
            return slot;
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(battery_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(make())))
            .clone()
    }

    fn remove(&self, battery_id: &BatteryId) -> Option<SharedSlot> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(battery_id)
    }

    fn battery_ids(&self) -> Vec<BatteryId> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<BatteryId> = slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
