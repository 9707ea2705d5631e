use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use log::debug;

use crossbar_io::EventGate;

use crate::bus::{BusDevice, LineId};
use crate::region::Region;

/// Opaque, monotonically assigned device identifier. Never reused, even
/// after the device's registry slot is reclaimed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Probing,
    Active,
    Failed,
    Removing,
    Released,
}

/// Everything the registry holds for one published device.
pub(crate) struct DeviceRecord {
    pub(crate) id: DeviceId,
    pub(crate) name: String,
    pub(crate) line: LineId,
    pub(crate) bus: Arc<dyn BusDevice>,
    pub(crate) gate: Arc<EventGate>,
    /// Acquired regions in index order. Drained highest-index-first on
    /// remove; client views keep individual mappings alive past that.
    pub(crate) regions: Mutex<Vec<Arc<Region>>>,
    state: Mutex<DeviceState>,
}

impl DeviceRecord {
    pub(crate) fn new(
        id: DeviceId,
        name: String,
        line: LineId,
        bus: Arc<dyn BusDevice>,
        gate: Arc<EventGate>,
        regions: Vec<Arc<Region>>,
    ) -> Self {
        Self {
            id,
            name,
            line,
            bus,
            gate,
            regions: Mutex::new(regions),
            state: Mutex::new(DeviceState::Probing),
        }
    }

    pub(crate) fn set_state(&self, next: DeviceState) {
        let mut state = self.state.lock().unwrap();
        debug!("{}: {:?} -> {:?}", self.id, *state, next);
        *state = next;
    }

    /// Atomically transitions `from` -> `to`, reporting the old state on a
    /// mismatch. Serializes remove against a concurrent remove of the same
    /// device.
    pub(crate) fn transition(&self, from: DeviceState, to: DeviceState) -> Result<(), DeviceState> {
        let mut state = self.state.lock().unwrap();
        if *state != from {
            return Err(*state);
        }
        debug!("{}: {:?} -> {:?}", self.id, from, to);
        *state = to;
        Ok(())
    }

    pub(crate) fn region(&self, index: u32) -> Option<Arc<Region>> {
        self.regions.lock().unwrap().get(index as usize).map(Arc::clone)
    }

    pub(crate) fn region_count(&self) -> usize {
        self.regions.lock().unwrap().len()
    }
}

/// A capacity slot held between the pre-hardware check and publication.
///
/// Dropping an unpublished reservation returns the slot, so every probe
/// failure path reclaims capacity without bookkeeping at the call site.
pub(crate) struct SlotReservation<'a> {
    registry: &'a Registry,
    id: DeviceId,
    published: bool,
}

impl SlotReservation<'_> {
    pub(crate) fn id(&self) -> DeviceId {
        self.id
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.registry.free_slots.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Capacity-bounded concurrent device table.
///
/// Slot accounting is a single atomic counter mutated before any hardware
/// resource is touched; a rejected reservation leaves no trace. Slots are
/// reclaimed when a device is removed, ids are not.
pub(crate) struct Registry {
    devices: RwLock<HashMap<DeviceId, Arc<DeviceRecord>>>,
    free_slots: AtomicUsize,
    capacity: usize,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            free_slots: AtomicUsize::new(capacity),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    /// Claims one slot and an id, or reports the table full.
    pub(crate) fn try_reserve(&self) -> Option<SlotReservation<'_>> {
        let mut free = self.free_slots.load(Ordering::Acquire);
        loop {
            if free == 0 {
                return None;
            }
            match self.free_slots.compare_exchange_weak(
                free,
                free - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => free = observed,
            }
        }
        let id = DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        Some(SlotReservation {
            registry: self,
            id,
            published: false,
        })
    }

    /// Publishes a fully-acquired device under its reserved slot.
    pub(crate) fn publish(&self, mut reservation: SlotReservation<'_>, record: Arc<DeviceRecord>) {
        debug_assert_eq!(reservation.id, record.id);
        reservation.published = true;
        self.devices.write().unwrap().insert(record.id, record);
    }

    pub(crate) fn get(&self, id: DeviceId) -> Option<Arc<DeviceRecord>> {
        self.devices.read().unwrap().get(&id).map(Arc::clone)
    }

    /// Drops external exposure of `id` and reclaims its slot.
    pub(crate) fn remove(&self, id: DeviceId) -> Option<Arc<DeviceRecord>> {
        let removed = self.devices.write().unwrap().remove(&id);
        if removed.is_some() {
            self.free_slots.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    pub(crate) fn ids(&self) -> Vec<DeviceId> {
        self.devices.read().unwrap().keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
pub(crate) fn test_id(raw: u64) -> DeviceId {
    DeviceId(raw)
}
