use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use crossbeam_utils::CachePadded;
use log::debug;

use crossbar_io::{Doorbell, EventGate};

use crate::bus::LineId;
use crate::registry::DeviceId;

/// Outcome of one dispatch pass over a shared line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineStatus {
    /// This many registered devices had a pending doorbell; each was cleared
    /// and its gate signaled.
    Handled(usize),
    /// No registered device owned the interrupt.
    NotMine,
}

struct LineEntry {
    id: DeviceId,
    doorbell: Doorbell,
    gate: Arc<EventGate>,
}

/// One shared interrupt line and the devices engaged on it.
///
/// Dispatch demultiplexes by ownership probing: a device whose doorbell word
/// is zero did not raise the line; a nonzero word is claimed (cleared) and
/// the device's gate signaled. The pass takes the entry list under a read
/// lock, allocates nothing, and never touches capacity management, so it is
/// safe from the host's restricted event-dispatch context and may run
/// concurrently with probe/remove of other devices.
pub(crate) struct SharedLine {
    entries: RwLock<Vec<LineEntry>>,
    handled: CachePadded<AtomicU64>,
    spurious: CachePadded<AtomicU64>,
}

impl SharedLine {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            handled: CachePadded::new(AtomicU64::new(0)),
            spurious: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// One interrupt's worth of demultiplexing.
    pub(crate) fn dispatch(&self) -> LineStatus {
        let entries = self.entries.read().unwrap();
        let mut claimed = 0;
        for entry in entries.iter() {
            if entry.doorbell.poll_and_clear() {
                entry.gate.signal();
                claimed += 1;
            }
        }
        if claimed == 0 {
            self.spurious.fetch_add(1, Ordering::Relaxed);
            LineStatus::NotMine
        } else {
            self.handled.fetch_add(claimed as u64, Ordering::Relaxed);
            LineStatus::Handled(claimed)
        }
    }

    pub(crate) fn engage(&self, id: DeviceId, doorbell: Doorbell, gate: Arc<EventGate>) {
        debug!("Line entry engaged for {}", id);
        self.entries.write().unwrap().push(LineEntry { id, doorbell, gate });
    }

    /// Removes the device's entry. After this returns, no dispatch pass can
    /// signal the device or touch its doorbell word again.
    pub(crate) fn disengage(&self, id: DeviceId) -> bool {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if removed {
            debug!("Line entry disengaged for {}", id);
        }
        removed
    }

    pub(crate) fn handled_total(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub(crate) fn spurious_total(&self) -> u64 {
        self.spurious.load(Ordering::Relaxed)
    }
}

/// Lazily-populated map of shared lines.
pub(crate) struct LineTable {
    lines: RwLock<HashMap<LineId, Arc<SharedLine>>>,
}

impl LineTable {
    pub(crate) fn new() -> Self {
        Self {
            lines: RwLock::new(HashMap::new()),
        }
    }

    /// The line for `id`, created on first use.
    pub(crate) fn line(&self, id: LineId) -> Arc<SharedLine> {
        if let Some(line) = self.lines.read().unwrap().get(&id) {
            return Arc::clone(line);
        }
        let mut lines = self.lines.write().unwrap();
        Arc::clone(lines.entry(id).or_insert_with(|| Arc::new(SharedLine::new())))
    }

    pub(crate) fn get(&self, id: LineId) -> Option<Arc<SharedLine>> {
        self.lines.read().unwrap().get(&id).map(Arc::clone)
    }

    pub(crate) fn ids(&self) -> Vec<LineId> {
        self.lines.read().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bell(backing: &mut [u8]) -> Doorbell {
        Doorbell::new(backing.as_mut_ptr(), backing.len(), 0).unwrap()
    }

    #[test]
    fn test_only_the_raising_device_is_handled() {
        let line = SharedLine::new();
        let mut mem_a = [0u8; 16];
        let mut mem_b = [0u8; 16];
        let ring_b = bell(&mut mem_b);
        line.engage(
            crate::registry::test_id(1),
            bell(&mut mem_a),
            Arc::new(EventGate::new()),
        );
        let gate_b = Arc::new(EventGate::new());
        line.engage(crate::registry::test_id(2), bell(&mut mem_b), Arc::clone(&gate_b));

        ring_b.ring();
        assert_eq!(line.dispatch(), LineStatus::Handled(1));
        assert_eq!(gate_b.delivered(), 1);
        assert_eq!(line.handled_total(), 1);
        // B's word was claimed; a second pass owns nothing.
        assert_eq!(line.dispatch(), LineStatus::NotMine);
        assert_eq!(line.spurious_total(), 1);
    }

    #[test]
    fn test_disengaged_device_is_never_signaled() {
        let line = SharedLine::new();
        let mut mem = [0u8; 16];
        let ring = bell(&mut mem);
        let gate = Arc::new(EventGate::new());
        let id = crate::registry::test_id(7);
        line.engage(id, bell(&mut mem), Arc::clone(&gate));
        assert!(line.disengage(id));

        ring.ring();
        assert_eq!(line.dispatch(), LineStatus::NotMine);
        assert_eq!(gate.delivered(), 0);
        // The word stays set: nobody claimed it.
        assert_eq!(ring.peek(), 1);
    }
}
