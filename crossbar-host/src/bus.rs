use std::sync::{Arc, Mutex};
use log::{debug, info};

use crossbar_core::{BusDevice, LineId, RegionDescriptor, RegionMap};
use crossbar_io::{MemoryAttribute, SharedRegion};

/// The one interrupt line every advertised device shares; demultiplexing by
/// doorbell probing is the whole point of the connector.
const SHARED_LINE: LineId = 0;

/// Bus scan stops after this many absent device slots.
const MAX_BUS_SLOTS: u32 = 64;

fn region_name(prefix: &str, device: u32, region: u32) -> String {
    format!("/{}.d{}.r{}", prefix, device, region)
}

/// One device advertised on the shared-memory bus.
///
/// The advertisement convention mirrors a bus id match: a device exists at
/// slot N iff the object `<prefix>.dN.r0` exists, and its regions are the
/// contiguous run `<prefix>.dN.r0..rK`. Reserving the resource set opens and
/// holds every region object; mapping hands individual windows out.
pub struct ShmBusDevice {
    prefix: String,
    slot: u32,
    regions: Mutex<Vec<SharedRegion>>,
}

impl ShmBusDevice {
    fn new(prefix: &str, slot: u32) -> Self {
        Self {
            prefix: prefix.to_string(),
            slot,
            regions: Mutex::new(Vec::new()),
        }
    }
}

impl BusDevice for ShmBusDevice {
    fn label(&self) -> String {
        format!("{}.d{}", self.prefix, self.slot)
    }

    fn line(&self) -> LineId {
        SHARED_LINE
    }

    fn enable(&self) -> std::io::Result<()> {
        // No power management on a shm bus; enabling just revalidates the
        // advertisement.
        SharedRegion::open(&region_name(&self.prefix, self.slot, 0)).map(|_| ())
    }

    fn disable(&self) {
        debug!("{} disabled", self.label());
    }

    fn reserve_regions(&self) -> std::io::Result<()> {
        let mut held = self.regions.lock().unwrap();
        held.clear();
        for index in 0..u32::MAX {
            match SharedRegion::open(&region_name(&self.prefix, self.slot, index)) {
                Ok(region) => held.push(region),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
                Err(e) => {
                    held.clear();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn release_regions(&self) {
        self.regions.lock().unwrap().clear();
    }

    fn region_descriptor(&self, index: u32) -> Option<RegionDescriptor> {
        let held = self.regions.lock().unwrap();
        let region = held.get(index as usize)?;
        Some(RegionDescriptor {
            index,
            // A shm object has no bus address; the fd stands in for it.
            base: region.as_raw_fd() as u64,
            size: region.len(),
        })
    }

    fn map_region(
        &self,
        desc: &RegionDescriptor,
        attr: MemoryAttribute,
    ) -> std::io::Result<Box<dyn RegionMap>> {
        let held = self.regions.lock().unwrap();
        let region = held.get(desc.index as usize).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("region {} not reserved", desc.index),
            )
        })?;
        let mapping = region
            .map(attr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(Box::new(mapping))
    }
}

/// Walks the advertised device slots under `prefix`.
///
/// The scan stops at the first absent slot, the same contiguous-run
/// convention the per-device region walk uses.
pub fn scan(prefix: &str) -> Vec<Arc<ShmBusDevice>> {
    let mut found = Vec::new();
    for slot in 0..MAX_BUS_SLOTS {
        if SharedRegion::open(&region_name(prefix, slot, 0)).is_err() {
            break;
        }
        debug!("Bus scan: {}.d{} advertised", prefix, slot);
        found.push(Arc::new(ShmBusDevice::new(prefix, slot)));
    }
    info!("Bus scan: {} device(s) under prefix '{}'", found.len(), prefix);
    found
}
