use log::{debug, warn};

use crossbar_io::MemoryAttribute;

use crate::bus::BusDevice;
use crate::error::ProbeError;
use crate::region::{Region, RegionRole};
use crate::ConnectorConfig;

/// Accumulates regions in acquisition order and rolls them back in reverse
/// on any failure path.
///
/// Every early return between the first successful map and `commit` releases
/// the acquired set highest-index-first automatically; there is no manual
/// unwind path to keep in sync.
pub(crate) struct RegionSetBuilder {
    regions: Vec<Region>,
    committed: bool,
}

impl RegionSetBuilder {
    pub(crate) fn new() -> Self {
        Self {
            regions: Vec::new(),
            committed: false,
        }
    }

    pub(crate) fn push(&mut self, region: Region) {
        self.regions.push(region);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// The control region. Only valid once at least one region was pushed.
    pub(crate) fn control(&self) -> &Region {
        &self.regions[0]
    }

    /// Hands the acquired set over; rollback is disarmed.
    pub(crate) fn commit(mut self) -> Vec<Region> {
        self.committed = true;
        std::mem::take(&mut self.regions)
    }
}

impl Drop for RegionSetBuilder {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(region) = self.regions.pop() {
            debug!("Rolling back region {}", region.index());
            drop(region);
        }
    }
}

/// Walks the device's advertised regions starting at index 0.
///
/// The first absent index is the only termination condition and permanently
/// fixes the device's region count; gaps mid-sequence are not tolerated.
/// Index 0 maps register-style as the control region, everything after it as
/// payload with the configured attribute.
///
/// # Errors
/// `MappingFailed(0)` if the device advertises no region at all;
/// `MappingFailed(i)` if a map fails after the walk began, in which case the
/// regions already acquired are released in reverse before returning.
pub(crate) fn enumerate_regions(
    dev: &dyn BusDevice,
    cfg: &ConnectorConfig,
) -> Result<RegionSetBuilder, ProbeError> {
    let mut builder = RegionSetBuilder::new();

    for index in 0..cfg.max_regions {
        let Some(desc) = dev.region_descriptor(index) else {
            // First absent index ends the walk for good.
            break;
        };

        let (role, attr) = if index == 0 {
            (RegionRole::Control, MemoryAttribute::Physical)
        } else {
            (RegionRole::Payload, cfg.payload_attr)
        };

        let map = dev.map_region(&desc, attr).map_err(|source| {
            warn!(
                "{}: mapping region {} ({} bytes) failed: {}",
                dev.label(),
                index,
                desc.size,
                source
            );
            ProbeError::MappingFailed { index, source }
        })?;

        debug!(
            "{}: region {} mapped ({} bytes, {:?}, {:?})",
            dev.label(),
            index,
            desc.size,
            role,
            attr
        );
        builder.push(Region::new(index, role, attr, desc.base, map));
    }

    if builder.is_empty() {
        // A device with no region 0 has no control window and no doorbell.
        return Err(ProbeError::MappingFailed {
            index: 0,
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "device advertises no regions",
            ),
        });
    }

    Ok(builder)
}
