use std::sync::Arc;
use log::{info, warn};

use crossbar_io::{Doorbell, EventGate};

use crate::bus::{BusDevice, LineId};
use crate::enumerate::enumerate_regions;
use crate::error::{ProbeError, RemoveError};
use crate::handle::DeviceHandle;
use crate::line::{LineStatus, LineTable};
use crate::registry::{DeviceId, DeviceRecord, DeviceState, Registry};
use crate::ConnectorConfig;

/// The connector: owns the registry and the shared-line table, and
/// orchestrates the strict acquire/publish/release order for every device.
///
/// Probe and remove of a given device are serialized by the managing caller
/// (the bus scan / shutdown path); dispatch for other devices may run
/// concurrently with either.
pub struct Connector {
    cfg: ConnectorConfig,
    registry: Registry,
    lines: LineTable,
}

impl Connector {
    pub fn new(cfg: ConnectorConfig) -> Self {
        let registry = Registry::new(cfg.capacity);
        Self {
            cfg,
            registry,
            lines: LineTable::new(),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.cfg
    }

    /// Acquires and publishes one advertised device, all or nothing.
    ///
    /// Order: reserve a registry slot (capacity rejection has zero hardware
    /// side effects), enable the device, reserve its resource set, map
    /// regions 0..k in index order, decode the optional name, engage the
    /// doorbell on the device's line, publish. Any failure unwinds in exact
    /// reverse and leaves the registry untouched.
    ///
    /// # Errors
    /// `RegistryFull`, `ResourceUnavailable`, or `MappingFailed` per the
    /// stage that refused; see `ProbeError`.
    pub fn probe(&self, dev: Arc<dyn BusDevice>) -> Result<DeviceId, ProbeError> {
        let label = dev.label();

        // Capacity is checked before the device is touched at all.
        let Some(reservation) = self.registry.try_reserve() else {
            warn!(
                "Rejecting {}: registry at capacity ({})",
                label,
                self.registry.capacity()
            );
            return Err(ProbeError::RegistryFull);
        };
        let id = reservation.id();
        info!("Probing {} as {}", label, id);

        dev.enable().map_err(ProbeError::ResourceUnavailable)?;
        if let Err(source) = dev.reserve_regions() {
            dev.disable();
            return Err(ProbeError::ResourceUnavailable(source));
        }

        // From here on the builder owns rollback of mapped regions.
        let regions = match enumerate_regions(dev.as_ref(), &self.cfg) {
            Ok(regions) => regions,
            Err(e) => {
                dev.release_regions();
                dev.disable();
                return Err(e);
            }
        };

        let control = regions.control();
        let doorbell = match Doorbell::new(control.as_ptr(), control.len(), self.cfg.doorbell_offset)
        {
            Ok(doorbell) => doorbell,
            Err(e) => {
                // Control region too small for the configured doorbell word;
                // the device is unusable. Builder drop unwinds the maps.
                drop(regions);
                dev.release_regions();
                dev.disable();
                return Err(ProbeError::MappingFailed {
                    index: 0,
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
                });
            }
        };

        let name = crate::name::decode_device_name(control, &self.cfg)
            .unwrap_or_else(|| format!("connector-{}", id));

        let regions: Vec<Arc<crate::region::Region>> =
            regions.commit().into_iter().map(Arc::new).collect();
        let region_count = regions.len();
        let line_id = dev.line();
        let gate = Arc::new(EventGate::new());
        let record = Arc::new(DeviceRecord::new(
            id,
            name,
            line_id,
            Arc::clone(&dev),
            Arc::clone(&gate),
            regions,
        ));

        // Arm the event channel before the device becomes visible; a doorbell
        // already rung by the far side is then picked up by the next dispatch.
        self.lines.line(line_id).engage(id, doorbell, gate);
        self.registry.publish(reservation, Arc::clone(&record));
        record.set_state(DeviceState::Active);

        info!(
            "{} active: '{}', {} regions, line {}",
            id,
            record.name,
            region_count,
            line_id
        );
        Ok(id)
    }

    /// Unpublishes and releases one active device.
    ///
    /// Order: disengage the line entry and close the gate (no further
    /// handled signal can target the device, parked waiters unblock with an
    /// error), drop external exposure, release regions highest-index-first,
    /// release the resource set, disable.
    ///
    /// # Errors
    /// `UnknownDevice` for an id that is not registered; `NotActive` when a
    /// remove races another remove of the same device.
    pub fn remove(&self, id: DeviceId) -> Result<(), RemoveError> {
        let record = self
            .registry
            .get(id)
            .ok_or(RemoveError::UnknownDevice(id))?;
        record
            .transition(DeviceState::Active, DeviceState::Removing)
            .map_err(|state| RemoveError::NotActive { id, state })?;
        info!("Removing {} ('{}')", id, record.name);

        // (a) Interrupt association and external exposure go first.
        if let Some(line) = self.lines.get(record.line) {
            line.disengage(id);
        }
        record.gate.close();
        self.registry.remove(id);

        // (b) Regions come down in reverse acquisition order. A client view
        // may keep an individual mapping alive past this; the region is gone
        // from the record either way.
        let mut regions = record.regions.lock().unwrap();
        while let Some(region) = regions.pop() {
            drop(region);
        }
        drop(regions);

        // (c) Hardware resources last, mirroring probe.
        record.bus.release_regions();
        record.bus.disable();
        record.set_state(DeviceState::Released);

        info!("{} released", id);
        Ok(())
    }

    /// Opens a client handle on a registered device.
    ///
    /// # Errors
    /// `ClientError::Io` (not found) for an unknown or already-removed id.
    pub fn open(&self, id: DeviceId) -> Result<DeviceHandle, crate::error::ClientError> {
        let record = self.registry.get(id).ok_or_else(|| {
            crate::error::ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no registered device {}", id),
            ))
        })?;
        DeviceHandle::open(record, self.cfg.doorbell_offset)
    }

    /// One interrupt's worth of demultiplexing on `line`.
    ///
    /// Safe from restricted dispatch contexts: reads and writes mapped
    /// register memory and signals gates, nothing else.
    pub fn dispatch_line(&self, line: LineId) -> LineStatus {
        match self.lines.get(line) {
            Some(line) => line.dispatch(),
            None => LineStatus::NotMine,
        }
    }

    /// Lines with at least one device engaged since startup.
    pub fn lines(&self) -> Vec<LineId> {
        self.lines.ids()
    }

    /// Currently registered device ids.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.registry.ids()
    }

    pub fn device_count(&self) -> usize {
        self.registry.len()
    }
}
