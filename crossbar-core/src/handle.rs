use std::sync::Arc;
use log::debug;

use crossbar_io::{Doorbell, GateError, PAGE_SIZE};

use crate::error::ClientError;
use crate::region::Region;
use crate::registry::{DeviceId, DeviceRecord};

/// A shared, direct view of one mapped region.
///
/// The view aliases the region's memory, it does not copy it, and it holds
/// the mapping alive even if the device is removed underneath it (ordinary
/// resource-teardown semantics). The connector synchronizes only the
/// doorbell event; payload bytes carry no locking or consistency guarantee,
/// and "wait returned" is the caller's sole synchronization point.
pub struct RegionView {
    region: Arc<Region>,
}

impl RegionView {
    pub fn index(&self) -> u32 {
        self.region.index()
    }

    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Raw base of the shared window.
    pub fn as_ptr(&self) -> *mut u8 {
        self.region.as_ptr()
    }

    /// Copies `buf` into the window at `offset`.
    ///
    /// # Errors
    /// `ClientError::Io` (invalid input) when the write would run past the
    /// region's fixed extent.
    pub fn write(&self, offset: usize, buf: &[u8]) -> Result<(), ClientError> {
        self.check_bounds(offset, buf.len())?;
        // SAFETY: bounds checked against the live mapping; the memory is
        // shared by design and the caller owns payload synchronization.
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.region.as_ptr().add(offset), buf.len());
        }
        Ok(())
    }

    /// Copies `buf.len()` bytes out of the window at `offset`.
    ///
    /// # Errors
    /// `ClientError::Io` (invalid input) on an out-of-bounds read.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), ClientError> {
        self.check_bounds(offset, buf.len())?;
        // SAFETY: bounds checked against the live mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.region.as_ptr().add(offset) as *const u8,
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<(), ClientError> {
        let end = offset.checked_add(len);
        match end {
            Some(end) if end <= self.region.len() => Ok(()),
            _ => Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "access [{}, {}+{}) outside region {} ({} bytes)",
                    offset,
                    offset,
                    len,
                    self.region.index(),
                    self.region.len()
                ),
            ))),
        }
    }
}

/// A client's descriptor on one registered device: the consumed contract of
/// the connector (map regions, emit, blocking wait).
pub struct DeviceHandle {
    record: Arc<DeviceRecord>,
    control: RegionView,
    doorbell: Doorbell,
}

impl DeviceHandle {
    pub(crate) fn open(
        record: Arc<DeviceRecord>,
        doorbell_offset: usize,
    ) -> Result<Self, ClientError> {
        let Some(region0) = record.region(0) else {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "device has no control region",
            )));
        };
        let doorbell = Doorbell::new(region0.as_ptr(), region0.len(), doorbell_offset)
            .map_err(|e| {
                ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    e.to_string(),
                ))
            })?;
        debug!("Handle opened on {}", record.id);
        Ok(Self {
            record,
            control: RegionView { region: region0 },
            doorbell,
        })
    }

    pub fn id(&self) -> DeviceId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn region_count(&self) -> usize {
        self.record.region_count()
    }

    /// Maps the region selected by a page-aligned offset multiple: offset 0
    /// is the control region, offset N * PAGE_SIZE is region N.
    ///
    /// # Errors
    /// `ClientError::Io` (invalid input) for a non-page-multiple offset or
    /// one whose region index does not fit in 32 bits;
    /// `ClientError::ProtocolViolation` for an index the device never
    /// advertised.
    pub fn map_region(&self, offset: usize) -> Result<RegionView, ClientError> {
        if offset % PAGE_SIZE != 0 {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("offset {} is not a multiple of {}", offset, PAGE_SIZE),
            )));
        }
        let index = u32::try_from(offset / PAGE_SIZE).map_err(|_| {
            // Far past any representable region index; must not wrap into a
            // low index that happens to exist.
            ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("offset {} is beyond any addressable region", offset),
            ))
        })?;
        let region = self
            .record
            .region(index)
            .ok_or(ClientError::ProtocolViolation { index })?;
        Ok(RegionView { region })
    }

    /// Signals the far side: a nonzero in-memory store to the doorbell word
    /// of the mapped control region. Fire and forget; repeated emits before
    /// the corresponding wait coalesce into one pending flag.
    pub fn emit(&self) {
        self.doorbell.ring();
    }

    /// Blocks until an event has been (or already was) delivered to this
    /// device, then returns the positive delivery token. Never busy-spins.
    ///
    /// # Errors
    /// `ClientError::ChannelDown` without blocking once the device's event
    /// channel is torn down.
    pub fn wait(&self) -> Result<u32, ClientError> {
        match self.record.gate.wait() {
            Ok(token) => Ok(token),
            Err(GateError::Closed) => Err(ClientError::ChannelDown),
        }
    }

    /// The control-region view (doorbell word plus optional name window).
    pub fn control(&self) -> &RegionView {
        &self.control
    }
}
