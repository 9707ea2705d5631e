//! Crossbar core: the cross-domain connector.
//!
//! Devices advertise an ordered run of shared-memory regions plus one
//! doorbell-style event word in region 0. This crate enumerates those
//! regions (gap-terminated, all-or-nothing), publishes fully-acquired
//! devices to a capacity-bounded registry, demultiplexes a shared interrupt
//! line across every registered device, and exposes the wait/emit contract
//! client processes consume.

pub mod bus;
mod enumerate;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod line;
mod name;
pub mod region;
pub mod registry;

pub use bus::{BusDevice, LineId, RegionDescriptor, RegionMap};
pub use error::{ClientError, ProbeError, RemoveError};
pub use handle::{DeviceHandle, RegionView};
pub use lifecycle::Connector;
pub use line::LineStatus;
pub use region::{Region, RegionRole};
pub use registry::{DeviceId, DeviceState};

use crossbar_io::MemoryAttribute;

/// Connector-wide configuration.
///
/// Observed hardware variants disagree on the doorbell word's offset, the
/// name window's placement, and the payload caching tag, so all three are
/// explicit knobs rather than constants.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    /// Registry capacity; checked before any hardware resource is touched.
    pub capacity: usize,
    /// Upper bound on the region walk. The first absent index below this
    /// still terminates enumeration.
    pub max_regions: u32,
    /// Byte offset of the doorbell word inside region 0.
    pub doorbell_offset: usize,
    /// Byte offset of the optional bounded name string inside region 0.
    pub name_offset: usize,
    /// Maximum name length decoded regardless of register content.
    pub name_max_len: usize,
    /// Caching/coherency tag applied to payload regions (index >= 1).
    /// Region 0 is always mapped register-style.
    pub payload_attr: MemoryAttribute,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            max_regions: 5,
            doorbell_offset: 0,
            name_offset: 8,
            name_max_len: 64,
            payload_attr: MemoryAttribute::IoCoherent,
        }
    }
}
