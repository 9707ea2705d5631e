use crossbar_io::MemoryAttribute;

use crate::bus::RegionMap;

/// Role of a region within a device's advertised run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionRole {
    /// Region 0: hosts the doorbell word and the optional name window.
    /// Always control, even when the device has no payload regions.
    Control,
    /// Regions 1..: raw payload end to end, no header.
    Payload,
}

/// One acquired region: its advertised geometry plus the live mapping.
///
/// Holding a `Region` is holding the mapping; drop releases it.
pub struct Region {
    index: u32,
    role: RegionRole,
    attr: MemoryAttribute,
    base: u64,
    map: Box<dyn RegionMap>,
}

impl Region {
    pub fn new(
        index: u32,
        role: RegionRole,
        attr: MemoryAttribute,
        base: u64,
        map: Box<dyn RegionMap>,
    ) -> Self {
        Self {
            index,
            role,
            attr,
            base,
            map,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn role(&self) -> RegionRole {
        self.role
    }

    pub fn attr(&self) -> MemoryAttribute {
        self.attr
    }

    /// Advertised base address of the window (hardware-side).
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    /// Process-side base of the mapped window.
    pub fn as_ptr(&self) -> *mut u8 {
        self.map.as_ptr()
    }
}
