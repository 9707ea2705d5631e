use crossbar_io::{MemoryAttribute, RegionMapping};

/// Identifier of a shared interrupt line.
pub type LineId = u32;

/// What the bus advertises about one region index: where it lives and how
/// big it is. Size and base are fixed at discovery time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub index: u32,
    pub base: u64,
    pub size: usize,
}

/// A live mapping of one region, however the bus produced it.
///
/// Dropping the value releases the mapping; the lifecycle manager relies on
/// drop order to release regions highest-index-first.
pub trait RegionMap: Send + Sync {
    fn as_ptr(&self) -> *mut u8;
    fn len(&self) -> usize;
}

impl RegionMap for RegionMapping {
    fn as_ptr(&self) -> *mut u8 {
        self.as_ptr()
    }

    fn len(&self) -> usize {
        self.len()
    }
}

/// Probe-side view of one advertised device.
///
/// Mirrors the call surface a bus gives a driver: enable the function,
/// reserve its resource set, query region descriptors by index, map them.
/// `enable`/`reserve_regions` failures happen before any mapping exists;
/// `release_regions`/`disable` are the reverse pair and must be infallible.
pub trait BusDevice: Send + Sync {
    /// Human-readable identity for logs (bus address, shm prefix, ...).
    fn label(&self) -> String;

    /// The shared interrupt line this device raises events on.
    fn line(&self) -> LineId;

    /// Powers the function up.
    ///
    /// # Errors
    /// OS-style error if the device cannot be enabled; no resources are held
    /// on failure.
    fn enable(&self) -> std::io::Result<()>;

    /// Reverse of `enable`.
    fn disable(&self);

    /// Claims the device's region resource set.
    ///
    /// # Errors
    /// OS-style error if the set is already claimed or unavailable.
    fn reserve_regions(&self) -> std::io::Result<()>;

    /// Reverse of `reserve_regions`.
    fn release_regions(&self);

    /// Descriptor for `index`, or `None` if the device does not advertise
    /// that index. The first `None` permanently terminates enumeration.
    fn region_descriptor(&self, index: u32) -> Option<RegionDescriptor>;

    /// Maps one advertised region with the given attribute.
    ///
    /// # Errors
    /// OS-style error if the window cannot be mapped.
    fn map_region(
        &self,
        desc: &RegionDescriptor,
        attr: MemoryAttribute,
    ) -> std::io::Result<Box<dyn RegionMap>>;
}
