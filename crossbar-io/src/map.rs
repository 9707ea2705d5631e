use std::os::unix::io::RawFd;
use std::ptr::NonNull;
use libc::c_void;
use thiserror::Error;
use log::debug;

/// Alignment and paging constant for crossbar region windows.
pub const PAGE_SIZE: usize = 4096;

#[derive(Error, Debug)]
pub enum MapError {
    #[error("Refusing to map a zero-length region")]
    ZeroLength,
    #[error("mmap failed: {0}")]
    MapFailed(std::io::Error),
}

/// Caching/coherency tag applied to a mapped region.
///
/// The original hardware maps its control window uncached and its payload
/// windows cache-coherent; observed deployments disagree on which tag payload
/// windows get, so the tag is explicit configuration rather than a constant.
/// In a userspace host the tag selects mapping behavior (`Physical` pre-faults
/// the window) and is recorded on the region for introspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryAttribute {
    /// Register-style window: treat as device memory, fault it in up front.
    Physical,
    /// Coherent shared window: ordinary demand-faulted shared memory.
    IoCoherent,
}

/// An owned, mapped region window.
///
/// Holds the whole extent of one hardware-advertised region, mapped
/// read-write and shared. The mapping is released on drop.
pub struct RegionMapping {
    ptr: NonNull<u8>,
    len: usize,
    attr: MemoryAttribute,
}

// SAFETY: The mapping is plain shared memory; all access goes through raw
// pointers and the callers own the synchronization story (the connector only
// guarantees the doorbell word).
unsafe impl Send for RegionMapping {}
unsafe impl Sync for RegionMapping {}

impl RegionMapping {
    /// Maps `len` bytes of `fd` read-write and shared.
    ///
    /// # Errors
    /// Returns `MapError::ZeroLength` for an empty window and
    /// `MapError::MapFailed` with the OS error if the kernel refuses the map.
    pub fn map_fd(fd: RawFd, len: usize, attr: MemoryAttribute) -> Result<Self, MapError> {
        if len == 0 {
            return Err(MapError::ZeroLength);
        }

        let mut flags = libc::MAP_SHARED;
        if attr == MemoryAttribute::Physical {
            // Register windows must not take a fault on first touch.
            flags |= libc::MAP_POPULATE;
        }

        // SAFETY: FFI call with a null hint address, a validated non-zero
        // length, and flags that do not include MAP_FIXED.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MapError::MapFailed(std::io::Error::last_os_error()));
        }

        debug!("Mapped region window: {} bytes ({:?})", len, attr);

        // SAFETY: mmap returned a non-MAP_FAILED pointer, which is non-null.
        let ptr = unsafe { NonNull::new_unchecked(ptr as *mut u8) };
        Ok(Self { ptr, len, attr })
    }

    /// Base of the mapped window.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size of the mapped window in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The caching/coherency tag this window was mapped with.
    pub fn attr(&self) -> MemoryAttribute {
        self.attr
    }
}

impl Drop for RegionMapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe exactly the mapping created in map_fd.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut c_void, self.len);
        }
    }
}
