use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::{fstat, Mode};
use nix::unistd::ftruncate;
use log::{debug, info};

use crate::map::{MapError, MemoryAttribute, RegionMapping};

/// An owned POSIX shared-memory object backing one advertised region.
///
/// On the host side these objects play the role the hardware's memory windows
/// play for a real bus: one object per (device, region index), discovered by
/// name and mapped directly by every interested process.
pub struct SharedRegion {
    name: String,
    fd: OwnedFd,
    len: usize,
}

impl SharedRegion {
    /// Creates (or truncates) a shared-memory object of `len` bytes.
    ///
    /// Used by the side that advertises a device; tests use it to stand up
    /// synthetic devices.
    ///
    /// # Errors
    /// Returns `std::io::Error` if the object cannot be created or sized.
    pub fn create(name: &str, len: usize) -> std::io::Result<Self> {
        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        ftruncate(&fd, len as libc::off_t)?;
        info!("Advertised shared region {} ({} bytes)", name, len);
        Ok(Self {
            name: name.to_string(),
            fd,
            len,
        })
    }

    /// Opens an existing shared-memory object read-write.
    ///
    /// The object's current size becomes the region length, exactly as a bus
    /// descriptor fixes a region's extent at discovery time.
    ///
    /// # Errors
    /// Returns `std::io::Error` if the object does not exist or cannot be
    /// inspected.
    pub fn open(name: &str) -> std::io::Result<Self> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty())?;
        let stat = fstat(fd.as_raw_fd())?;
        let len = stat.st_size as usize;
        debug!("Opened shared region {} ({} bytes)", name, len);
        Ok(Self {
            name: name.to_string(),
            fd,
            len,
        })
    }

    /// Maps the whole object with the given attribute.
    ///
    /// # Errors
    /// Propagates `MapError` from the underlying mmap.
    pub fn map(&self, attr: MemoryAttribute) -> Result<RegionMapping, MapError> {
        RegionMapping::map_fd(self.fd.as_raw_fd(), self.len, attr)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Removes the object's name from the namespace.
    ///
    /// Existing mappings stay valid; this only stops further discovery.
    pub fn unlink(name: &str) -> std::io::Result<()> {
        shm_unlink(name)?;
        Ok(())
    }
}
