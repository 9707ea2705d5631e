//! Crossbar I/O: the hardware-adjacent layer.
//!
//! This crate owns everything that touches raw memory: POSIX shared-memory
//! objects standing in for hardware-advertised windows, the mmap wrapper that
//! turns them into process-visible regions, the typed doorbell register view,
//! and the event gate that blocked waiters park on.

pub mod doorbell;
pub mod gate;
pub mod map;
pub mod shm;

// Re-exports for easier access by crossbar-core
pub use doorbell::{Doorbell, DoorbellError};
pub use gate::{EventGate, GateError};
pub use map::{MemoryAttribute, RegionMapping, PAGE_SIZE};
pub use shm::SharedRegion;
