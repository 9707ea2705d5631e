use thiserror::Error;

use crate::registry::{DeviceId, DeviceState};

/// Why a probe failed. Every variant implies a full unwind: a failed device
/// is never partially visible.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Enabling the device or reserving its resource set failed before any
    /// mapping began.
    #[error("Device enable or resource reservation failed: {0}")]
    ResourceUnavailable(#[source] std::io::Error),

    /// A region failed to map after the device was enabled; regions acquired
    /// earlier were released in reverse.
    #[error("Failed to map region {index}: {source}")]
    MappingFailed {
        index: u32,
        #[source]
        source: std::io::Error,
    },

    /// Registry at capacity. Rejected before any hardware side effect.
    #[error("Registry at capacity")]
    RegistryFull,
}

#[derive(Error, Debug)]
pub enum RemoveError {
    #[error("No registered device {0}")]
    UnknownDevice(DeviceId),

    #[error("Device {id} is {state:?}, not removable")]
    NotActive { id: DeviceId, state: DeviceState },
}

/// Runtime errors on client operations. Local to the operation and caller;
/// they never affect other devices or other clients of the same device.
#[derive(Error, Debug)]
pub enum ClientError {
    /// External read/write against the handle failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller addressed a region index the device never advertised.
    #[error("Region {index} was never advertised by this device")]
    ProtocolViolation { index: u32 },

    /// The device's event channel was torn down.
    #[error("Event channel torn down")]
    ChannelDown,
}
