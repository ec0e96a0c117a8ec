//! Device descriptors produced by discovery.

use serde::{Deserialize, Serialize};

/// How a device is attached to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Attached over a USB cable. The only class the stream supports.
    Usb,
    /// Reachable over a network link.
    Network,
}

/// Identifies one connectable device.
///
/// Produced by [`Record3DStream::list_devices`](crate::Record3DStream::list_devices)
/// and consumed by [`Record3DStream::connect`](crate::Record3DStream::connect).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Opaque transport-level identifier.
    pub handle: u32,
    /// USB product identifier.
    pub product_id: u32,
    /// Unique device identifier.
    pub udid: String,
}

impl DeviceHandle {
    pub fn new(handle: u32, product_id: u32, udid: impl Into<String>) -> Self {
        Self { handle, product_id, udid: udid.into() }
    }
}

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (handle {}, product {:#06x})", self.udid, self.handle, self.product_id)
    }
}

/// A device as reported by a transport, before filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device: DeviceHandle,
    pub connection: ConnectionType,
}

impl DeviceDescriptor {
    pub fn new(device: DeviceHandle, connection: ConnectionType) -> Self {
        Self { device, connection }
    }

    /// Whether the device is attached over USB.
    pub fn is_usb(&self) -> bool {
        self.connection == ConnectionType::Usb
    }
}
