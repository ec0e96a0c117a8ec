//! Transport seam between the stream and the device multiplexer.
//!
//! The stream only needs two things from a transport: a list of attached
//! devices, and a byte-stream socket to a device port. Discovery itself lives
//! outside this crate; [`TcpTransport`] covers devices whose port has been
//! forwarded to a TCP endpoint.

mod tcp;

use std::sync::Arc;

use crate::types::{DeviceDescriptor, DeviceHandle};
use crate::Result;

pub use tcp::{TcpEndpoint, TcpTransport};

/// A connected byte stream to a device.
///
/// `recv` blocks until at least one byte is available or the stream fails.
/// `Ok(0)` means the peer closed the stream.
pub trait Socket: Send {
    fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// A handle that unblocks `recv` from another thread.
    ///
    /// Sockets without one keep a stopped session's runloop parked until the
    /// read returns on its own.
    fn interrupt_handle(&self) -> Option<SocketInterrupt> {
        None
    }
}

/// Wakes a [`Socket`] blocked in `recv`. Reads after an interrupt report a
/// closed stream or an error.
#[derive(Clone)]
pub struct SocketInterrupt(Arc<dyn Fn() + Send + Sync>);

impl SocketInterrupt {
    pub fn new<F>(interrupt: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(interrupt))
    }

    pub fn interrupt(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for SocketInterrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketInterrupt").finish_non_exhaustive()
    }
}

/// Source of devices and sockets.
pub trait Transport: Send + Sync + 'static {
    /// All devices currently known to the transport, in transport order.
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Open a byte-stream socket to `port` on `device`.
    fn connect(&self, device: &DeviceHandle, port: u16) -> Result<Box<dyn Socket>>;
}
