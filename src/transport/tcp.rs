//! TCP transport for forwarded device ports.
//!
//! usbmux proxies expose a USB-attached device's port on a local TCP port.
//! `TcpTransport` treats each configured endpoint as one device and connects
//! to `host:port`, where `port` is the device port requested by the stream.

use std::io::Read;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Socket, SocketInterrupt, Transport};
use crate::types::{ConnectionType, DeviceDescriptor, DeviceHandle};
use crate::{Result, StreamError};

fn default_connection() -> ConnectionType {
    ConnectionType::Usb
}

/// One device reachable over TCP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpEndpoint {
    pub udid: String,
    #[serde(default)]
    pub product_id: u32,
    /// Host the device port is forwarded to, usually `127.0.0.1`.
    pub host: String,
    /// Port override. When unset the stream's device port is used.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_connection")]
    pub connection: ConnectionType,
}

impl TcpEndpoint {
    pub fn new(udid: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            product_id: 0,
            host: host.into(),
            port: None,
            connection: ConnectionType::Usb,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

impl Socket for TcpStream {
    fn recv(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read(buf)
    }

    fn interrupt_handle(&self) -> Option<SocketInterrupt> {
        let handle = match self.try_clone() {
            Ok(handle) => handle,
            Err(e) => {
                debug!("Socket cannot be interrupted: {}", e);
                return None;
            }
        };
        Some(SocketInterrupt::new(move || {
            // Already closed is fine
            let _ = handle.shutdown(Shutdown::Both);
        }))
    }
}

/// Transport over a fixed list of TCP endpoints.
///
/// Device handles are the endpoint's index in the list.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    endpoints: Vec<TcpEndpoint>,
    read_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new(endpoints: Vec<TcpEndpoint>) -> Self {
        Self { endpoints, read_timeout: None, connect_timeout: None }
    }

    /// Parse an endpoint list from YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let endpoints: Vec<TcpEndpoint> = serde_yaml_ng::from_str(yaml)
            .map_err(|e| StreamError::config_error("TCP endpoint list", e.to_string()))?;
        Ok(Self::new(endpoints))
    }

    /// Apply a read timeout to every socket this transport opens.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn endpoints(&self) -> &[TcpEndpoint] {
        &self.endpoints
    }

    fn open(&self, host: &str, port: u16) -> std::io::Result<TcpStream> {
        let stream = match self.connect_timeout {
            Some(timeout) => {
                let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::AddrNotAvailable,
                        format!("{host} did not resolve"),
                    )
                })?;
                TcpStream::connect_timeout(&addr, timeout)?
            }
            None => TcpStream::connect((host, port))?,
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.read_timeout)?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(idx, endpoint)| {
                let handle = u32::try_from(idx).map_err(|_| StreamError::DeviceDiscovery {
                    reason: format!("endpoint index {idx} exceeds handle range"),
                })?;
                Ok(DeviceDescriptor::new(
                    DeviceHandle::new(handle, endpoint.product_id, endpoint.udid.clone()),
                    endpoint.connection,
                ))
            })
            .collect()
    }

    fn connect(&self, device: &DeviceHandle, port: u16) -> Result<Box<dyn Socket>> {
        let endpoint = self
            .endpoints
            .get(device.handle as usize)
            .filter(|e| e.udid == device.udid)
            .ok_or_else(|| {
                StreamError::connection_failed(format!("unknown device {}", device))
            })?;

        let port = endpoint.port.unwrap_or(port);
        trace!(host = %endpoint.host, port, udid = %endpoint.udid, "Opening TCP socket");

        let stream = self.open(&endpoint.host, port).map_err(|e| {
            StreamError::connection_failed_with_source(
                format!("{}:{} refused for {}", endpoint.host, port, endpoint.udid),
                Box::new(e),
            )
        })?;

        debug!("Connected to {} via {}:{}", endpoint.udid, endpoint.host, port);
        Ok(Box::new(stream))
    }
}
