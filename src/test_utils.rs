//! Test utilities: scripted sockets, an in-memory transport and synthetic frames.
//!
//! Shared by unit tests and the benchmarks (behind the `benchmark` feature).

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::StreamConfig;
use crate::transport::{Socket, SocketInterrupt, Transport};
use crate::types::{ConnectionType, DeviceDescriptor, DeviceHandle, IntrinsicMatrixCoeffs};
use crate::wire::body::encode_body;
use crate::wire::Envelope;
use crate::{Result, StreamError};

/// Socket that replays a fixed byte stream in chunks of at most `chunk` bytes.
///
/// After the data runs out it reports a clean close, or an error when built
/// with [`ChunkedSocket::failing`].
#[derive(Debug)]
pub struct ChunkedSocket {
    data: Vec<u8>,
    position: usize,
    chunk: usize,
    fail_at_end: bool,
    interrupt: bool,
    interrupted_last: bool,
    calls: usize,
}

impl ChunkedSocket {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            position: 0,
            chunk: chunk.max(1),
            fail_at_end: false,
            interrupt: false,
            interrupted_last: false,
            calls: 0,
        }
    }

    /// Report `ConnectionReset` instead of a clean close once drained.
    pub fn failing(mut self) -> Self {
        self.fail_at_end = true;
        self
    }

    /// Return `Interrupted` before every delivered chunk.
    pub fn interrupting(mut self) -> Self {
        self.interrupt = true;
        self
    }

    pub fn recv_calls(&self) -> usize {
        self.calls
    }

    pub fn bytes_delivered(&self) -> usize {
        self.position
    }
}

impl Read for ChunkedSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.calls += 1;

        if self.interrupt && !self.interrupted_last {
            self.interrupted_last = true;
            return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
        }
        self.interrupted_last = false;

        let remaining = self.data.len() - self.position;
        if remaining == 0 {
            return if self.fail_at_end {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "scripted failure"))
            } else {
                Ok(0)
            };
        }

        let n = remaining.min(self.chunk).min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl Socket for ChunkedSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

/// How often a blocked [`ChannelSocket`] checks for an interrupt.
const CHANNEL_POLL: Duration = Duration::from_millis(5);

/// Socket fed from a channel; blocks until bytes are pushed.
///
/// Dropping the paired [`Sender`] closes the socket, as does its interrupt
/// handle.
#[derive(Debug)]
pub struct ChannelSocket {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    interrupted: Arc<AtomicBool>,
}

impl ChannelSocket {
    pub fn pair() -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx, pending: VecDeque::new(), interrupted: Arc::new(AtomicBool::new(false)) })
    }
}

impl Read for ChannelSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            if self.interrupted.load(Ordering::SeqCst) {
                return Ok(0);
            }
            match self.rx.recv_timeout(CHANNEL_POLL) {
                Ok(bytes) => self.pending.extend(bytes),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Socket for ChannelSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn interrupt_handle(&self) -> Option<SocketInterrupt> {
        let interrupted = Arc::clone(&self.interrupted);
        Some(SocketInterrupt::new(move || interrupted.store(true, Ordering::SeqCst)))
    }
}

/// Wraps a socket and hides its interrupt handle, like a transport whose
/// reads cannot be cut short.
#[derive(Debug)]
pub struct UninterruptibleSocket<S>(pub S);

impl<S: Socket> Socket for UninterruptibleSocket<S> {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.recv(buf)
    }
}

/// In-memory transport handing out queued sockets, one per connect.
///
/// Connecting with an empty queue is refused.
pub struct MockTransport {
    devices: Vec<DeviceDescriptor>,
    sockets: Mutex<VecDeque<Box<dyn Socket>>>,
    connects: AtomicUsize,
    ports: Mutex<Vec<u16>>,
}

impl MockTransport {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices,
            sockets: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            ports: Mutex::new(Vec::new()),
        }
    }

    /// One USB device with handle 1.
    pub fn single_usb() -> Self {
        Self::new(vec![DeviceDescriptor::new(test_device(), ConnectionType::Usb)])
    }

    pub fn push_socket<S: Socket + 'static>(&self, socket: S) {
        self.sockets.lock().unwrap().push_back(Box::new(socket));
    }

    /// Number of successful connects.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Ports requested by every connect attempt, in order.
    pub fn requested_ports(&self) -> Vec<u16> {
        self.ports.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        Ok(self.devices.clone())
    }

    fn connect(&self, device: &DeviceHandle, port: u16) -> Result<Box<dyn Socket>> {
        self.ports.lock().unwrap().push(port);
        let socket = self.sockets.lock().unwrap().pop_front().ok_or_else(|| {
            StreamError::connection_failed(format!("{} refused port {}", device.udid, port))
        })?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(socket)
    }
}

/// The device [`MockTransport::single_usb`] reports.
pub fn test_device() -> DeviceHandle {
    DeviceHandle::new(1, 0x12a8, "00008030-TEST")
}

/// A configuration with a tiny frame, fast to encode and decode.
///
/// The receive buffer is widened since JPEG headers alone outweigh a frame
/// this small.
pub fn small_config() -> StreamConfig {
    StreamConfig {
        frame_width: 16,
        frame_height: 8,
        receive_buffer_size: Some(64 * 1024),
        ..StreamConfig::default()
    }
}

/// LZFSE-compress a depth buffer.
pub fn compress_depth(samples: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    lzfse_rust::encode_bytes(samples, &mut out).expect("LZFSE encoding should not fail");
    out
}

/// Encode a single-colour JPEG.
pub fn encode_solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb(color));
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 95)
        .encode_image(&image)
        .expect("JPEG encoding should not fail");
    out
}

/// A valid body for `config`: solid colour, constant depth.
pub fn synthetic_body(
    config: &StreamConfig,
    color: [u8; 3],
    depth: f32,
    intrinsics: IntrinsicMatrixCoeffs,
) -> Vec<u8> {
    let jpeg = encode_solid_jpeg(config.frame_width, config.frame_height, color);
    let samples: Vec<u8> =
        std::iter::repeat_n(depth.to_ne_bytes(), config.pixel_count()).flatten().collect();
    encode_body(&intrinsics, &jpeg, &compress_depth(&samples))
}

/// Prefix `body` with its envelope.
pub fn envelope_message(body: &[u8]) -> Vec<u8> {
    let mut out = Envelope::new(body.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(body);
    out
}

/// Route `tracing` output to the test harness; honours `RUST_LOG`.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
