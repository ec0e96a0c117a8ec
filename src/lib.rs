//! Client-side RGBD streaming from Record3D capture devices.
//!
//! A capture device streams colour and depth frames over a USB-forwarded
//! socket. This crate connects to it, reassembles the length-prefixed
//! messages, decodes the JPEG colour image and the LZFSE-compressed depth map,
//! and hands each frame to the caller.
//!
//! # Features
//!
//! - **One session at a time**: a small connect/disconnect state machine with
//!   exactly one stopped notification per session
//! - **Zero-copy callbacks**: frames borrow buffers allocated once per session
//! - **Async subscriptions**: `Arc`-shared frame packets with optional
//!   throttling, for Tokio consumers
//! - **Pluggable transport**: usbmux forwarding, TCP, or anything implementing
//!   [`Transport`]
//!
//! # Pipeline
//!
//! ```text
//! Transport ─► Socket ─► MessageFramer ─► FrameAssembler ─┬─► on_new_frame(&Frame)
//!                         (envelope)      (JPEG + LZFSE)  └─► subscribe() packets
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use record3d::{Record3DStream, StreamConfig, TcpEndpoint};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoints = vec![TcpEndpoint::new("00008030-001A2B3C4D5E", "127.0.0.1")];
//!     let stream = Record3DStream::over_tcp(endpoints, StreamConfig::default())?;
//!
//!     stream.set_on_new_frame(|frame| {
//!         let center = frame.depth_at(frame.width / 2, frame.height / 2);
//!         println!("{}x{} frame, center depth {:?}", frame.width, frame.height, center);
//!     });
//!     stream.set_on_stream_stopped(|| println!("Stream stopped"));
//!
//!     let devices = stream.list_devices()?;
//!     if let Some(device) = devices.first() {
//!         stream.connect(device)?;
//!     }
//!     std::thread::sleep(std::time::Duration::from_secs(10));
//!     stream.disconnect();
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire format and decoding
pub mod assembler;
pub mod codec;
pub mod wire;

// Session management
pub mod connection;
pub mod runloop;
pub mod stream;
pub mod transport;

// Core exports
pub use config::StreamConfig;
pub use error::*;
pub use types::*;

pub use assembler::FrameAssembler;
pub use connection::Record3DStream;
pub use transport::{Socket, SocketInterrupt, TcpEndpoint, TcpTransport, Transport};
