//! Wire protocol: exact reads, the length-prefixed envelope and the frame body.
//!
//! ```text
//! envelope (16 bytes, big-endian)      body (body_size bytes)
//! +----------+----------+----------+-----------+   +------------------+
//! | reserved | reserved | reserved | body_size |   | rgb_size   (u32) |
//! +----------+----------+----------+-----------+   | depth_size (u32) |
//!                                                  | intrinsics (64B) |
//!                                                  | JPEG  rgb_size   |
//!                                                  | LZFSE depth_size |
//!                                                  +------------------+
//! ```
//!
//! The body header and intrinsics use the device's native little-endian order.

pub mod body;
pub mod envelope;
mod reader;

pub use body::{BodyLayout, FrameHeader, Segment};
pub use envelope::{Envelope, MessageFramer};
pub use reader::receive_exact;
