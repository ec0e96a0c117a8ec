//! Reconstructed frame types

use std::sync::Arc;

use super::IntrinsicMatrixCoeffs;

/// A reconstructed frame, borrowed from the session's reusable buffers.
///
/// The buffers are overwritten by the next frame, so a `Frame` is only valid
/// for the duration of the callback it is passed to. Use [`Frame::to_packet`]
/// to keep a copy.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Row-major RGB8 pixels, `width * height * 3` bytes.
    pub rgb: &'a [u8],
    /// Row-major native-endian `f32` depth samples, `width * height * 4` bytes.
    pub depth: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub intrinsics: IntrinsicMatrixCoeffs,
}

impl<'a> Frame<'a> {
    /// Iterate over depth samples in row-major order.
    pub fn depth_samples(&self) -> impl Iterator<Item = f32> + 'a {
        self.depth.chunks_exact(4).map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// Depth sample at `(x, y)`, if in bounds.
    pub fn depth_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let c = self.depth.get(idx..idx + 4)?;
        Some(f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// RGB triple at `(x, y)`, if in bounds.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        let c = self.rgb.get(idx..idx + 3)?;
        Some([c[0], c[1], c[2]])
    }

    /// Copy the frame out of the session buffers.
    pub fn to_packet(&self, sequence: u64) -> FramePacket {
        FramePacket {
            rgb: Arc::from(self.rgb),
            depth: Arc::from(self.depth),
            width: self.width,
            height: self.height,
            intrinsics: self.intrinsics,
            sequence,
        }
    }
}

/// Owned frame snapshot shared with async subscribers.
///
/// Buffers are `Arc`-shared so fanning a packet out to several subscribers
/// never copies pixel data.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub rgb: Arc<[u8]>,
    pub depth: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub intrinsics: IntrinsicMatrixCoeffs,
    /// Monotonic frame counter within the session, starting at 1.
    pub sequence: u64,
}

impl FramePacket {
    /// Borrow the packet as a [`Frame`] view.
    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            rgb: &self.rgb,
            depth: &self.depth,
            width: self.width,
            height: self.height,
            intrinsics: self.intrinsics,
        }
    }
}
