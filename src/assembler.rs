//! Frame reconstruction from a received body.

use tracing::trace;

use crate::codec::{DepthDecompressor, RgbDecoder};
use crate::config::StreamConfig;
use crate::types::{Frame, IntrinsicMatrixCoeffs};
use crate::wire::BodyLayout;
use crate::Result;

/// Turns message bodies into [`Frame`]s.
///
/// Owns the session's frame buffers and decoders; every call overwrites the
/// same RGB and depth buffers in place. A failed call returns an error and no
/// frame, so a half-decoded body is never observable.
#[derive(Debug)]
pub struct FrameAssembler {
    width: u32,
    height: u32,
    rgb_decoder: RgbDecoder,
    depth_decompressor: DepthDecompressor,
    rgb: Vec<u8>,
    depth: Vec<u8>,
    intrinsics: IntrinsicMatrixCoeffs,
}

impl FrameAssembler {
    /// Allocate frame buffers sized from the configuration.
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            width: config.frame_width,
            height: config.frame_height,
            rgb_decoder: RgbDecoder::new(config.frame_width, config.frame_height),
            depth_decompressor: DepthDecompressor::new(config.depth_buffer_size()),
            rgb: vec![0u8; config.rgb_buffer_size()],
            depth: vec![0u8; config.depth_buffer_size()],
            intrinsics: IntrinsicMatrixCoeffs::default(),
        }
    }

    /// Reconstruct a frame from one message body.
    ///
    /// Segment offsets come from the body's own header, so the layout is
    /// validated against the body length before any segment is touched.
    pub fn assemble(&mut self, body: &[u8]) -> Result<Frame<'_>> {
        let layout = BodyLayout::parse(body)?;
        let intrinsics = layout.intrinsics(body);

        self.rgb_decoder.decode_into(layout.rgb.slice(body), &mut self.rgb)?;
        self.depth_decompressor.decompress(layout.depth.slice(body), &mut self.depth)?;
        self.intrinsics = intrinsics;

        trace!(
            rgb_bytes = layout.header.rgb_size,
            depth_bytes = layout.header.depth_size,
            "Assembled {}x{} frame",
            self.width,
            self.height
        );

        Ok(self.frame())
    }

    fn frame(&self) -> Frame<'_> {
        Frame {
            rgb: &self.rgb,
            depth: &self.depth,
            width: self.width,
            height: self.height,
            intrinsics: self.intrinsics,
        }
    }
}
