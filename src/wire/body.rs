//! Frame body header and segment layout.
//!
//! The body packs two fixed-size records and two variable-size payloads back
//! to back. [`BodyLayout::parse`] turns the header's declared sizes into typed
//! [`Segment`]s and checks that they tile the body exactly before anything
//! indexes into it.

use std::ops::Range;

use crate::types::IntrinsicMatrixCoeffs;
use crate::{Result, StreamError};

/// Size of the fixed prefix every body must carry.
pub const MIN_BODY_SIZE: usize = FrameHeader::SIZE + IntrinsicMatrixCoeffs::WIRE_SIZE;

/// Inner header declaring the compressed payload sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub rgb_size: u32,
    pub depth_size: u32,
}

impl FrameHeader {
    /// Size of the header on the wire.
    pub const SIZE: usize = 8;

    pub fn new(rgb_size: u32, depth_size: u32) -> Self {
        Self { rgb_size, depth_size }
    }

    /// Parse the header from the start of `body`.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let bytes = body.get(..Self::SIZE).ok_or_else(|| {
            StreamError::protocol_violation(
                "frame header",
                format!("body of {} bytes is shorter than the {}-byte header", body.len(), Self::SIZE),
            )
        })?;
        Ok(Self {
            rgb_size: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            depth_size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    pub fn to_le_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..4].copy_from_slice(&self.rgb_size.to_le_bytes());
        out[4..].copy_from_slice(&self.depth_size.to_le_bytes());
        out
    }

    /// Body size implied by this header, if it fits in `usize`.
    pub fn expected_body_size(&self) -> Option<usize> {
        MIN_BODY_SIZE
            .checked_add(self.rgb_size as usize)?
            .checked_add(self.depth_size as usize)
    }
}

/// A contiguous region of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub offset: usize,
    pub len: usize,
}

impl Segment {
    fn after(previous: Segment, len: usize) -> Self {
        Self { offset: previous.end(), len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// Borrow this segment out of a body the layout was validated against.
    pub fn slice<'a>(&self, body: &'a [u8]) -> &'a [u8] {
        &body[self.range()]
    }
}

/// Validated positions of every body segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLayout {
    pub header: FrameHeader,
    pub intrinsics: Segment,
    pub rgb: Segment,
    pub depth: Segment,
}

impl BodyLayout {
    /// Parse the header and check that the segments tile `body` exactly.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let header = FrameHeader::parse(body)?;

        match header.expected_body_size() {
            Some(expected) if expected == body.len() => {}
            Some(expected) => {
                return Err(StreamError::protocol_violation(
                    "body layout",
                    format!(
                        "header declares rgb={} depth={} ({} bytes total) but body is {} bytes",
                        header.rgb_size,
                        header.depth_size,
                        expected,
                        body.len()
                    ),
                ));
            }
            None => {
                return Err(StreamError::protocol_violation(
                    "body layout",
                    format!(
                        "declared sizes rgb={} depth={} overflow",
                        header.rgb_size, header.depth_size
                    ),
                ));
            }
        }

        let header_segment = Segment { offset: 0, len: FrameHeader::SIZE };
        let intrinsics = Segment::after(header_segment, IntrinsicMatrixCoeffs::WIRE_SIZE);
        let rgb = Segment::after(intrinsics, header.rgb_size as usize);
        let depth = Segment::after(rgb, header.depth_size as usize);
        debug_assert_eq!(depth.end(), body.len());

        Ok(Self { header, intrinsics, rgb, depth })
    }

    pub fn intrinsics(&self, body: &[u8]) -> IntrinsicMatrixCoeffs {
        IntrinsicMatrixCoeffs::from_le_bytes(self.intrinsics.slice(body))
            .unwrap_or_default()
    }
}

/// Assemble a body in wire order.
pub fn encode_body(intrinsics: &IntrinsicMatrixCoeffs, rgb: &[u8], depth: &[u8]) -> Vec<u8> {
    let header = FrameHeader::new(rgb.len() as u32, depth.len() as u32);
    let mut body = Vec::with_capacity(MIN_BODY_SIZE + rgb.len() + depth.len());
    body.extend_from_slice(&header.to_le_bytes());
    body.extend_from_slice(&intrinsics.to_le_bytes());
    body.extend_from_slice(rgb);
    body.extend_from_slice(depth);
    body
}
