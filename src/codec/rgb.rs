//! JPEG colour decoding into a fixed-size RGB buffer.

use image::ImageFormat;
use tracing::trace;

use crate::{Result, StreamError};

/// Decodes JPEG payloads that must match one fixed frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbDecoder {
    width: u32,
    height: u32,
}

impl RgbDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size in bytes of a decoded frame.
    pub fn output_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Decode `jpeg` and copy the RGB8 pixels into `destination`.
    ///
    /// The decoded image must be exactly `width × height`; any other size is
    /// reported as [`StreamError::DimensionMismatch`] rather than cropped or
    /// padded. `destination` is only written on success.
    pub fn decode_into(&self, jpeg: &[u8], destination: &mut [u8]) -> Result<()> {
        if destination.len() != self.output_size() {
            return Err(StreamError::Decode {
                details: format!(
                    "destination is {} bytes, frame needs {}",
                    destination.len(),
                    self.output_size()
                ),
            });
        }

        let decoded = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
            .map_err(|e| StreamError::Decode { details: e.to_string() })?
            .into_rgb8();

        let found = decoded.dimensions();
        if found != (self.width, self.height) {
            return Err(StreamError::DimensionMismatch {
                expected: (self.width, self.height),
                found,
            });
        }

        destination.copy_from_slice(decoded.as_raw());
        trace!("Decoded {} byte JPEG into {}x{} RGB", jpeg.len(), self.width, self.height);
        Ok(())
    }
}
