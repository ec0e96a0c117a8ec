//! LZFSE depth decompression with a session-lifetime scratch buffer.

use std::io::{self, Write};

use lzfse_rust::LzfseRingDecoder;
use tracing::{trace, warn};

use crate::{Result, StreamError};

/// Decompresses depth payloads of one fixed size.
///
/// The decoder state and the output scratch are allocated once and reused for
/// every frame. Output is staged in the scratch buffer and only copied to the
/// destination once its size has been checked, so a failed frame never leaves
/// partial depth data behind.
///
/// The scratch never grows: decoding stops as soon as a payload produces more
/// than [`expected_size`](Self::expected_size) bytes.
pub struct DepthDecompressor {
    decoder: LzfseRingDecoder,
    scratch: Vec<u8>,
    expected_size: usize,
}

/// Writes into a fixed slice and fails once it is full.
struct BoundedSink<'a> {
    buf: &'a mut [u8],
    written: usize,
    overflowed: bool,
}

impl Write for BoundedSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.buf.len() - self.written;
        if data.len() > room {
            self.overflowed = true;
            self.written += data.len();
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("output exceeds {} bytes", self.buf.len()),
            ));
        }
        self.buf[self.written..self.written + data.len()].copy_from_slice(data);
        self.written += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl DepthDecompressor {
    pub fn new(expected_size: usize) -> Self {
        Self {
            decoder: LzfseRingDecoder::default(),
            scratch: vec![0u8; expected_size],
            expected_size,
        }
    }

    /// Exact decompressed size every payload must produce.
    pub fn expected_size(&self) -> usize {
        self.expected_size
    }

    /// Decompress `compressed` into `destination`.
    ///
    /// `destination` must be exactly [`expected_size`](Self::expected_size)
    /// bytes long and is left untouched on failure. A payload that inflates
    /// past that size fails without decoding the rest.
    pub fn decompress<'d>(
        &mut self,
        compressed: &[u8],
        destination: &'d mut [u8],
    ) -> Result<&'d mut [u8]> {
        if destination.len() != self.expected_size {
            return Err(StreamError::Decompression {
                expected: self.expected_size,
                produced: 0,
                details: format!("destination buffer is {} bytes", destination.len()),
            });
        }

        let mut source = compressed;
        let mut sink = BoundedSink { buf: &mut self.scratch, written: 0, overflowed: false };
        let decoded = self.decoder.decode(&mut source, &mut sink);
        let (produced, overflowed) = (sink.written, sink.overflowed);

        if overflowed {
            warn!(
                "Depth payload of {} bytes inflates past {} bytes",
                compressed.len(),
                self.expected_size
            );
            return Err(StreamError::Decompression {
                expected: self.expected_size,
                produced,
                details: format!("output exceeds {} bytes", self.expected_size),
            });
        }

        if let Err(e) = decoded {
            warn!("LZFSE decode failed on {} byte payload: {}", compressed.len(), e);
            return Err(StreamError::Decompression {
                expected: self.expected_size,
                produced,
                details: e.to_string(),
            });
        }

        if produced != self.expected_size {
            warn!("Decompressed depth is {} bytes, expected {}", produced, self.expected_size);
            return Err(StreamError::Decompression {
                expected: self.expected_size,
                produced,
                details: "decompressed size mismatch".to_string(),
            });
        }

        destination.copy_from_slice(&self.scratch);
        trace!("Decompressed {} -> {} depth bytes", compressed.len(), self.expected_size);
        Ok(destination)
    }
}

impl std::fmt::Debug for DepthDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthDecompressor")
            .field("expected_size", &self.expected_size)
            .field("scratch_capacity", &self.scratch.capacity())
            .finish()
    }
}
