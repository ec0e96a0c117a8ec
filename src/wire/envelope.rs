//! Outer length-prefixed envelope and the per-message framer.

use tracing::trace;

use super::reader::receive_exact;
use crate::transport::Socket;
use crate::{Result, StreamError};

/// Outer wire unit delimiting one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Unused by the stream; carried for completeness.
    pub reserved: [u32; 3],
    /// Length of the body that follows, in host order.
    pub body_size: u32,
}

impl Envelope {
    /// Size of the envelope on the wire.
    pub const SIZE: usize = 16;

    pub fn new(body_size: u32) -> Self {
        Self { reserved: [0; 3], body_size }
    }

    /// Decode a big-endian envelope.
    pub fn from_be_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let word = |i: usize| {
            u32::from_be_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Self { reserved: [word(0), word(1), word(2)], body_size: word(3) }
    }

    /// Encode in wire order.
    pub fn to_be_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.reserved.iter().chain([&self.body_size])) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }
}

/// Reads one envelope and its body per call into a reusable receive buffer.
///
/// There is no resync marker in the protocol, so every error returned from
/// [`MessageFramer::next_body`] leaves the stream misaligned and must end the
/// session.
#[derive(Debug)]
pub struct MessageFramer {
    buffer: Vec<u8>,
    messages: u64,
}

impl MessageFramer {
    /// Allocate the receive buffer once; bodies larger than `capacity` are rejected.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buffer: vec![0u8; capacity], messages: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Number of complete messages received so far.
    pub fn messages_received(&self) -> u64 {
        self.messages
    }

    /// Read the next envelope header.
    pub fn read_envelope<S: Socket + ?Sized>(&mut self, socket: &mut S) -> Result<Envelope> {
        let mut header = [0u8; Envelope::SIZE];
        let received = receive_exact(socket, &mut header);
        if received != Envelope::SIZE {
            return Err(StreamError::ShortRead {
                context: "envelope",
                expected: Envelope::SIZE,
                received,
            });
        }
        Ok(Envelope::from_be_bytes(&header))
    }

    /// Read the next complete message and return its body.
    pub fn next_body<S: Socket + ?Sized>(&mut self, socket: &mut S) -> Result<&[u8]> {
        let envelope = self.read_envelope(socket)?;
        let body_size = envelope.body_size as usize;

        if body_size > self.buffer.len() {
            return Err(StreamError::protocol_violation(
                "envelope",
                format!(
                    "body of {} bytes exceeds the {}-byte receive buffer",
                    body_size,
                    self.buffer.len()
                ),
            ));
        }

        let body = &mut self.buffer[..body_size];
        let received = receive_exact(socket, body);
        if received != body_size {
            return Err(StreamError::ShortRead { context: "body", expected: body_size, received });
        }

        self.messages += 1;
        trace!("Message {}: {} byte body", self.messages, body_size);
        Ok(&self.buffer[..body_size])
    }
}
