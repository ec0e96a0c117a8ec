//! Exact-length reads over a chunked byte stream.

use std::io::ErrorKind;

use tracing::debug;

use crate::transport::Socket;

/// Fill `buf` completely from `socket`.
///
/// Returns the number of bytes received. Anything less than `buf.len()` means
/// the socket failed or was closed part-way; the bytes that did arrive are
/// left in `buf[..returned]`. Interrupted reads are retried.
pub fn receive_exact<S: Socket + ?Sized>(socket: &mut S, buf: &mut [u8]) -> usize {
    let mut received = 0;

    while received < buf.len() {
        match socket.recv(&mut buf[received..]) {
            Ok(0) => {
                debug!("Socket closed after {} of {} bytes", received, buf.len());
                return received;
            }
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Receive failed after {} of {} bytes: {}", received, buf.len(), e);
                return received;
            }
        }
    }

    received
}
