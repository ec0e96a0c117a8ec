//! Background runloop that pumps one streaming session.
//!
//! The runloop owns everything a session needs to turn socket bytes into
//! frames: the socket, the [`MessageFramer`] with its receive buffer, and the
//! [`FrameAssembler`] with its frame buffers. Nothing in here is shared, so the
//! hot path takes no locks apart from whatever the [`FrameSink`] does.
//!
//! Every exit path (clean close, read failure, protocol or decode error,
//! cancellation) ends in exactly one [`FrameSink::session_ended`] call.

use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::assembler::FrameAssembler;
use crate::config::StreamConfig;
use crate::transport::Socket;
use crate::types::Frame;
use crate::wire::MessageFramer;
use crate::{Result, StreamError};

/// Name given to runloop threads.
pub const RUNLOOP_THREAD_NAME: &str = "record3d-runloop";

/// Receives the output of a runloop.
pub trait FrameSink: Send + Sync + 'static {
    /// Called for every assembled frame, on the runloop thread.
    fn frame_ready(&self, session: u64, frame: &Frame<'_>, sequence: u64);

    /// Called once when the runloop stops, for whatever reason.
    fn session_ended(&self, session: u64, end: &SessionEnd);
}

/// Why a runloop stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// Cancelled from outside, usually by `disconnect`.
    Cancelled,
    /// The device closed the stream or a read failed.
    StreamClosed(StreamError),
    /// The stream delivered something that could not be framed or decoded.
    Failed(StreamError),
}

impl SessionEnd {
    /// The error that ended the session, if any.
    pub fn error(&self) -> Option<&StreamError> {
        match self {
            SessionEnd::Cancelled => None,
            SessionEnd::StreamClosed(e) | SessionEnd::Failed(e) => Some(e),
        }
    }
}

/// One session's receive loop.
pub struct StreamRunloop<K: FrameSink> {
    session: u64,
    socket: Box<dyn Socket>,
    framer: MessageFramer,
    assembler: FrameAssembler,
    cancel: CancellationToken,
    sink: K,
}

impl<K: FrameSink> StreamRunloop<K> {
    pub fn new(
        session: u64,
        socket: Box<dyn Socket>,
        config: &StreamConfig,
        cancel: CancellationToken,
        sink: K,
    ) -> Self {
        Self {
            session,
            socket,
            framer: MessageFramer::with_capacity(config.receive_buffer_size()),
            assembler: FrameAssembler::new(config),
            cancel,
            sink,
        }
    }

    /// Run on a dedicated, named thread.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let session = self.session;
        thread::Builder::new()
            .name(RUNLOOP_THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(|e| {
                StreamError::connection_failed_with_source(
                    format!("spawning runloop for session {}", session),
                    Box::new(e),
                )
            })
    }

    /// Pump frames until the stream ends, then report the end to the sink.
    pub fn run(mut self) {
        info!(session = self.session, "Runloop started");
        let end = self.pump();

        match &end {
            SessionEnd::Cancelled => info!(session = self.session, "Runloop cancelled"),
            SessionEnd::StreamClosed(e) => info!(session = self.session, "Stream closed: {}", e),
            SessionEnd::Failed(e) => error!(session = self.session, "Stream failed: {}", e),
        }
        info!(
            session = self.session,
            "Runloop ended after {} messages",
            self.framer.messages_received()
        );

        self.sink.session_ended(self.session, &end);
    }

    fn pump(&mut self) -> SessionEnd {
        let mut sequence = 0u64;

        loop {
            // Cancellation is observed between frames; a blocked read is
            // released only when the socket returns or is interrupted.
            if self.cancel.is_cancelled() {
                return SessionEnd::Cancelled;
            }

            let body = match self.framer.next_body(self.socket.as_mut()) {
                Ok(body) => body,
                Err(_) if self.cancel.is_cancelled() => return SessionEnd::Cancelled,
                Err(e) if e.is_end_of_stream() => return SessionEnd::StreamClosed(e),
                Err(e) => return SessionEnd::Failed(e),
            };

            let frame = match self.assembler.assemble(body) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(session = self.session, "Dropping session on undecodable frame: {}", e);
                    return SessionEnd::Failed(e);
                }
            };

            if self.cancel.is_cancelled() {
                debug!(session = self.session, "Discarding frame received after cancellation");
                return SessionEnd::Cancelled;
            }

            sequence += 1;
            trace!(session = self.session, "Frame {}", sequence);
            self.sink.frame_ready(self.session, &frame, sequence);
        }
    }
}
