//! Connection manager: device discovery and the streaming session lifecycle.
//!
//! [`Record3DStream`] is the entry point. It lists devices through a
//! [`Transport`], opens one streaming session at a time, and runs each session
//! on its own runloop thread. Frames reach the caller two ways:
//!
//! - synchronously, through the callback set with
//!   [`Record3DStream::set_on_new_frame`], with a zero-copy [`Frame`] view
//! - asynchronously, through [`Record3DStream::subscribe`], as shared
//!   [`FramePacket`] copies
//!
//! ```text
//!              connect ok
//! Disconnected ──────────► Streaming
//!       ▲                      │
//!       └──────────────────────┘
//!        disconnect | runloop exit
//! ```
//!
//! Sessions never reconnect on their own. When a session ends the stopped
//! callback fires once and the caller decides whether to connect again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::runloop::{FrameSink, SessionEnd, StreamRunloop};
use crate::stream::ThrottleExt;
use crate::transport::{SocketInterrupt, TcpEndpoint, TcpTransport, Transport};
use crate::types::{ConnectionState, DeviceHandle, Frame, FramePacket, UpdateRate};
use crate::{Result, StreamError};

#[cfg(test)]
mod tests;

type FrameCallback = Arc<dyn Fn(&Frame<'_>) + Send + Sync>;
type StoppedCallback = Arc<dyn Fn() + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking callback must not wedge the manager
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Callbacks {
    on_new_frame: Option<FrameCallback>,
    on_stream_stopped: Option<StoppedCallback>,
}

struct ActiveSession {
    id: u64,
    device: DeviceHandle,
    cancel: CancellationToken,
    interrupt: Option<SocketInterrupt>,
    thread: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn join(mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        // The stopped callback may reconnect or drop the manager from the
        // runloop itself; that thread is already on its way out.
        if thread.thread().id() == thread::current().id() {
            debug!(session = self.id, "Not joining runloop from its own thread");
            return;
        }

        if thread.join().is_err() {
            warn!(session = self.id, "Runloop thread panicked");
        } else {
            debug!(session = self.id, "Runloop thread joined");
        }
    }
}

#[derive(Default)]
struct SessionSlot {
    state: ConnectionState,
    current: Option<ActiveSession>,
    /// Stopped sessions whose runloop had not exited when they were replaced
    retired: Vec<ActiveSession>,
    last_id: u64,
}

/// State shared between the manager and its runloops.
struct Shared {
    session: Mutex<SessionSlot>,
    callbacks: Mutex<Callbacks>,
    frames: watch::Sender<Option<Arc<FramePacket>>>,
}

impl Shared {
    /// Move Streaming to Disconnected.
    ///
    /// With `Some(id)`, only that session may be stopped. Returns whether this
    /// call performed the transition; the caller then owes one stopped
    /// notification.
    fn stop(&self, session: Option<u64>) -> bool {
        let (id, interrupt) = {
            let mut slot = lock(&self.session);
            if !slot.state.is_streaming() {
                return false;
            }
            let Some(current) = slot.current.as_ref() else {
                return false;
            };
            if session.is_some_and(|id| id != current.id) {
                debug!(session = ?session, current = current.id, "Ignoring stop from stale session");
                return false;
            }

            current.cancel.cancel();
            let stopped = (current.id, current.interrupt.clone());
            slot.state = ConnectionState::Disconnected;
            stopped
        };

        // Release a runloop parked in a read
        if let Some(interrupt) = interrupt {
            interrupt.interrupt();
        }

        // Ends every subscription to this session
        self.frames.send_replace(None);
        info!(session = id, "Streaming stopped");
        true
    }

    fn is_current(&self, session: u64) -> bool {
        let slot = lock(&self.session);
        slot.state.is_streaming() && slot.current.as_ref().is_some_and(|current| current.id == session)
    }

    /// Join retired runloops that have already exited.
    fn reap_finished(&self) {
        let finished: Vec<ActiveSession> = {
            let mut slot = lock(&self.session);
            let (finished, running): (Vec<_>, Vec<_>) =
                std::mem::take(&mut slot.retired).into_iter().partition(ActiveSession::is_finished);
            slot.retired = running;
            finished
        };

        for session in finished {
            session.join();
        }
    }

    fn notify_stopped(&self) {
        let callback = lock(&self.callbacks).on_stream_stopped.clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl FrameSink for Arc<Shared> {
    fn frame_ready(&self, session: u64, frame: &Frame<'_>, sequence: u64) {
        // A stop may land between the runloop's cancellation check and here
        if !self.is_current(session) {
            debug!(session, sequence, "Dropping frame from stopped session");
            return;
        }

        let callback = lock(&self.callbacks).on_new_frame.clone();
        if let Some(callback) = callback {
            callback(frame);
        }

        // Copy out only when someone is listening, and never after the
        // session has been stopped
        if self.frames.receiver_count() > 0 && self.is_current(session) {
            self.frames.send_replace(Some(Arc::new(frame.to_packet(sequence))));
        }
    }

    fn session_ended(&self, session: u64, end: &SessionEnd) {
        if let Some(error) = end.error() {
            debug!(session, retryable = error.is_retryable(), "Session ended: {}", error);
        }
        if self.stop(Some(session)) {
            self.notify_stopped();
        }
    }
}

/// Client for a device's RGBD stream.
///
/// All methods take `&self`; wrap the manager in an `Arc` to drive it from
/// several threads. Dropping it stops any active session and joins runloop
/// threads that have exited or can be interrupted.
pub struct Record3DStream {
    /// Serializes connect and disconnect
    api: Mutex<()>,
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    config: StreamConfig,
}

impl Record3DStream {
    /// Create a manager over `transport`.
    pub fn new<T: Transport>(transport: T, config: StreamConfig) -> Result<Self> {
        Self::with_shared_transport(Arc::new(transport), config)
    }

    /// Create a manager over a transport that is also used elsewhere.
    pub fn with_shared_transport(
        transport: Arc<dyn Transport>,
        config: StreamConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (frames, _) = watch::channel(None);

        Ok(Self {
            api: Mutex::new(()),
            shared: Arc::new(Shared {
                session: Mutex::new(SessionSlot::default()),
                callbacks: Mutex::new(Callbacks::default()),
                frames,
            }),
            transport,
            config,
        })
    }

    /// Create a manager that reaches devices over TCP.
    ///
    /// The configured read timeout is applied to every stream socket.
    pub fn over_tcp(endpoints: Vec<TcpEndpoint>, config: StreamConfig) -> Result<Self> {
        let transport = TcpTransport::new(endpoints).with_read_timeout(config.read_timeout());
        Self::new(transport, config)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// USB-attached devices, in the order the transport reports them.
    pub fn list_devices(&self) -> Result<Vec<DeviceHandle>> {
        let descriptors = self.transport.list_devices()?;
        let total = descriptors.len();
        let devices: Vec<DeviceHandle> = descriptors
            .into_iter()
            .filter(|descriptor| descriptor.is_usb())
            .map(|descriptor| descriptor.device)
            .collect();

        debug!("Discovered {} devices, {} over USB", total, devices.len());
        Ok(devices)
    }

    /// Open a stream to `device` and start its runloop.
    ///
    /// Fails with [`StreamError::AlreadyStreaming`] while a session is active,
    /// and with a connection error if the device refuses the socket. Either
    /// way the manager stays as it was.
    pub fn connect(&self, device: &DeviceHandle) -> Result<()> {
        let _api = lock(&self.api);

        {
            let mut slot = lock(&self.shared.session);
            if slot.state.is_streaming() {
                warn!(%device, "Connect rejected: already streaming");
                return Err(StreamError::AlreadyStreaming);
            }
            // The old runloop may still be parked in a read; never wait for it
            if let Some(previous) = slot.current.take() {
                slot.retired.push(previous);
            }
        }
        self.shared.reap_finished();

        info!(%device, port = self.config.device_port, "Connecting");
        let socket = self.transport.connect(device, self.config.device_port)?;
        let interrupt = socket.interrupt_handle();

        let mut slot = lock(&self.shared.session);
        slot.last_id += 1;
        let id = slot.last_id;
        let cancel = CancellationToken::new();
        let runloop = StreamRunloop::new(
            id,
            socket,
            &self.config,
            cancel.clone(),
            Arc::clone(&self.shared),
        );

        // Streaming before the thread starts, so an instant exit still sees
        // its own session.
        slot.state = ConnectionState::Streaming;
        slot.current =
            Some(ActiveSession { id, device: device.clone(), cancel, interrupt, thread: None });

        match runloop.spawn() {
            Ok(handle) => {
                if let Some(current) = slot.current.as_mut() {
                    current.thread = Some(handle);
                }
                info!(session = id, %device, "Streaming started");
                Ok(())
            }
            Err(e) => {
                slot.state = ConnectionState::Disconnected;
                slot.current = None;
                Err(e)
            }
        }
    }

    /// Stop the active session, if any.
    ///
    /// Idempotent. The stopped callback fires once per session, from the
    /// calling thread. A runloop blocked in a read is released through the
    /// socket's interrupt handle; without one it finishes that read first,
    /// bounded by the read timeout. Either way this call does not wait.
    pub fn disconnect(&self) {
        let stopped = {
            let _api = lock(&self.api);
            self.shared.stop(None)
        };

        if stopped {
            self.shared.notify_stopped();
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.session).state
    }

    pub fn is_streaming(&self) -> bool {
        self.state().is_streaming()
    }

    /// Device of the active session.
    pub fn connected_device(&self) -> Option<DeviceHandle> {
        let slot = lock(&self.shared.session);
        if !slot.state.is_streaming() {
            return None;
        }
        slot.current.as_ref().map(|session| session.device.clone())
    }

    /// Called on the runloop thread for every assembled frame.
    ///
    /// The frame borrows session buffers that the next frame overwrites; use
    /// [`Frame::to_packet`] to keep one. A slow callback slows the stream.
    pub fn set_on_new_frame<F>(&self, callback: F)
    where
        F: Fn(&Frame<'_>) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).on_new_frame = Some(Arc::new(callback));
    }

    /// Called once each time a session stops, whatever stopped it.
    pub fn set_on_stream_stopped<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).on_stream_stopped = Some(Arc::new(callback));
    }

    /// Remove both callbacks.
    pub fn clear_callbacks(&self) {
        *lock(&self.shared.callbacks) = Callbacks::default();
    }

    /// Frames of the active session, or of the next one if none is active.
    ///
    /// The stream ends when that session stops. With a throttled rate only the
    /// latest frame per interval is yielded; throttled subscriptions must be
    /// created inside a Tokio runtime with the time driver enabled.
    pub fn subscribe(&self, rate: UpdateRate) -> impl Stream<Item = Arc<FramePacket>> + 'static {
        // WatchStream yields the current value first. Between sessions that
        // is None, so skip leading Nones and end on the first one after.
        let frames = WatchStream::new(self.shared.frames.subscribe())
            .skip_while(|packet| {
                let waiting = packet.is_none();
                async move { waiting }
            })
            .take_while(|packet| {
                let live = packet.is_some();
                async move { live }
            })
            .filter_map(|packet| async move { packet });

        match rate.throttle_interval(self.config.source_hz) {
            None => frames.boxed(),
            Some(period) => frames.throttle(period).boxed(),
        }
    }
}

impl std::fmt::Debug for Record3DStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record3DStream")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for Record3DStream {
    fn drop(&mut self) {
        debug!("Dropping Record3DStream");
        self.disconnect();

        let sessions: Vec<ActiveSession> = {
            let mut slot = lock(&self.shared.session);
            let mut sessions = std::mem::take(&mut slot.retired);
            sessions.extend(slot.current.take());
            sessions
        };

        for session in sessions {
            if session.is_finished() || session.interrupt.is_some() {
                session.join();
            } else {
                // It owns its socket and exits when the read returns
                debug!(session = session.id, "Detaching runloop parked in an uninterruptible read");
            }
        }
    }
}
