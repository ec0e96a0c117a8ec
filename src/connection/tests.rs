//! Lifecycle tests for the connection manager.
//!
//! Sessions run on real runloop threads over scripted sockets, so every test
//! waits on channels with a timeout rather than sleeping.

use super::*;
use crate::assembler::FrameAssembler;
use crate::test_utils::{
    ChannelSocket, ChunkedSocket, MockTransport, UninterruptibleSocket, envelope_message,
    init_test_tracing, small_config, synthetic_body, test_device,
};
use crate::types::{ConnectionType, DeviceDescriptor, IntrinsicMatrixCoeffs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

/// Upper bound for calls that must not wait on a runloop.
const PROMPT: Duration = Duration::from_secs(1);

fn frame_message(color: [u8; 3], depth: f32) -> Vec<u8> {
    let k = IntrinsicMatrixCoeffs::from_pinhole(12.0, 12.0, 8.0, 4.0);
    envelope_message(&synthetic_body(&small_config(), color, depth, k))
}

/// Manager over `transport` with counting callbacks.
struct Harness {
    manager: Record3DStream,
    frames: mpsc::Receiver<(f32, u64)>,
    stops: mpsc::Receiver<()>,
    stop_count: Arc<AtomicUsize>,
}

impl Harness {
    fn new(transport: MockTransport) -> Self {
        init_test_tracing();
        let manager = Record3DStream::new(transport, small_config()).unwrap();
        Self::wire(manager)
    }

    fn with_shared(transport: Arc<MockTransport>) -> Self {
        init_test_tracing();
        let manager = Record3DStream::with_shared_transport(transport, small_config()).unwrap();
        Self::wire(manager)
    }

    fn wire(manager: Record3DStream) -> Self {
        let (frame_tx, frames) = mpsc::channel();
        let (stop_tx, stops) = mpsc::channel();
        let stop_count = Arc::new(AtomicUsize::new(0));

        let sequence = AtomicUsize::new(0);
        manager.set_on_new_frame(move |frame| {
            let n = sequence.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            let _ = frame_tx.send((frame.depth_at(0, 0).unwrap(), n));
        });

        let counter = Arc::clone(&stop_count);
        manager.set_on_stream_stopped(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = stop_tx.send(());
        });

        Self { manager, frames, stops, stop_count }
    }

    fn stops(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }
}

#[test]
fn list_devices_keeps_usb_devices_in_order() {
    let transport = MockTransport::new(vec![
        DeviceDescriptor::new(DeviceHandle::new(1, 0x12a8, "usb-a"), ConnectionType::Usb),
        DeviceDescriptor::new(DeviceHandle::new(2, 0x12a8, "wifi"), ConnectionType::Network),
        DeviceDescriptor::new(DeviceHandle::new(3, 0x12a8, "usb-b"), ConnectionType::Usb),
    ]);
    let harness = Harness::new(transport);

    let devices = harness.manager.list_devices().unwrap();
    let udids: Vec<_> = devices.iter().map(|d| d.udid.as_str()).collect();

    assert_eq!(udids, vec!["usb-a", "usb-b"]);
    assert_eq!(harness.manager.state(), ConnectionState::Disconnected);
}

#[test]
fn list_devices_with_nothing_attached_is_empty() {
    let harness = Harness::new(MockTransport::new(Vec::new()));
    assert!(harness.manager.list_devices().unwrap().is_empty());
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let config = StreamConfig { frame_width: 0, ..small_config() };
    let err = Record3DStream::new(MockTransport::single_usb(), config).unwrap_err();
    assert!(matches!(err, StreamError::Config { .. }));
}

#[test]
fn refused_connect_leaves_manager_disconnected() {
    let harness = Harness::new(MockTransport::single_usb());

    let err = harness.manager.connect(&test_device()).unwrap_err();

    assert!(matches!(err, StreamError::Connection { .. }));
    assert!(err.is_retryable());
    assert!(!harness.manager.is_streaming());
    assert_eq!(harness.manager.connected_device(), None);
    assert_eq!(harness.stops(), 0);
}

#[test]
fn connect_uses_configured_port() {
    let transport = Arc::new(MockTransport::single_usb());
    let (tx, socket) = ChannelSocket::pair();
    transport.push_socket(socket);
    let harness = Harness::with_shared(Arc::clone(&transport));

    harness.manager.connect(&test_device()).unwrap();

    assert_eq!(transport.requested_ports(), vec![1337]);
    assert_eq!(harness.manager.connected_device(), Some(test_device()));
    drop(tx);
}

#[test]
fn frames_flow_until_disconnect() {
    let transport = MockTransport::single_usb();
    let (tx, socket) = ChannelSocket::pair();
    transport.push_socket(socket);
    let harness = Harness::new(transport);

    harness.manager.connect(&test_device()).unwrap();
    assert!(harness.manager.is_streaming());

    tx.send(frame_message([200, 10, 10], 1.0)).unwrap();
    tx.send(frame_message([10, 200, 10], 2.0)).unwrap();
    assert_eq!(harness.frames.recv_timeout(WAIT).unwrap(), (1.0, 1));
    assert_eq!(harness.frames.recv_timeout(WAIT).unwrap(), (2.0, 2));

    harness.manager.disconnect();
    assert_eq!(harness.manager.state(), ConnectionState::Disconnected);
    assert_eq!(harness.stops(), 1);

    // Further disconnects are no-ops
    harness.manager.disconnect();
    harness.manager.disconnect();
    assert_eq!(harness.stops(), 1);

    drop(tx);
}

#[test]
fn connect_while_streaming_is_rejected() {
    let transport = Arc::new(MockTransport::single_usb());
    let (tx, socket) = ChannelSocket::pair();
    let (_spare_tx, spare) = ChannelSocket::pair();
    transport.push_socket(socket);
    transport.push_socket(spare);
    let harness = Harness::with_shared(Arc::clone(&transport));

    harness.manager.connect(&test_device()).unwrap();
    let err = harness.manager.connect(&test_device()).unwrap_err();

    assert!(matches!(err, StreamError::AlreadyStreaming));
    assert_eq!(transport.connect_count(), 1);
    assert!(harness.manager.is_streaming());

    // The original session keeps delivering
    tx.send(frame_message([1, 2, 3], 0.5)).unwrap();
    assert_eq!(harness.frames.recv_timeout(WAIT).unwrap().0, 0.5);
    drop(tx);
}

#[test]
fn stream_closing_mid_body_stops_once_without_frame() {
    let transport = MockTransport::single_usb();
    let message = frame_message([1, 2, 3], 0.0);
    let truncated = message[..message.len() / 2].to_vec();
    transport.push_socket(ChunkedSocket::new(truncated, 64));
    let harness = Harness::new(transport);

    harness.manager.connect(&test_device()).unwrap();
    harness.stops.recv_timeout(WAIT).unwrap();

    assert_eq!(harness.manager.state(), ConnectionState::Disconnected);
    assert!(harness.frames.try_recv().is_err());

    harness.manager.disconnect();
    assert_eq!(harness.stops(), 1);
}

#[test]
fn failing_socket_ends_session() {
    let transport = MockTransport::single_usb();
    let mut stream = frame_message([5, 5, 5], 3.0);
    stream.extend_from_slice(&[0u8; 7]);
    transport.push_socket(ChunkedSocket::new(stream, 100).failing());
    let harness = Harness::new(transport);

    harness.manager.connect(&test_device()).unwrap();

    assert_eq!(harness.frames.recv_timeout(WAIT).unwrap(), (3.0, 1));
    harness.stops.recv_timeout(WAIT).unwrap();
    assert!(!harness.manager.is_streaming());
}

#[test]
fn reconnect_after_stream_ends() {
    let transport = Arc::new(MockTransport::single_usb());
    transport.push_socket(ChunkedSocket::new(frame_message([9, 9, 9], 1.0), 32));
    let harness = Harness::with_shared(Arc::clone(&transport));

    harness.manager.connect(&test_device()).unwrap();
    harness.frames.recv_timeout(WAIT).unwrap();
    harness.stops.recv_timeout(WAIT).unwrap();

    let (tx, socket) = ChannelSocket::pair();
    transport.push_socket(socket);
    harness.manager.connect(&test_device()).unwrap();
    assert!(harness.manager.is_streaming());

    tx.send(frame_message([9, 9, 9], 4.0)).unwrap();
    assert_eq!(harness.frames.recv_timeout(WAIT).unwrap().0, 4.0);
    assert_eq!(harness.stops(), 1);
    drop(tx);
}

#[test]
fn stale_session_cannot_stop_newer_one() {
    let transport = Arc::new(MockTransport::single_usb());
    let (first_tx, first) = ChannelSocket::pair();
    transport.push_socket(first);
    let harness = Harness::with_shared(Arc::clone(&transport));

    harness.manager.connect(&test_device()).unwrap();
    harness.manager.disconnect();
    drop(first_tx);

    let (second_tx, second) = ChannelSocket::pair();
    transport.push_socket(second);
    harness.manager.connect(&test_device()).unwrap();

    // A late exit report from session 1 must not touch session 2
    harness.manager.shared.session_ended(1, &SessionEnd::Cancelled);

    assert!(harness.manager.is_streaming());
    assert_eq!(harness.stops(), 1);

    second_tx.send(frame_message([0, 0, 0], 6.0)).unwrap();
    assert_eq!(harness.frames.recv_timeout(WAIT).unwrap().0, 6.0);
    drop(second_tx);
}

#[test]
fn disconnect_from_frame_callback_notifies_once() {
    init_test_tracing();
    let transport = MockTransport::single_usb();
    let (tx, socket) = ChannelSocket::pair();
    transport.push_socket(socket);

    let manager = Arc::new(Record3DStream::new(transport, small_config()).unwrap());
    let stops = Arc::new(AtomicUsize::new(0));
    let (stop_tx, stop_rx) = mpsc::channel();

    let weak = Arc::downgrade(&manager);
    manager.set_on_new_frame(move |_| {
        if let Some(manager) = weak.upgrade() {
            manager.disconnect();
        }
    });
    let counter = Arc::clone(&stops);
    manager.set_on_stream_stopped(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = stop_tx.send(());
    });

    manager.connect(&test_device()).unwrap();
    tx.send(frame_message([1, 1, 1], 1.0)).unwrap();
    stop_rx.recv_timeout(WAIT).unwrap();

    // Give the runloop time to report its own exit
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(!manager.is_streaming());
    drop(tx);
}

#[test]
fn drop_stops_session_and_joins_runloop() {
    let transport = MockTransport::single_usb();
    let (tx, socket) = ChannelSocket::pair();
    transport.push_socket(socket);
    let harness = Harness::new(transport);

    harness.manager.connect(&test_device()).unwrap();
    let Harness { manager, stop_count, .. } = harness;

    // Keep bytes flowing so the blocked read returns and sees the cancellation
    let message = frame_message([3, 3, 3], 1.0);
    let feeder = std::thread::spawn(move || {
        while tx.send(message.clone()).is_ok() {
            std::thread::sleep(Duration::from_millis(10));
        }
    });

    drop(manager);
    feeder.join().unwrap();
    assert_eq!(stop_count.load(Ordering::SeqCst), 1);
}

fn current_runloop_exited(manager: &Record3DStream) -> bool {
    lock(&manager.shared.session).current.as_ref().is_some_and(ActiveSession::is_finished)
}

#[test]
fn disconnect_releases_a_runloop_parked_in_a_read() {
    let transport = Arc::new(MockTransport::single_usb());
    let (idle_tx, idle) = ChannelSocket::pair();
    transport.push_socket(idle);
    let harness = Harness::with_shared(Arc::clone(&transport));

    harness.manager.connect(&test_device()).unwrap();
    harness.manager.disconnect();

    // Nothing is ever sent, so only the interrupt can end the read
    let deadline = Instant::now() + WAIT;
    while !current_runloop_exited(&harness.manager) {
        assert!(Instant::now() < deadline, "runloop still parked after disconnect");
        std::thread::sleep(Duration::from_millis(5));
    }

    let (next_tx, next) = ChannelSocket::pair();
    transport.push_socket(next);
    harness.manager.connect(&test_device()).unwrap();
    assert!(lock(&harness.manager.shared.session).retired.is_empty());
    assert_eq!(harness.stops(), 1);

    drop(idle_tx);
    drop(next_tx);
}

#[test]
fn reconnect_does_not_wait_for_an_uninterruptible_runloop() {
    init_test_tracing();
    let transport = Arc::new(MockTransport::single_usb());
    let (idle_tx, idle) = ChannelSocket::pair();
    transport.push_socket(UninterruptibleSocket(idle));
    let manager =
        Arc::new(Record3DStream::with_shared_transport(transport.clone(), small_config()).unwrap());

    manager.connect(&test_device()).unwrap();
    manager.disconnect();

    // The first runloop stays blocked in its read for the rest of the test
    let (next_tx, next) = ChannelSocket::pair();
    transport.push_socket(next);
    let (done_tx, done_rx) = mpsc::channel();
    let reconnecting = Arc::clone(&manager);
    std::thread::spawn(move || {
        let _ = done_tx.send(reconnecting.connect(&test_device()).is_ok());
    });
    assert!(done_rx.recv_timeout(PROMPT).expect("reconnect blocked on the old runloop"));
    assert!(manager.is_streaming());

    let (done_tx, done_rx) = mpsc::channel();
    let disconnecting = Arc::clone(&manager);
    std::thread::spawn(move || {
        disconnecting.disconnect();
        let _ = done_tx.send(());
    });
    done_rx.recv_timeout(PROMPT).expect("disconnect blocked behind connect");
    assert!(!manager.is_streaming());
    assert_eq!(lock(&manager.shared.session).retired.len(), 1);

    drop(idle_tx);
    drop(next_tx);
}

#[test]
fn drop_with_an_idle_socket_returns_promptly() {
    let transport = MockTransport::single_usb();
    let (idle_tx, idle) = ChannelSocket::pair();
    transport.push_socket(idle);
    let harness = Harness::new(transport);

    harness.manager.connect(&test_device()).unwrap();
    let Harness { manager, stop_count, .. } = harness;

    let (done_tx, done_rx) = mpsc::channel();
    std::thread::spawn(move || {
        drop(manager);
        let _ = done_tx.send(());
    });
    done_rx.recv_timeout(PROMPT).expect("drop blocked on an idle read");
    assert_eq!(stop_count.load(Ordering::SeqCst), 1);
    drop(idle_tx);
}

#[test]
fn frames_from_a_stopped_session_never_reach_the_callback() {
    let transport = MockTransport::single_usb();
    let (tx, socket) = ChannelSocket::pair();
    transport.push_socket(socket);
    let harness = Harness::new(transport);

    let config = small_config();
    let body = synthetic_body(&config, [2, 2, 2], 9.0, IntrinsicMatrixCoeffs::default());
    let mut assembler = FrameAssembler::new(&config);
    let frame = assembler.assemble(&body).unwrap();

    harness.manager.connect(&test_device()).unwrap();
    harness.manager.shared.frame_ready(1, &frame, 1);
    assert_eq!(harness.frames.recv_timeout(WAIT).unwrap(), (9.0, 1));

    // A frame that raced the stop arrives after the stopped notification
    harness.manager.disconnect();
    harness.stops.recv_timeout(WAIT).unwrap();
    harness.manager.shared.frame_ready(1, &frame, 2);

    assert!(harness.frames.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(harness.stops(), 1);
    drop(tx);
}

#[test]
fn panicking_callback_does_not_poison_manager() {
    let transport = MockTransport::single_usb();
    transport.push_socket(ChunkedSocket::new(frame_message([1, 1, 1], 1.0), 64));
    let harness = Harness::new(transport);
    harness.manager.set_on_new_frame(|_| panic!("callback failure"));

    harness.manager.connect(&test_device()).unwrap();
    std::thread::sleep(Duration::from_millis(200));

    // The runloop died with the panic; the manager still answers
    harness.manager.disconnect();
    assert!(!harness.manager.is_streaming());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribe_yields_packets_until_session_stops() {
    let transport = MockTransport::single_usb();
    let (tx, socket) = ChannelSocket::pair();
    transport.push_socket(socket);
    let harness = Harness::new(transport);

    let mut packets = harness.manager.subscribe(UpdateRate::Native);
    harness.manager.connect(&test_device()).unwrap();
    tx.send(frame_message([250, 250, 250], 2.0)).unwrap();

    let packet = tokio::time::timeout(WAIT, packets.next()).await.unwrap().unwrap();
    assert_eq!(packet.sequence, 1);
    assert_eq!((packet.width, packet.height), (16, 8));
    assert_eq!(packet.as_frame().depth_at(15, 7), Some(2.0));

    harness.manager.disconnect();
    assert!(tokio::time::timeout(WAIT, packets.next()).await.unwrap().is_none());
    drop(tx);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn throttled_subscription_delivers_latest() {
    let transport = MockTransport::single_usb();
    let (tx, socket) = ChannelSocket::pair();
    transport.push_socket(socket);
    let harness = Harness::new(transport);

    let mut packets = harness.manager.subscribe(UpdateRate::Max(5));
    harness.manager.connect(&test_device()).unwrap();

    tx.send(frame_message([1, 1, 1], 1.0)).unwrap();
    let first = tokio::time::timeout(WAIT, packets.next()).await.unwrap().unwrap();
    assert_eq!(first.sequence, 1);

    for depth in [2.0, 3.0, 4.0] {
        tx.send(frame_message([1, 1, 1], depth)).unwrap();
    }
    // Wait until the callback has seen all of them
    for _ in 0..4 {
        harness.frames.recv_timeout(WAIT).unwrap();
    }

    let latest = tokio::time::timeout(WAIT, packets.next()).await.unwrap().unwrap();
    assert_eq!(latest.sequence, 4);
    assert_eq!(latest.as_frame().depth_at(0, 0), Some(4.0));

    harness.manager.disconnect();
    drop(tx);
}
