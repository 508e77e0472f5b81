use std::cell::RefCell;
use std::rc::Rc;

use bridge_core::{
    Bridge, BridgeError, BridgeOptions, BridgeResult, ConnectionState, DeliverySink,
    MessageQueue, NativeChannelFactory, NativeHost, Priority, TransportDetector, TransportKind,
};
use bridge_testing::{StubTransportFactory, TestHarness, UnavailableFactory, WireLog};
use futures::FutureExt;
use serde_json::{json, Value};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct FakeHost {
    sink: RefCell<Option<DeliverySink>>,
    posted: RefCell<Vec<Value>>,
}

impl FakeHost {
    fn reply(&self, frame: Value) {
        let sink = self.sink.borrow().clone();
        if let Some(sink) = sink {
            sink.deliver(frame.to_string());
        }
    }
}

impl NativeHost for FakeHost {
    fn attach(&self, sink: DeliverySink) -> BridgeResult<()> {
        *self.sink.borrow_mut() = Some(sink);
        Ok(())
    }

    fn post(&self, frame: &[u8]) -> BridgeResult<()> {
        self.posted.borrow_mut().push(serde_json::from_slice(frame)?);
        Ok(())
    }

    fn detach(&self) {
        self.sink.borrow_mut().take();
    }
}

#[test]
fn detection_skips_absent_and_refusing_channels() {
    init_logger();
    let harness = TestHarness::new();
    let log = WireLog::new();
    let detector = TransportDetector::new()
        .with(StubTransportFactory::unavailable(TransportKind::Native))
        .with(UnavailableFactory(TransportKind::Socket))
        .with(StubTransportFactory::new(TransportKind::InMemory, log.clone()));
    let bridge = Bridge::new(harness.handle(), BridgeOptions::default(), detector);

    assert_eq!(bridge.connect().expect("connect"), TransportKind::InMemory);
    assert_eq!(bridge.transport_kind(), Some(TransportKind::InMemory));
    assert!(log.is_open());
    assert_eq!(
        bridge.connect().expect("already connected"),
        TransportKind::InMemory
    );
    assert_eq!(log.open_count(), 1);
}

#[test]
fn native_host_channel_carries_requests_and_replies() {
    init_logger();
    let harness = TestHarness::new();
    let host = Rc::new(FakeHost::default());
    let detector = TransportDetector::new().with(NativeChannelFactory::new(Some(
        host.clone() as Rc<dyn NativeHost>,
    )));
    let bridge = Bridge::new(harness.handle(), BridgeOptions::default(), detector);
    assert_eq!(bridge.connect().expect("connect"), TransportKind::Native);

    let mut reply = bridge.request("getDeviceInfo", json!({}));
    let posted = host.posted.borrow().last().cloned().expect("request posted");
    assert_eq!(posted["type"], json!("getDeviceInfo"));
    assert!((&mut reply).now_or_never().is_none());

    host.reply(json!({"id": posted["id"], "success": true, "data": {"os": "test"}}));
    assert_eq!(
        reply.now_or_never().expect("resolved").expect("success"),
        json!({"os": "test"})
    );

    bridge.disconnect();
    assert!(host.sink.borrow().is_none());
    assert_eq!(bridge.state(), ConnectionState::Disconnected);
}

#[test]
fn queue_splits_large_backlogs_across_frames() {
    init_logger();
    let harness = TestHarness::new();
    let log = WireLog::new();
    let options = BridgeOptions::default();
    let bridge = Bridge::new(
        harness.handle(),
        options.clone(),
        TransportDetector::new().with(StubTransportFactory::new(
            TransportKind::InMemory,
            log.clone(),
        )),
    );
    bridge.connect().expect("connect");
    let queue = MessageQueue::new(harness.handle(), &options);
    let sender = bridge.clone();
    queue.set_sender(move |batch| sender.send_batch(batch));

    for n in 0..60 {
        queue.enqueue("log", json!({ "n": n }), Priority::Low);
    }
    harness.advance(options.flush_interval_ms);
    assert_eq!(log.frame_count(), 1);
    assert_eq!(queue.pending_count(), 10);

    harness.advance(options.flush_interval_ms);
    assert_eq!(log.frame_count(), 2);
    let sequence: Vec<Value> = log
        .messages()
        .into_iter()
        .map(|message| message.payload["n"].clone())
        .collect();
    assert_eq!(sequence, (0..60).map(|n| json!(n)).collect::<Vec<_>>());
    assert_eq!(queue.stats().batches, 2);
}

#[test]
fn messages_that_keep_failing_are_dead_lettered() {
    init_logger();
    let harness = TestHarness::new();
    let log = WireLog::new();
    let options = BridgeOptions::default().with_max_flush_attempts(2);
    let bridge = Bridge::new(
        harness.handle(),
        options.clone(),
        TransportDetector::new().with(StubTransportFactory::new(
            TransportKind::InMemory,
            log.clone(),
        )),
    );
    bridge.connect().expect("connect");
    let queue = MessageQueue::new(harness.handle(), &options);
    let sender = bridge.clone();
    queue.set_sender(move |batch| sender.send_batch(batch));

    log.set_failing(true);
    queue.enqueue("analytics", json!({"event": "open"}), Priority::Normal);
    assert!(matches!(
        queue.flush_immediate(),
        Err(BridgeError::Transport(_))
    ));
    assert_eq!(queue.pending_for(Priority::High), 1);
    assert!(queue.flush_immediate().is_err());

    assert_eq!(queue.pending_count(), 0);
    let dead = queue.take_dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message.message_type, "analytics");
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(log.failed_writes(), 2);
    assert_eq!(queue.stats().dead_lettered, 1);
}

#[test]
fn options_load_from_partial_json() {
    let options =
        BridgeOptions::from_json(r#"{"requestTimeoutMs": 1000, "batchSize": 10}"#).expect("json");
    assert_eq!(options.request_timeout_ms, 1000);
    assert_eq!(options.batch_size, 10);
    assert_eq!(options.flush_interval_ms, 16);

    assert!(matches!(
        BridgeOptions::from_json(r#"{"batchSize": 0}"#),
        Err(BridgeError::Config(_))
    ));
    assert!(matches!(
        BridgeOptions::from_json("not json"),
        Err(BridgeError::Config(_))
    ));
}
