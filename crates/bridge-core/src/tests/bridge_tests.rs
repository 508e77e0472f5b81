use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};

use super::{Bridge, ConnectionState, DeliverySink};
use crate::error::{BridgeError, BridgeResult};
use crate::message::BridgeMessage;
use crate::options::BridgeOptions;
use crate::runtime::TestRuntime;
use crate::transport::{Transport, TransportDetector, TransportFactory, TransportKind};

type Responder = Box<dyn Fn(&Value, &DeliverySink)>;

#[derive(Clone, Default)]
struct Wire {
    frames: Rc<RefCell<Vec<Value>>>,
    sink: Rc<RefCell<Option<DeliverySink>>>,
}

struct LoopbackTransport {
    wire: Wire,
    responder: Option<Responder>,
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::InMemory
    }

    fn open(&mut self, sink: DeliverySink) -> BridgeResult<()> {
        *self.wire.sink.borrow_mut() = Some(sink);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> BridgeResult<()> {
        let value: Value = serde_json::from_slice(frame)?;
        self.wire.frames.borrow_mut().push(value.clone());
        if let (Some(responder), Some(sink)) = (&self.responder, self.wire.sink.borrow().as_ref()) {
            responder(&value, sink);
        }
        Ok(())
    }
}

fn connected(runtime: &TestRuntime, responder: Option<Responder>) -> (Bridge, Wire) {
    let bridge = Bridge::new(
        runtime.handle(),
        BridgeOptions::default(),
        TransportDetector::new(),
    );
    let wire = Wire::default();
    bridge
        .attach(Box::new(LoopbackTransport {
            wire: wire.clone(),
            responder,
        }))
        .expect("attach");
    (bridge, wire)
}

fn echo() -> Responder {
    Box::new(|frame, sink| {
        let reply = json!({"id": frame["id"], "success": true, "data": frame["payload"]});
        sink.deliver(reply.to_string());
    })
}

#[test]
fn send_stamps_id_and_timestamp() {
    let runtime = TestRuntime::new();
    let (bridge, wire) = connected(&runtime, None);
    runtime.advance(42);

    let id = bridge
        .send(&BridgeMessage::new("ping", json!({"n": 1})))
        .expect("send");

    let frames = wire.frames.borrow();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["id"], json!(id));
    assert_eq!(frames[0]["type"], json!("ping"));
    assert_eq!(frames[0]["timestamp"], json!(42));
}

#[test]
fn send_without_transport_is_not_connected() {
    let runtime = TestRuntime::new();
    let bridge = Bridge::new(
        runtime.handle(),
        BridgeOptions::default(),
        TransportDetector::new(),
    );
    let err = bridge
        .send(&BridgeMessage::new("ping", Value::Null))
        .expect_err("no transport");
    assert!(matches!(err, BridgeError::NotConnected));
}

#[test]
fn connect_without_candidates_enters_error_state() {
    let runtime = TestRuntime::new();
    let bridge = Bridge::new(
        runtime.handle(),
        BridgeOptions::default(),
        TransportDetector::new(),
    );
    assert!(matches!(
        bridge.connect(),
        Err(BridgeError::TransportUnavailable)
    ));
    assert_eq!(bridge.state(), ConnectionState::Error);
}

struct LoopbackFactory {
    available: bool,
    wire: Wire,
}

impl TransportFactory for LoopbackFactory {
    fn kind(&self) -> TransportKind {
        TransportKind::InMemory
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn create(&self) -> Box<dyn Transport> {
        Box::new(LoopbackTransport {
            wire: self.wire.clone(),
            responder: None,
        })
    }
}

#[test]
fn connect_skips_unavailable_candidates() {
    let runtime = TestRuntime::new();
    let skipped = Wire::default();
    let chosen = Wire::default();
    let detector = TransportDetector::new()
        .with(LoopbackFactory {
            available: false,
            wire: skipped.clone(),
        })
        .with(LoopbackFactory {
            available: true,
            wire: chosen.clone(),
        });
    let bridge = Bridge::new(runtime.handle(), BridgeOptions::default(), detector);
    let states = Rc::new(RefCell::new(Vec::new()));
    let log = states.clone();
    let _sub = bridge.on_state_change(move |state| log.borrow_mut().push(state));

    assert_eq!(bridge.connect().expect("connect"), TransportKind::InMemory);
    assert_eq!(
        *states.borrow(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
    assert!(skipped.sink.borrow().is_none());
    assert!(chosen.sink.borrow().is_some());
}

#[test]
fn request_resolves_with_echoed_payload() {
    let runtime = TestRuntime::new();
    let (bridge, _wire) = connected(&runtime, Some(echo()));

    let response = bridge.request("echo", json!({"hello": "world"}));
    let value = response
        .now_or_never()
        .expect("synchronous echo")
        .expect("success");
    assert_eq!(value, json!({"hello": "world"}));
    assert_eq!(bridge.pending_request_count(), 0);
    assert!(!runtime.handle().has_timers());
}

#[test]
fn request_times_out_once() {
    let runtime = TestRuntime::new();
    let (bridge, _wire) = connected(&runtime, None);

    let mut response = bridge.request("measure", json!({}));
    runtime.advance(29_999);
    assert!((&mut response).now_or_never().is_none());

    runtime.advance(1);
    match response.now_or_never() {
        Some(Err(BridgeError::Timeout {
            message_type,
            after_ms,
        })) => {
            assert_eq!(message_type, "measure");
            assert_eq!(after_ms, 30_000);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(bridge.pending_request_count(), 0);
}

#[test]
fn late_response_after_timeout_is_ignored() {
    let runtime = TestRuntime::new();
    let (bridge, wire) = connected(&runtime, None);

    let response = bridge.request("measure", json!({}));
    let id = response.id().to_string();
    runtime.advance(30_000);
    assert!(matches!(
        response.now_or_never(),
        Some(Err(BridgeError::Timeout { .. }))
    ));

    let sink = wire.sink.borrow().clone().expect("sink");
    sink.deliver(json!({"id": id, "success": true}).to_string());
    assert_eq!(bridge.pending_request_count(), 0);
}

#[test]
fn failed_response_rejects_with_remote_error() {
    let runtime = TestRuntime::new();
    let responder: Responder = Box::new(|frame, sink| {
        sink.deliver(json!({"id": frame["id"], "success": false, "error": "nope"}).to_string());
    });
    let (bridge, _wire) = connected(&runtime, Some(responder));

    let result = bridge
        .request("measure", Value::Null)
        .now_or_never()
        .expect("resolved");
    assert!(matches!(result, Err(BridgeError::Remote(message)) if message == "nope"));
}

#[test]
fn handlers_keep_running_after_one_panics() {
    let runtime = TestRuntime::new();
    let (bridge, wire) = connected(&runtime, None);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let _bad = bridge.on("tick", |_| panic!("handler failure"));
    let log = seen.clone();
    let _good = bridge.on("tick", move |message| {
        log.borrow_mut().push(message.payload.clone())
    });

    let sink = wire.sink.borrow().clone().expect("sink");
    sink.deliver(json!({"type": "tick", "payload": 1}).to_string());
    sink.deliver(b"{not json".to_vec());
    sink.deliver(json!({"type": "tick", "payload": 2}).to_string());

    assert_eq!(*seen.borrow(), vec![json!(1), json!(2)]);
}

#[test]
fn once_and_unsubscribe_remove_handlers() {
    let runtime = TestRuntime::new();
    let (bridge, wire) = connected(&runtime, None);
    let once_count = Rc::new(RefCell::new(0));
    let on_count = Rc::new(RefCell::new(0));

    let counter = once_count.clone();
    let _once = bridge.once("tick", move |_| *counter.borrow_mut() += 1);
    let counter = on_count.clone();
    let subscription = bridge.on("tick", move |_| *counter.borrow_mut() += 1);

    let sink = wire.sink.borrow().clone().expect("sink");
    sink.deliver(json!({"type": "tick"}).to_string());
    subscription.unsubscribe();
    sink.deliver(json!({"type": "tick"}).to_string());

    assert_eq!(*once_count.borrow(), 1);
    assert_eq!(*on_count.borrow(), 1);
}

#[test]
fn next_event_resolves_with_matching_message() {
    let runtime = TestRuntime::new();
    let (bridge, wire) = connected(&runtime, None);

    let mut next = bridge.next_event("ready");
    assert!((&mut next).now_or_never().is_none());

    let sink = wire.sink.borrow().clone().expect("sink");
    sink.deliver(json!({"type": "other"}).to_string());
    sink.deliver(json!({"type": "ready", "payload": {"ok": true}}).to_string());

    let message = next.now_or_never().expect("ready").expect("event");
    assert_eq!(message.payload, json!({"ok": true}));
}

#[test]
fn channel_close_rejects_pending_requests() {
    let runtime = TestRuntime::new();
    let (bridge, wire) = connected(&runtime, None);

    let response = bridge.request("measure", Value::Null);
    let sink = wire.sink.borrow().clone().expect("sink");
    sink.close();

    assert_eq!(bridge.state(), ConnectionState::Disconnected);
    assert!(matches!(
        response.now_or_never(),
        Some(Err(BridgeError::NotConnected))
    ));
    assert!(!runtime.handle().has_timers());
}

#[test]
fn batch_of_many_wraps_operations() {
    let runtime = TestRuntime::new();
    let (bridge, wire) = connected(&runtime, None);

    let messages = vec![
        BridgeMessage::new("a", json!(1)),
        BridgeMessage::new("b", json!(2)),
    ];
    bridge.send_batch(&messages).expect("batch");
    bridge.send_batch(&messages[..1]).expect("single");
    bridge.send_batch(&[]).expect("empty");

    let frames = wire.frames.borrow();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], json!("batch"));
    assert_eq!(frames[0]["payload"]["operations"][1]["type"], json!("b"));
    assert_eq!(frames[1]["type"], json!("a"));
}

#[test]
fn timeout_uses_configured_bound() {
    let runtime = TestRuntime::new();
    let bridge = Bridge::new(
        runtime.handle(),
        BridgeOptions::default().with_request_timeout(Duration::from_millis(100)),
        TransportDetector::new(),
    );
    bridge
        .attach(Box::new(LoopbackTransport {
            wire: Wire::default(),
            responder: None,
        }))
        .expect("attach");

    let response = bridge.request("slow", Value::Null);
    runtime.advance(100);
    assert!(matches!(
        response.now_or_never(),
        Some(Err(BridgeError::Timeout { after_ms: 100, .. }))
    ));
}
