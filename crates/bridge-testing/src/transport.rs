//! In-process transports that record traffic and fake the native side.

use std::cell::RefCell;
use std::rc::Rc;

use bridge_core::{
    BridgeError, BridgeMessage, BridgeResult, DeliverySink, Transport, TransportFactory,
    TransportKind, BATCH_MESSAGE_TYPE, VIEW_EVENT_MESSAGE_TYPE,
};
use serde_json::{json, Value};

/// Computes the reply the fake native side sends for an outbound frame.
pub type Responder = Rc<dyn Fn(&Value) -> Option<Value>>;

#[derive(Default)]
struct WireState {
    frames: Vec<Value>,
    sink: Option<DeliverySink>,
    responder: Option<Responder>,
    failing: bool,
    failed_writes: usize,
    open: bool,
    opens: usize,
}

/// Shared view of everything a [`RecordingTransport`] saw.
///
/// Cloning is cheap; every clone observes the same wire.
#[derive(Clone, Default)]
pub struct WireLog {
    state: Rc<RefCell<WireState>>,
}

impl WireLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame written so far, decoded as JSON.
    pub fn frames(&self) -> Vec<Value> {
        self.state.borrow().frames.clone()
    }

    pub fn frame_count(&self) -> usize {
        self.state.borrow().frames.len()
    }

    pub fn take_frames(&self) -> Vec<Value> {
        std::mem::take(&mut self.state.borrow_mut().frames)
    }

    /// Written messages with batch envelopes expanded, in wire order.
    pub fn messages(&self) -> Vec<BridgeMessage> {
        flatten_operations(&self.state.borrow().frames)
    }

    pub fn message_types(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|message| message.message_type)
            .collect()
    }

    /// Makes subsequent writes fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().failing = failing;
    }

    pub fn failed_writes(&self) -> usize {
        self.state.borrow().failed_writes
    }

    pub fn set_responder(&self, responder: impl Fn(&Value) -> Option<Value> + 'static) {
        self.state.borrow_mut().responder = Some(Rc::new(responder));
    }

    pub fn clear_responder(&self) {
        self.state.borrow_mut().responder = None;
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    pub fn open_count(&self) -> usize {
        self.state.borrow().opens
    }

    /// Pushes a frame from the fake native side into the bridge.
    pub fn deliver(&self, frame: Value) {
        self.deliver_raw(frame.to_string().into_bytes());
    }

    pub fn deliver_raw(&self, frame: Vec<u8>) {
        let sink = self.state.borrow().sink.clone();
        match sink {
            Some(sink) => sink.deliver(frame),
            None => log::warn!("dropping frame delivered before the transport opened"),
        }
    }

    /// Sends a `viewEvent` the way the native side reports user interaction.
    pub fn emit_view_event(&self, view_id: &str, event_type: &str, data: Value) {
        self.deliver(json!({
            "type": VIEW_EVENT_MESSAGE_TYPE,
            "payload": {"viewId": view_id, "eventType": event_type, "data": data},
        }));
    }

    /// Simulates the native side going away.
    pub fn close_channel(&self) {
        let sink = {
            let mut state = self.state.borrow_mut();
            state.open = false;
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.close();
        }
    }

    fn attach(&self, sink: DeliverySink) {
        let mut state = self.state.borrow_mut();
        state.sink = Some(sink);
        state.open = true;
        state.opens += 1;
    }

    fn record(&self, frame: &[u8]) -> BridgeResult<Option<Value>> {
        let value: Value = serde_json::from_slice(frame)?;
        let responder = {
            let mut state = self.state.borrow_mut();
            if state.failing || !state.open {
                state.failed_writes += 1;
                return Err(BridgeError::Transport("injected write failure".to_string()));
            }
            state.frames.push(value.clone());
            state.responder.clone()
        };
        Ok(responder.and_then(|responder| responder(&value)))
    }
}

impl std::fmt::Debug for WireLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("WireLog")
            .field("frames", &state.frames.len())
            .field("open", &state.open)
            .field("failing", &state.failing)
            .finish()
    }
}

/// Transport that records every frame into a [`WireLog`] and lets an
/// optional responder answer synchronously.
pub struct RecordingTransport {
    kind: TransportKind,
    log: WireLog,
}

impl RecordingTransport {
    pub fn new(log: WireLog) -> Self {
        Self::with_kind(TransportKind::InMemory, log)
    }

    pub fn with_kind(kind: TransportKind, log: WireLog) -> Self {
        Self { kind, log }
    }

    /// A transport together with the log observing it.
    pub fn pair() -> (Self, WireLog) {
        let log = WireLog::new();
        (Self::new(log.clone()), log)
    }
}

impl Transport for RecordingTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(&mut self, sink: DeliverySink) -> BridgeResult<()> {
        self.log.attach(sink);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> BridgeResult<()> {
        if let Some(reply) = self.log.record(frame)? {
            self.log.deliver(reply);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.log.state.borrow_mut().open = false;
    }
}

/// Replies to every request-shaped frame with its own payload.
pub fn echo_responder() -> impl Fn(&Value) -> Option<Value> {
    |frame| {
        let id = frame.get("id")?;
        if frame.get("type") == Some(&json!(BATCH_MESSAGE_TYPE)) {
            return None;
        }
        Some(json!({
            "id": id,
            "success": true,
            "data": frame.get("payload").cloned().unwrap_or(Value::Null),
        }))
    }
}

/// Expands batch envelopes into their operations, keeping wire order.
pub fn flatten_operations(frames: &[Value]) -> Vec<BridgeMessage> {
    let mut out = Vec::new();
    for frame in frames {
        if frame.get("type") == Some(&json!(BATCH_MESSAGE_TYPE)) {
            let operations = frame
                .pointer("/payload/operations")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for operation in operations {
                push_message(&mut out, operation);
            }
        } else {
            push_message(&mut out, frame.clone());
        }
    }
    out
}

fn push_message(out: &mut Vec<BridgeMessage>, value: Value) {
    match serde_json::from_value(value) {
        Ok(message) => out.push(message),
        Err(err) => log::warn!("skipping undecodable frame: {err}"),
    }
}

/// Factory handing out [`RecordingTransport`]s that share one log.
pub struct StubTransportFactory {
    kind: TransportKind,
    available: bool,
    log: WireLog,
}

impl StubTransportFactory {
    pub fn new(kind: TransportKind, log: WireLog) -> Self {
        Self {
            kind,
            available: true,
            log,
        }
    }

    pub fn unavailable(kind: TransportKind) -> Self {
        Self {
            kind,
            available: false,
            log: WireLog::new(),
        }
    }
}

impl TransportFactory for StubTransportFactory {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn create(&self) -> Box<dyn Transport> {
        Box::new(RecordingTransport::with_kind(self.kind, self.log.clone()))
    }
}

/// Factory that is present but whose transport refuses to open.
pub struct UnavailableFactory(pub TransportKind);

struct RefusingTransport(TransportKind);

impl Transport for RefusingTransport {
    fn kind(&self) -> TransportKind {
        self.0
    }

    fn open(&mut self, _sink: DeliverySink) -> BridgeResult<()> {
        Err(BridgeError::Transport(format!("{} channel refused", self.0)))
    }

    fn write(&mut self, _frame: &[u8]) -> BridgeResult<()> {
        Err(BridgeError::NotConnected)
    }
}

impl TransportFactory for UnavailableFactory {
    fn kind(&self) -> TransportKind {
        self.0
    }

    fn is_available(&self) -> bool {
        true
    }

    fn create(&self) -> Box<dyn Transport> {
        Box::new(RefusingTransport(self.0))
    }
}
