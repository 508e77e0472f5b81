//! The single channel of truth between the logic side and the native side.
//!
//! The bridge owns the active transport, stamps and serializes outbound
//! envelopes, correlates responses with pending requests and fans inbound
//! events out to subscribers. Inbound frames that arrive while a write is in
//! progress are buffered and processed as soon as the write returns, so a
//! transport may answer synchronously from inside `write`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::error::{isolate_handler, BridgeError, BridgeResult};
use crate::hash::HashMap;
use crate::message::{batch_payload, BridgeMessage, Inbound, Response, BATCH_MESSAGE_TYPE};
use crate::options::BridgeOptions;
use crate::runtime::RuntimeHandle;
use crate::subscription::Subscription;
use crate::timer::TimerRegistration;
use crate::transport::{Transport, TransportDetector, TransportEvent, TransportKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

type EventHandler = Rc<dyn Fn(&BridgeMessage)>;
type StateHandler = Rc<dyn Fn(ConnectionState)>;
type HandlerId = u64;

struct PendingRequest {
    message_type: String,
    sender: oneshot::Sender<BridgeResult<Value>>,
    _timeout: TimerRegistration,
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    message_type: &'a str,
    payload: &'a Value,
    timestamp: u64,
}

struct BridgeInner {
    runtime: RuntimeHandle,
    options: BridgeOptions,
    detector: TransportDetector,
    transport: RefCell<Option<Box<dyn Transport>>>,
    transport_kind: Cell<Option<TransportKind>>,
    state: Cell<ConnectionState>,
    next_message_id: Cell<u64>,
    next_handler_id: Cell<HandlerId>,
    pending: RefCell<HashMap<String, PendingRequest>>,
    handlers: RefCell<HashMap<String, Vec<(HandlerId, EventHandler)>>>,
    state_handlers: RefCell<Vec<(HandlerId, StateHandler)>>,
    inbound: RefCell<VecDeque<TransportEvent>>,
    writing: Cell<bool>,
    draining: Cell<bool>,
}

#[derive(Clone)]
pub struct Bridge {
    inner: Rc<BridgeInner>,
}

impl Bridge {
    pub fn new(runtime: RuntimeHandle, options: BridgeOptions, detector: TransportDetector) -> Self {
        Self {
            inner: Rc::new(BridgeInner {
                runtime,
                options,
                detector,
                transport: RefCell::new(None),
                transport_kind: Cell::new(None),
                state: Cell::new(ConnectionState::Disconnected),
                next_message_id: Cell::new(1),
                next_handler_id: Cell::new(1),
                pending: RefCell::new(HashMap::new()),
                handlers: RefCell::new(HashMap::new()),
                state_handlers: RefCell::new(Vec::new()),
                inbound: RefCell::new(VecDeque::new()),
                writing: Cell::new(false),
                draining: Cell::new(false),
            }),
        }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.inner.runtime.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.inner.transport_kind.get()
    }

    pub fn pending_request_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// Sink that feeds frames into this bridge's inbound path.
    pub fn sink(&self) -> DeliverySink {
        DeliverySink {
            bridge: Rc::downgrade(&self.inner),
        }
    }

    /// Opens the first available transport from the detector, in order.
    pub fn connect(&self) -> BridgeResult<TransportKind> {
        if let (ConnectionState::Connected, Some(kind)) = (self.state(), self.transport_kind()) {
            return Ok(kind);
        }
        self.set_state(ConnectionState::Connecting);
        let mut opened = None;
        for factory in self.inner.detector.available() {
            let mut transport = factory.create();
            match transport.open(self.sink()) {
                Ok(()) => {
                    opened = Some(transport);
                    break;
                }
                Err(err) => log::warn!("{} transport failed to open: {err}", factory.kind()),
            }
        }
        match opened {
            Some(transport) => {
                let kind = transport.kind();
                self.install(transport);
                Ok(kind)
            }
            None => {
                log::error!("no transport available; bridge left in error state");
                self.set_state(ConnectionState::Error);
                Err(BridgeError::TransportUnavailable)
            }
        }
    }

    /// Opens and installs an explicit transport, bypassing detection.
    pub fn attach(&self, mut transport: Box<dyn Transport>) -> BridgeResult<()> {
        self.close_transport();
        self.set_state(ConnectionState::Connecting);
        match transport.open(self.sink()) {
            Ok(()) => {
                self.install(transport);
                Ok(())
            }
            Err(err) => {
                log::error!("{} transport failed to open: {err}", transport.kind());
                self.set_state(ConnectionState::Error);
                Err(err)
            }
        }
    }

    pub fn disconnect(&self) {
        self.close_transport();
        self.set_state(ConnectionState::Disconnected);
        self.reject_pending();
    }

    /// Sends one message, stamping an id when absent. Returns the id used.
    pub fn send(&self, message: &BridgeMessage) -> BridgeResult<String> {
        let id = match &message.id {
            Some(id) => id.clone(),
            None => self.next_message_id(),
        };
        self.write_envelope(&Envelope {
            id: &id,
            message_type: &message.message_type,
            payload: &message.payload,
            timestamp: self.inner.runtime.now_millis(),
        })?;
        Ok(id)
    }

    /// Sends a drained queue batch, wrapping more than one message in a
    /// `batch` envelope.
    pub fn send_batch(&self, messages: &[BridgeMessage]) -> BridgeResult<()> {
        match messages {
            [] => Ok(()),
            [single] => self.send(single).map(|_| ()),
            _ => {
                let payload = batch_payload(messages)?;
                let id = self.next_message_id();
                self.write_envelope(&Envelope {
                    id: &id,
                    message_type: BATCH_MESSAGE_TYPE,
                    payload: &payload,
                    timestamp: self.inner.runtime.now_millis(),
                })?;
                log::debug!("sent batch {id} with {} operations", messages.len());
                Ok(())
            }
        }
    }

    /// Sends a request and waits for the correlated response.
    ///
    /// Resolves with the response data, fails with the remote error string,
    /// or fails with [`BridgeError::Timeout`] once the configured bound
    /// elapses. The pending entry is removed exactly once either way.
    pub fn request(&self, message_type: &str, payload: Value) -> PendingResponse {
        let (sender, receiver) = oneshot::channel();
        let id = self.next_message_id();
        let timeout = self.inner.options.request_timeout();
        let weak = Rc::downgrade(&self.inner);
        let timeout_id = id.clone();
        let registration = self.inner.runtime.register_timer(timeout, move || {
            if let Some(inner) = weak.upgrade() {
                Bridge { inner }.expire_request(&timeout_id);
            }
        });
        self.inner.pending.borrow_mut().insert(
            id.clone(),
            PendingRequest {
                message_type: message_type.to_string(),
                sender,
                _timeout: registration,
            },
        );

        let result = self.write_envelope(&Envelope {
            id: &id,
            message_type,
            payload: &payload,
            timestamp: self.inner.runtime.now_millis(),
        });
        if let Err(err) = result {
            let entry = self.inner.pending.borrow_mut().remove(&id);
            if let Some(entry) = entry {
                let _ = entry.sender.send(Err(err));
            }
        }
        PendingResponse { id, receiver }
    }

    /// Subscribes to inbound events carrying `event_type`.
    pub fn on(&self, event_type: &str, handler: impl Fn(&BridgeMessage) + 'static) -> Subscription {
        let id = self.next_handler_id();
        self.insert_handler(event_type, id, Rc::new(handler));
        self.handler_subscription(event_type, id)
    }

    /// Like [`Bridge::on`], but the handler is removed after its first delivery.
    pub fn once(
        &self,
        event_type: &str,
        handler: impl FnOnce(&BridgeMessage) + 'static,
    ) -> Subscription {
        let id = self.next_handler_id();
        let slot = RefCell::new(Some(handler));
        let weak = Rc::downgrade(&self.inner);
        let key = event_type.to_string();
        self.insert_handler(
            event_type,
            id,
            Rc::new(move |message| {
                let handler = slot.borrow_mut().take();
                if let Some(handler) = handler {
                    if let Some(inner) = weak.upgrade() {
                        remove_handler(&inner, &key, id);
                    }
                    handler(message);
                }
            }),
        );
        self.handler_subscription(event_type, id)
    }

    /// Future resolving with the next inbound event of `event_type`.
    pub fn next_event(&self, event_type: &str) -> NextEvent {
        let (sender, receiver) = oneshot::channel();
        let subscription = self.once(event_type, move |message| {
            let _ = sender.send(message.clone());
        });
        NextEvent {
            receiver,
            subscription: Some(subscription),
        }
    }

    pub fn on_state_change(&self, handler: impl Fn(ConnectionState) + 'static) -> Subscription {
        let id = self.next_handler_id();
        self.inner
            .state_handlers
            .borrow_mut()
            .push((id, Rc::new(handler)));
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner
                    .state_handlers
                    .borrow_mut()
                    .retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }

    /// Pulls buffered frames from a poll-driven transport and processes them.
    pub fn poll(&self) -> usize {
        let events = {
            let mut slot = self.inner.transport.borrow_mut();
            match slot.as_mut() {
                Some(transport) => transport.poll(),
                None => Vec::new(),
            }
        };
        let count = events.len();
        if count > 0 {
            self.inner.inbound.borrow_mut().extend(events);
            self.drain_inbound();
        }
        count
    }

    fn install(&self, transport: Box<dyn Transport>) {
        let kind = transport.kind();
        *self.inner.transport.borrow_mut() = Some(transport);
        self.inner.transport_kind.set(Some(kind));
        log::info!("bridge connected over {kind} transport");
        self.set_state(ConnectionState::Connected);
        self.drain_inbound();
    }

    fn close_transport(&self) {
        let transport = self.inner.transport.borrow_mut().take();
        if let Some(mut transport) = transport {
            transport.close();
        }
        self.inner.transport_kind.set(None);
    }

    fn next_message_id(&self) -> String {
        let id = self.inner.next_message_id.get();
        self.inner.next_message_id.set(id + 1);
        format!("msg_{id}")
    }

    fn next_handler_id(&self) -> HandlerId {
        let id = self.inner.next_handler_id.get();
        self.inner.next_handler_id.set(id + 1);
        id
    }

    fn insert_handler(&self, event_type: &str, id: HandlerId, handler: EventHandler) {
        self.inner
            .handlers
            .borrow_mut()
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));
    }

    fn handler_subscription(&self, event_type: &str, id: HandlerId) -> Subscription {
        let weak = Rc::downgrade(&self.inner);
        let key = event_type.to_string();
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                remove_handler(&inner, &key, id);
            }
        })
    }

    fn write_envelope(&self, envelope: &Envelope<'_>) -> BridgeResult<()> {
        if self.inner.transport.borrow().is_none() {
            return Err(BridgeError::NotConnected);
        }
        let frame = serde_json::to_vec(envelope)?;
        let result = {
            let mut slot = self.inner.transport.borrow_mut();
            let transport = slot.as_mut().ok_or(BridgeError::NotConnected)?;
            self.inner.writing.set(true);
            let result = transport.write(&frame);
            self.inner.writing.set(false);
            result
        };
        if let Err(err) = &result {
            log::warn!("write of `{}` failed: {err}", envelope.message_type);
        }
        self.drain_inbound();
        result
    }

    fn drain_inbound(&self) {
        if self.inner.writing.get() || self.inner.draining.replace(true) {
            return;
        }
        loop {
            let next = self.inner.inbound.borrow_mut().pop_front();
            match next {
                Some(TransportEvent::Frame(frame)) => self.handle_frame(&frame),
                Some(TransportEvent::Closed) => self.handle_channel_lost(),
                None => break,
            }
        }
        self.inner.draining.set(false);
    }

    fn handle_frame(&self, frame: &[u8]) {
        match Inbound::parse(frame) {
            Ok(Inbound::Response(response)) => self.resolve(response),
            Ok(Inbound::Event(message)) => self.publish(&message),
            Err(err) => log::warn!("dropping inbound frame: {err}"),
        }
    }

    fn resolve(&self, response: Response) {
        let entry = self.inner.pending.borrow_mut().remove(&response.id);
        match entry {
            Some(entry) => {
                log::debug!("response for {} ({})", response.id, entry.message_type);
                let _ = entry.sender.send(response.into_result());
            }
            None => log::debug!("ignoring response for unknown request {}", response.id),
        }
    }

    fn publish(&self, message: &BridgeMessage) {
        let handlers: Vec<EventHandler> = self
            .inner
            .handlers
            .borrow()
            .get(&message.message_type)
            .map(|handlers| handlers.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            log::debug!("no subscribers for `{}`", message.message_type);
        }
        for handler in handlers {
            if let Err(err) = isolate_handler(&message.message_type, || handler(message)) {
                log::error!("{err}");
            }
        }
    }

    fn expire_request(&self, id: &str) {
        let entry = self.inner.pending.borrow_mut().remove(id);
        if let Some(entry) = entry {
            let after_ms = self.inner.options.request_timeout_ms;
            log::warn!("request {id} ({}) timed out after {after_ms}ms", entry.message_type);
            let _ = entry.sender.send(Err(BridgeError::Timeout {
                message_type: entry.message_type.clone(),
                after_ms,
            }));
        }
    }

    fn handle_channel_lost(&self) {
        if self.inner.transport.borrow().is_none() {
            return;
        }
        log::warn!("transport channel closed");
        self.close_transport();
        self.set_state(ConnectionState::Disconnected);
        self.reject_pending();
    }

    fn reject_pending(&self) {
        let pending: Vec<PendingRequest> = self
            .inner
            .pending
            .borrow_mut()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in pending {
            let _ = entry.sender.send(Err(BridgeError::NotConnected));
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if self.inner.state.replace(state) == state {
            return;
        }
        log::debug!("bridge state -> {state:?}");
        let handlers: Vec<StateHandler> = self
            .inner
            .state_handlers
            .borrow()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            if let Err(err) = isolate_handler("connectionState", || handler(state)) {
                log::error!("{err}");
            }
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("state", &self.state())
            .field("transport", &self.transport_kind())
            .field("pending_requests", &self.pending_request_count())
            .finish()
    }
}

fn remove_handler(inner: &BridgeInner, event_type: &str, id: HandlerId) {
    let mut handlers = inner.handlers.borrow_mut();
    if let Some(list) = handlers.get_mut(event_type) {
        list.retain(|(handler_id, _)| *handler_id != id);
        if list.is_empty() {
            handlers.remove(event_type);
        }
    }
}

/// Entry point for inbound frames, handed to transports when they open.
#[derive(Clone)]
pub struct DeliverySink {
    bridge: Weak<BridgeInner>,
}

impl DeliverySink {
    pub fn deliver(&self, frame: impl Into<Vec<u8>>) {
        self.push(TransportEvent::Frame(frame.into()));
    }

    /// Reports that the channel went away.
    pub fn close(&self) {
        self.push(TransportEvent::Closed);
    }

    fn push(&self, event: TransportEvent) {
        if let Some(inner) = self.bridge.upgrade() {
            inner.inbound.borrow_mut().push_back(event);
            Bridge { inner }.drain_inbound();
        }
    }
}

impl fmt::Debug for DeliverySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverySink")
            .field("alive", &(self.bridge.strong_count() > 0))
            .finish()
    }
}

/// Result of [`Bridge::request`].
#[must_use = "responses are only observable by polling the returned future"]
pub struct PendingResponse {
    id: String,
    receiver: oneshot::Receiver<BridgeResult<Value>>,
}

impl PendingResponse {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingResponse {
    type Output = BridgeResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::NotConnected)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Result of [`Bridge::next_event`]. Dropping it removes the subscription.
pub struct NextEvent {
    receiver: oneshot::Receiver<BridgeMessage>,
    subscription: Option<Subscription>,
}

impl Future for NextEvent {
    type Output = BridgeResult<BridgeMessage>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(message)) => Poll::Ready(Ok(message)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::NotConnected)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for NextEvent {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
