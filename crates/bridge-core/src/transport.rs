//! Pluggable byte channels between the logic side and the native side.
//!
//! A transport either pushes inbound frames into the [`DeliverySink`] it was
//! opened with, or buffers them until [`Transport::poll`] is called from the
//! runtime thread. Both styles can be mixed.

use std::fmt;
use std::rc::Rc;

use crate::bridge::DeliverySink;
use crate::error::{BridgeError, BridgeResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Production channel provided by the native host.
    Native,
    /// Development socket channel.
    Socket,
    /// In-process channel, used by tests and demos.
    InMemory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Native => "native",
            TransportKind::Socket => "socket",
            TransportKind::InMemory => "in-memory",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(Vec<u8>),
    Closed,
}

pub trait Transport {
    fn kind(&self) -> TransportKind;

    /// Establishes the channel. Frames may be pushed into `sink` from then on.
    fn open(&mut self, sink: DeliverySink) -> BridgeResult<()>;

    fn write(&mut self, frame: &[u8]) -> BridgeResult<()>;

    /// Returns frames buffered since the last poll.
    fn poll(&mut self) -> Vec<TransportEvent> {
        Vec::new()
    }

    fn close(&mut self) {}
}

/// Creates transports for [`TransportDetector`].
pub trait TransportFactory {
    fn kind(&self) -> TransportKind;

    /// Cheap presence check; `create` is only called when this returns true.
    fn is_available(&self) -> bool;

    fn create(&self) -> Box<dyn Transport>;
}

/// Ordered list of transport candidates tried by `Bridge::connect`.
#[derive(Default)]
pub struct TransportDetector {
    candidates: Vec<Box<dyn TransportFactory>>,
}

impl TransportDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.candidates.push(Box::new(factory));
        self
    }

    pub fn push(&mut self, factory: Box<dyn TransportFactory>) {
        self.candidates.push(factory);
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub(crate) fn available(&self) -> impl Iterator<Item = &dyn TransportFactory> {
        self.candidates
            .iter()
            .map(|factory| factory.as_ref())
            .filter(|factory| factory.is_available())
    }
}

impl fmt::Debug for TransportDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.candidates.iter().map(|factory| factory.kind()))
            .finish()
    }
}

/// Message channel exposed by a native host process.
///
/// The host installs the sink it receives in `attach` as its inbound
/// callback and forwards every frame from the native side into it.
pub trait NativeHost {
    fn attach(&self, sink: DeliverySink) -> BridgeResult<()>;

    fn post(&self, frame: &[u8]) -> BridgeResult<()>;

    fn detach(&self) {}
}

/// Transport over a [`NativeHost`] channel.
pub struct NativeChannelTransport {
    host: Rc<dyn NativeHost>,
    open: bool,
}

impl NativeChannelTransport {
    pub fn new(host: Rc<dyn NativeHost>) -> Self {
        Self { host, open: false }
    }
}

impl Transport for NativeChannelTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    fn open(&mut self, sink: DeliverySink) -> BridgeResult<()> {
        self.host.attach(sink)?;
        self.open = true;
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> BridgeResult<()> {
        if !self.open {
            return Err(BridgeError::NotConnected);
        }
        self.host.post(frame)
    }

    fn close(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.host.detach();
        }
    }
}

/// Factory that is available only when the host registered a native channel.
#[derive(Default)]
pub struct NativeChannelFactory {
    host: Option<Rc<dyn NativeHost>>,
}

impl NativeChannelFactory {
    pub fn new(host: Option<Rc<dyn NativeHost>>) -> Self {
        Self { host }
    }
}

impl TransportFactory for NativeChannelFactory {
    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    fn is_available(&self) -> bool {
        self.host.is_some()
    }

    fn create(&self) -> Box<dyn Transport> {
        match &self.host {
            Some(host) => Box::new(NativeChannelTransport::new(host.clone())),
            None => Box::new(UnavailableTransport(TransportKind::Native)),
        }
    }
}

struct UnavailableTransport(TransportKind);

impl Transport for UnavailableTransport {
    fn kind(&self) -> TransportKind {
        self.0
    }

    fn open(&mut self, _sink: DeliverySink) -> BridgeResult<()> {
        Err(BridgeError::TransportUnavailable)
    }

    fn write(&mut self, _frame: &[u8]) -> BridgeResult<()> {
        Err(BridgeError::NotConnected)
    }
}
