//! Newline-delimited JSON over TCP, for talking to a development server.
//!
//! A reader thread turns each inbound line, as raw bytes, into a
//! [`TransportEvent::Frame`] and hands it to the runtime thread through a
//! channel; the host drains it
//! with `Bridge::poll`. The optional scheduler is asked for a turn whenever
//! the reader queues something.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bridge_core::{
    BridgeError, BridgeResult, DeliverySink, RuntimeScheduler, Transport, TransportEvent,
    TransportFactory, TransportKind,
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

pub struct SocketTransport {
    addr: String,
    connect_timeout: Duration,
    scheduler: Option<Arc<dyn RuntimeScheduler>>,
    stream: Option<TcpStream>,
    inbound: Option<Receiver<TransportEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl SocketTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            scheduler: None,
            stream: None,
            inbound: None,
            reader: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Scheduler woken from the reader thread when a frame arrives.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&self) -> BridgeResult<TcpStream> {
        let addrs = resolve(&self.addr)?;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_error = Some(err),
            }
        }
        Err(match last_error {
            Some(err) => BridgeError::Transport(format!("connect {}: {err}", self.addr)),
            None => BridgeError::TransportUnavailable,
        })
    }
}

impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn open(&mut self, _sink: DeliverySink) -> BridgeResult<()> {
        let stream = self.connect()?;
        stream.set_nodelay(true).map_err(io_error)?;
        let read_half = stream.try_clone().map_err(io_error)?;

        let (sender, receiver) = mpsc::channel();
        let scheduler = self.scheduler.clone();
        let reader = std::thread::Builder::new()
            .name("bridge-socket-reader".into())
            .spawn(move || read_frames(read_half, &sender, scheduler.as_deref()))
            .map_err(io_error)?;

        log::debug!("socket transport connected to {}", self.addr);
        self.stream = Some(stream);
        self.inbound = Some(receiver);
        self.reader = Some(reader);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> BridgeResult<()> {
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;
        write_line(stream, frame).map_err(io_error)
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let Some(inbound) = &self.inbound else {
            return Vec::new();
        };
        let mut events = Vec::new();
        let disconnected = loop {
            match inbound.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };
        if disconnected {
            self.inbound = None;
        }
        events
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.inbound = None;
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                log::error!("socket reader thread panicked");
            }
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Offers a [`SocketTransport`] when the development address resolves.
pub struct SocketTransportFactory {
    addr: String,
    connect_timeout: Duration,
    scheduler: Option<Arc<dyn RuntimeScheduler>>,
}

impl SocketTransportFactory {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            scheduler: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn RuntimeScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl TransportFactory for SocketTransportFactory {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn is_available(&self) -> bool {
        resolve(&self.addr).is_ok_and(|addrs| !addrs.is_empty())
    }

    fn create(&self) -> Box<dyn Transport> {
        let transport =
            SocketTransport::new(self.addr.clone()).with_connect_timeout(self.connect_timeout);
        Box::new(match &self.scheduler {
            Some(scheduler) => transport.with_scheduler(scheduler.clone()),
            None => transport,
        })
    }
}

fn resolve(addr: &str) -> BridgeResult<Vec<SocketAddr>> {
    addr.to_socket_addrs()
        .map(Iterator::collect)
        .map_err(|err| BridgeError::Transport(format!("resolve {addr}: {err}")))
}

// Frames are forwarded as raw bytes so a line that is not valid UTF-8 or
// JSON is rejected by the bridge's parser instead of ending the read loop.
fn read_frames(
    stream: TcpStream,
    sender: &Sender<TransportEvent>,
    scheduler: Option<&dyn RuntimeScheduler>,
) {
    let wake = || {
        if let Some(scheduler) = scheduler {
            scheduler.schedule_turn();
        }
    };
    for line in BufReader::new(stream).split(b'\n') {
        match line {
            Ok(mut frame) => {
                if frame.last() == Some(&b'\r') {
                    frame.pop();
                }
                if frame.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                if sender.send(TransportEvent::Frame(frame)).is_err() {
                    return;
                }
                wake();
            }
            Err(err) => {
                log::warn!("socket read failed: {err}");
                break;
            }
        }
    }
    let _ = sender.send(TransportEvent::Closed);
    wake();
}

fn write_line(stream: &mut TcpStream, frame: &[u8]) -> std::io::Result<()> {
    stream.write_all(frame)?;
    stream.write_all(b"\n")?;
    stream.flush()
}

fn io_error(err: std::io::Error) -> BridgeError {
    BridgeError::Transport(err.to_string())
}
