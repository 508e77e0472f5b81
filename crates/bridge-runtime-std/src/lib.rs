//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `bridge-core`, a newline-delimited TCP
//! transport for talking to a development server, and environment-driven
//! configuration. Applications construct a [`StdRuntime`] and hand its
//! [`RuntimeHandle`] to a [`bridge_core::Bridge`].

mod config;
mod socket;

use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bridge_core::{
    BridgeOptions, Clock, NativeChannelFactory, NativeHost, Runtime, RuntimeHandle,
    RuntimeScheduler, TransportDetector,
};

pub use config::{options_from_env, options_from_vars, ENV_PREFIX};
pub use socket::{SocketTransport, SocketTransportFactory};

/// Turn requests from the runtime and from transport reader threads.
///
/// The host loop either polls [`StdScheduler::take_turn_request`] or parks
/// in [`StdScheduler::wait_for_turn`] until a request arrives or its next
/// timer is due. Requests made while nobody waits are kept, not lost.
#[derive(Default)]
pub struct StdScheduler {
    requested: Mutex<bool>,
    signal: Condvar,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether a turn has been requested since the last call.
    pub fn take_turn_request(&self) -> bool {
        std::mem::take(&mut *self.lock())
    }

    /// Blocks until a turn is requested or `timeout` elapses.
    ///
    /// Consumes the request and returns true when one arrived in time.
    pub fn wait_for_turn(&self, timeout: Duration) -> bool {
        let requested = self.lock();
        let (mut requested, _) = self
            .signal
            .wait_timeout_while(requested, timeout, |requested| !*requested)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *requested)
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.requested.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("turn_requested", &*self.lock())
            .finish()
    }
}

impl RuntimeScheduler for StdScheduler {
    fn schedule_turn(&self) {
        *self.lock() = true;
        self.signal.notify_all();
    }
}

/// Monotonic clock counting milliseconds from its creation.
#[derive(Debug, Clone)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Convenience container bundling the standard scheduler and clock.
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Arc<StdScheduler>,
    clock: Arc<StdClock>,
    runtime: Runtime,
}

impl StdRuntime {
    /// Creates a new standard runtime instance.
    pub fn new() -> Self {
        let scheduler = Arc::new(StdScheduler::default());
        let clock = Arc::new(StdClock::default());
        let runtime = Runtime::new(scheduler.clone(), clock.clone());
        Self {
            scheduler,
            clock,
            runtime,
        }
    }

    /// Returns a [`bridge_core::Runtime`] configured with the standard scheduler.
    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    /// Returns a handle to the runtime.
    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    /// Returns the scheduler implementation.
    pub fn scheduler(&self) -> Arc<StdScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Returns the clock implementation.
    pub fn clock(&self) -> Arc<StdClock> {
        Arc::clone(&self.clock)
    }

    /// Returns whether a turn was requested since the last poll.
    pub fn take_turn_request(&self) -> bool {
        self.scheduler.take_turn_request()
    }

    /// Parks the host thread until a turn is requested or the next timer is
    /// due. Returns false right away when nothing is scheduled at all.
    pub fn wait_for_work(&self) -> bool {
        if self.scheduler.take_turn_request() {
            return true;
        }
        match self.time_until_next_timer() {
            Some(wait) => {
                self.scheduler.wait_for_turn(wait);
                true
            }
            None => false,
        }
    }

    /// Runs queued tasks and due timers.
    pub fn pump(&self) -> usize {
        self.runtime.pump()
    }

    /// Socket factory whose reader thread wakes this runtime.
    pub fn socket_factory(&self, addr: impl Into<String>) -> SocketTransportFactory {
        SocketTransportFactory::new(addr).with_scheduler(self.scheduler.clone())
    }

    /// How long the host may sleep before the next timer is due.
    ///
    /// `None` when no timer is registered; zero when one is already overdue.
    pub fn time_until_next_timer(&self) -> Option<Duration> {
        let deadline = self.runtime.next_deadline()?;
        let now = self.clock.now_millis();
        Some(Duration::from_millis(deadline.saturating_sub(now)))
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport candidates in production order: the host's native channel when
/// one is registered, then the development socket at `options.dev_server_addr`.
pub fn default_detector(
    native_host: Option<Rc<dyn NativeHost>>,
    options: &BridgeOptions,
) -> TransportDetector {
    TransportDetector::new()
        .with(NativeChannelFactory::new(native_host))
        .with(SocketTransportFactory::new(options.dev_server_addr.clone()))
}
