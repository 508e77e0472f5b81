use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{Clock, DefaultScheduler, Runtime, RuntimeHandle};

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Headless runtime for exercising the bridge in tests.
///
/// Owns a [`Runtime`] driven by a [`ManualClock`], so timers only fire when
/// the test advances time. Microtasks run on every [`TestHarness::pump`].
pub struct TestHarness {
    runtime: Runtime,
    clock: Arc<ManualClock>,
}

impl TestHarness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new());
        Self {
            runtime: Runtime::new(Arc::new(DefaultScheduler), clock.clone()),
            clock,
        }
    }

    /// Handle for constructing bridges, queues and renderers under test.
    pub fn handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn clock(&self) -> Arc<ManualClock> {
        Arc::clone(&self.clock)
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Runs pending microtasks and due timers without moving time.
    pub fn pump(&self) -> usize {
        self.runtime.pump()
    }

    /// Moves the clock forward by `millis` and runs everything that became due.
    pub fn advance(&self, millis: u64) -> usize {
        self.clock.advance(millis);
        self.runtime.pump()
    }

    pub fn advance_by(&self, duration: Duration) -> usize {
        self.advance(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Advances straight to the next timer deadline, if any, and runs it.
    pub fn run_next_timer(&self) -> bool {
        match self.runtime.next_deadline() {
            Some(deadline) => {
                self.clock.set(deadline.max(self.clock.now_millis()));
                self.runtime.pump();
                true
            }
            None => false,
        }
    }

    /// Pumps and fires timers until no work is left, bounded by `max_timers`.
    pub fn run_until_idle(&self, max_timers: usize) -> usize {
        let mut fired = 0;
        self.pump();
        while fired < max_timers && self.run_next_timer() {
            fired += 1;
        }
        fired
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
