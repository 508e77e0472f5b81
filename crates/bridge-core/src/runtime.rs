use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use crate::platform::{Clock, RuntimeScheduler};
use crate::timer::TimerRegistration;

pub(crate) type TimerId = u64;

type Task = Box<dyn FnOnce() + 'static>;

struct TimerEntry {
    id: TimerId,
    deadline: u64,
    callback: Option<Task>,
}

struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    clock: Arc<dyn Clock>,
    needs_turn: Cell<bool>,
    pending_tasks: RefCell<VecDeque<Task>>,
    timers: RefCell<Vec<TimerEntry>>,
    next_timer_id: Cell<TimerId>,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn RuntimeScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            scheduler,
            clock,
            needs_turn: Cell::new(false),
            pending_tasks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
            next_timer_id: Cell::new(1),
        }
    }

    fn schedule(&self) {
        self.needs_turn.set(true);
        self.scheduler.schedule_turn();
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    fn enqueue_task(&self, task: Task) {
        self.pending_tasks.borrow_mut().push_back(task);
        self.schedule();
    }

    // Tasks spawned while draining run in the same pass.
    fn drain_tasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.pending_tasks.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }

    fn has_tasks(&self) -> bool {
        !self.pending_tasks.borrow().is_empty()
    }

    fn register_timer(&self, delay: Duration, callback: Task) -> TimerId {
        let id = self.next_timer_id.get();
        self.next_timer_id.set(id + 1);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let deadline = self.now_millis().saturating_add(delay_ms);
        self.timers.borrow_mut().push(TimerEntry {
            id,
            deadline,
            callback: Some(callback),
        });
        self.schedule();
        id
    }

    fn cancel_timer(&self, id: TimerId) {
        let mut timers = self.timers.borrow_mut();
        if let Some(index) = timers.iter().position(|entry| entry.id == id) {
            timers.remove(index);
        }
    }

    fn has_timers(&self) -> bool {
        !self.timers.borrow().is_empty()
    }

    fn next_deadline(&self) -> Option<u64> {
        self.timers.borrow().iter().map(|entry| entry.deadline).min()
    }

    fn take_next_due(&self, now: u64) -> Option<TimerEntry> {
        let mut timers = self.timers.borrow_mut();
        let index = timers
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline <= now)
            .min_by_key(|(_, entry)| (entry.deadline, entry.id))
            .map(|(index, _)| index)?;
        Some(timers.remove(index))
    }

    // One timer at a time so a callback can still cancel a later due timer.
    fn run_due_timers(&self) -> usize {
        let now = self.now_millis();
        let mut fired = 0;
        while let Some(mut entry) = self.take_next_due(now) {
            if let Some(callback) = entry.callback.take() {
                callback();
                fired += 1;
            }
        }
        fired
    }

    fn settle(&self) {
        if !self.has_tasks() && !self.has_timers() {
            self.needs_turn.set(false);
        }
    }
}

/// Owner of the cooperative task and timer queues.
///
/// Everything runs on the thread that owns the runtime; the host calls
/// [`Runtime::pump`] whenever the scheduler asked for a turn or time moved.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(scheduler, clock)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    pub fn now_millis(&self) -> u64 {
        self.inner.now_millis()
    }

    pub fn needs_turn(&self) -> bool {
        self.inner.needs_turn.get()
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.inner.has_tasks()
    }

    pub fn has_timers(&self) -> bool {
        self.inner.has_timers()
    }

    /// Earliest deadline among registered timers, in clock milliseconds.
    pub fn next_deadline(&self) -> Option<u64> {
        self.inner.next_deadline()
    }

    /// Runs queued tasks and due timers until nothing is immediately runnable.
    ///
    /// Returns the number of tasks and timer callbacks that ran.
    pub fn pump(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.inner.drain_tasks() + self.inner.run_due_timers();
            if ran == 0 {
                break;
            }
            total += ran;
        }
        self.inner.settle();
        total
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("pending_tasks", &self.inner.pending_tasks.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("needs_turn", &self.inner.needs_turn.get())
            .finish()
    }
}

/// Scheduler for hosts that poll [`Runtime::needs_turn`] instead of being woken.
#[derive(Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn schedule_turn(&self) {}
}

#[derive(Clone)]
pub struct RuntimeHandle(pub(crate) Weak<RuntimeInner>);

impl RuntimeHandle {
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub fn schedule(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.schedule();
        }
    }

    /// Current clock reading, or `0` once the runtime is gone.
    pub fn now_millis(&self) -> u64 {
        self.0
            .upgrade()
            .map(|inner| inner.now_millis())
            .unwrap_or(0)
    }

    /// Queues a task that runs on the next turn, before any timer fires.
    pub fn spawn_task(&self, task: impl FnOnce() + 'static) {
        if let Some(inner) = self.0.upgrade() {
            inner.enqueue_task(Box::new(task));
        } else {
            task();
        }
    }

    pub fn drain_tasks(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.drain_tasks();
        }
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_tasks())
            .unwrap_or(false)
    }

    /// Registers a one-shot timer firing `delay` after the current clock reading.
    ///
    /// The timer is cancelled when the returned registration is dropped.
    pub fn register_timer(
        &self,
        delay: Duration,
        callback: impl FnOnce() + 'static,
    ) -> TimerRegistration {
        match self.0.upgrade() {
            Some(inner) => {
                let id = inner.register_timer(delay, Box::new(callback));
                TimerRegistration::new(self.clone(), id)
            }
            None => TimerRegistration::inactive(self.clone()),
        }
    }

    pub(crate) fn cancel_timer(&self, id: TimerId) {
        if let Some(inner) = self.0.upgrade() {
            inner.cancel_timer(id);
        }
    }

    pub fn has_timers(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_timers())
            .unwrap_or(false)
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct TestScheduler;

#[cfg(test)]
impl RuntimeScheduler for TestScheduler {
    fn schedule_turn(&self) {}
}

#[cfg(test)]
#[derive(Default)]
pub struct TestClock {
    now: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl Clock for TestClock {
    fn now_millis(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
pub struct TestRuntime {
    runtime: Runtime,
    clock: Arc<TestClock>,
}

#[cfg(test)]
impl TestRuntime {
    pub fn new() -> Self {
        let clock = Arc::new(TestClock::default());
        Self {
            runtime: Runtime::new(Arc::new(TestScheduler), clock.clone()),
            clock,
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn pump(&self) -> usize {
        self.runtime.pump()
    }

    pub fn advance(&self, millis: u64) -> usize {
        self.clock
            .now
            .fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
        self.runtime.pump()
    }
}
