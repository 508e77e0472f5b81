//! Priority-ordered batching of outbound messages.
//!
//! Messages are buffered per [`Priority`] and drained by a timer-scheduled
//! flush in batches of at most `batch_size`. Envelopes are recycled through a
//! bounded pool. A failed batch is put back at the front of the high queue.
//! Write failures bump each message's attempt count and messages that
//! exhaust their attempts move to a bounded dead-letter list. A batch
//! refused with [`BridgeError::NotConnected`] is held without counting an
//! attempt until the owner flushes again on reconnect.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};
use crate::message::{BridgeMessage, Operation, Priority};
use crate::options::BridgeOptions;
use crate::runtime::RuntimeHandle;
use crate::timer::TimerRegistration;

/// Delivers one drained batch. Installed by whoever owns the bridge.
pub type BatchSender = Rc<dyn Fn(&[BridgeMessage]) -> BridgeResult<()>>;

#[derive(Clone, Debug, PartialEq)]
pub struct QueuedMessage {
    pub message: BridgeMessage,
    pub priority: Priority,
    pub enqueued_at: u64,
    pub attempts: u32,
}

// Queue bookkeeping kept aside while the envelope is out with the sender.
type Receipt = (Priority, u64, u32);

impl QueuedMessage {
    fn into_parts(self) -> (BridgeMessage, Receipt) {
        (self.message, (self.priority, self.enqueued_at, self.attempts))
    }

    fn from_parts(message: BridgeMessage, (priority, enqueued_at, attempts): Receipt) -> Self {
        Self {
            message,
            priority,
            enqueued_at,
            attempts,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub sent: u64,
    pub batches: u64,
    pub failures: u64,
    pub dead_lettered: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
}

struct QueueInner {
    runtime: RuntimeHandle,
    flush_interval: Duration,
    batch_size: usize,
    pool_capacity: usize,
    max_attempts: u32,
    dead_letter_capacity: usize,
    queues: RefCell<[VecDeque<QueuedMessage>; 3]>,
    pool: RefCell<Vec<BridgeMessage>>,
    sender: RefCell<Option<BatchSender>>,
    scheduled: RefCell<Option<TimerRegistration>>,
    flushing: Cell<bool>,
    dead_letters: RefCell<VecDeque<QueuedMessage>>,
    stats: Cell<QueueStats>,
}

#[derive(Clone)]
pub struct MessageQueue {
    inner: Rc<QueueInner>,
}

impl MessageQueue {
    pub fn new(runtime: RuntimeHandle, options: &BridgeOptions) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                runtime,
                flush_interval: options.flush_interval(),
                batch_size: options.batch_size.max(1),
                pool_capacity: options.pool_capacity,
                max_attempts: options.max_flush_attempts.max(1),
                dead_letter_capacity: options.dead_letter_capacity,
                queues: RefCell::new(Default::default()),
                pool: RefCell::new(Vec::new()),
                sender: RefCell::new(None),
                scheduled: RefCell::new(None),
                flushing: Cell::new(false),
                dead_letters: RefCell::new(VecDeque::new()),
                stats: Cell::new(QueueStats::default()),
            }),
        }
    }

    pub fn set_sender(&self, sender: impl Fn(&[BridgeMessage]) -> BridgeResult<()> + 'static) {
        *self.inner.sender.borrow_mut() = Some(Rc::new(sender));
        if self.pending_count() > 0 {
            self.schedule_flush();
        }
    }

    /// Detaches the sender; queued messages stay buffered until a new one is set.
    pub fn clear_sender(&self) {
        self.inner.sender.borrow_mut().take();
    }

    pub fn enqueue(&self, message_type: &str, payload: Value, priority: Priority) {
        let mut message = self.acquire();
        let now = self.inner.runtime.now_millis();
        message.fill(message_type, payload, now);
        self.inner.queues.borrow_mut()[priority.index()].push_back(QueuedMessage {
            message,
            priority,
            enqueued_at: now,
            attempts: 0,
        });
        self.update_stats(|stats| stats.enqueued += 1);
        self.schedule_flush();
    }

    pub fn enqueue_operation(&self, operation: &Operation, priority: Priority) -> BridgeResult<()> {
        let (message_type, payload) = operation.to_parts()?;
        self.enqueue(message_type, payload, priority);
        Ok(())
    }

    /// Sends at most one batch. Returns the number of messages sent.
    ///
    /// A flush already in progress or a missing sender makes this a no-op.
    /// When messages remain after a successful batch, or after a failed
    /// write, another flush is scheduled. A batch refused because the bridge
    /// is not connected waits for the next explicit flush.
    pub fn flush(&self) -> BridgeResult<usize> {
        if self.inner.flushing.get() {
            return Ok(0);
        }
        let Some(sender) = self.inner.sender.borrow().clone() else {
            return Ok(0);
        };
        if let Some(registration) = self.inner.scheduled.borrow_mut().take() {
            registration.cancel();
        }
        let batch = self.drain_batch();
        if batch.is_empty() {
            return Ok(0);
        }

        self.inner.flushing.set(true);
        let (messages, receipts): (Vec<BridgeMessage>, Vec<Receipt>) =
            batch.into_iter().map(QueuedMessage::into_parts).unzip();
        let result = sender(&messages);
        self.inner.flushing.set(false);

        match result {
            Ok(()) => {
                let sent = messages.len();
                self.update_stats(|stats| {
                    stats.sent += sent as u64;
                    stats.batches += 1;
                });
                for message in messages {
                    self.release(message);
                }
                if self.pending_count() > 0 {
                    self.schedule_flush();
                }
                Ok(sent)
            }
            Err(err) => {
                let batch = messages
                    .into_iter()
                    .zip(receipts)
                    .map(|(message, receipt)| QueuedMessage::from_parts(message, receipt))
                    .collect();
                self.requeue_failed(batch, &err);
                if !matches!(err, BridgeError::NotConnected) && self.pending_count() > 0 {
                    self.schedule_flush();
                }
                Err(err)
            }
        }
    }

    /// Cancels the scheduled flush and runs one flush cycle now.
    ///
    /// Whatever exceeds one batch is left to the flush scheduled afterwards.
    pub fn flush_immediate(&self) -> BridgeResult<usize> {
        if let Some(registration) = self.inner.scheduled.borrow_mut().take() {
            registration.cancel();
        }
        self.flush()
    }

    /// Flushes batch after batch until the queue is empty or one fails.
    pub fn drain_all(&self) -> BridgeResult<usize> {
        let mut total = 0;
        loop {
            let sent = self.flush()?;
            if sent == 0 {
                return Ok(total);
            }
            total += sent;
        }
    }

    /// Drops every buffered message and cancels any scheduled flush.
    pub fn clear(&self) {
        if let Some(registration) = self.inner.scheduled.borrow_mut().take() {
            registration.cancel();
        }
        let drained: Vec<QueuedMessage> = self
            .inner
            .queues
            .borrow_mut()
            .iter_mut()
            .flat_map(|queue| queue.drain(..))
            .collect();
        for queued in drained {
            self.release(queued.message);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queues.borrow().iter().map(VecDeque::len).sum()
    }

    pub fn pending_for(&self, priority: Priority) -> usize {
        self.inner.queues.borrow()[priority.index()].len()
    }

    pub fn pool_len(&self) -> usize {
        self.inner.pool.borrow().len()
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.scheduled.borrow().is_some()
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.stats.get()
    }

    pub fn dead_letters(&self) -> Vec<QueuedMessage> {
        self.inner.dead_letters.borrow().iter().cloned().collect()
    }

    pub fn take_dead_letters(&self) -> Vec<QueuedMessage> {
        self.inner.dead_letters.borrow_mut().drain(..).collect()
    }

    fn acquire(&self) -> BridgeMessage {
        let pooled = self.inner.pool.borrow_mut().pop();
        match pooled {
            Some(message) => {
                self.update_stats(|stats| stats.pool_hits += 1);
                message
            }
            None => {
                self.update_stats(|stats| stats.pool_misses += 1);
                BridgeMessage::default()
            }
        }
    }

    fn release(&self, mut message: BridgeMessage) {
        let mut pool = self.inner.pool.borrow_mut();
        if pool.len() < self.inner.pool_capacity {
            message.reset();
            pool.push(message);
        }
    }

    fn drain_batch(&self) -> Vec<QueuedMessage> {
        let mut queues = self.inner.queues.borrow_mut();
        let mut batch = Vec::with_capacity(self.inner.batch_size);
        for queue in queues.iter_mut() {
            while batch.len() < self.inner.batch_size {
                match queue.pop_front() {
                    Some(queued) => batch.push(queued),
                    None => break,
                }
            }
        }
        batch
    }

    fn requeue_failed(&self, batch: Vec<QueuedMessage>, err: &BridgeError) {
        self.update_stats(|stats| stats.failures += 1);
        let counts = !matches!(err, BridgeError::NotConnected);
        if counts {
            log::warn!("flush of {} messages failed: {err}", batch.len());
        } else {
            log::debug!("holding {} messages until connected", batch.len());
        }
        let mut retry = Vec::new();
        for mut queued in batch {
            if counts {
                queued.attempts += 1;
            }
            if queued.attempts >= self.inner.max_attempts {
                self.dead_letter(queued);
            } else {
                retry.push(queued);
            }
        }
        let mut queues = self.inner.queues.borrow_mut();
        let high = &mut queues[Priority::High.index()];
        for queued in retry.into_iter().rev() {
            high.push_front(queued);
        }
    }

    fn dead_letter(&self, queued: QueuedMessage) {
        log::error!(
            "dropping `{}` after {} failed attempts",
            queued.message.message_type,
            queued.attempts
        );
        self.update_stats(|stats| stats.dead_lettered += 1);
        let mut dead_letters = self.inner.dead_letters.borrow_mut();
        if self.inner.dead_letter_capacity == 0 {
            return;
        }
        if dead_letters.len() >= self.inner.dead_letter_capacity {
            dead_letters.pop_front();
        }
        dead_letters.push_back(queued);
    }

    fn schedule_flush(&self) {
        if self.inner.flushing.get() || self.inner.scheduled.borrow().is_some() {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        let registration = self
            .inner
            .runtime
            .register_timer(self.inner.flush_interval, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.scheduled.borrow_mut().take();
                    if let Err(err) = (MessageQueue { inner }).flush() {
                        log::warn!("scheduled flush failed: {err}");
                    }
                }
            });
        if registration.is_active() {
            *self.inner.scheduled.borrow_mut() = Some(registration);
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut QueueStats)) {
        let mut stats = self.inner.stats.get();
        update(&mut stats);
        self.inner.stats.set(stats);
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("pending", &self.pending_count())
            .field("flush_scheduled", &self.is_flush_scheduled())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/queue_tests.rs"]
mod tests;
