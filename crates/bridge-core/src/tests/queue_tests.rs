use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;

use super::MessageQueue;
use crate::error::BridgeError;
use crate::message::{BridgeMessage, Priority};
use crate::options::BridgeOptions;
use crate::runtime::TestRuntime;

type Sent = Rc<RefCell<Vec<Vec<BridgeMessage>>>>;

fn recording_queue(runtime: &TestRuntime, options: BridgeOptions) -> (MessageQueue, Sent) {
    let queue = MessageQueue::new(runtime.handle(), &options);
    let sent: Sent = Rc::default();
    let log = sent.clone();
    queue.set_sender(move |batch| {
        log.borrow_mut().push(batch.to_vec());
        Ok(())
    });
    (queue, sent)
}

fn types(batch: &[BridgeMessage]) -> Vec<&str> {
    batch
        .iter()
        .map(|message| message.message_type.as_str())
        .collect()
}

#[test]
fn immediate_flushes_split_into_batch_sized_chunks() {
    let runtime = TestRuntime::new();
    let (queue, sent) = recording_queue(&runtime, BridgeOptions::default().with_batch_size(10));

    for n in 0..25 {
        queue.enqueue("tick", json!(n), Priority::Normal);
    }
    assert_eq!(queue.flush_immediate().expect("flush"), 10);
    assert_eq!(queue.pending_count(), 15);
    assert!(queue.is_flush_scheduled());
    assert_eq!(queue.flush_immediate().expect("flush"), 10);
    assert_eq!(queue.flush_immediate().expect("flush"), 5);
    assert_eq!(queue.pending_count(), 0);
    assert!(!queue.is_flush_scheduled());

    let sizes: Vec<usize> = sent.borrow().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![10, 10, 5]);
    let payloads: Vec<_> = sent
        .borrow()
        .iter()
        .flatten()
        .map(|message| message.payload.clone())
        .collect();
    assert_eq!(payloads, (0..25).map(|n| json!(n)).collect::<Vec<_>>());
}

#[test]
fn flush_drains_high_then_normal_then_low() {
    let runtime = TestRuntime::new();
    let (queue, sent) = recording_queue(&runtime, BridgeOptions::default());

    queue.enqueue("low", json!(null), Priority::Low);
    queue.enqueue("normal", json!(null), Priority::Normal);
    queue.enqueue("high", json!(null), Priority::High);
    queue.flush().expect("flush");

    assert_eq!(types(&sent.borrow()[0]), vec!["high", "normal", "low"]);
}

#[test]
fn scheduled_flush_fires_after_interval() {
    let runtime = TestRuntime::new();
    let (queue, sent) = recording_queue(&runtime, BridgeOptions::default());

    queue.enqueue("a", json!(1), Priority::Normal);
    queue.enqueue("b", json!(2), Priority::Normal);
    assert!(queue.is_flush_scheduled());

    runtime.advance(15);
    assert!(sent.borrow().is_empty());
    runtime.advance(1);
    assert_eq!(sent.borrow().len(), 1);
    assert_eq!(types(&sent.borrow()[0]), vec!["a", "b"]);
    assert!(!queue.is_flush_scheduled());
}

#[test]
fn leftover_messages_schedule_another_flush() {
    let runtime = TestRuntime::new();
    let (queue, sent) = recording_queue(&runtime, BridgeOptions::default().with_batch_size(2));

    for n in 0..3 {
        queue.enqueue("tick", json!(n), Priority::Normal);
    }
    runtime.advance(16);
    assert_eq!(sent.borrow().len(), 1);
    assert_eq!(queue.pending_count(), 1);
    assert!(queue.is_flush_scheduled());

    runtime.advance(16);
    assert_eq!(sent.borrow().len(), 2);
    assert_eq!(queue.pending_count(), 0);
}

#[test]
fn flush_without_sender_leaves_queue_untouched() {
    let runtime = TestRuntime::new();
    let queue = MessageQueue::new(runtime.handle(), &BridgeOptions::default());

    queue.enqueue("a", json!(1), Priority::Low);
    assert_eq!(queue.flush().expect("no-op"), 0);
    assert_eq!(queue.pending_for(Priority::Low), 1);
}

#[test]
fn failed_batch_is_requeued_at_high_priority_in_order() {
    let runtime = TestRuntime::new();
    let queue = MessageQueue::new(runtime.handle(), &BridgeOptions::default());
    let fail = Rc::new(Cell::new(true));
    let sent: Sent = Rc::default();
    let (flag, log) = (fail.clone(), sent.clone());
    queue.set_sender(move |batch| {
        if flag.get() {
            return Err(BridgeError::NotConnected);
        }
        log.borrow_mut().push(batch.to_vec());
        Ok(())
    });

    queue.enqueue("n1", json!(null), Priority::Normal);
    queue.enqueue("n2", json!(null), Priority::Normal);
    queue.enqueue("l1", json!(null), Priority::Low);
    assert!(matches!(queue.flush(), Err(BridgeError::NotConnected)));
    assert_eq!(queue.pending_for(Priority::High), 3);
    assert_eq!(queue.pool_len(), 0);

    queue.enqueue("h2", json!(null), Priority::High);
    fail.set(false);
    queue.flush().expect("retry");
    assert_eq!(types(&sent.borrow()[0]), vec!["n1", "n2", "l1", "h2"]);
    assert_eq!(queue.stats().failures, 1);
}

#[test]
fn messages_are_dead_lettered_after_max_attempts() {
    let runtime = TestRuntime::new();
    let queue = MessageQueue::new(
        runtime.handle(),
        &BridgeOptions::default().with_max_flush_attempts(2),
    );
    queue.set_sender(|_| Err(BridgeError::Transport("broken pipe".into())));

    queue.enqueue("doomed", json!(null), Priority::Normal);
    assert!(queue.flush().is_err());
    assert_eq!(queue.pending_count(), 1);
    assert!(queue.flush().is_err());
    assert_eq!(queue.pending_count(), 0);

    let dead = queue.take_dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(dead[0].message.message_type, "doomed");
    assert_eq!(queue.stats().dead_lettered, 1);
}

#[test]
fn refusals_while_disconnected_do_not_count_as_attempts() {
    let runtime = TestRuntime::new();
    let connected = Rc::new(Cell::new(false));
    let sent: Sent = Rc::default();
    let queue = MessageQueue::new(
        runtime.handle(),
        &BridgeOptions::default().with_max_flush_attempts(2),
    );
    let (gate, log) = (connected.clone(), sent.clone());
    queue.set_sender(move |batch| {
        if !gate.get() {
            return Err(BridgeError::NotConnected);
        }
        log.borrow_mut().push(batch.to_vec());
        Ok(())
    });

    queue.enqueue("createView", json!({"viewId": "view_1"}), Priority::High);
    for _ in 0..5 {
        assert!(matches!(
            queue.flush_immediate(),
            Err(BridgeError::NotConnected)
        ));
    }
    assert_eq!(queue.pending_for(Priority::High), 1);
    assert!(queue.dead_letters().is_empty());
    assert!(!queue.is_flush_scheduled());
    runtime.advance(100);
    assert!(sent.borrow().is_empty());

    connected.set(true);
    assert_eq!(queue.flush_immediate().expect("flush"), 1);
    assert_eq!(types(&sent.borrow()[0]), vec!["createView"]);
}

#[test]
fn failed_writes_are_retried_on_the_next_interval() {
    let runtime = TestRuntime::new();
    let failing = Rc::new(Cell::new(true));
    let sent: Sent = Rc::default();
    let queue = MessageQueue::new(runtime.handle(), &BridgeOptions::default());
    let (gate, log) = (failing.clone(), sent.clone());
    queue.set_sender(move |batch| {
        if gate.get() {
            return Err(BridgeError::Transport("broken pipe".into()));
        }
        log.borrow_mut().push(batch.to_vec());
        Ok(())
    });

    queue.enqueue("a", json!(1), Priority::Normal);
    assert!(queue.flush_immediate().is_err());
    assert!(queue.is_flush_scheduled());

    failing.set(false);
    runtime.advance(16);
    assert_eq!(sent.borrow().len(), 1);
    assert_eq!(queue.pending_count(), 0);
}

#[test]
fn drain_all_empties_the_queue_batch_by_batch() {
    let runtime = TestRuntime::new();
    let (queue, sent) = recording_queue(&runtime, BridgeOptions::default().with_batch_size(4));

    for n in 0..9 {
        queue.enqueue("tick", json!(n), Priority::Low);
    }
    assert_eq!(queue.drain_all().expect("drain"), 9);
    let sizes: Vec<usize> = sent.borrow().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4, 4, 1]);
    assert!(!queue.is_flush_scheduled());
}

#[test]
fn envelopes_are_recycled_through_bounded_pool() {
    let runtime = TestRuntime::new();
    let (queue, _sent) = recording_queue(&runtime, BridgeOptions::default().with_pool_capacity(2));

    for n in 0..3 {
        queue.enqueue("a", json!(n), Priority::Normal);
    }
    queue.flush_immediate().expect("flush");
    assert_eq!(queue.pool_len(), 2);

    queue.enqueue("b", json!(0), Priority::Normal);
    let stats = queue.stats();
    assert_eq!(stats.pool_misses, 3);
    assert_eq!(stats.pool_hits, 1);
    assert_eq!(queue.pool_len(), 1);
}

#[test]
fn clear_discards_and_cancels_schedule() {
    let runtime = TestRuntime::new();
    let (queue, sent) = recording_queue(&runtime, BridgeOptions::default());

    queue.enqueue("a", json!(1), Priority::High);
    queue.enqueue("b", json!(2), Priority::Low);
    queue.clear();

    assert_eq!(queue.pending_count(), 0);
    assert!(!queue.is_flush_scheduled());
    runtime.advance(100);
    assert!(sent.borrow().is_empty());
    assert_eq!(queue.pool_len(), 2);
}

#[test]
fn reentrant_flush_from_sender_is_ignored() {
    let runtime = TestRuntime::new();
    let queue = MessageQueue::new(runtime.handle(), &BridgeOptions::default());
    let nested = Rc::new(Cell::new(None));
    let queue_ref = queue.clone();
    let result = nested.clone();
    queue.set_sender(move |_| {
        result.set(Some(queue_ref.flush().expect("nested flush")));
        Ok(())
    });

    queue.enqueue("a", json!(1), Priority::Normal);
    assert_eq!(queue.flush().expect("flush"), 1);
    assert_eq!(nested.get(), Some(0));
    queue.clear_sender();
}
