//! Bounded message queue (C2).
//!
//! A fixed-capacity ring buffer behind one mutex and two condition variables, directly
//! grounded on `mec_queue_push`/`mec_queue_pop` in the original `queue.c`: push never
//! blocks (fail-fast on `Overflow`), pop honors the same three timeout regimes (block
//! forever, poll once, wait up to a deadline). `parking_lot` replaces the C mutex/condvar
//! pair the same way it already replaces `std::sync::Mutex` everywhere else in this
//! codebase.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::track::TrackBatch;

#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub sensor_id: u8,
    pub timestamp: Instant,
    pub batch: Arc<TrackBatch>,
}

/// Returned by `push` on overflow. Carries the message back unmodified: `Invariant Q1`
/// requires the producer's retain not be performed, so the caller gets its `Arc` back at
/// the same strong count it had before the call.
pub struct Overflow {
    pub capacity: usize,
    pub msg: QueueMessage,
}

pub enum PopOutcome {
    Message(QueueMessage),
    TimedOut,
}

struct Inner {
    buf: VecDeque<QueueMessage>,
    capacity: usize,
}

pub struct MessageQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(capacity),
                capacity,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Never blocks. Returns `Overflow` (with the message handed back) when at capacity.
    pub fn push(&self, msg: QueueMessage) -> Result<(), Overflow> {
        let mut inner = self.inner.lock();
        if inner.buf.len() == inner.capacity {
            return Err(Overflow {
                capacity: inner.capacity,
                msg,
            });
        }
        inner.buf.push_back(msg);
        self.not_empty.notify_one();
        Ok(())
    }

    /// `timeout_ms < 0`: block until a message is available.
    /// `timeout_ms == 0`: return `TimedOut` immediately if empty.
    /// `timeout_ms > 0`: wait up to that long against an absolute deadline (guards
    /// against spurious wakeups re-arming a fresh relative wait each time).
    pub fn pop(&self, timeout_ms: i64) -> PopOutcome {
        let mut inner = self.inner.lock();

        if timeout_ms == 0 {
            if inner.buf.is_empty() {
                return PopOutcome::TimedOut;
            }
        } else if timeout_ms < 0 {
            while inner.buf.is_empty() {
                self.not_empty.wait(&mut inner);
            }
        } else {
            let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
            while inner.buf.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    return PopOutcome::TimedOut;
                }
                let result = self.not_empty.wait_for(&mut inner, deadline - now);
                if result.timed_out() && inner.buf.is_empty() {
                    return PopOutcome::TimedOut;
                }
            }
        }

        let msg = inner
            .buf
            .pop_front()
            .expect("buffer non-empty per loop guard above");
        self.not_full.notify_one();
        PopOutcome::Message(msg)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Drains any queued messages, releasing their batch handles via normal `Drop`.
    /// Idempotent: calling this on an already-empty queue is a no-op.
    pub fn destroy(&self) {
        self.inner.lock().buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::MeasurementBatch;

    fn msg(sensor_id: u8) -> QueueMessage {
        let batch = MeasurementBatch::with_capacity(1).finish();
        QueueMessage {
            sensor_id,
            timestamp: Instant::now(),
            batch,
        }
    }

    #[test]
    fn push_pop_is_fifo_per_sensor() {
        let q = MessageQueue::new(8);
        q.push(msg(1)).ok();
        q.push(msg(1)).ok();
        q.push(msg(1)).ok();
        for expected in 0..3 {
            match q.pop(0) {
                PopOutcome::Message(m) => assert_eq!(m.sensor_id, 1, "iteration {expected}"),
                PopOutcome::TimedOut => panic!("expected message"),
            }
        }
    }

    #[test]
    fn overflow_leaves_capacity_and_refcount_untouched() {
        let q = MessageQueue::new(2);
        q.push(msg(1)).ok();
        q.push(msg(2)).ok();
        let third = msg(3);
        let rc_before = Arc::strong_count(&third.batch);
        match q.push(third) {
            Err(overflow) => {
                assert_eq!(overflow.capacity, 2);
                assert_eq!(q.size(), 2);
                assert_eq!(Arc::strong_count(&overflow.msg.batch), rc_before);
            }
            Ok(()) => panic!("expected overflow"),
        }
    }

    #[test]
    fn pop_zero_timeout_on_empty_queue_times_out() {
        let q = MessageQueue::new(4);
        assert!(matches!(q.pop(0), PopOutcome::TimedOut));
    }

    #[test]
    fn pop_with_positive_timeout_returns_message_pushed_concurrently() {
        use std::thread;

        let q = Arc::new(MessageQueue::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q2.push(msg(9)).ok();
        });
        match q.pop(500) {
            PopOutcome::Message(m) => assert_eq!(m.sensor_id, 9),
            PopOutcome::TimedOut => panic!("expected message to arrive before deadline"),
        }
        handle.join().unwrap();
    }
}
