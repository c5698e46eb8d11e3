//! Deadline-ordered timer storage.
//!
//! A min-heap of (deadline, callback) entries. The scheduler bounds its
//! readiness wait by [TimerQueue::next_deadline] so no timer fires late, and
//! drains everything due with [TimerQueue::take_expired] so the callbacks can
//! run outside the queue's lock.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

type TimerCallback = Box<dyn FnOnce() + Send>;

struct TimerEntry {
    deadline: Instant,
    /// Tie-breaker: entries with equal deadlines fire in insertion order.
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so the BinaryHeap max-heap yields the earliest deadline.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, deadline: Instant, callback: TimerCallback) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(TimerEntry {
            deadline,
            seq,
            callback,
        });
    }

    /// The minimum deadline currently stored.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Remove and return every callback whose deadline has passed, ordered
    /// by deadline.
    pub fn take_expired(&mut self, now: Instant) -> Vec<TimerCallback> {
        let mut expired = Vec::new();

        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            expired.push(self.heap.pop().unwrap().callback);
        }

        expired
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
