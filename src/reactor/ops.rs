//! Pending operation records and their per-direction FIFO queues.

use std::collections::VecDeque;

use crate::error::SocketError;

/// The direction a pending operation waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Read,
    Write,
    Connect,
}

/// A queued, one-shot completion record.
///
/// The reactor completes an operation with `None` when the descriptor became
/// ready, or with a synthesized error derived from the error/hangup flags.
/// An operation runs at most once and is destroyed by running it.
pub(crate) struct Operation {
    complete: Box<dyn FnOnce(Option<SocketError>) + Send>,
}

impl Operation {
    pub fn new(complete: impl FnOnce(Option<SocketError>) + Send + 'static) -> Self {
        Self {
            complete: Box::new(complete),
        }
    }

    pub fn complete(self, err: Option<SocketError>) {
        (self.complete)(err)
    }
}

/// FIFO of pending operations for one descriptor direction.
///
/// `push_front` exists for exactly one purpose: an operation popped on a
/// spurious readiness notification retakes the head of its queue, so
/// submission order is preserved.
#[derive(Default)]
pub(crate) struct OpQueue {
    ops: VecDeque<Operation>,
}

impl OpQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, op: Operation) {
        self.ops.push_back(op);
    }

    pub fn push_front(&mut self, op: Operation) {
        self.ops.push_front(op);
    }

    pub fn pop_front(&mut self) -> Option<Operation> {
        self.ops.pop_front()
    }

    pub fn pop_back(&mut self) -> Option<Operation> {
        self.ops.pop_back()
    }

    /// Move every operation of `other` to the back of this queue.
    pub fn append(&mut self, other: &mut OpQueue) {
        self.ops.append(&mut other.ops);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{OpQueue, Operation};
    use std::sync::mpsc::channel;

    #[test]
    fn fifo_order() {
        let (tx, rx) = channel();
        let mut q = OpQueue::new();

        for i in 0..3 {
            let tx = tx.clone();
            q.push_back(Operation::new(move |_| tx.send(i).unwrap()));
        }

        while let Some(op) = q.pop_front() {
            op.complete(None);
        }

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn push_front_retakes_head() {
        let (tx, rx) = channel();
        let mut q = OpQueue::new();

        for i in 1..3 {
            let tx = tx.clone();
            q.push_back(Operation::new(move |_| tx.send(i).unwrap()));
        }

        let tx2 = tx.clone();
        q.push_front(Operation::new(move |_| tx2.send(0).unwrap()));

        while let Some(op) = q.pop_front() {
            op.complete(None);
        }

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn append_splices_in_order() {
        let (tx, rx) = channel();
        let mut a = OpQueue::new();
        let mut b = OpQueue::new();

        for i in 0..2 {
            let tx = tx.clone();
            a.push_back(Operation::new(move |_| tx.send(i).unwrap()));
        }
        for i in 2..4 {
            let tx = tx.clone();
            b.push_back(Operation::new(move |_| tx.send(i).unwrap()));
        }

        a.append(&mut b);
        assert!(b.is_empty());
        assert_eq!(a.len(), 4);

        while let Some(op) = a.pop_front() {
            op.complete(None);
        }

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }
}
