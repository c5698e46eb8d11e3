//! The one-shot completion slot every awaitable is built on.

use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Shared between an armed operation's completion closure and the future
/// polling for its result. Holds zero or one value and at most one waker;
/// fulfilment wakes the registered awaiter, whose next poll takes the value.
pub(crate) struct OpSlot<T> {
    state: Mutex<SlotState<T>>,
}

struct SlotState<T> {
    value: Option<T>,
    waker: Option<Waker>,
}

impl<T> OpSlot<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState {
                value: None,
                waker: None,
            }),
        })
    }

    /// Deposit the completion value. Called at most once, from the
    /// operation's completion closure.
    pub fn fulfill(&self, value: T) {
        let waker = {
            let mut state = self.state.lock().unwrap();
            state.value = Some(value);
            state.waker.take()
        };

        // Woken outside the lock; the wake posts a resumption that will
        // poll_take on a later loop iteration.
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub fn poll_take(&self, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.state.lock().unwrap();

        if let Some(value) = state.value.take() {
            Poll::Ready(value)
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OpSlot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll, Wake, Waker};

    struct CountingWake(AtomicUsize);

    impl Wake for CountingWake {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn value_deposited_before_poll_is_ready_immediately() {
        let slot = OpSlot::new();
        slot.fulfill(5);

        let wake = Arc::new(CountingWake(AtomicUsize::new(0)));
        let waker = Waker::from(wake.clone());
        let mut cx = Context::from_waker(&waker);

        assert_eq!(slot.poll_take(&mut cx), Poll::Ready(5));
        assert_eq!(wake.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fulfill_wakes_the_registered_awaiter_once() {
        let slot = OpSlot::new();

        let wake = Arc::new(CountingWake(AtomicUsize::new(0)));
        let waker = Waker::from(wake.clone());
        let mut cx = Context::from_waker(&waker);

        assert_eq!(slot.poll_take(&mut cx), Poll::Pending);

        slot.fulfill("done");
        assert_eq!(wake.0.load(Ordering::SeqCst), 1);
        assert_eq!(slot.poll_take(&mut cx), Poll::Ready("done"));
    }
}
