//! Timer suspension.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::futures::slot::OpSlot;
use crate::scheduler::Scheduler;

/// Suspends the awaiting task for at least the requested duration.
///
/// Created by [Scheduler::sleep]. The first poll arms a scheduler timer;
/// the timer cannot be unscheduled, so dropping the future early leaves a
/// no-op callback behind.
pub struct Sleep {
    sched: Scheduler,
    duration: Duration,
    armed: bool,
    slot: Arc<OpSlot<()>>,
}

impl Sleep {
    pub(crate) fn new(sched: Scheduler, duration: Duration) -> Self {
        Self {
            sched,
            duration,
            armed: false,
            slot: OpSlot::new(),
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if !this.armed {
            this.armed = true;
            let slot = this.slot.clone();
            this.sched.schedule_after(this.duration, move || slot.fulfill(()));
        }

        this.slot.poll_take(cx)
    }
}

#[cfg(test)]
mod tests {
    use crate::scheduler::Scheduler;
    use std::thread;
    use std::time::{Duration, Instant};

    fn start_driver(sched: &Scheduler) {
        let driver = sched.clone();
        thread::spawn(move || driver.run());
    }

    #[test]
    fn sleep_suspends_for_at_least_the_duration() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let inner = sched.clone();
        let task = sched.spawn(async move {
            let before = Instant::now();
            inner.sleep(Duration::from_millis(50)).await;
            before.elapsed()
        });

        assert!(task.join().unwrap() >= Duration::from_millis(50));
    }

    #[test]
    fn shorter_sleep_finishes_first() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let fast_sched = sched.clone();
        let fast = sched.spawn(async move {
            fast_sched.sleep(Duration::from_millis(10)).await;
            Instant::now()
        });

        let slow_sched = sched.clone();
        let slow = sched.spawn(async move {
            slow_sched.sleep(Duration::from_millis(50)).await;
            Instant::now()
        });

        assert!(fast.join().unwrap() < slow.join().unwrap());
    }
}
