//! The event loop.
//!
//! A [Scheduler] owns the reactor, the timer queue, the cross-thread posted
//! queue and the task table. Exactly one thread, the driver thread, calls
//! [Scheduler::run]. Every I/O completion, timer callback, posted closure
//! and task resumption executes there, so none of the I/O state needs
//! locking of its own. Any number of other threads may call
//! [Scheduler::post], [Scheduler::schedule_after] or spawn tasks. Those are
//! the only cross-thread entry points and each is guarded by its own lock.
//!
//! # Example
//!
//! ```
//! use corio::scheduler::Scheduler;
//! use std::thread;
//! use std::time::Duration;
//!
//! let sched = Scheduler::new().unwrap();
//!
//! let driver = sched.clone();
//! thread::spawn(move || driver.run());
//!
//! let task = sched.spawn(async { 2 + 8 });
//! assert_eq!(task.join().unwrap(), 10);
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use slab::Slab;

use crate::error::ReactorError;
use crate::futures::sleep::Sleep;
use crate::reactor::Reactor;
use crate::task::{self, Defer, ScopedTask, TaskHandle};
use crate::timer::TimerQueue;

/// An entry in the posted FIFO: either a closure to run or a task to poll.
enum Posted {
    Op(Box<dyn FnOnce() + Send>),
    Resume(usize),
}

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct TaskSlot {
    /// Guards handle-driven removal against slab key reuse.
    epoch: u64,
    /// Taken out of the slot while the task is being polled.
    future: Option<TaskFuture>,
}

pub(crate) struct SchedulerInner {
    reactor: Reactor,
    timers: Mutex<TimerQueue>,
    posted: Mutex<Vec<Posted>>,
    tasks: Mutex<Slab<TaskSlot>>,
    next_epoch: AtomicU64,
}

/// A cloneable handle to one event loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Wakes a task by posting its resumption back onto the scheduler. The
/// resumption itself always happens on the driver thread, never on the
/// thread that triggered the wake.
struct TaskWaker {
    id: usize,
    sched: Weak<SchedulerInner>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        if let Some(inner) = self.sched.upgrade() {
            inner.posted.lock().unwrap().push(Posted::Resume(self.id));
            inner.reactor.wake();
        }
    }
}

impl Scheduler {
    /// Create a scheduler. Fails only if the reactor's kernel handles cannot
    /// be brought up.
    pub fn new() -> Result<Self, ReactorError> {
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                reactor: Reactor::new()?,
                timers: Mutex::new(TimerQueue::new()),
                posted: Mutex::new(Vec::new()),
                tasks: Mutex::new(Slab::new()),
                next_epoch: AtomicU64::new(0),
            }),
        })
    }

    pub(crate) fn reactor(&self) -> &Reactor {
        &self.inner.reactor
    }

    /// Queue `f` for execution on the driver thread on a later loop
    /// iteration. Safe from any thread; posted entries run in FIFO order.
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        self.inner
            .posted
            .lock()
            .unwrap()
            .push(Posted::Op(Box::new(f)));
        self.inner.reactor.wake();
    }

    /// Run `f` on the driver thread once `delay` has elapsed. Safe from any
    /// thread. Timers cannot be unscheduled.
    pub fn schedule_after(&self, delay: Duration, f: impl FnOnce() + Send + 'static) {
        self.inner
            .timers
            .lock()
            .unwrap()
            .add(Instant::now() + delay, Box::new(f));
        // The new deadline may be earlier than the one the driver is
        // currently sleeping towards.
        self.inner.reactor.wake();
    }

    /// Spawn a future. The returned handle detaches on drop: the task keeps
    /// running to completion on its own.
    pub fn spawn<F, T>(&self, future: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        task::spawn(self, future)
    }

    /// Spawn a future whose handle owns it: dropping the [ScopedTask]
    /// removes the task from the scheduler, destroying the suspended future.
    pub fn spawn_scoped<F, T>(&self, future: F) -> ScopedTask<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        task::spawn_scoped(self, future)
    }

    /// Suspend the calling task for at least `duration`.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        Sleep::new(self.clone(), duration)
    }

    /// Post `f` and suspend the calling task until it has run on the driver
    /// thread; resumes with `f`'s return value.
    pub fn defer<F, T>(&self, f: F) -> Defer<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Defer::new(self.clone(), f)
    }

    /// Drive the event loop forever. Shutdown is the embedding program's
    /// responsibility; the loop never stops itself.
    pub fn run(&self) -> ! {
        loop {
            self.turn();
        }
    }

    /// One loop iteration: wait for readiness (bounded by the earliest timer
    /// deadline), fire expired timers, then drain the posted queue.
    pub(crate) fn turn(&self) {
        let timeout = self.wait_timeout();

        if let Err(err) = self.inner.reactor.run(timeout) {
            log::error!("reactor wait failed: {err}");
        }

        self.fire_expired_timers();
        self.drain_posted();
    }

    fn wait_timeout(&self) -> Option<Duration> {
        if !self.inner.posted.lock().unwrap().is_empty() {
            return Some(Duration::ZERO);
        }

        self.inner
            .timers
            .lock()
            .unwrap()
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn fire_expired_timers(&self) {
        let expired = self
            .inner
            .timers
            .lock()
            .unwrap()
            .take_expired(Instant::now());

        // Invoked outside the lock so a callback may reschedule.
        for callback in expired {
            callback();
        }
    }

    fn drain_posted(&self) {
        // The whole queue is taken atomically; entries posted by the
        // callbacks below run on the next iteration.
        let batch = std::mem::take(&mut *self.inner.posted.lock().unwrap());

        for entry in batch {
            match entry {
                Posted::Op(f) => f(),
                Posted::Resume(id) => self.poll_task(id),
            }
        }
    }

    /// Pin `future` into the task table and post its first resumption.
    pub(crate) fn insert_task(&self, future: TaskFuture) -> (usize, u64) {
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);

        let id = self.inner.tasks.lock().unwrap().insert(TaskSlot {
            epoch,
            future: Some(future),
        });

        self.inner.posted.lock().unwrap().push(Posted::Resume(id));
        self.inner.reactor.wake();

        log::trace!("spawned task {id} (epoch {epoch})");
        (id, epoch)
    }

    /// Force-destroy a task if it is still alive and still the same spawn
    /// generation the caller knew about.
    pub(crate) fn remove_task(&self, id: usize, epoch: u64) {
        let mut tasks = self.inner.tasks.lock().unwrap();

        if tasks.get(id).is_some_and(|slot| slot.epoch == epoch) {
            tasks.remove(id);
            log::trace!("task {id} destroyed by its handle");
        }
    }

    fn poll_task(&self, id: usize) {
        // Taken out of the slot so the poll body can spawn tasks or submit
        // operations without holding the table lock. A stale resume for a
        // completed task finds no future here and is ignored. The epoch is
        // captured alongside: a ScopedTask drop during the poll frees the
        // key, and a concurrent spawn may reuse it for a different task.
        let Some((mut future, epoch)) = self
            .inner
            .tasks
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(|slot| slot.future.take().map(|future| (future, slot.epoch)))
        else {
            return;
        };

        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            sched: Arc::downgrade(&self.inner),
        }));
        let mut cx = Context::from_waker(&waker);

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                let mut tasks = self.inner.tasks.lock().unwrap();

                // Only this task's own slot may be removed; a reused key
                // belongs to somebody else's task now.
                if tasks.get(id).is_some_and(|slot| slot.epoch == epoch) {
                    tasks.remove(id);
                }
                log::trace!("task {id} finished");
            }
            Poll::Pending => {
                let mut tasks = self.inner.tasks.lock().unwrap();

                // The slot is gone if a ScopedTask handle was dropped while
                // we were polling, and repopulated if a spawn then reused
                // the key; either way the stale future is destroyed right
                // here instead of clobbering the slot.
                match tasks.get_mut(id) {
                    Some(slot) if slot.epoch == epoch => slot.future = Some(future),
                    _ => {}
                }
            }
        }
    }
}
