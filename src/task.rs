//! Task handles and completion delivery.
//!
//! Spawning a future yields a handle wrapping a *promise*: a single-slot
//! completion channel holding zero or one produced result and at most one
//! watcher. The watcher is either a completion callback registered with
//! [TaskHandle::on_complete] or the waker of a task awaiting the handle;
//! registering a new watcher replaces the old one (last registration wins;
//! the contract is deliberately single-subscriber). The watcher fires
//! exactly once,
//! when the task reaches its terminal state, and is handed the result by
//! move.
//!
//! Two ownership policies share this contract:
//!
//! * [TaskHandle] detaches on drop: the task keeps running and the result
//!   is lost if nobody is watching.
//! * [ScopedTask] owns its task: dropping the handle removes the task from
//!   the scheduler, destroying the suspended future.
//!
//! A panic inside a task's body never tears down the driver thread: it is
//! caught and delivered as [JoinError::Panicked] through the same channel as
//! any other result.
//!
//! # Example
//!
//! ```
//! use corio::scheduler::Scheduler;
//! use std::thread;
//!
//! let sched = Scheduler::new().unwrap();
//! let driver = sched.clone();
//! thread::spawn(move || driver.run());
//!
//! let outer = sched.clone();
//! let task = sched.spawn(async move {
//!     // Awaiting another task suspends this one until it completes.
//!     let inner = outer.spawn(async { 21 });
//!     inner.await.unwrap() * 2
//! });
//!
//! assert_eq!(task.join().unwrap(), 42);
//! ```

use std::future::Future;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::error::JoinError;
use crate::futures::slot::OpSlot;
use crate::scheduler::Scheduler;

enum Watcher<T> {
    None,
    Callback(Box<dyn FnOnce(Result<T, JoinError>) + Send>),
    Waker(std::task::Waker),
}

struct PromiseState<T> {
    result: Option<Result<T, JoinError>>,
    watcher: Watcher<T>,
    delivered: bool,
}

/// The completion slot shared between a running task and its handle.
struct Promise<T>(Arc<Mutex<PromiseState<T>>>);

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Promise<T> {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(PromiseState {
            result: None,
            watcher: Watcher::None,
            delivered: false,
        })))
    }

    /// Store the task's result and fire the watcher, if any. Runs on the
    /// driver thread, at most once per promise.
    fn complete(&self, result: Result<T, JoinError>) {
        let mut state = self.0.lock().unwrap();
        debug_assert!(!state.delivered && state.result.is_none());

        match mem::replace(&mut state.watcher, Watcher::None) {
            Watcher::Callback(callback) => {
                state.delivered = true;
                drop(state);
                callback(result);
            }
            Watcher::Waker(waker) => {
                state.result = Some(result);
                drop(state);
                waker.wake();
            }
            Watcher::None => {
                state.result = Some(result);
            }
        }
    }

    fn on_complete(&self, callback: Box<dyn FnOnce(Result<T, JoinError>) + Send>) {
        let mut state = self.0.lock().unwrap();

        if state.delivered {
            // The single result has already been handed out.
            return;
        }

        if let Some(result) = state.result.take() {
            state.delivered = true;
            drop(state);
            callback(result);
        } else {
            state.watcher = Watcher::Callback(callback);
        }
    }

    fn poll_result(&self, cx: &mut Context<'_>) -> Poll<Result<T, JoinError>> {
        let mut state = self.0.lock().unwrap();

        if let Some(result) = state.result.take() {
            state.delivered = true;
            return Poll::Ready(result);
        }

        assert!(!state.delivered, "task handle polled after completion");
        state.watcher = Watcher::Waker(cx.waker().clone());
        Poll::Pending
    }
}

/// Catches a panic from the wrapped future's poll and turns it into a
/// result, so a failing task reports through its promise instead of
/// aborting the process.
struct CatchPanic<F>(F);

impl<F: Future> Future for CatchPanic<F> {
    type Output = Result<F::Output, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = unsafe { self.map_unchecked_mut(|this| &mut this.0) };

        match catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(_) => Poll::Ready(Err(JoinError::Panicked)),
        }
    }
}

/// A handle to a spawned task; detaches on drop.
///
/// Await the handle to suspend the current task until the spawned one
/// completes, call [TaskHandle::join] to block a non-driver thread on the
/// result, or register a completion callback with
/// [TaskHandle::on_complete].
pub struct TaskHandle<T> {
    promise: Promise<T>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Register the completion watcher. The callback runs exactly once, on
    /// the driver thread, when the task finishes; if the task has already
    /// finished it runs immediately on the calling thread. A later
    /// registration (including awaiting the handle) replaces an earlier one.
    pub fn on_complete(&self, callback: impl FnOnce(Result<T, JoinError>) + Send + 'static) {
        self.promise.on_complete(Box::new(callback));
    }

    /// Block the calling thread until the task finishes and yield its
    /// result.
    ///
    /// *Note*: only call this from threads other than the driver thread;
    /// the driver blocking on one of its own tasks can never make progress.
    pub fn join(self) -> Result<T, JoinError> {
        let (tx, rx) = sync_channel(1);

        self.on_complete(move |result| {
            let _ = tx.send(result);
        });

        rx.recv()
            .expect("scheduler dropped before completing the task")
    }
}

impl<T: Send + 'static> Future for TaskHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.promise.poll_result(cx)
    }
}

/// A handle that owns its task: dropping it destroys the suspended future.
///
/// Queued reactor operations the task armed cannot be retracted; they
/// complete into dead completion slots and are discarded.
pub struct ScopedTask<T> {
    handle: TaskHandle<T>,
    sched: Scheduler,
    id: usize,
    epoch: u64,
}

impl<T: Send + 'static> ScopedTask<T> {
    /// See [TaskHandle::on_complete].
    pub fn on_complete(&self, callback: impl FnOnce(Result<T, JoinError>) + Send + 'static) {
        self.handle.on_complete(callback);
    }
}

impl<T> Drop for ScopedTask<T> {
    fn drop(&mut self) {
        self.sched.remove_task(self.id, self.epoch);
    }
}

impl<T: Send + 'static> Future for ScopedTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

fn spawn_inner<F, T>(sched: &Scheduler, future: F) -> (TaskHandle<T>, usize, u64)
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let promise = Promise::new();
    let completion = promise.clone();

    let wrapped = async move {
        let result = CatchPanic(future).await;

        if result.is_err() {
            log::error!("task body panicked; reporting JoinError::Panicked");
        }

        completion.complete(result);
    };

    let (id, epoch) = sched.insert_task(Box::pin(wrapped));
    (TaskHandle { promise }, id, epoch)
}

pub(crate) fn spawn<F, T>(sched: &Scheduler, future: F) -> TaskHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    spawn_inner(sched, future).0
}

pub(crate) fn spawn_scoped<F, T>(sched: &Scheduler, future: F) -> ScopedTask<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (handle, id, epoch) = spawn_inner(sched, future);

    ScopedTask {
        handle,
        sched: sched.clone(),
        id,
        epoch,
    }
}

/// Awaitable for a plain callable handed to the scheduler: the closure is
/// posted, runs exactly once on the driver thread, and the awaiting task
/// resumes with its return value.
pub struct Defer<T> {
    sched: Scheduler,
    f: Option<Box<dyn FnOnce() -> T + Send>>,
    slot: Arc<OpSlot<T>>,
}

impl<T: Send + 'static> Defer<T> {
    pub(crate) fn new(sched: Scheduler, f: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            sched,
            f: Some(Box::new(f)),
            slot: OpSlot::new(),
        }
    }
}

impl<T: Send + 'static> Future for Defer<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(f) = self.f.take() {
            let slot = self.slot.clone();
            self.sched.post(move || slot.fulfill(f()));
        }

        self.slot.poll_take(cx)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::JoinError;
    use crate::scheduler::Scheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn start_driver(sched: &Scheduler) -> thread::ThreadId {
        let driver = sched.clone();
        let handle = thread::spawn(move || driver.run());
        handle.thread().id()
    }

    #[test]
    fn join_yields_the_task_result() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let task = sched.spawn(async { "done" });
        assert_eq!(task.join().unwrap(), "done");
    }

    #[test]
    fn completion_callback_fires_exactly_once() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel();

        let task = sched.spawn(async { 7 });
        let fired2 = fired.clone();
        task.on_complete(move |result| {
            fired2.fetch_add(1, Ordering::SeqCst);
            tx.send(result.unwrap()).unwrap();
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 7);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_registered_after_completion_still_fires() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let task = sched.spawn(async { 3 });

        // Let the task finish before anyone watches it.
        thread::sleep(Duration::from_millis(50));

        let (tx, rx) = channel();
        task.on_complete(move |result| tx.send(result.unwrap()).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 3);
    }

    #[test]
    fn scoped_task_completes_like_a_plain_one() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let (tx, rx) = channel();
        let task = sched.spawn_scoped(async { 11 });
        task.on_complete(move |result| tx.send(result.unwrap()).unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 11);
        drop(task);
    }

    #[test]
    fn dropping_a_scoped_task_destroys_the_future() {
        let sched = Scheduler::new().unwrap();

        let (tx, rx) = channel::<()>();
        let slow = sched.clone();
        let task = sched.spawn_scoped(async move {
            slow.sleep(Duration::from_millis(10)).await;
            tx.send(()).unwrap();
        });

        // The driver has not started yet, so the future is still suspended
        // in the task table; dropping the handle removes it.
        drop(task);
        start_driver(&sched);

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn panicking_task_reports_join_error() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let task = sched.spawn(async { panic!("boom") });
        assert_eq!(task.join(), Err(JoinError::Panicked));

        // The driver survives and keeps servicing work.
        let task = sched.spawn(async { 1 });
        assert_eq!(task.join().unwrap(), 1);
    }

    #[test]
    fn awaiting_a_task_resumes_with_its_value_on_the_driver_thread() {
        let sched = Scheduler::new().unwrap();
        let driver_id = start_driver(&sched);

        let (tx, rx) = channel();
        let inner_sched = sched.clone();

        sched.spawn(async move {
            let inner = inner_sched.spawn(async { 21 });
            let value = inner.await.unwrap();
            tx.send((value * 2, thread::current().id())).unwrap();
        });

        let (value, resumed_on) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(value, 42);
        assert_eq!(resumed_on, driver_id);
    }

    #[test]
    fn defer_runs_on_the_driver_and_resumes_with_its_value() {
        let sched = Scheduler::new().unwrap();
        let driver_id = start_driver(&sched);

        let defer_sched = sched.clone();
        let task = sched.spawn(async move {
            let ran_on = defer_sched.defer(|| thread::current().id()).await;
            ran_on
        });

        assert_eq!(task.join().unwrap(), driver_id);
    }

    #[test]
    fn last_registered_watcher_wins() {
        let sched = Scheduler::new().unwrap();

        let (tx_a, rx_a) = channel();
        let (tx_b, rx_b) = channel();

        let task = sched.spawn(async { 5 });
        task.on_complete(move |r| tx_a.send(r.unwrap()).unwrap());
        task.on_complete(move |r| tx_b.send(r.unwrap()).unwrap());

        start_driver(&sched);

        assert_eq!(rx_b.recv_timeout(Duration::from_secs(1)).unwrap(), 5);
        assert!(rx_a.try_recv().is_err());
    }
}
