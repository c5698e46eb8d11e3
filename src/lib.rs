//! # `corio`: a single-threaded epoll runtime with awaitable socket I/O
//!
//! `corio` is a small, single-process non-blocking I/O runtime for Linux. One
//! driver thread runs an epoll-backed reactor and a cooperative scheduler;
//! asynchronous accept/connect/read/write and timer operations are expressed
//! either as completion callbacks or as plain Rust futures awaited inside
//! spawned tasks.
//!
//! The [scheduler::Scheduler] is the event loop. It dispatches readiness
//! events, fires timers, runs posted closures and polls spawned tasks.
//! Clone it freely; exactly one clone's [scheduler::Scheduler::run] drives
//! everything.
//!
//! [net::TcpAcceptor] and [net::StreamSocket] provide IPv4 TCP listening
//! and stream sockets. Every operation exists both as a completion
//! callback (`async_*`) and as an awaitable future. The futures live in
//! [futures]; [task::TaskHandle] and [task::ScopedTask] let one task await
//! another.
//!
//! Completion handlers, timer callbacks and task resumptions all run on the
//! driver thread. `post`, `schedule_after` and spawning are safe from any
//! thread.
//!
//! ## Example
//!
//! ```
//! use corio::scheduler::Scheduler;
//! use std::thread;
//! use std::time::Duration;
//!
//! let sched = Scheduler::new().unwrap();
//! let driver = sched.clone();
//! thread::spawn(move || driver.run());
//!
//! let timer = sched.clone();
//! let task = sched.spawn(async move {
//!     timer.sleep(Duration::from_millis(10)).await;
//!     "hello"
//! });
//! assert_eq!(task.join().unwrap(), "hello");
//! ```

pub mod buf;
pub mod error;
pub mod futures;
pub mod net;
pub mod scheduler;
pub mod task;

pub(crate) mod reactor;
pub(crate) mod timer;
