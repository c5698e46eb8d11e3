//! The readiness reactor.
//!
//! One [Reactor] wraps one epoll instance plus a slab of per-descriptor
//! state. Registration is lazy about interest: a descriptor starts out
//! monitored for input readiness only, gains output interest while a write
//! or connect operation is queued, and loses it again once none remain.
//!
//! [Reactor::run] performs a single wait call and, for each ready
//! descriptor and direction, completes only the head operation of that
//! direction's queue. Operations on one descriptor and direction are
//! therefore serviced strictly in submission order, one per readiness
//! notification, never concurrently.

use std::io;
use std::os::fd::RawFd;
use std::sync::Mutex;
use std::time::Duration;

use slab::Slab;

use crate::error::{ReactorError, SocketError};

pub(crate) mod descriptor;
pub(crate) mod epoll;
pub(crate) mod ops;

pub(crate) use descriptor::{Descriptor, DescriptorState};
pub(crate) use ops::{OpKind, Operation};

use epoll::{Epoll, Notifier};

/// Epoll user-data key reserved for the wakeup notifier.
const WAKE_KEY: u64 = u64::MAX;

/// Number of events gathered per wait call.
const EVENT_BATCH: usize = 64;

/// A registered descriptor's handle into the reactor's state slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DescToken(usize);

pub(crate) struct Reactor {
    epoll: Epoll,
    notifier: Notifier,
    states: Mutex<Slab<DescriptorState>>,
}

impl Reactor {
    /// Bring up the epoll instance and the wakeup eventfd. This is the only
    /// construction path in the runtime that is allowed to fail hard.
    pub fn new() -> Result<Self, ReactorError> {
        let epoll = Epoll::new().map_err(ReactorError::Create)?;
        let notifier = Notifier::new().map_err(ReactorError::Notifier)?;

        epoll
            .add(notifier.raw(), libc::EPOLLIN as u32, WAKE_KEY)
            .map_err(ReactorError::RegisterNotifier)?;

        Ok(Self {
            epoll,
            notifier,
            states: Mutex::new(Slab::new()),
        })
    }

    /// Interrupt a blocked [Reactor::run]. Safe from any thread.
    pub fn wake(&self) {
        self.notifier.notify();
    }

    /// Register `fd` for the first time, monitored for input readiness only.
    pub fn register_descriptor(&self, fd: RawFd) -> io::Result<DescToken> {
        let mut states = self.states.lock().unwrap();
        let entry = states.vacant_entry();
        let key = entry.key();

        let interest = libc::EPOLLIN as u32;
        self.epoll.add(fd, interest, key as u64)?;
        entry.insert(DescriptorState::new(fd, interest));

        log::trace!("registered fd {fd} as token {key}");
        Ok(DescToken(key))
    }

    /// Drop a descriptor's state and its epoll registration. Operations
    /// still queued against it are destroyed without completing; in-flight
    /// I/O cannot be cancelled or notified.
    pub fn deregister_descriptor(&self, token: DescToken) {
        let mut states = self.states.lock().unwrap();

        if let Some(state) = states.try_remove(token.0) {
            if let Err(err) = self.epoll.delete(state.fd) {
                log::debug!("failed to delete fd {} from epoll: {err}", state.fd);
            }
            log::trace!("deregistered fd {} (token {})", state.fd, token.0);
        }
    }

    /// Queue `op` on the direction matching `kind` and make sure the
    /// descriptor's registered interest covers that direction. `front`
    /// requeues a spuriously-woken operation at the head of its queue.
    ///
    /// Submission failures do not return: the operation completes right here
    /// with an error, so a handler always eventually runs.
    pub fn start_op(&self, token: DescToken, kind: OpKind, op: Operation, front: bool) {
        let failed = {
            let mut states = self.states.lock().unwrap();

            match states.get_mut(token.0) {
                None => Some((op, SocketError::InvalidDescriptor)),
                Some(state) => {
                    let q = match kind {
                        OpKind::Read => &mut state.read_q,
                        OpKind::Write => &mut state.write_q,
                        OpKind::Connect => &mut state.connect_q,
                    };

                    if front {
                        q.push_front(op);
                    } else {
                        q.push_back(op);
                    }

                    let wanted = state.wanted_interest();
                    if wanted == state.interest {
                        None
                    } else {
                        match self.epoll.modify(state.fd, wanted, token.0 as u64) {
                            Ok(()) => {
                                state.interest = wanted;
                                None
                            }
                            Err(err) => {
                                log::error!(
                                    "failed to adjust interest for fd {}: {err}",
                                    state.fd
                                );

                                // Take the operation straight back off the
                                // queue it just joined.
                                let q = match kind {
                                    OpKind::Read => &mut state.read_q,
                                    OpKind::Write => &mut state.write_q,
                                    OpKind::Connect => &mut state.connect_q,
                                };
                                let op = if front { q.pop_front() } else { q.pop_back() };
                                op.map(|op| (op, SocketError::Io))
                            }
                        }
                    }
                }
            }
        };

        if let Some((op, err)) = failed {
            op.complete(Some(err));
        } else {
            log::trace!("queued {kind:?} op on token {}", token.0);
        }
    }

    /// One readiness wait. Ready head operations are gathered under the
    /// state lock and completed outside it, so a completion may submit new
    /// operations against the same reactor.
    pub fn run(&self, timeout: Option<Duration>) -> io::Result<()> {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; EVENT_BATCH];
        let n = self.epoll.wait(&mut events, timeout)?;

        let mut completions: Vec<(Operation, Option<SocketError>)> = Vec::new();

        {
            let mut states = self.states.lock().unwrap();

            for event in &events[..n] {
                if event.u64 == WAKE_KEY {
                    self.notifier.drain();
                    continue;
                }

                let key = event.u64 as usize;

                // The descriptor may have been deregistered by a completion
                // gathered earlier in this same batch.
                let Some(state) = states.get_mut(key) else {
                    continue;
                };

                let flags = event.events;
                let hard_err = flags & libc::EPOLLERR as u32 != 0;
                let hangup = flags & libc::EPOLLHUP as u32 != 0;

                let read_ready =
                    flags & (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;
                let write_ready =
                    flags & (libc::EPOLLOUT | libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0;

                if read_ready {
                    if let Some(op) = state.read_q.pop_front() {
                        // A hangup may still leave buffered data behind; the
                        // read syscall discovers end-of-stream itself.
                        let err = hard_err.then_some(SocketError::Io);
                        completions.push((op, err));
                    }
                }

                if write_ready {
                    let err = if hard_err {
                        Some(SocketError::Io)
                    } else if hangup {
                        Some(SocketError::Eof)
                    } else {
                        None
                    };

                    // Output readiness on a connecting socket signals connect
                    // completion; the connect queue outranks the write queue.
                    if let Some(op) = state.connect_q.pop_front() {
                        completions.push((op, err));
                    } else if let Some(op) = state.write_q.pop_front() {
                        completions.push((op, err));
                    }
                }

                // Downgrade back to input-only once the last write/connect
                // operation has been taken off its queue.
                let wanted = state.wanted_interest();
                if wanted != state.interest {
                    match self.epoll.modify(state.fd, wanted, event.u64) {
                        Ok(()) => state.interest = wanted,
                        Err(err) => {
                            log::debug!("failed to adjust interest for fd {}: {err}", state.fd)
                        }
                    }
                }
            }
        }

        for (op, err) in completions {
            op.complete(err);
        }

        Ok(())
    }
}
