//! Asynchronous TCP stream sockets.
//!
//! A [StreamSocket] wraps one registered non-blocking descriptor. The
//! callback layer (`async_*`) arms reactor operations directly; a syscall
//! that reports a retryable condition is requeued at the front of its queue
//! and retried on the next readiness notification, never surfaced. The
//! composed `async_read`/`async_write` pair keeps resubmitting until the
//! view is exhausted, so a completing transfer always moved exactly the
//! requested byte count.
//!
//! The awaitable layer ([StreamSocket::read_exact],
//! [StreamSocket::write_all], [StreamSocket::connect]) sits on top of the
//! callbacks; see [crate::futures].

use std::io;
use std::net::SocketAddrV4;
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::buf::BufferView;
use crate::error::SocketError;
use crate::futures::connect::Connect;
use crate::futures::read::ReadExact;
use crate::futures::write::WriteAll;
use crate::net::sock_ops::{self, ConnectProgress};
use crate::reactor::{DescToken, Descriptor, OpKind, Operation};
use crate::scheduler::Scheduler;

/// The registered descriptor shared by a socket and its in-flight
/// operations; deregisters (and closes) on the last drop.
pub(crate) struct SockInner {
    sched: Scheduler,
    desc: Descriptor,
    token: DescToken,
}

impl SockInner {
    pub(crate) fn register(sched: &Scheduler, desc: Descriptor) -> io::Result<Arc<Self>> {
        let token = sched.reactor().register_descriptor(desc.raw())?;

        Ok(Arc::new(Self {
            sched: sched.clone(),
            desc,
            token,
        }))
    }

    pub(crate) fn raw(&self) -> RawFd {
        self.desc.raw()
    }

    pub(crate) fn sched(&self) -> &Scheduler {
        &self.sched
    }

    pub(crate) fn start(&self, kind: OpKind, op: Operation, front: bool) {
        self.sched.reactor().start_op(self.token, kind, op, front);
    }
}

impl Drop for SockInner {
    fn drop(&mut self) {
        self.sched.reactor().deregister_descriptor(self.token);
    }
}

/// An asynchronous IPv4 TCP stream socket.
///
/// Cloning yields another handle to the same descriptor; the descriptor
/// stays registered until every handle and every queued operation holding
/// one is gone.
#[derive(Clone)]
pub struct StreamSocket {
    pub(crate) inner: Arc<SockInner>,
}

impl StreamSocket {
    /// Create a fresh non-blocking socket and register it with the
    /// scheduler's reactor.
    pub fn open(sched: &Scheduler) -> io::Result<Self> {
        let fd = sock_ops::tcp_socket()?;
        Self::from_raw(sched, fd)
    }

    /// Adopt an already-open descriptor (the accept path). The descriptor is
    /// forced non-blocking and registered.
    pub(crate) fn from_raw(sched: &Scheduler, fd: RawFd) -> io::Result<Self> {
        let desc = Descriptor::from_raw(fd)?;
        let inner = SockInner::register(sched, desc)?;
        Ok(Self { inner })
    }

    pub fn bind(&self, addr: SocketAddrV4) -> io::Result<()> {
        sock_ops::bind(self.inner.raw(), &addr)
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        sock_ops::listen(self.inner.raw(), backlog)
    }

    /// The locally bound address, ephemeral port resolution included.
    pub fn local_addr(&self) -> io::Result<SocketAddrV4> {
        sock_ops::local_addr(self.inner.raw())
    }

    /// Arm one read operation: on the next input readiness perform exactly
    /// one non-blocking read into `view` and pass the result on.
    ///
    /// A zero-byte, error-free read into a non-empty view reports
    /// `(Some(Eof), 0)`. Retryable conditions are requeued, never surfaced.
    /// `view`'s backing storage must stay alive and unmoved until the
    /// handler has run.
    pub fn async_read_some<H>(&self, view: BufferView, handler: H)
    where
        H: FnOnce(Option<SocketError>, usize) + Send + 'static,
    {
        self.submit_read(view, move |err, n, _view| handler(err, n), false);
    }

    /// Write-direction counterpart of [StreamSocket::async_read_some]; may
    /// accept fewer bytes than the view offers.
    pub fn async_write_some<H>(&self, view: BufferView, handler: H)
    where
        H: FnOnce(Option<SocketError>, usize) + Send + 'static,
    {
        self.submit_write(view, move |err, n, _view| handler(err, n), false);
    }

    /// Composed exact-count read: keep rearming until `view` is full. The
    /// handler receives `(None, N)` on full completion, `(Some(Eof), k)` if
    /// the stream ended after `k` bytes, or `(Some(e), k)` on any other
    /// error; never `(None, k < N)`.
    pub fn async_read<H>(&self, view: BufferView, handler: H)
    where
        H: FnOnce(Option<SocketError>, usize) + Send + 'static,
    {
        if view.is_empty() {
            return handler(None, 0);
        }
        self.compose_read(view, 0, handler);
    }

    /// Composed exact-count write; same termination contract as
    /// [StreamSocket::async_read].
    pub fn async_write<H>(&self, view: BufferView, handler: H)
    where
        H: FnOnce(Option<SocketError>, usize) + Send + 'static,
    {
        if view.is_empty() {
            return handler(None, 0);
        }
        self.compose_write(view, 0, handler);
    }

    /// Start a non-blocking connect. Immediate success completes the handler
    /// inline; a pending handshake arms a connect-direction operation and,
    /// once output readiness arrives, queries the deferred socket error to
    /// learn the outcome.
    pub fn async_connect<H>(&self, addr: SocketAddrV4, handler: H)
    where
        H: FnOnce(Option<SocketError>) + Send + 'static,
    {
        match sock_ops::connect(self.inner.raw(), &addr) {
            Ok(ConnectProgress::Done) => handler(None),
            Ok(ConnectProgress::Pending) => {
                let fd = self.inner.raw();
                let op = Operation::new(move |err| {
                    match sock_ops::take_socket_error(fd) {
                        // A refused or timed-out handshake parks its errno
                        // here; it outranks the reactor's synthesized flags.
                        Ok(Some(err)) => handler(Some(err)),
                        Ok(None) => handler(err),
                        Err(query_err) => handler(Some(query_err)),
                    }
                });
                self.inner.start(OpKind::Connect, op, false);
            }
            Err(err) => handler(Some(err)),
        }
    }

    /// Awaitable exact-count read into `buf`; yields the byte count (always
    /// `buf.len()`) or the first error.
    pub fn read_exact<'a>(&self, buf: &'a mut [u8]) -> ReadExact<'a> {
        ReadExact::new(self.clone(), buf)
    }

    /// Awaitable exact-count write of `buf`; yields the byte count (always
    /// `buf.len()`) or the first error.
    pub fn write_all(&self, buf: &[u8]) -> WriteAll {
        WriteAll::new(self.clone(), buf)
    }

    /// Awaitable connect: opens a fresh socket and yields it connected to
    /// `addr`, or the error that stopped it.
    pub fn connect(sched: &Scheduler, addr: SocketAddrV4) -> io::Result<Connect> {
        let sock = Self::open(sched)?;
        Ok(Connect::new(sock, addr))
    }

    fn submit_read<H>(&self, mut view: BufferView, handler: H, front: bool)
    where
        H: FnOnce(Option<SocketError>, usize, BufferView) + Send + 'static,
    {
        let sock = self.clone();
        let op = Operation::new(move |err| {
            if let Some(err) = err {
                return handler(Some(err), 0, view);
            }

            match sock_ops::read(sock.inner.raw(), &mut view) {
                Ok(0) if !view.is_empty() => handler(Some(SocketError::Eof), 0, view),
                Ok(n) => handler(None, n, view),
                Err(err) if err.is_retryable() => sock.submit_read(view, handler, true),
                Err(err) => handler(Some(err), 0, view),
            }
        });

        self.inner.start(OpKind::Read, op, front);
    }

    fn submit_write<H>(&self, view: BufferView, handler: H, front: bool)
    where
        H: FnOnce(Option<SocketError>, usize, BufferView) + Send + 'static,
    {
        let sock = self.clone();
        let op = Operation::new(move |err| {
            if let Some(err) = err {
                return handler(Some(err), 0, view);
            }

            match sock_ops::write(sock.inner.raw(), &view) {
                Ok(n) => handler(None, n, view),
                Err(err) if err.is_retryable() => sock.submit_write(view, handler, true),
                Err(err) => handler(Some(err), 0, view),
            }
        });

        self.inner.start(OpKind::Write, op, front);
    }

    fn compose_read<H>(&self, view: BufferView, done: usize, handler: H)
    where
        H: FnOnce(Option<SocketError>, usize) + Send + 'static,
    {
        let sock = self.clone();
        self.submit_read(
            view,
            move |err, n, mut view| {
                let done = done + n;

                if let Some(err) = err {
                    return handler(Some(err), done);
                }

                view.consume(n);
                if view.is_empty() {
                    handler(None, done)
                } else {
                    sock.compose_read(view, done, handler)
                }
            },
            false,
        );
    }

    fn compose_write<H>(&self, view: BufferView, done: usize, handler: H)
    where
        H: FnOnce(Option<SocketError>, usize) + Send + 'static,
    {
        let sock = self.clone();
        self.submit_write(
            view,
            move |err, n, mut view| {
                let done = done + n;

                if let Some(err) = err {
                    return handler(Some(err), done);
                }

                view.consume(n);
                if view.is_empty() {
                    handler(None, done)
                } else {
                    sock.compose_write(view, done, handler)
                }
            },
            false,
        );
    }
}
