//! Error domains surfaced by the runtime.
//!
//! [SocketError] covers everything reported through an asynchronous
//! operation's completion handler. [ReactorError] covers the one
//! unrecoverable path, constructing the reactor's kernel handles.
//! [JoinError] covers failures inside a spawned task's body.
//!
//! Setup-time syscalls (socket creation, bind, listen, registration) keep
//! returning plain [std::io::Error]; only the async completion paths use the
//! custom domain.

use std::io;

use thiserror::Error;

/// Errors delivered to asynchronous socket operation handlers.
///
/// `Eof` is a deliberate overload of the error channel: a zero-byte,
/// error-free read denotes end-of-stream and is reported here rather than
/// through a separate success flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SocketError {
    /// The peer closed its end of the stream.
    #[error("end of stream")]
    Eof,
    /// `EAGAIN`.
    #[error("resource temporarily unavailable")]
    TryAgain,
    /// `EWOULDBLOCK`.
    #[error("operation would block")]
    WouldBlock,
    /// `EBADF`.
    #[error("bad file descriptor")]
    BadFileDescriptor,
    /// `EFAULT`.
    #[error("bad read buffer")]
    BadReadBuffer,
    /// `EINTR`.
    #[error("interrupted system call")]
    Interrupted,
    /// `EINVAL`.
    #[error("invalid descriptor")]
    InvalidDescriptor,
    /// `EIO`, or an error/hangup condition reported by the reactor.
    #[error("i/o error")]
    Io,
    /// Any errno without a mapping of its own.
    #[error("unknown socket error")]
    Unknown,
}

impl SocketError {
    /// Map a raw errno value into the socket error domain.
    pub(crate) fn from_errno(errno: i32) -> Self {
        // EAGAIN and EWOULDBLOCK share a value on Linux.
        if errno == libc::EWOULDBLOCK {
            return SocketError::WouldBlock;
        }

        match errno {
            libc::EAGAIN => SocketError::TryAgain,
            libc::EBADF => SocketError::BadFileDescriptor,
            libc::EFAULT => SocketError::BadReadBuffer,
            libc::EINTR => SocketError::Interrupted,
            libc::EINVAL => SocketError::InvalidDescriptor,
            libc::EIO => SocketError::Io,
            _ => SocketError::Unknown,
        }
    }

    pub(crate) fn last_os_error() -> Self {
        Self::from_errno(io::Error::last_os_error().raw_os_error().unwrap_or(0))
    }

    /// Whether the operation should stay queued and wait for the next
    /// readiness notification instead of surfacing an error.
    pub(crate) fn is_retryable(self) -> bool {
        matches!(
            self,
            SocketError::TryAgain | SocketError::WouldBlock | SocketError::Interrupted
        )
    }
}

impl From<io::Error> for SocketError {
    fn from(err: io::Error) -> Self {
        err.raw_os_error()
            .map(Self::from_errno)
            .unwrap_or(SocketError::Unknown)
    }
}

/// Failure to bring up the reactor's kernel-side handles.
///
/// This is the only unrecoverable construction path in the runtime; every
/// other failure is reported through return values or completion handlers.
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("failed to create epoll instance")]
    Create(#[source] io::Error),
    #[error("failed to create wakeup eventfd")]
    Notifier(#[source] io::Error),
    #[error("failed to register wakeup eventfd")]
    RegisterNotifier(#[source] io::Error),
}

/// A spawned task failed to produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    /// The task's body panicked. The panic is caught by the scheduler and
    /// propagated here instead of tearing down the driver thread.
    #[error("task panicked")]
    Panicked,
}
