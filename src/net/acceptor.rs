//! Listening sockets.

use std::io;
use std::net::SocketAddrV4;
use std::sync::Arc;

use crate::error::SocketError;
use crate::futures::accept::Accept;
use crate::net::sock_ops;
use crate::net::socket::{SockInner, StreamSocket};
use crate::reactor::{Descriptor, OpKind, Operation};
use crate::scheduler::Scheduler;

/// Default listen backlog.
const BACKLOG: i32 = 1024;

/// A listening IPv4 TCP socket handing out [StreamSocket]s.
#[derive(Clone)]
pub struct TcpAcceptor {
    inner: Arc<SockInner>,
}

impl TcpAcceptor {
    /// Create, bind and start listening on `addr`. `SO_REUSEADDR` is set so
    /// a restarted server can rebind its port immediately.
    pub fn open(sched: &Scheduler, addr: SocketAddrV4) -> io::Result<Self> {
        let fd = sock_ops::tcp_socket()?;
        let desc = Descriptor::from_raw(fd)?;

        sock_ops::set_reuse_addr(desc.raw())?;
        sock_ops::bind(desc.raw(), &addr)?;
        sock_ops::listen(desc.raw(), BACKLOG)?;

        let inner = SockInner::register(sched, desc)?;
        Ok(Self { inner })
    }

    /// The listening address, ephemeral port resolution included.
    pub fn local_addr(&self) -> io::Result<SocketAddrV4> {
        sock_ops::local_addr(self.inner.raw())
    }

    /// Arm one accept: on the next input readiness take one pending
    /// connection, register it, and hand the new socket to the handler. A
    /// connection stolen in the meantime requeues the operation at the front
    /// of the read queue.
    pub fn async_accept<H>(&self, handler: H)
    where
        H: FnOnce(Result<StreamSocket, SocketError>) + Send + 'static,
    {
        self.submit_accept(handler, false);
    }

    /// Awaitable accept; yields the next inbound [StreamSocket].
    pub fn accept(&self) -> Accept {
        Accept::new(self.clone())
    }

    fn submit_accept<H>(&self, handler: H, front: bool)
    where
        H: FnOnce(Result<StreamSocket, SocketError>) + Send + 'static,
    {
        let acceptor = self.clone();
        let op = Operation::new(move |err| {
            if let Some(err) = err {
                return handler(Err(err));
            }

            match sock_ops::accept(acceptor.inner.raw()) {
                Ok(fd) => {
                    let sock = StreamSocket::from_raw(acceptor.inner.sched(), fd)
                        .map_err(SocketError::from);
                    handler(sock);
                }
                Err(err) if err.is_retryable() => acceptor.submit_accept(handler, true),
                Err(err) => handler(Err(err)),
            }
        });

        self.inner.start(OpKind::Read, op, front);
    }
}
