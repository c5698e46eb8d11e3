//! Awaitable accept.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::SocketError;
use crate::futures::slot::OpSlot;
use crate::net::{StreamSocket, TcpAcceptor};

/// Resolves to the next inbound connection. Created by
/// [TcpAcceptor::accept].
pub struct Accept {
    acceptor: TcpAcceptor,
    armed: bool,
    slot: Arc<OpSlot<Result<StreamSocket, SocketError>>>,
}

impl Accept {
    pub(crate) fn new(acceptor: TcpAcceptor) -> Self {
        Self {
            acceptor,
            armed: false,
            slot: OpSlot::new(),
        }
    }
}

impl Future for Accept {
    type Output = Result<StreamSocket, SocketError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if !this.armed {
            this.armed = true;
            let slot = this.slot.clone();
            this.acceptor.async_accept(move |result| slot.fulfill(result));
        }

        this.slot.poll_take(cx)
    }
}

#[cfg(test)]
mod tests {
    use crate::net::TcpAcceptor;
    use crate::scheduler::Scheduler;
    use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};
    use std::thread;

    fn start_driver(sched: &Scheduler) {
        let driver = sched.clone();
        thread::spawn(move || driver.run());
    }

    #[test]
    fn awaited_accept_yields_the_inbound_socket() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let acceptor =
            TcpAcceptor::open(&sched, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let task = sched.spawn(async move {
            let sock = acceptor.accept().await.unwrap();
            sock.local_addr().unwrap().port()
        });

        let _peer = TcpStream::connect(addr).unwrap();
        assert_eq!(task.join().unwrap(), addr.port());
    }
}
