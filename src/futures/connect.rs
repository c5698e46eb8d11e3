//! Awaitable connect.

use std::future::Future;
use std::net::SocketAddrV4;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::SocketError;
use crate::futures::slot::OpSlot;
use crate::net::StreamSocket;

/// Owns a freshly opened socket while its handshake is in flight; resolves
/// to the connected socket. Created by [StreamSocket::connect].
pub struct Connect {
    sock: Option<StreamSocket>,
    addr: SocketAddrV4,
    armed: bool,
    slot: Arc<OpSlot<Option<SocketError>>>,
}

impl Connect {
    pub(crate) fn new(sock: StreamSocket, addr: SocketAddrV4) -> Self {
        Self {
            sock: Some(sock),
            addr,
            armed: false,
            slot: OpSlot::new(),
        }
    }
}

impl Future for Connect {
    type Output = Result<StreamSocket, SocketError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if !this.armed {
            this.armed = true;
            let slot = this.slot.clone();
            let sock = this.sock.as_ref().expect("connect future polled after completion");
            // An instant loopback handshake fulfils the slot inline, so the
            // poll_take below may already find the outcome.
            sock.async_connect(this.addr, move |err| slot.fulfill(err));
        }

        match this.slot.poll_take(cx) {
            Poll::Ready(None) => {
                let sock = this.sock.take().expect("connect future polled after completion");
                Poll::Ready(Ok(sock))
            }
            Poll::Ready(Some(err)) => {
                this.sock.take();
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::net::StreamSocket;
    use crate::scheduler::Scheduler;
    use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
    use std::thread;

    fn start_driver(sched: &Scheduler) {
        let driver = sched.clone();
        thread::spawn(move || driver.run());
    }

    fn loopback_listener() -> (TcpListener, SocketAddrV4) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match listener.local_addr().unwrap() {
            std::net::SocketAddr::V4(addr) => addr,
            other => panic!("unexpected address family: {other}"),
        };
        (listener, addr)
    }

    #[test]
    fn awaited_connect_yields_a_connected_socket() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let (listener, addr) = loopback_listener();
        let connect = StreamSocket::connect(&sched, addr).unwrap();

        let task = sched.spawn(async move {
            let sock = connect.await.unwrap();
            sock.local_addr().unwrap().port()
        });

        let (_, peer_addr) = listener.accept().unwrap();
        assert_eq!(task.join().unwrap(), peer_addr.port());
    }

    #[test]
    fn awaited_connect_to_dead_port_yields_an_error() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let (listener, addr) = loopback_listener();
        drop(listener);

        let connect = StreamSocket::connect(&sched, addr).unwrap();
        let task = sched.spawn(async move { connect.await });

        assert!(task.join().unwrap().is_err());
    }
}
