//! Awaitable exact-count read.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::buf::BufferView;
use crate::error::SocketError;
use crate::futures::slot::OpSlot;
use crate::net::StreamSocket;

/// Fills the caller's buffer completely or fails with the first error.
/// Created by [StreamSocket::read_exact].
///
/// The transfer runs against an owned staging buffer that the completion
/// closure keeps alive, so dropping this future mid-flight cannot leave the
/// queued operation pointing at freed memory. Whatever arrived before an
/// error is copied into the caller's buffer on resolution.
pub struct ReadExact<'a> {
    sock: StreamSocket,
    out: &'a mut [u8],
    armed: bool,
    slot: Arc<OpSlot<(Option<SocketError>, usize, Vec<u8>)>>,
}

impl<'a> ReadExact<'a> {
    pub(crate) fn new(sock: StreamSocket, out: &'a mut [u8]) -> Self {
        Self {
            sock,
            out,
            armed: false,
            slot: OpSlot::new(),
        }
    }
}

impl Future for ReadExact<'_> {
    type Output = Result<usize, SocketError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if !this.armed {
            this.armed = true;
            let slot = this.slot.clone();
            let mut staging = vec![0u8; this.out.len()];
            let view = BufferView::new(&mut staging);
            this.sock
                .async_read(view, move |err, n| slot.fulfill((err, n, staging)));
        }

        match this.slot.poll_take(cx) {
            Poll::Ready((err, n, staging)) => {
                this.out[..n].copy_from_slice(&staging[..n]);
                match err {
                    None => Poll::Ready(Ok(n)),
                    Some(err) => Poll::Ready(Err(err)),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::net::{StreamSocket, TcpAcceptor};
    use crate::scheduler::Scheduler;
    use anyhow::Result;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::thread;

    fn start_driver(sched: &Scheduler) {
        let _ = env_logger::builder().is_test(true).try_init();
        let driver = sched.clone();
        thread::spawn(move || driver.run());
    }

    // The full loop expressed as straight-line async code: an echo server
    // task and a client task exchanging six bytes over loopback.
    #[test]
    fn echo_roundtrip_through_awaitables() -> Result<()> {
        let sched = Scheduler::new()?;
        start_driver(&sched);

        let acceptor = TcpAcceptor::open(&sched, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))?;
        let addr = acceptor.local_addr()?;

        let server = sched.spawn(async move {
            let sock = acceptor.accept().await.unwrap();
            let mut buf = [0u8; 6];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let connect = StreamSocket::connect(&sched, addr)?;
        let client = sched.spawn(async move {
            let sock = connect.await.unwrap();
            sock.write_all(b"echo-1").await.unwrap();

            let mut buf = [0u8; 6];
            let n = sock.read_exact(&mut buf).await.unwrap();
            (n, buf)
        });

        let (n, buf) = client.join().unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf, b"echo-1");

        server.join().unwrap();
        Ok(())
    }

    #[test]
    fn read_exact_reports_eof_on_a_short_stream() {
        let sched = Scheduler::new().unwrap();
        start_driver(&sched);

        let acceptor =
            TcpAcceptor::open(&sched, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let server = sched.spawn(async move {
            let sock = acceptor.accept().await.unwrap();
            // Send less than the reader asked for, then close.
            sock.write_all(b"abc").await.unwrap();
        });

        let connect = StreamSocket::connect(&sched, addr).unwrap();
        let client = sched.spawn(async move {
            let sock = connect.await.unwrap();
            let mut buf = [0u8; 6];
            let result = sock.read_exact(&mut buf).await;
            (result, buf)
        });

        server.join().unwrap();
        let (result, buf) = client.join().unwrap();
        assert_eq!(result, Err(crate::error::SocketError::Eof));
        // The bytes that did arrive landed in the caller's buffer.
        assert_eq!(&buf[..3], b"abc");
    }
}
