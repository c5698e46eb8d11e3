//! Awaitable exact-count write.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::buf::BufferView;
use crate::error::SocketError;
use crate::futures::slot::OpSlot;
use crate::net::StreamSocket;

/// Writes the caller's bytes completely or fails with the first error.
/// Created by [StreamSocket::write_all].
///
/// The bytes are copied at construction; the copy is owned by the
/// completion closure, so the caller's slice may go away immediately and a
/// dropped future leaves no dangling view behind.
pub struct WriteAll {
    sock: StreamSocket,
    data: Option<Vec<u8>>,
    slot: Arc<OpSlot<(Option<SocketError>, usize)>>,
}

impl WriteAll {
    pub(crate) fn new(sock: StreamSocket, buf: &[u8]) -> Self {
        Self {
            sock,
            data: Some(buf.to_vec()),
            slot: OpSlot::new(),
        }
    }
}

impl Future for WriteAll {
    type Output = Result<usize, SocketError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(mut data) = this.data.take() {
            let view = BufferView::new(&mut data);
            let slot = this.slot.clone();
            this.sock.async_write(view, move |err, n| {
                // `data` lived in this closure for the whole transfer.
                drop(data);
                slot.fulfill((err, n));
            });
        }

        match this.slot.poll_take(cx) {
            Poll::Ready((None, n)) => Poll::Ready(Ok(n)),
            Poll::Ready((Some(err), _)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}
