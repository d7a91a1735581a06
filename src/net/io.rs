//! Socket wrapper enforcing the write deadline.
//!
//! Reads are not timed here. hyper keeps a read pending on an idle socket
//! while a handler runs, so request reads are bounded where they happen: the
//! HTTP/1 header read timeout, the request body deadline and the connection
//! idle limit.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use crate::net::connection::DeadlineSwitch;

/// Fails a write that stays pending longer than its limit.
///
/// The deadline starts when a write first returns `Pending` and is cleared
/// as soon as it completes. Once the [`DeadlineSwitch`] is flipped (after a
/// protocol upgrade) no deadline applies.
pub struct TimedIo<S> {
    inner: S,
    write_timeout: Option<Duration>,
    write_deadline: Option<Pin<Box<Sleep>>>,
    switch: DeadlineSwitch,
}

impl<S> TimedIo<S> {
    pub fn new(inner: S, write_timeout: Option<Duration>, switch: DeadlineSwitch) -> Self {
        Self {
            inner,
            write_timeout,
            write_deadline: None,
            switch,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

fn poll_deadline(
    slot: &mut Option<Pin<Box<Sleep>>>,
    limit: Option<Duration>,
    switch: &DeadlineSwitch,
    cx: &mut Context<'_>,
    what: &'static str,
) -> Poll<io::Error> {
    let Some(limit) = limit.filter(|_| !switch.is_disabled()) else {
        *slot = None;
        return Poll::Pending;
    };

    let deadline = slot.get_or_insert_with(|| Box::pin(tokio::time::sleep(limit)));
    match deadline.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *slot = None;
            Poll::Ready(io::Error::new(io::ErrorKind::TimedOut, what))
        }
        Poll::Pending => Poll::Pending,
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimedIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimedIo<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(
                &mut this.write_deadline,
                this.write_timeout,
                &this.switch,
                cx,
                "write timed out",
            )
            .map(Err),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write_vectored(cx, bufs) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(
                &mut this.write_deadline,
                this.write_timeout,
                &this.switch,
                cx,
                "write timed out",
            )
            .map(Err),
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => poll_deadline(
                &mut this.write_deadline,
                this.write_timeout,
                &this.switch,
                cx,
                "flush timed out",
            )
            .map(Err),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
