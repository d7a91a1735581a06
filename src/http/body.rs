//! Response body fed by the request lifecycle task, and the deadline
//! wrapper applied to request bodies.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use tokio::sync::mpsc;
use tokio::time::Sleep;

use crate::http::error::BoxError;
use crate::net::connection::ActivityGuard;

/// Body of every response the server produces.
///
/// Dispatched requests stream chunks written by `Response::write_bytes` and
/// end when the lifecycle task drops its sender. Responses built directly by
/// the server (redirects, challenges) carry a single chunk.
#[derive(Debug)]
pub struct ResponseBody {
    inner: Inner,
    activity: Option<ActivityGuard>,
}

#[derive(Debug)]
enum Inner {
    Done,
    Full(Bytes),
    Channel(mpsc::Receiver<Bytes>),
}

impl ResponseBody {
    pub(crate) fn channel(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            inner: Inner::Channel(rx),
            activity: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: Inner::Done,
            activity: None,
        }
    }

    pub fn full(chunk: impl Into<Bytes>) -> Self {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Self::empty();
        }
        Self {
            inner: Inner::Full(chunk),
            activity: None,
        }
    }

    /// Keep the request counted as in flight until this body is dropped.
    pub(crate) fn hold(mut self, guard: ActivityGuard) -> Self {
        self.activity = Some(guard);
        self
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        let this = self.get_mut();
        match &mut this.inner {
            Inner::Done => Poll::Ready(None),
            Inner::Full(_) => match std::mem::replace(&mut this.inner, Inner::Done) {
                Inner::Full(chunk) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
                _ => Poll::Ready(None),
            },
            Inner::Channel(rx) => match rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
                Poll::Ready(None) => {
                    this.inner = Inner::Done;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, Inner::Done)
    }
}

/// Request body that fails once its read deadline passes.
///
/// The deadline is fixed when the request head arrives and bounds the whole
/// body, however it is consumed.
pub struct TimedBody<B> {
    inner: B,
    deadline: Pin<Box<Sleep>>,
}

impl<B> TimedBody<B> {
    pub fn new(inner: B, limit: Duration) -> Self {
        Self {
            inner,
            deadline: Box::pin(tokio::time::sleep(limit)),
        }
    }
}

impl<B> Body for TimedBody<B>
where
    B: Body + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<B::Data>, BoxError>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(frame) => Poll::Ready(frame.map(|r| r.map_err(Into::into))),
            Poll::Pending => match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Some(Err(
                    io::Error::new(io::ErrorKind::TimedOut, "request body read timed out").into(),
                ))),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionActivity;
    use http_body_util::{BodyExt, StreamBody};

    #[tokio::test]
    async fn streams_until_sender_drops() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(b"hello ")).await.unwrap();
        tx.send(Bytes::from_static(b"world")).await.unwrap();
        drop(tx);

        let body = ResponseBody::channel(rx).collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn full_body_yields_once() {
        let body = ResponseBody::full("moved").collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"moved"));
        assert!(ResponseBody::empty().is_end_stream());
        assert!(ResponseBody::full("").is_end_stream());
    }

    #[tokio::test]
    async fn held_guard_ends_with_the_body() {
        let activity = ConnectionActivity::new();
        let body = ResponseBody::full("done").hold(activity.begin());
        assert_eq!(activity.in_flight(), 1);

        let bytes = body.collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from_static(b"done"));
        assert_eq!(activity.in_flight(), 0);
    }

    #[tokio::test]
    async fn stalled_request_body_times_out() {
        let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(1);
        let stream = StreamBody::new(tokio_stream_from(rx));
        let body = TimedBody::new(stream, Duration::from_millis(20));

        let err = body.collect().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        drop(tx);
    }

    #[tokio::test]
    async fn complete_request_body_passes_through() {
        let body = TimedBody::new(http_body_util::Full::new(Bytes::from_static(b"abc")), Duration::from_secs(5));
        assert_eq!(body.collect().await.unwrap().to_bytes(), Bytes::from_static(b"abc"));
    }

    fn tokio_stream_from<T>(mut rx: mpsc::Receiver<T>) -> impl futures_util::Stream<Item = T> + Unpin {
        Box::pin(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }
}
