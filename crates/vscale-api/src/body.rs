//! Live response body fed by the stream pump.
//!
//! [`live_channel`] pairs a [`ChannelSink`] (the pump's destination) with a
//! [`LiveBody`] (the response body) over a one-slot channel. A flush on the
//! sink completes only once the body has taken the previous chunk, so at most
//! one chunk is buffered between the encoder and the transport.
//!
//! Dropping the body fires the request's cancellation token. Aborting the sink
//! makes the body yield an error instead of a clean end of stream, so a
//! failed transcode never looks like a complete chunked response.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use vscale_media::ChunkSink;

/// Create a connected sink/body pair. `guard` is released when the body is dropped.
pub fn live_channel(guard: DropGuard) -> (ChannelSink, LiveBody) {
    let (tx, rx) = mpsc::channel(1);
    let aborted = Arc::new(AtomicBool::new(false));

    let sink = ChannelSink {
        tx: Some(tx),
        aborted: Arc::clone(&aborted),
    };
    let body = LiveBody {
        rx,
        aborted,
        done: false,
        _guard: guard,
    };
    (sink, body)
}

/// Pump destination writing into the response body.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
    aborted: Arc<AtomicBool>,
}

impl ChannelSink {
    /// End the body cleanly.
    pub fn finish(mut self) {
        self.tx.take();
    }

    /// End the body with an error frame.
    pub fn abort(mut self) {
        self.close_with_error();
    }

    fn close_with_error(&mut self) {
        if self.tx.take().is_some() {
            self.aborted.store(true, Ordering::Release);
        }
    }

    fn sender(&self) -> io::Result<&mpsc::Sender<Bytes>> {
        self.tx.as_ref().ok_or_else(client_gone)
    }
}

impl Drop for ChannelSink {
    fn drop(&mut self) {
        // Only finish() may end the body cleanly.
        self.close_with_error();
    }
}

#[async_trait]
impl ChunkSink for ChannelSink {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.sender()?
            .send(Bytes::copy_from_slice(chunk))
            .await
            .map_err(|_| client_gone())
    }

    async fn flush(&mut self) -> io::Result<()> {
        // The single slot is free again once the body has taken the chunk.
        self.sender()?
            .reserve()
            .await
            .map(drop)
            .map_err(|_| client_gone())
    }
}

fn client_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped")
}

/// Streaming response body for a live transcode.
#[derive(Debug)]
pub struct LiveBody {
    rx: mpsc::Receiver<Bytes>,
    aborted: Arc<AtomicBool>,
    done: bool,
    _guard: DropGuard,
}

impl Stream for LiveBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {
                self.done = true;
                if self.aborted.load(Ordering::Acquire) {
                    Poll::Ready(Some(Err(io::Error::other("live transcode aborted"))))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use tokio_util::sync::CancellationToken;

    use super::*;

    #[tokio::test]
    async fn test_finish_ends_cleanly() {
        let (mut sink, mut body) = live_channel(CancellationToken::new().drop_guard());

        sink.write_chunk(b"abc").await.unwrap();
        assert_eq!(body.next().await.unwrap().unwrap(), "abc");
        sink.flush().await.unwrap();
        sink.finish();

        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_abort_yields_error_after_pending_chunks() {
        let (mut sink, mut body) = live_channel(CancellationToken::new().drop_guard());

        sink.write_chunk(b"partial").await.unwrap();
        sink.abort();

        assert_eq!(body.next().await.unwrap().unwrap(), "partial");
        assert!(body.next().await.unwrap().is_err());
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_sink_counts_as_abort() {
        let (sink, mut body) = live_channel(CancellationToken::new().drop_guard());
        drop(sink);

        assert!(body.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_flush_waits_for_consumer() {
        let (mut sink, mut body) = live_channel(CancellationToken::new().drop_guard());
        sink.write_chunk(b"one").await.unwrap();

        let flushed = tokio::time::timeout(std::time::Duration::from_millis(50), sink.flush()).await;
        assert!(flushed.is_err(), "flush returned before the chunk was taken");

        assert_eq!(body.next().await.unwrap().unwrap(), "one");
        sink.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_body_cancels_and_fails_writes() {
        let token = CancellationToken::new();
        let (mut sink, body) = live_channel(token.clone().drop_guard());

        drop(body);

        assert!(token.is_cancelled());
        let err = sink.write_chunk(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
