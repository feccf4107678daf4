//! Chunked stream pump from the encoder to the client.
//!
//! Each chunk read from the live output is written and then flushed before
//! the next read, so at most one chunk sits between the encoder pipe and the
//! transport. Cancellation is checked before every read and raced against
//! every read, write and flush.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Maximum bytes moved per iteration.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Destination of pumped chunks.
#[async_trait]
pub trait ChunkSink: Send {
    /// Hand one chunk to the destination.
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Wait until everything written so far has left the sink.
    async fn flush(&mut self) -> io::Result<()>;
}

/// Counters for one pump run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub bytes: u64,
    pub chunks: u64,
}

/// Which side of the pump failed.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("read from encoder failed: {0}")]
    Read(#[source] io::Error),

    #[error("write to client failed: {0}")]
    Write(#[source] io::Error),
}

/// How a pump run ended.
#[derive(Debug)]
pub enum PumpOutcome {
    /// Clean end of stream.
    Completed(PumpStats),
    /// The cancellation token fired; no write was issued after that.
    Cancelled(PumpStats),
    /// A read, write or flush failed. Terminal, never retried.
    Failed { stats: PumpStats, error: PumpError },
}

impl PumpOutcome {
    pub fn stats(&self) -> PumpStats {
        match self {
            Self::Completed(stats) | Self::Cancelled(stats) => *stats,
            Self::Failed { stats, .. } => *stats,
        }
    }
}

/// Copy `reader` into `sink` until EOF, failure or cancellation.
pub async fn pump<R, S>(reader: &mut R, sink: &mut S, cancel: &CancellationToken) -> PumpOutcome
where
    R: AsyncRead + Unpin + Send + ?Sized,
    S: ChunkSink + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut stats = PumpStats::default();

    loop {
        if cancel.is_cancelled() {
            return PumpOutcome::Cancelled(stats);
        }

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpOutcome::Cancelled(stats),
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => return PumpOutcome::Completed(stats),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return PumpOutcome::Failed {
                    stats,
                    error: PumpError::Read(e),
                }
            }
        };

        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpOutcome::Cancelled(stats),
            delivered = deliver(sink, &buf[..n]) => delivered,
        };

        if let Err(e) = delivered {
            return PumpOutcome::Failed {
                stats,
                error: PumpError::Write(e),
            };
        }

        stats.bytes += n as u64;
        stats.chunks += 1;
    }
}

async fn deliver<S: ChunkSink + ?Sized>(sink: &mut S, chunk: &[u8]) -> io::Result<()> {
    sink.write_chunk(chunk).await?;
    sink.flush().await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Write(usize),
        Flush,
    }

    /// Records every call; optionally fails writes or cancels after N flushes.
    #[derive(Default)]
    struct RecordingSink {
        events: Vec<Event>,
        data: Vec<u8>,
        fail_writes: bool,
        cancel_after_flushes: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone"));
            }
            self.events.push(Event::Write(chunk.len()));
            self.data.extend_from_slice(chunk);
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            self.events.push(Event::Flush);
            if let Some((limit, token)) = &self.cancel_after_flushes {
                let flushes = self.events.iter().filter(|e| **e == Event::Flush).count();
                if flushes >= *limit {
                    token.cancel();
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_chunks_and_flushes_every_write() {
        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let mut reader = payload.as_slice();
        let mut sink = RecordingSink::default();

        let outcome = pump(&mut reader, &mut sink, &CancellationToken::new()).await;

        assert!(matches!(outcome, PumpOutcome::Completed(_)));
        assert_eq!(outcome.stats(), PumpStats { bytes: 40_000, chunks: 3 });
        assert_eq!(sink.data, payload);
        assert_eq!(
            sink.events,
            vec![
                Event::Write(CHUNK_SIZE),
                Event::Flush,
                Event::Write(CHUNK_SIZE),
                Event::Flush,
                Event::Write(40_000 - 2 * CHUNK_SIZE),
                Event::Flush,
            ]
        );
    }

    #[tokio::test]
    async fn test_preserves_order_of_small_reads() {
        let mut reader = Builder::new().read(b"one,").read(b"two,").read(b"three").build();
        let mut sink = RecordingSink::default();

        let outcome = pump(&mut reader, &mut sink, &CancellationToken::new()).await;

        assert!(matches!(outcome, PumpOutcome::Completed(_)));
        assert_eq!(sink.data, b"one,two,three");
        assert_eq!(outcome.stats().chunks, 3);
    }

    #[tokio::test]
    async fn test_empty_stream_completes_without_writes() {
        let mut reader: &[u8] = &[];
        let mut sink = RecordingSink::default();

        let outcome = pump(&mut reader, &mut sink, &CancellationToken::new()).await;

        assert!(matches!(outcome, PumpOutcome::Completed(_)));
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_issues_no_writes() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut reader: &[u8] = b"payload";
        let mut sink = RecordingSink::default();

        let outcome = pump(&mut reader, &mut sink, &cancel).await;

        assert!(matches!(outcome, PumpOutcome::Cancelled(_)));
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_stops_further_writes() {
        let cancel = CancellationToken::new();
        let payload = vec![7u8; CHUNK_SIZE * 4];
        let mut reader = payload.as_slice();
        let mut sink = RecordingSink {
            cancel_after_flushes: Some((1, cancel.clone())),
            ..Default::default()
        };

        let outcome = pump(&mut reader, &mut sink, &cancel).await;

        assert!(matches!(outcome, PumpOutcome::Cancelled(_)));
        assert_eq!(outcome.stats(), PumpStats { bytes: CHUNK_SIZE as u64, chunks: 1 });
        assert_eq!(sink.events, vec![Event::Write(CHUNK_SIZE), Event::Flush]);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_on_read() {
        let cancel = CancellationToken::new();
        // Keep the writer half open so the read never completes on its own.
        let (_writer, mut reader) = tokio::io::duplex(64);
        let mut sink = RecordingSink::default();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(5), pump(&mut reader, &mut sink, &cancel))
            .await
            .expect("pump observed cancellation");

        assert!(matches!(outcome, PumpOutcome::Cancelled(_)));
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn test_read_error_is_terminal() {
        let mut reader = Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::Other, "pipe broke"))
            .build();
        let mut sink = RecordingSink::default();

        let outcome = pump(&mut reader, &mut sink, &CancellationToken::new()).await;

        match outcome {
            PumpOutcome::Failed { stats, error: PumpError::Read(_) } => {
                assert_eq!(stats.bytes, 7);
            }
            other => panic!("expected read failure, got {other:?}"),
        }
        assert_eq!(sink.data, b"partial");
    }

    #[tokio::test]
    async fn test_write_error_is_terminal() {
        let mut reader: &[u8] = b"payload";
        let mut sink = RecordingSink {
            fail_writes: true,
            ..Default::default()
        };

        let outcome = pump(&mut reader, &mut sink, &CancellationToken::new()).await;

        assert!(matches!(
            outcome,
            PumpOutcome::Failed { error: PumpError::Write(_), .. }
        ));
    }
}
