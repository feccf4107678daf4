//! Shared fixtures: temp directories and an in-process encoder double.

#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use vscale_api::{create_router, AppState, ServerConfig};
use vscale_media::{MediaError, MediaResult, TranscodeJob, TranscodeRequest, Transcoder};

/// First bytes a stalled encoder emits before going quiet.
pub const STALL_PREFIX: &[u8] = b"hello";

/// What the encoder double does once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Streams the payload and exits cleanly.
    Succeed,
    /// Streams the payload, then exits non-zero.
    ExitFailure,
    /// Fails to launch.
    SpawnFailure,
    /// Emits a prefix and then never produces more output.
    Stall,
}

/// Encoder double recording how it was driven.
pub struct StubTranscoder {
    behavior: Behavior,
    payload: Vec<u8>,
    starts: AtomicUsize,
    terminations: Arc<AtomicUsize>,
}

impl StubTranscoder {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            payload: (0..40_000u32).map(|i| (i % 251) as u8).collect(),
            starts: AtomicUsize::new(0),
            terminations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for StubTranscoder {
    async fn start(
        &self,
        request: &TranscodeRequest,
        _cancel: CancellationToken,
    ) -> MediaResult<Box<dyn TranscodeJob>> {
        self.starts.fetch_add(1, Ordering::SeqCst);

        if self.behavior == Behavior::SpawnFailure {
            return Err(MediaError::FfmpegNotFound("stub-encoder".to_string()));
        }

        // The disk sink: the artifact the cache will publish.
        tokio::fs::write(&request.output, &self.payload).await?;

        let (output, writer): (Box<dyn AsyncRead + Send + Unpin>, Option<DuplexStream>) =
            match self.behavior {
                Behavior::Stall => {
                    let (mut writer, reader) = tokio::io::duplex(64);
                    writer.write_all(STALL_PREFIX).await?;
                    (Box::new(reader), Some(writer))
                }
                _ => (Box::new(io::Cursor::new(self.payload.clone())), None),
            };

        Ok(Box::new(StubJob {
            behavior: self.behavior,
            output,
            _writer: writer,
            terminations: Arc::clone(&self.terminations),
        }))
    }
}

struct StubJob {
    behavior: Behavior,
    output: Box<dyn AsyncRead + Send + Unpin>,
    // Held open so a stalled read never sees EOF.
    _writer: Option<DuplexStream>,
    terminations: Arc<AtomicUsize>,
}

#[async_trait]
impl TranscodeJob for StubJob {
    fn output(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.output.as_mut()
    }

    async fn finish(self: Box<Self>) -> MediaResult<()> {
        match self.behavior {
            Behavior::ExitFailure => Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some("Invalid data found when processing input".to_string()),
                Some(1),
            )),
            _ => Ok(()),
        }
    }

    async fn terminate(self: Box<Self>) -> MediaResult<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A server state over temp directories holding `movie.mp4` and `shows/e01.mp4`.
pub struct Harness {
    pub input: TempDir,
    pub output: TempDir,
    pub stub: Arc<StubTranscoder>,
    pub state: AppState,
}

impl Harness {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_config(behavior, |_| {})
    }

    pub fn with_config(behavior: Behavior, configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join("movie.mp4"), b"source").unwrap();
        std::fs::create_dir_all(input.path().join("shows")).unwrap();
        std::fs::write(input.path().join("shows/e01.mp4"), b"source").unwrap();

        let mut config = ServerConfig::new(input.path(), output.path(), [480, 720]);
        configure(&mut config);

        let stub = Arc::new(StubTranscoder::new(behavior));
        let state = AppState::with_transcoder(config, stub.clone());

        Self {
            input,
            output,
            stub,
            state,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone(), None)
    }

    pub async fn send(&self, method: Method, uri: &str) -> Response<Body> {
        self.router()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Method::GET, uri).await
    }

    /// Wait for every generation task to finish its cleanup.
    pub async fn settle(&self) {
        self.state.tasks.close();
        tokio::time::timeout(Duration::from_secs(5), self.state.tasks.wait())
            .await
            .expect("generation tasks finished");
        self.state.tasks.reopen();
    }

    pub fn artifact(&self, relative: &str) -> std::path::PathBuf {
        self.output.path().join(relative)
    }

    pub fn staging_entries(&self) -> usize {
        staging_entries(self.output.path())
    }
}

pub fn staging_entries(output: &Path) -> usize {
    std::fs::read_dir(output.join(".staging"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}
