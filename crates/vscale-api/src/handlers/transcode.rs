//! Transcode request handler.
//!
//! `GET /{width}p/{filename}` serves a published artifact when one exists.
//! Otherwise it starts an encoder writing the artifact to the staging area
//! and streams the encoder's live output as the response body. A background
//! task owned by the server's task tracker drives the stream and, once the
//! body is done, either publishes or discards the artifact.

use std::io;
use std::path::Path;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::body::{live_channel, ChannelSink};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{self, ActiveEncoder};
use crate::state::AppState;
use vscale_media::{pump, MediaError, PumpOutcome, TranscodeJob, TranscodeRequest};
use vscale_models::RequestKey;
use vscale_storage::{CacheLookup, StagedArtifact};

const VIDEO_MP4: &str = "video/mp4";

/// Serve a transcoded variant, generating it on a cache miss.
pub async fn transcode(State(state): State<AppState>, request: Request) -> ApiResult<Response> {
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return Err(ApiError::MethodNotAllowed);
    }

    let key = state.matcher.match_path(request.uri().path())?;

    if let CacheLookup::Ready(path) = state.cache.lookup(&key).await? {
        metrics::record_cache_lookup("hit");
        debug!(key = %key, "Cache hit");
        return serve_cached(&path, request).await;
    }
    metrics::record_cache_lookup("miss");

    let source = state.config.input_dir.join(key.filename());
    ensure_source(&source).await?;

    // Never start an encoder just to answer a HEAD.
    if method == Method::HEAD {
        return Ok(live_response(Body::empty()));
    }

    let permit = acquire_encoder_slot(&state)?;
    let staged = state.cache.stage(&key).await?;

    let cancel = state.shutdown.child_token();
    let job_request = TranscodeRequest {
        input: source,
        width: key.width(),
        output: staged.path().to_path_buf(),
    };

    let job = match state.transcoder.start(&job_request, cancel.clone()).await {
        Ok(job) => job,
        Err(e) => {
            if let Err(discard_err) = state.cache.discard(staged).await {
                warn!(key = %key, "Failed to remove temp artifact: {}", discard_err);
            }
            return Err(e.into());
        }
    };

    // Dropping the body (client gone) fires the request token.
    let (sink, body) = live_channel(cancel.clone().drop_guard());

    let span = info_span!(
        "transcode",
        width = %key.width(),
        filename = %key.filename().display()
    );
    state.tasks.spawn(
        generate(Generation {
            state: state.clone(),
            key,
            job,
            staged,
            sink,
            cancel,
            _permit: permit,
        })
        .instrument(span),
    );

    Ok(live_response(Body::from_stream(body)))
}

/// Headers of a live transcode response. They never change once sent.
fn live_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, VIDEO_MP4),
            (header::TRANSFER_ENCODING, "chunked"),
        ],
        body,
    )
        .into_response()
}

/// Serve a published artifact with range and conditional request support.
async fn serve_cached(path: &Path, request: Request) -> ApiResult<Response> {
    let mut response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(infallible) => match infallible {},
    };

    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(VIDEO_MP4));
    }
    Ok(response)
}

async fn ensure_source(source: &Path) -> ApiResult<()> {
    match tokio::fs::metadata(source).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(ApiError::not_found("File Not Found")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ApiError::not_found("File Not Found")),
        Err(e) => Err(ApiError::internal(format!(
            "failed to inspect {}: {}",
            source.display(),
            e
        ))),
    }
}

fn acquire_encoder_slot(state: &AppState) -> ApiResult<Option<OwnedSemaphorePermit>> {
    let Some(slots) = &state.encoder_slots else {
        return Ok(None);
    };

    match slots.clone().try_acquire_owned() {
        Ok(permit) => Ok(Some(permit)),
        Err(_) => {
            metrics::record_encoder_rejection();
            warn!("Encoder limit reached, rejecting request");
            Err(ApiError::unavailable("Too many active transcodes"))
        }
    }
}

/// Everything a generation task owns.
struct Generation {
    state: AppState,
    key: RequestKey,
    job: Box<dyn TranscodeJob>,
    staged: StagedArtifact,
    sink: ChannelSink,
    cancel: CancellationToken,
    _permit: Option<OwnedSemaphorePermit>,
}

/// How a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Published,
    Cancelled,
    Failed,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Published => "published",
            Outcome::Cancelled => "cancelled",
            Outcome::Failed => "failed",
        }
    }
}

async fn generate(generation: Generation) {
    let Generation {
        state,
        key,
        mut job,
        staged,
        mut sink,
        cancel,
        _permit,
    } = generation;

    let _active = ActiveEncoder::track();
    let started = Instant::now();

    if let Some(limit) = state.config.request_timeout() {
        let deadline = cancel.clone();
        state.tasks.spawn(async move {
            tokio::select! {
                _ = deadline.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    warn!(timeout_secs = limit.as_secs(), "Request deadline exceeded");
                    deadline.cancel();
                }
            }
        });
    }

    let pumped = pump(job.output(), &mut sink, &cancel).await;
    let stats = pumped.stats();
    metrics::record_streamed_bytes(stats.bytes);

    let outcome = match pumped {
        PumpOutcome::Completed(_) => finish_and_publish(&state, &key, job, staged).await,
        PumpOutcome::Cancelled(_) => {
            terminate(&key, job).await;
            discard(&state, &key, staged).await;
            Outcome::Cancelled
        }
        PumpOutcome::Failed { error, .. } => {
            terminate(&key, job).await;
            discard(&state, &key, staged).await;
            // A write failing because the client left is a cancellation.
            if cancel.is_cancelled() {
                Outcome::Cancelled
            } else {
                error!(key = %key, "Live stream failed: {}", error);
                Outcome::Failed
            }
        }
    };

    let elapsed = started.elapsed();
    match outcome {
        Outcome::Published => {
            sink.finish();
            info!(
                key = %key,
                bytes = stats.bytes,
                chunks = stats.chunks,
                elapsed_ms = elapsed.as_millis() as u64,
                "Transcode complete"
            );
        }
        Outcome::Cancelled => {
            sink.abort();
            info!(
                key = %key,
                bytes = stats.bytes,
                "Transcode cancelled, encoder stopped and temp artifact removed"
            );
        }
        Outcome::Failed => sink.abort(),
    }
    metrics::record_transcode(outcome.label(), elapsed);

    // Releases the deadline watcher.
    cancel.cancel();
}

/// Wait for a clean encoder exit, then make the artifact visible.
async fn finish_and_publish(
    state: &AppState,
    key: &RequestKey,
    job: Box<dyn TranscodeJob>,
    staged: StagedArtifact,
) -> Outcome {
    match job.finish().await {
        Ok(()) => match state.cache.publish(staged).await {
            Ok(_) => Outcome::Published,
            Err(e) => {
                error!(key = %key, "Failed to publish artifact: {}", e);
                Outcome::Failed
            }
        },
        Err(e) if e.is_cancelled() => {
            discard(state, key, staged).await;
            Outcome::Cancelled
        }
        Err(e) => {
            match &e {
                MediaError::FfmpegFailed {
                    stderr, exit_code, ..
                } => error!(
                    key = %key,
                    exit_code = ?exit_code,
                    stderr = stderr.as_deref().unwrap_or(""),
                    "Encoder failed: {}",
                    e
                ),
                _ => error!(key = %key, "Encoder failed: {}", e),
            }
            discard(state, key, staged).await;
            Outcome::Failed
        }
    }
}

async fn terminate(key: &RequestKey, job: Box<dyn TranscodeJob>) {
    if let Err(e) = job.terminate().await {
        error!(key = %key, "Failed to terminate encoder: {}", e);
    }
}

async fn discard(state: &AppState, key: &RequestKey, staged: StagedArtifact) {
    if let Err(e) = state.cache.discard(staged).await {
        warn!(key = %key, "Failed to remove temp artifact: {}", e);
    }
}
