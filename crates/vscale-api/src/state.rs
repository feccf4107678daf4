//! Application state.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ServerConfig;
use vscale_media::{FfmpegTranscoder, Transcoder};
use vscale_models::PathMatcher;
use vscale_storage::CacheManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub matcher: Arc<PathMatcher>,
    pub cache: Arc<CacheManager>,
    pub transcoder: Arc<dyn Transcoder>,
    /// Permits for running encoders, when `MaxEncoders` is set
    pub encoder_slots: Option<Arc<Semaphore>>,
    /// Parent of every request's cancellation token
    pub shutdown: CancellationToken,
    /// Background generation tasks, waited on during drain
    pub tasks: TaskTracker,
}

impl AppState {
    /// Create state backed by the FFmpeg CLI.
    pub fn new(config: ServerConfig) -> Self {
        let transcoder = Arc::new(FfmpegTranscoder::new(config.encoder.clone()));
        Self::with_transcoder(config, transcoder)
    }

    /// Create state with an explicit encoder implementation.
    pub fn with_transcoder(config: ServerConfig, transcoder: Arc<dyn Transcoder>) -> Self {
        let matcher = PathMatcher::new(config.width_set());
        let cache = CacheManager::new(config.output_dir.clone());
        let encoder_slots = config.max_encoders.map(|n| Arc::new(Semaphore::new(n)));

        Self {
            config: Arc::new(config),
            matcher: Arc::new(matcher),
            cache: Arc::new(cache),
            transcoder,
            encoder_slots,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }
}
