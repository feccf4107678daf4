#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for on-demand resolution transcoding.
//!
//! This crate provides:
//! - The dual-output FFmpeg command (cache file on disk + live fragmented stream on stdout)
//! - A transcode orchestrator that owns the encoder process and always reaps it
//! - Progress and stderr parsing for diagnostics
//! - A chunked, flush-per-chunk stream pump with cancellation

pub mod command;
pub mod error;
pub mod progress;
pub mod pump;
pub mod transcode;

pub use command::{check_ffmpeg, DualOutputCommand, EncoderSettings};
pub use error::{MediaError, MediaResult};
pub use progress::FfmpegProgress;
pub use pump::{pump, ChunkSink, PumpError, PumpOutcome, PumpStats, CHUNK_SIZE};
pub use transcode::{FfmpegJob, FfmpegTranscoder, TranscodeJob, TranscodeRequest, Transcoder};
