//! FFmpeg dual-output command builder.
//!
//! One decode pass, one scale, then a `split` into two sinks:
//! - `[out1]` muxed as a faststart MP4 into the cache artifact on disk
//! - `[out2]` muxed as fragmented ISMV onto stdout for the live response

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, MediaResult};
use vscale_models::Width;

/// Encoder program and codec parameters applied to both outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EncoderSettings {
    /// Executable name or path
    pub program: String,
    /// Video codec (`-c:v`)
    pub video_codec: String,
    /// Video bitrate (`-b:v`)
    pub video_bitrate: String,
    /// Audio codec (`-c:a`)
    pub audio_codec: String,
    /// Audio bitrate (`-b:a`)
    pub audio_bitrate: String,
    /// FFmpeg log level (`-v`)
    pub log_level: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            video_codec: "libx265".to_string(),
            video_bitrate: "1000k".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            log_level: "error".to_string(),
        }
    }
}

/// Builder for the dual-output FFmpeg invocation.
#[derive(Debug, Clone)]
pub struct DualOutputCommand {
    /// Source video
    input: PathBuf,
    /// Target width; height is derived (`-2` keeps it even)
    width: Width,
    /// Disk output (the future cache artifact)
    output: PathBuf,
    settings: EncoderSettings,
}

impl DualOutputCommand {
    /// Create a new command with default encoder settings.
    pub fn new(input: impl AsRef<Path>, width: Width, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            width,
            output: output.as_ref().to_path_buf(),
            settings: EncoderSettings::default(),
        }
    }

    /// Override encoder settings.
    pub fn settings(mut self, settings: EncoderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn program(&self) -> &str {
        &self.settings.program
    }

    /// Filter graph scaling once and splitting into both sinks.
    pub fn filter_graph(&self) -> String {
        format!("scale={}:-2[mid];[mid]split=2[out1][out2]", self.width)
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            "-y".to_string(),
            "-v".to_string(),
            s.log_level.clone(),
            "-nostats".to_string(),
            // Progress output to stderr
            "-progress".to_string(),
            "pipe:2".to_string(),
            "-i".to_string(),
            self.input.to_string_lossy().to_string(),
            "-filter_complex".to_string(),
            self.filter_graph(),
        ];

        // Disk output
        args.extend(self.output_args("[out1]"));
        args.extend(["-movflags", "+faststart", "-f", "mp4"].map(String::from));
        args.push(self.output.to_string_lossy().to_string());

        // Live output on stdout
        args.extend(self.output_args("[out2]"));
        args.extend(["-movflags", "isml+frag_keyframe", "-f", "ismv", "-"].map(String::from));

        args
    }

    fn output_args(&self, video_label: &str) -> Vec<String> {
        let s = &self.settings;
        vec![
            "-map".to_string(),
            "0:a?".to_string(),
            "-c:a".to_string(),
            s.audio_codec.clone(),
            "-b:a".to_string(),
            s.audio_bitrate.clone(),
            "-map".to_string(),
            video_label.to_string(),
            "-c:v".to_string(),
            s.video_codec.clone(),
            "-b:v".to_string(),
            s.video_bitrate.clone(),
        ]
    }
}

/// Check if the encoder executable is available.
pub fn check_ffmpeg(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|e| MediaError::FfmpegNotFound(format!("{}: {}", program, e)))
}
