//! FFmpeg progress and stderr parsing.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

/// Classification of one stderr line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StderrLine {
    /// End of a `-progress` block, carrying the accumulated state
    Progress(FfmpegProgress),
    /// A `key=value` field inside a progress block
    Field,
    /// Anything else: warnings, errors, banners
    Message,
}

/// Parse a line from FFmpeg's stderr, updating `current` for progress fields.
pub(crate) fn parse_stderr_line(line: &str, current: &mut FfmpegProgress) -> StderrLine {
    let line = line.trim();

    let Some((key, value)) = line.split_once('=') else {
        return StderrLine::Message;
    };
    if key.is_empty()
        || !key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        || value.contains(char::is_whitespace)
    {
        return StderrLine::Message;
    }

    match key {
        "out_time_ms" | "out_time_us" => {
            // FFmpeg reports microseconds under both keys
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "out_time" => {
            current.out_time = value.to_string();
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "fps" => {
            if let Ok(fps) = value.parse() {
                current.fps = fps;
            }
        }
        "speed" => {
            // Format: "1.5x" or "N/A"
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            // "continue" or "end"
            if value == "end" {
                current.is_complete = true;
            }
            return StderrLine::Progress(current.clone());
        }
        _ => {}
    }

    StderrLine::Field
}

/// Bounded buffer keeping the last non-progress stderr lines.
#[derive(Debug, Clone)]
pub(crate) struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Joined tail, or `None` when nothing was captured.
    pub(crate) fn render(&self) -> Option<String> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines.iter().cloned().collect::<Vec<_>>().join("\n"))
        }
    }
}
