//! Transcode orchestrator.
//!
//! A [`TranscodeJob`] is an owned encoder process: its live output is read by
//! the caller, and the process is reaped on every exit path. The child itself
//! lives in a supervisor task that races `wait()` against the job's
//! cancellation token, so a fired token always ends in SIGKILL followed by a
//! reap, even when the request future that owned the job was dropped.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::command::{DualOutputCommand, EncoderSettings};
use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_stderr_line, FfmpegProgress, StderrLine, StderrTail};
use vscale_models::Width;

/// Number of non-progress stderr lines kept for failure reports.
pub const STDERR_TAIL_LINES: usize = 20;

/// What to transcode and where the disk output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    /// Source video inside the input root
    pub input: PathBuf,
    /// Target width
    pub width: Width,
    /// Temporary disk output (published by the cache once the job succeeds)
    pub output: PathBuf,
}

/// Starts encoder jobs.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Launch the encoder. The job is bound to `cancel`: firing it kills and
    /// reaps the process.
    async fn start(
        &self,
        request: &TranscodeRequest,
        cancel: CancellationToken,
    ) -> MediaResult<Box<dyn TranscodeJob>>;
}

/// A running encoder with a consumable live output.
#[async_trait]
pub trait TranscodeJob: Send {
    /// The live payload stream.
    fn output(&mut self) -> &mut (dyn AsyncRead + Send + Unpin);

    /// Wait for the process to exit. `Ok` only for a clean, uncancelled exit.
    async fn finish(self: Box<Self>) -> MediaResult<()>;

    /// Forcibly kill the process and wait until it has been reaped.
    async fn terminate(self: Box<Self>) -> MediaResult<()>;
}

/// Orchestrator backed by the FFmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    settings: EncoderSettings,
}

impl FfmpegTranscoder {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn start(
        &self,
        request: &TranscodeRequest,
        cancel: CancellationToken,
    ) -> MediaResult<Box<dyn TranscodeJob>> {
        let cmd = DualOutputCommand::new(&request.input, request.width, &request.output)
            .settings(self.settings.clone());
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", cmd.program(), args.join(" "));

        let mut command = Command::new(cmd.program());
        command.args(&args);

        let job = FfmpegJob::spawn(command, cancel).map_err(|e| match e {
            MediaError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                MediaError::FfmpegNotFound(format!("{}: {}", cmd.program(), io))
            }
            other => other,
        })?;

        info!(
            pid = ?job.pid(),
            input = %request.input.display(),
            width = %request.width,
            "Encoder started"
        );

        Ok(Box::new(job))
    }
}

/// A spawned encoder process.
pub struct FfmpegJob {
    pid: Option<u32>,
    stdout: ChildStdout,
    exit: JoinHandle<std::io::Result<ExitStatus>>,
    stderr: Option<JoinHandle<StderrTail>>,
    cancel: CancellationToken,
    // Kills the process if the job is dropped without finish/terminate.
    _guard: DropGuard,
    started: Instant,
}

impl FfmpegJob {
    /// Spawn `command` with piped stdout/stderr and bind it to `cancel`.
    pub fn spawn(mut command: Command, cancel: CancellationToken) -> MediaResult<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::pipe_unavailable("stdout not captured"))?;
        let stderr = child.stderr.take().map(|s| tokio::spawn(collect_stderr(s, pid)));

        let job_cancel = cancel.child_token();
        let exit = tokio::spawn(supervise(child, job_cancel.clone()));

        Ok(Self {
            pid,
            stdout,
            exit,
            stderr,
            _guard: job_cancel.clone().drop_guard(),
            cancel: job_cancel,
            started: Instant::now(),
        })
    }

    /// OS process id, if the process was still running at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait_exit(&mut self) -> MediaResult<ExitStatus> {
        match (&mut self.exit).await {
            Ok(result) => Ok(result?),
            Err(e) => Err(MediaError::internal(format!("encoder supervisor failed: {}", e))),
        }
    }

    async fn stderr_tail(&mut self) -> Option<String> {
        match self.stderr.take()?.await {
            Ok(tail) => tail.render(),
            Err(e) => {
                warn!("stderr collector failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl TranscodeJob for FfmpegJob {
    fn output(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut self.stdout
    }

    async fn finish(mut self: Box<Self>) -> MediaResult<()> {
        let status = self.wait_exit().await?;
        let stderr = self.stderr_tail().await;
        let elapsed = self.started.elapsed();

        if status.success() {
            debug!(pid = ?self.pid, elapsed_ms = elapsed.as_millis() as u64, "Encoder exited cleanly");
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        Err(MediaError::ffmpeg_failed(
            "FFmpeg exited with non-zero status",
            stderr,
            status.code(),
        ))
    }

    async fn terminate(mut self: Box<Self>) -> MediaResult<()> {
        self.cancel.cancel();
        let status = self.wait_exit().await?;
        // Drain the collector so its pipe is closed before we return.
        let _ = self.stderr_tail().await;
        debug!(pid = ?self.pid, ?status, "Encoder terminated and reaped");
        Ok(())
    }
}

/// Own the child until it exits; kill it first if `cancel` fires.
async fn supervise(mut child: Child, cancel: CancellationToken) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            if let Err(e) = child.start_kill() {
                // Already exited; wait() still reaps it.
                debug!("kill failed: {}", e);
            }
            child.wait().await
        }
    }
}

/// Log progress blocks at debug and keep the tail of everything else.
async fn collect_stderr(stderr: ChildStderr, pid: Option<u32>) -> StderrTail {
    let mut lines = BufReader::new(stderr).lines();
    let mut progress = FfmpegProgress::default();
    let mut tail = StderrTail::new(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        match parse_stderr_line(&line, &mut progress) {
            StderrLine::Progress(p) => debug!(
                pid = ?pid,
                frame = p.frame,
                out_time = %p.out_time,
                speed = p.speed,
                "Encoder progress"
            ),
            StderrLine::Field => {}
            StderrLine::Message => {
                debug!(pid = ?pid, "ffmpeg: {}", line);
                tail.push(line);
            }
        }
    }

    tail
}
