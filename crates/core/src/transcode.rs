//! Supervision of the external transcoding tool.
//!
//! A [`Transcoder`] takes a [`TranscodeJob`], stages its inputs, spawns the
//! tool with the rewritten arguments and collects standard output as the
//! result. Standard error is kept as a diagnostic log and, when streaming
//! is enabled, mined for [`ProgressUpdate`]s. Staged inputs are deleted
//! once the job ends, whatever the outcome.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::progress::{LineSplitter, ProgressParser, ProgressUpdate};
use crate::registry::BufferRegistry;
use crate::template::{self, InputBuffer, PreparedCommand, RenderOptions};

/// How long to wait for the pipes to close once the tool has exited or been
/// killed. A leftover grandchild can hold them open indefinitely.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Read size for the diagnostic stream.
const STDERR_CHUNK_BYTES: usize = 8 * 1024;

/// Channel on which progress updates are delivered.
pub type ProgressSender = mpsc::UnboundedSender<ProgressUpdate>;

/// Static settings for a [`Transcoder`].
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// Program spawned for every job (e.g. `ffmpeg`).
    pub program: String,
    /// Prefix substituted for `$BUFn`, ending in `/`.
    pub staging_base_url: String,
    /// Wall-clock limit per invocation; the tool is killed afterwards.
    pub timeout: Duration,
    /// Maximum number of tool processes running at once.
    pub max_concurrent: usize,
    /// Diagnostic mode: keep staged buffers and force `-v info`.
    pub retain_staged: bool,
}

/// One request: a command template, its inputs and output options.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub template: String,
    pub inputs: Vec<InputBuffer>,
    pub out_ext: Option<String>,
    pub stream_updates: bool,
    /// Expected result length in frames, used for percent-complete. May be
    /// fractional when the client derives it from duration and frame rate.
    pub expected_frames: f64,
}

/// Ways a job can fail. Every variant that reached the tool carries the
/// diagnostic log (argument line plus captured standard error).
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("invalid job: {0}")]
    Invalid(#[from] CoreError),

    #[error("transcoder is shutting down")]
    ShuttingDown,

    #[error("failed to spawn external tool: {source}")]
    Spawn {
        log: String,
        #[source]
        source: std::io::Error,
    },

    #[error("external tool exited with code {exit_code:?}")]
    Failed { exit_code: Option<i32>, log: String },

    #[error("external tool timed out after {elapsed_ms}ms")]
    TimedOut { elapsed_ms: u64, log: String },

    #[error("job cancelled")]
    Cancelled { log: String },
}

impl TranscodeError {
    /// Text reported to the client in an `error` message.
    pub fn detail(&self) -> String {
        match self {
            Self::Failed { log, .. } => log.clone(),
            Self::Spawn { log, .. } | Self::TimedOut { log, .. } | Self::Cancelled { log } => {
                format!("{log}\n{self}")
            }
            Self::Invalid(_) | Self::ShuttingDown => self.to_string(),
        }
    }
}

/// Runs jobs against the external tool, bounded by a concurrency limit.
pub struct Transcoder {
    config: TranscoderConfig,
    registry: Arc<BufferRegistry>,
    permits: Semaphore,
}

impl Transcoder {
    pub fn new(config: TranscoderConfig, registry: Arc<BufferRegistry>) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            config,
            registry,
            permits,
        }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BufferRegistry> {
        &self.registry
    }

    /// Number of tool invocations that could start right now.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse new jobs. Jobs already running are unaffected.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    /// Run one job to completion.
    ///
    /// Progress updates go to `updates` (only when the job asks for them)
    /// and are all sent before this returns. Cancelling `cancel` kills the
    /// tool. Staged inputs are removed on every path that staged them.
    pub async fn run(
        &self,
        job: TranscodeJob,
        updates: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TranscodeError> {
        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit.map_err(|_| TranscodeError::ShuttingDown)?,
            () = cancel.cancelled() => return Err(TranscodeError::Cancelled { log: String::new() }),
        };

        let options = RenderOptions {
            out_ext: job.out_ext.clone(),
            streaming: job.stream_updates,
            verbose: self.config.retain_staged,
        };
        let prepared = template::prepare(
            &job.template,
            &job.inputs,
            &options,
            &self.registry,
            &self.config.staging_base_url,
        )
        .await?;

        let parser = job.stream_updates.then(|| ProgressParser::new(job.expected_frames));
        let outcome = self.execute(&prepared, parser, updates, cancel).await;

        self.release(&prepared.staged_ids).await;
        outcome
    }

    /// Delete staged inputs unless diagnostic retention is on.
    async fn release(&self, staged_ids: &[String]) {
        if self.config.retain_staged {
            tracing::warn!(count = staged_ids.len(), "Retaining staged buffers (diagnostic mode)");
            return;
        }
        for id in staged_ids {
            self.registry.remove_exact(id).await;
        }
        tracing::debug!(count = staged_ids.len(), "Staged buffers released");
    }

    async fn execute(
        &self,
        prepared: &PreparedCommand,
        parser: Option<ProgressParser>,
        updates: &ProgressSender,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TranscodeError> {
        let program = &self.config.program;
        let mut log = format!("ARGS: {program} {}\n", prepared.line);

        let mut cmd = Command::new(program);
        cmd.args(&prepared.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => return Err(TranscodeError::Spawn { log, source }),
        };
        tracing::info!(program = %program, args = %prepared.line, "External tool spawned");

        let stdout_task = tokio::spawn(read_to_end(child.stdout.take()));
        let stderr_task = tokio::spawn(watch_stderr(
            child.stderr.take(),
            parser,
            updates.clone(),
        ));

        let wait_result = tokio::select! {
            result = tokio::time::timeout(self.config.timeout, child.wait()) => Some(result),
            () = cancel.cancelled() => None,
        };

        match wait_result {
            Some(Ok(Ok(status))) => {
                let (stdout, stderr) = tokio::join!(drain(stdout_task), drain(stderr_task));
                log.push_str(&String::from_utf8_lossy(&stderr.unwrap_or_default()));
                let Some(stdout) = stdout else {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    tracing::warn!(elapsed_ms, "Output stream still open after the tool exited");
                    return Err(TranscodeError::TimedOut { elapsed_ms, log });
                };

                if status.success() {
                    tracing::info!(
                        bytes = stdout.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "External tool succeeded",
                    );
                    Ok(Bytes::from(stdout))
                } else {
                    tracing::warn!(exit_code = ?status.code(), "External tool failed");
                    Err(TranscodeError::Failed {
                        exit_code: status.code(),
                        log,
                    })
                }
            }
            Some(Ok(Err(source))) => {
                stdout_task.abort();
                stderr_task.abort();
                Err(TranscodeError::Spawn { log, source })
            }
            stopped => {
                if let Err(e) = child.kill().await {
                    tracing::error!(error = %e, "Failed to kill external tool");
                }
                stdout_task.abort();
                if let Some(stderr) = drain(stderr_task).await {
                    log.push_str(&String::from_utf8_lossy(&stderr));
                }

                if stopped.is_some() {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    tracing::warn!(elapsed_ms, "External tool timed out and was killed");
                    Err(TranscodeError::TimedOut { elapsed_ms, log })
                } else {
                    tracing::info!("Job cancelled, external tool killed");
                    Err(TranscodeError::Cancelled { log })
                }
            }
        }
    }
}

/// Await a pipe reader for at most [`PIPE_DRAIN_TIMEOUT`]. `None` means the
/// pipe never closed and the reader was aborted.
async fn drain(mut task: JoinHandle<Vec<u8>>) -> Option<Vec<u8>> {
    match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(buf)) => Some(buf),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Pipe reader task failed");
            Some(Vec::new())
        }
        Err(_) => {
            task.abort();
            None
        }
    }
}

/// Read an entire output stream into memory. No cap: the result must be
/// complete before it is handed back.
async fn read_to_end<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        if let Err(e) = h.read_to_end(&mut buf).await {
            tracing::debug!(error = %e, "Output stream read failed");
        }
    }
    buf
}

/// Collect the diagnostic stream, echoing it to the log and emitting
/// progress updates for recognised lines.
async fn watch_stderr<R: AsyncRead + Unpin>(
    handle: Option<R>,
    parser: Option<ProgressParser>,
    updates: ProgressSender,
) -> Vec<u8> {
    let mut collected = Vec::new();
    let Some(mut stderr) = handle else {
        return collected;
    };

    let mut splitter = LineSplitter::new();
    let mut chunk = vec![0u8; STDERR_CHUNK_BYTES];
    loop {
        let n = match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(error = %e, "Diagnostic stream read failed");
                break;
            }
        };
        collected.extend_from_slice(&chunk[..n]);
        for line in splitter.push(&chunk[..n]) {
            handle_line(&line, parser.as_ref(), &updates);
        }
    }
    if let Some(line) = splitter.finish() {
        handle_line(&line, parser.as_ref(), &updates);
    }
    collected
}

fn handle_line(line: &str, parser: Option<&ProgressParser>, updates: &ProgressSender) {
    tracing::debug!(target: "ffstage_core::tool", "{line}");
    if let Some(update) = parser.and_then(|p| p.parse_line(line)) {
        // The receiver may already be gone if the session disconnected.
        let _ = updates.send(update);
    }
}
