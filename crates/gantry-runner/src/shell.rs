//! Shell-based job execution on the host.

use crate::config::RunnerConfig;
use async_trait::async_trait;
use gantry_core::ids::HandleId;
use gantry_core::ports::{ExecutionBackend, JobHandle, JobOutcome, JobSpec};
use gantry_core::run::ArtifactPayload;
use gantry_core::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// A single finished attempt.
#[derive(Debug)]
struct Attempt {
    exit_code: Option<i32>,
    logs: Vec<String>,
}

impl Attempt {
    fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

struct Entry {
    /// Taken by the first `wait`.
    join: Option<JoinHandle<Result<JobOutcome>>>,
    abort: AbortHandle,
}

/// Runs job commands with `sh -c` on the host.
pub struct ShellBackend {
    config: Arc<RunnerConfig>,
    jobs: Mutex<HashMap<HandleId, Entry>>,
}

impl ShellBackend {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config: Arc::new(config),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn lock_jobs(&self) -> Result<std::sync::MutexGuard<'_, HashMap<HandleId, Entry>>> {
        self.jobs
            .lock()
            .map_err(|_| Error::Internal("shell backend job table poisoned".to_string()))
    }

    fn artifact_dir(&self, spec: &JobSpec) -> PathBuf {
        let instance: String = spec
            .instance_id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();
        self.config
            .artifact_root
            .join(spec.run_id.to_string())
            .join(instance)
    }
}

impl Default for ShellBackend {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl ExecutionBackend for ShellBackend {
    async fn submit(&self, spec: JobSpec) -> Result<JobHandle> {
        let artifact_dir = self.artifact_dir(&spec);
        tokio::fs::create_dir_all(&artifact_dir).await?;

        let handle = JobHandle::new(spec.instance_id.clone());
        let config = Arc::clone(&self.config);
        let join = tokio::spawn(run_with_retries(config, spec, artifact_dir));
        let abort = join.abort_handle();

        self.lock_jobs()?.insert(
            handle.id,
            Entry {
                join: Some(join),
                abort,
            },
        );
        Ok(handle)
    }

    async fn wait(&self, handle: &JobHandle) -> Result<JobOutcome> {
        let join = {
            let mut jobs = self.lock_jobs()?;
            let entry = jobs
                .get_mut(&handle.id)
                .ok_or_else(|| Error::Backend(format!("unknown job handle {}", handle.id)))?;
            entry.join.take().ok_or_else(|| {
                Error::Backend(format!("job {} is already being awaited", handle.id))
            })?
        };

        let joined = join.await;
        self.lock_jobs()?.remove(&handle.id);

        match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Backend(format!(
                "job {} was cancelled",
                handle.instance_id
            ))),
            Err(e) => Err(Error::Backend(format!(
                "job {} panicked: {}",
                handle.instance_id, e
            ))),
        }
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        if let Some(entry) = self.lock_jobs()?.get(&handle.id) {
            info!(instance = %handle.instance_id, "Cancelling shell job");
            entry.abort.abort();
        }
        Ok(())
    }
}

async fn run_with_retries(
    config: Arc<RunnerConfig>,
    spec: JobSpec,
    artifact_dir: PathBuf,
) -> Result<JobOutcome> {
    let mut last_error = None;
    for attempt in 0..=config.retry_count {
        if attempt > 0 {
            info!(instance = %spec.instance_id, attempt, "Retrying command");
            tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
            clear_dir(&artifact_dir).await?;
        }

        match execute_command(&config, &spec, &artifact_dir).await {
            Ok(result) if result.success() || attempt == config.retry_count => {
                let artifacts = if result.success() {
                    collect_artifacts(&artifact_dir).await?
                } else {
                    Vec::new()
                };
                return Ok(JobOutcome {
                    success: result.success(),
                    exit_code: result.exit_code,
                    artifacts,
                    logs: result.logs,
                });
            }
            Ok(result) => {
                warn!(instance = %spec.instance_id, attempt, exit_code = ?result.exit_code, "Command failed, will retry");
            }
            Err(e) if attempt == config.retry_count => {
                error!(instance = %spec.instance_id, error = %e, "Command failed after all retries");
                return Err(e);
            }
            Err(e) => {
                warn!(instance = %spec.instance_id, error = %e, attempt, "Command error, will retry");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Internal("no attempt was made".to_string())))
}

async fn execute_command(config: &RunnerConfig, spec: &JobSpec, artifact_dir: &Path) -> Result<Attempt> {
    let start = std::time::Instant::now();
    info!(
        instance = %spec.instance_id,
        command = %spec.command,
        workspace = %config.workspace.display(),
        "Executing shell command"
    );

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&spec.command)
        .current_dir(&config.workspace)
        .envs(&spec.env)
        .env("GANTRY_ARTIFACT_DIR", artifact_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Backend(format!("failed to spawn process: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("stderr not captured".to_string()))?;

    let (tx, mut rx) = mpsc::channel(256);
    let stdout_task = tokio::spawn(stream_lines(stdout, OutputStream::Stdout, tx.clone()));
    let stderr_task = tokio::spawn(stream_lines(stderr, OutputStream::Stderr, tx));

    let mut tail = VecDeque::with_capacity(config.log_tail_lines.min(1024));
    while let Some((stream, line)) = rx.recv().await {
        debug!(instance = %spec.instance_id, stream = ?stream, "{}", line);
        if config.log_tail_lines == 0 {
            continue;
        }
        if tail.len() == config.log_tail_lines {
            tail.pop_front();
        }
        tail.push_back(match stream {
            OutputStream::Stdout => line,
            OutputStream::Stderr => format!("[stderr] {}", line),
        });
    }
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    let status = child
        .wait()
        .await
        .map_err(|e| Error::Backend(format!("failed to wait for process: {}", e)))?;

    debug!(
        instance = %spec.instance_id,
        exit_code = ?status.code(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Command completed"
    );

    Ok(Attempt {
        exit_code: status.code(),
        logs: tail.into(),
    })
}

async fn stream_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<(OutputStream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send((stream, line)).await.is_err() {
            break;
        }
    }
}

/// Every regular file in `dir`, sorted by name.
async fn collect_artifacts(dir: &Path) -> Result<Vec<ArtifactPayload>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut artifacts = Vec::with_capacity(files.len());
    for (name, path) in files {
        let data = tokio::fs::read(&path).await?;
        artifacts.push(ArtifactPayload::new(name, data));
    }
    Ok(artifacts)
}

async fn clear_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}
