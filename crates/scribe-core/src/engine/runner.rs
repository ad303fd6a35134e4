use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::progress::ProgressTracker;
use crate::engine::types::{EngineError, ProgressUpdate};

/// Per-run cancellation flag, shared between the engine's cancel path and
/// the worker thread driving the external tool.
pub type CancelFlag = Arc<AtomicBool>;

/// Number of recent output lines kept for failure diagnostics.
const TAIL_LINES: usize = 40;

/// Poll interval while waiting for a child process to exit.
const EXIT_POLL: Duration = Duration::from_millis(50);

/// Upper bound on waiting for a child that already closed its output.
const REAP_TIMEOUT: Duration = Duration::from_secs(30);

/// Parameters for one transcription run, resolved from the durable row.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub task_id: String,
    pub audio_path: PathBuf,
    pub output_dir: PathBuf,
    pub language: Option<String>,
}

/// How a run ended, as reported back to the processor loop.
///
/// Cancellation is not an error: it is reported through this enum so the
/// loop can tell an intentional stop from a genuine tool failure.
#[derive(Debug)]
pub enum JobOutcome {
    /// The tool exited successfully; `srt_path` is the subtitle it wrote.
    Completed { srt_path: PathBuf },
    /// A cancellation request was observed and the process was stopped.
    Cancelled,
}

/// Executes one job at a time on behalf of the processor loop.
///
/// The production implementation drives the external transcription tool;
/// engine tests substitute a scripted executor so lifecycle behavior can be
/// exercised without spawning real processes.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run the tool for one task until it exits or cancellation is observed.
    async fn run(&self, spec: JobSpec, cancel: CancelFlag) -> Result<JobOutcome, EngineError>;

    /// Out-of-band termination of the task's external process, if any.
    ///
    /// Returns once the process is gone or the bounded grace period has
    /// expired; never blocks indefinitely.
    async fn abort(&self, task_id: &str);
}

/// Command-line configuration for the external transcription tool.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Executable name or path invoked for each run.
    pub tool_bin: String,
    /// Model identifier passed to the tool.
    pub model: String,
    /// Credential for the diarization pipeline; diarization is skipped
    /// without it.
    pub hf_token: Option<String>,
    /// Request speaker diarization when a token is available.
    pub diarize: bool,
    /// Use the dedicated alignment model.
    pub align: bool,
    /// Audio chunk size in seconds.
    pub chunk_size: u32,
    /// Grace period between the polite stop signal and the hard kill.
    pub term_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tool_bin: "whisperx".to_string(),
            model: "large-v2".to_string(),
            hf_token: None,
            diarize: true,
            align: true,
            chunk_size: 6,
            term_grace: Duration::from_secs(5),
        }
    }
}

/// Tracks live child processes keyed by task id so an out-of-band
/// cancellation can find and terminate them even though the owning call
/// stack sits on a worker thread.
#[derive(Default)]
struct ProcessTable {
    children: Mutex<HashMap<String, Arc<Mutex<Child>>>>,
}

impl ProcessTable {
    fn insert(&self, task_id: &str, child: Arc<Mutex<Child>>) {
        if let Ok(mut map) = self.children.lock() {
            map.insert(task_id.to_string(), child);
        }
    }

    fn get(&self, task_id: &str) -> Option<Arc<Mutex<Child>>> {
        self.children
            .lock()
            .ok()
            .and_then(|map| map.get(task_id).cloned())
    }

    fn remove(&self, task_id: &str) {
        if let Ok(mut map) = self.children.lock() {
            map.remove(task_id);
        }
    }
}

/// Runs the external transcription tool as a cancellable unit of work.
///
/// The tool blocks for the whole transcription, so each run executes on a
/// `spawn_blocking` worker thread: the thread spawns the subprocess, feeds
/// its stdout through the [`ProgressTracker`], checks the cancellation flag
/// at every line, and reaps the child on the way out. Progress never
/// touches shared state directly; it is sent over the update channel and
/// applied on the runtime by the engine's writer task.
pub struct JobRunner {
    config: RunnerConfig,
    updates: mpsc::UnboundedSender<ProgressUpdate>,
    processes: Arc<ProcessTable>,
}

impl JobRunner {
    pub fn new(config: RunnerConfig, updates: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            config,
            updates,
            processes: Arc::new(ProcessTable::default()),
        }
    }
}

#[async_trait]
impl JobExecutor for JobRunner {
    async fn run(&self, spec: JobSpec, cancel: CancelFlag) -> Result<JobOutcome, EngineError> {
        let task_id = spec.task_id.clone();
        let config = self.config.clone();
        let updates = self.updates.clone();
        let processes = Arc::clone(&self.processes);

        let joined = tokio::task::spawn_blocking(move || {
            run_blocking(&config, &spec, &cancel, &updates, &processes)
        })
        .await;

        // The table entry is cleared here on every path, including panics.
        self.processes.remove(&task_id);

        match joined {
            Ok(result) => result,
            Err(_) => Err(EngineError::WorkerPanic { task_id }),
        }
    }

    async fn abort(&self, task_id: &str) {
        let Some(child) = self.processes.get(task_id) else {
            return;
        };
        let grace = self.config.term_grace;
        let id = task_id.to_string();
        // terminate() polls for process exit; keep that off the runtime.
        let _ = tokio::task::spawn_blocking(move || {
            terminate(&child, grace);
            info!(task_id = %id, "external process stopped");
        })
        .await;
    }
}

/// The blocking body of one run; executes on a worker thread.
fn run_blocking(
    config: &RunnerConfig,
    spec: &JobSpec,
    cancel: &CancelFlag,
    updates: &mpsc::UnboundedSender<ProgressUpdate>,
    processes: &ProcessTable,
) -> Result<JobOutcome, EngineError> {
    let mut child = build_command(config, spec)
        .spawn()
        .map_err(|e| EngineError::Spawn {
            command: config.tool_bin.clone(),
            message: e.to_string(),
        })?;
    info!(task_id = %spec.task_id, tool = %config.tool_bin, "transcription process started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let child = Arc::new(Mutex::new(child));
    processes.insert(&spec.task_id, Arc::clone(&child));

    let tail = Arc::new(Mutex::new(VecDeque::with_capacity(TAIL_LINES)));
    let stderr_thread = stderr.map(|err| {
        let tail = Arc::clone(&tail);
        std::thread::spawn(move || {
            for line in BufReader::new(err).lines().map_while(Result::ok) {
                push_tail(&tail, line);
            }
        })
    });

    if let Some(out) = stdout {
        let mut tracker = ProgressTracker::new();
        for line in BufReader::new(out).lines().map_while(Result::ok) {
            // Cancellation is observed at line boundaries; a silent tool is
            // handled by the out-of-band abort path instead.
            if cancel.load(Ordering::Relaxed) {
                info!(task_id = %spec.task_id, "cancellation observed; stopping tool");
                terminate(&child, config.term_grace);
                break;
            }
            if let Some(progress) = tracker.observe(&line) {
                let _ = updates.send(ProgressUpdate {
                    task_id: spec.task_id.clone(),
                    progress: progress.percent,
                    step: progress.step.to_string(),
                    eta: progress.eta,
                });
            } else {
                debug!(task_id = %spec.task_id, line = %line, "tool output");
            }
            push_tail(&tail, line);
        }
    }

    let status = reap(&child)?;
    if let Some(thread) = stderr_thread {
        let _ = thread.join();
    }

    if cancel.load(Ordering::Relaxed) {
        return Ok(JobOutcome::Cancelled);
    }

    if !status.success() {
        return Err(EngineError::ToolFailed {
            code: status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            detail: tail_text(&tail),
        });
    }

    let srt_path = locate_srt(&spec.output_dir, &spec.audio_path)?;
    let _ = updates.send(ProgressUpdate {
        task_id: spec.task_id.clone(),
        progress: 100,
        step: "Completed".to_string(),
        eta: None,
    });
    Ok(JobOutcome::Completed { srt_path })
}

fn build_command(config: &RunnerConfig, spec: &JobSpec) -> Command {
    let mut command = Command::new(&config.tool_bin);
    command
        .arg(&spec.audio_path)
        .args(["--model", &config.model])
        .args(["--chunk_size", &config.chunk_size.to_string()])
        .args(["--compute_type", "float32"])
        .args(["--temperature", "0.1"]);
    if config.align {
        command.args(["--align_model", "WAV2VEC2_ASR_LARGE_LV60K_960H"]);
    }
    if config.diarize && config.hf_token.is_some() {
        command.args(["--diarize", "--min_speakers", "2", "--max_speakers", "4"]);
    }
    if let Some(token) = &config.hf_token {
        command.args(["--hf_token", token]);
    }
    if let Some(language) = &spec.language {
        command.args(["--language", language]);
    }
    command
        .arg("--output_dir")
        .arg(&spec.output_dir)
        .args(["--output_format", "srt"])
        .args(["--print_progress", "True"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

/// Stop a child process: polite signal first, hard kill after the grace
/// period. Returns once the process is gone or the bounded wait expired.
fn terminate(child: &Arc<Mutex<Child>>, grace: Duration) {
    #[cfg(unix)]
    {
        let pid = child.lock().ok().map(|guard| guard.id());
        if let Some(pid) = pid {
            // SIGTERM lets the tool flush partial output before exiting.
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        }
        if wait_for_death(child, grace) {
            return;
        }
        warn!("process ignored the stop signal; killing");
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Ok(mut guard) = child.lock() {
        let _ = guard.kill();
    }
    let _ = wait_for_death(child, Duration::from_secs(2));
}

/// Poll until the child exits or the timeout passes.
fn wait_for_death(child: &Arc<Mutex<Child>>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(mut guard) = child.lock() {
            match guard.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                // The child is no longer ours to wait on; treat as gone.
                Err(_) => return true,
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(EXIT_POLL);
    }
}

/// Collect the exit status after the output streams have closed.
fn reap(child: &Arc<Mutex<Child>>) -> Result<ExitStatus, EngineError> {
    let deadline = Instant::now() + REAP_TIMEOUT;
    loop {
        if let Ok(mut guard) = child.lock() {
            match guard.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        // Output closed but the process lingers; force it.
                        let _ = guard.kill();
                    }
                }
                Err(e) => {
                    return Err(EngineError::Io {
                        context: "waiting for transcription process".to_string(),
                        source: e,
                    });
                }
            }
        }
        std::thread::sleep(EXIT_POLL);
    }
}

/// The tool names its subtitle after the audio file's stem.
fn locate_srt(output_dir: &Path, audio_path: &Path) -> Result<PathBuf, EngineError> {
    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let expected = output_dir.join(format!("{stem}.srt"));
    if expected.is_file() {
        Ok(expected)
    } else {
        Err(EngineError::MissingOutput(format!(
            "expected subtitle at {}",
            expected.display()
        )))
    }
}

fn push_tail(tail: &Mutex<VecDeque<String>>, line: String) {
    if let Ok(mut buf) = tail.lock() {
        if buf.len() == TAIL_LINES {
            buf.pop_front();
        }
        buf.push_back(line);
    }
}

fn tail_text(tail: &Mutex<VecDeque<String>>) -> String {
    tail.lock()
        .map(|buf| buf.iter().cloned().collect::<Vec<_>>().join("\n"))
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        path
    }

    fn runner_for(
        script: &Path,
    ) -> (Arc<JobRunner>, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = RunnerConfig {
            tool_bin: script.display().to_string(),
            term_grace: Duration::from_secs(2),
            ..Default::default()
        };
        (Arc::new(JobRunner::new(config, tx)), rx)
    }

    fn spec_in(dir: &Path, task_id: &str) -> JobSpec {
        JobSpec {
            task_id: task_id.to_string(),
            audio_path: dir.join("meeting1.mp3"),
            output_dir: dir.to_path_buf(),
            language: None,
        }
    }

    #[tokio::test]
    async fn successful_run_reports_monotonic_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let srt = dir.path().join("meeting1.srt");
        let script = write_script(
            dir.path(),
            "tool.sh",
            &format!(
                "#!/bin/sh\n\
                 echo 'Loading model'\n\
                 echo 'Model loaded'\n\
                 echo 'Transcribing audio'\n\
                 echo 'Progress: 50.0%'\n\
                 printf '1\\n00:00:00,000 --> 00:00:01,000\\nhello world\\n\\n' > {}\n\
                 echo 'saving output'\n",
                srt.display()
            ),
        );

        let (runner, mut rx) = runner_for(&script);
        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
        let outcome = runner
            .run(spec_in(dir.path(), "t-ok"), cancel)
            .await
            .expect("run succeeds");

        match outcome {
            JobOutcome::Completed { srt_path } => assert_eq!(srt_path, srt),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let mut last = 0;
        let mut final_step = String::new();
        while let Ok(update) = rx.try_recv() {
            assert!(update.progress >= last, "progress went backwards");
            last = update.progress;
            final_step = update.step;
        }
        assert_eq!(last, 100);
        assert_eq!(final_step, "Completed");
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_the_error_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            dir.path(),
            "tool.sh",
            "#!/bin/sh\necho 'boom: model not found' >&2\nexit 3\n",
        );

        let (runner, _rx) = runner_for(&script);
        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
        let err = runner
            .run(spec_in(dir.path(), "t-fail"), cancel)
            .await
            .expect_err("run must fail");

        match err {
            EngineError::ToolFailed { code, detail } => {
                assert_eq!(code, "3");
                assert!(detail.contains("boom"), "detail was: {detail}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = RunnerConfig {
            tool_bin: "/nonexistent/transcriber".to_string(),
            ..Default::default()
        };
        let runner = JobRunner::new(config, tx);
        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));

        let err = runner
            .run(spec_in(dir.path(), "t-spawn"), cancel)
            .await
            .expect_err("spawn must fail");
        assert!(matches!(err, EngineError::Spawn { .. }));
    }

    #[tokio::test]
    async fn abort_stops_a_running_process_within_the_grace_period() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_script(
            dir.path(),
            "tool.sh",
            "#!/bin/sh\nwhile :; do echo 'Progress: 10.0%'; sleep 1; done\n",
        );

        let (runner, mut rx) = runner_for(&script);
        let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
        let run = tokio::spawn({
            let runner = Arc::clone(&runner);
            let cancel = Arc::clone(&cancel);
            let spec = spec_in(dir.path(), "t-kill");
            async move { runner.run(spec, cancel).await }
        });

        // First update proves the process is alive and emitting output.
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("progress within timeout")
            .expect("channel open");
        assert_eq!(first.task_id, "t-kill");
        assert!(runner.processes.get("t-kill").is_some());

        cancel.store(true, Ordering::Relaxed);
        runner.abort("t-kill").await;

        let outcome = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run returns within timeout")
            .expect("task joins")
            .expect("no error");
        assert!(matches!(outcome, JobOutcome::Cancelled));
        assert!(runner.processes.get("t-kill").is_none());
    }
}
