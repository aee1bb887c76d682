use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, TrajGenError};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// `None` when the process was ended by a signal (including our own kill on timeout).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Configured limit the run was held to, if any.
    pub timeout: Option<Duration>,
    pub elapsed: Duration,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }

    /// Last non-empty stderr lines, for diagnostics.
    pub fn stderr_tail(&self, lines: usize) -> String {
        let mut tail: Vec<&str> = self
            .stderr
            .lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .take(lines)
            .collect();
        tail.reverse();
        tail.join("\n")
    }
}

/// What a planner run consumes and where its output streams land.
#[derive(Debug, Clone, Copy)]
pub struct PlannerInvocation<'a> {
    pub run_config: &'a Path,
    pub stdout_file: &'a Path,
    pub stderr_file: &'a Path,
}

/// Something that executes a planner run configuration to completion.
///
/// Implementations leave the captured streams in the invocation's
/// `stdout_file`/`stderr_file` and also return them in the result.
pub trait Planner: Send + Sync {
    fn run(&self, invocation: &PlannerInvocation<'_>) -> Result<ProcessResult>;
}

/// Runs the external planner binary as `<executable> --cfg <run_config>`.
///
/// Output goes straight to the capture files rather than through pipes, so
/// descendants that outlive a killed planner cannot hold up the timeout.
#[derive(Debug, Clone)]
pub struct ProcessPlanner {
    executable: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessPlanner {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Planner for ProcessPlanner {
    fn run(&self, invocation: &PlannerInvocation<'_>) -> Result<ProcessResult> {
        let start = Instant::now();
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--cfg").arg(invocation.run_config);
        cmd.stdin(Stdio::null());
        cmd.stdout(capture_file(invocation.stdout_file)?);
        cmd.stderr(capture_file(invocation.stderr_file)?);

        let mut child = cmd.spawn().map_err(|source| TrajGenError::PlannerLaunch {
            executable: self.executable.clone(),
            source,
        })?;
        info!(
            executable = %self.executable.display(),
            run_config = %invocation.run_config.display(),
            pid = child.id(),
            "planner started"
        );

        let (status, timed_out) = match self.timeout {
            Some(timeout) => wait_with_deadline(&mut child, start + timeout)?,
            None => (
                child
                    .wait()
                    .map_err(|source| TrajGenError::PlannerWait { source })?,
                false,
            ),
        };
        let elapsed = start.elapsed();

        let result = ProcessResult {
            exit_code: status.code(),
            stdout: read_capture(invocation.stdout_file)?,
            stderr: read_capture(invocation.stderr_file)?,
            timed_out,
            timeout: self.timeout,
            elapsed,
        };
        if timed_out {
            warn!(elapsed = ?result.elapsed, "planner exceeded its timeout and was killed");
        } else {
            debug!(exit_code = ?result.exit_code, elapsed = ?result.elapsed, "planner exited");
        }
        Ok(result)
    }
}

fn wait_with_deadline(child: &mut Child, deadline: Instant) -> Result<(ExitStatus, bool)> {
    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|source| TrajGenError::PlannerWait { source })?
        {
            return Ok((status, false));
        }
        if Instant::now() >= deadline {
            // The process may exit between try_wait and kill; wait() settles either way.
            let _ = child.kill();
            let status = child
                .wait()
                .map_err(|source| TrajGenError::PlannerWait { source })?;
            return Ok((status, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn capture_file(path: &Path) -> Result<Stdio> {
    let file = File::create(path).map_err(|source| TrajGenError::PlannerOutput {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Stdio::from(file))
}

fn read_capture(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|source| TrajGenError::PlannerOutput {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
