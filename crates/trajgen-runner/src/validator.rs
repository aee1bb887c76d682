//! Splits a planner log into runs and keeps the runs that reached the goal safely.
//!
//! The default partitioner understands the planner's line-oriented log:
//!
//! ```text
//! Run #1
//! State: [ 0 0 0.5 ]
//! Collision: false
//! State: [ 0 1 0.5 ]
//! Goal reached: true
//! Run #2
//! ...
//! ```
//!
//! Anything before the first `Run #` header is preamble and is ignored.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, TrajGenError};
use crate::fsutil::{atomic_write_bytes, ensure_dir};

pub type PedestrianState = Vec<f64>;
pub type Trajectory = Vec<PedestrianState>;

/// One simulation attempt recovered from the log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRecord {
    pub run_number: u64,
    pub lines: Vec<String>,
    pub states: Trajectory,
    pub reached_goal: bool,
    pub collided: bool,
    pub malformed_states: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Safe,
    Unsafe,
    /// Ended without reaching the goal, e.g. a run cut short by a planner crash.
    Incomplete,
}

pub fn classify(run: &RunRecord) -> RunOutcome {
    if run.collided {
        RunOutcome::Unsafe
    } else if run.reached_goal && run.malformed_states == 0 && !run.states.is_empty() {
        RunOutcome::Safe
    } else {
        RunOutcome::Incomplete
    }
}

/// Trajectories of the safe runs, in log order.
pub fn successful_trajectories(runs: &[RunRecord]) -> Vec<Trajectory> {
    runs.iter()
        .filter(|run| classify(run) == RunOutcome::Safe)
        .map(|run| run.states.clone())
        .collect()
}

/// Boundary to the log parser: turns a raw log into per-run records.
pub trait LogPartitioner: Send + Sync {
    /// `workdir` receives whatever intermediate artifacts the partitioner keeps.
    fn split_runs(&self, log_path: &Path, workdir: &Path) -> Result<Vec<RunRecord>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OpptLogPartitioner;

impl OpptLogPartitioner {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, log: &str) -> Vec<RunRecord> {
        let mut runs = Vec::new();
        let mut current: Option<RunRecord> = None;
        for line in log.lines() {
            if let Some(run_number) = parse_header(line) {
                if let Some(done) = current.take() {
                    runs.push(done);
                }
                current = Some(RunRecord {
                    run_number,
                    lines: vec![line.to_string()],
                    ..RunRecord::default()
                });
                continue;
            }
            let Some(run) = current.as_mut() else {
                continue;
            };
            run.lines.push(line.to_string());
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("State:") {
                match parse_state(rest) {
                    Some(state) => run.states.push(state),
                    None => run.malformed_states += 1,
                }
            } else if let Some(rest) = trimmed.strip_prefix("Collision:") {
                run.collided |= is_true(rest);
            } else if let Some(rest) = trimmed.strip_prefix("Goal reached:") {
                run.reached_goal |= is_true(rest);
            }
        }
        if let Some(done) = current {
            runs.push(done);
        }
        runs
    }
}

impl LogPartitioner for OpptLogPartitioner {
    fn split_runs(&self, log_path: &Path, workdir: &Path) -> Result<Vec<RunRecord>> {
        let raw = read_log(log_path)?;
        let runs = self.parse(&raw);
        ensure_dir(workdir).map_err(|source| TrajGenError::DirectoryCreate {
            path: workdir.to_path_buf(),
            source,
        })?;
        for run in &runs {
            let path = workdir.join(format!("run_{}.log", run.run_number));
            let mut body = run.lines.join("\n");
            body.push('\n');
            atomic_write_bytes(&path, body.as_bytes())
                .map_err(|source| TrajGenError::PersistWrite { path, source })?;
        }
        debug!(runs = runs.len(), workdir = %workdir.display(), "partitioned planner log");
        Ok(runs)
    }
}

fn read_log(log_path: &Path) -> Result<String> {
    if !log_path.is_file() {
        return Err(TrajGenError::LogNotFound {
            path: log_path.to_path_buf(),
        });
    }
    let bytes = fs::read(log_path).map_err(|source| TrajGenError::LogRead {
        path: log_path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `Run #<n>`, tolerating spaces around `#`.
fn parse_header(line: &str) -> Option<u64> {
    let rest = line.trim_start().strip_prefix("Run")?.trim_start();
    let digits = rest.strip_prefix('#')?.trim_start();
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().ok()
}

/// Numbers of a `State:` line; non-finite values have no JSON form and count as malformed.
fn parse_state(raw: &str) -> Option<PedestrianState> {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    let values: Option<Vec<f64>> = inner
        .split_whitespace()
        .map(|t| t.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect();
    values.filter(|v| !v.is_empty())
}

fn is_true(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub runs_total: usize,
    pub trajectories: Vec<Trajectory>,
}

/// Examines the log produced for one generation run.
pub struct SafeTrajValidator<'a> {
    log_path: PathBuf,
    outdir: PathBuf,
    partitioner: &'a dyn LogPartitioner,
}

impl<'a> SafeTrajValidator<'a> {
    pub fn new(
        log_path: impl Into<PathBuf>,
        outdir: impl Into<PathBuf>,
        partitioner: &'a dyn LogPartitioner,
    ) -> Self {
        Self {
            log_path: log_path.into(),
            outdir: outdir.into(),
            partitioner,
        }
    }

    pub fn validate(&self) -> Result<Validation> {
        let runs = self.partitioner.split_runs(&self.log_path, &self.outdir)?;
        let mut incomplete = 0usize;
        let mut unsafe_runs = 0usize;
        for run in &runs {
            match classify(run) {
                RunOutcome::Safe => {}
                RunOutcome::Unsafe => unsafe_runs += 1,
                RunOutcome::Incomplete => incomplete += 1,
            }
            if run.malformed_states > 0 {
                warn!(
                    run = run.run_number,
                    malformed = run.malformed_states,
                    "run has unparsable state lines"
                );
            }
        }
        let trajectories = successful_trajectories(&runs);
        info!(
            runs = runs.len(),
            safe = trajectories.len(),
            unsafe_runs,
            incomplete,
            "classified planner runs"
        );
        Ok(Validation {
            runs_total: runs.len(),
            trajectories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
ABT planner v1
Run #1
State: [ 0 0 1 ]
Collision: false
State: [ 0 1 1 ]
Goal reached: true
Run #2
State: [ 0 0 1 ]
Collision: true
Goal reached: true
Run #3
State: 1 2 3
State: 1 3 3
Goal reached: true
Run #4
State: [ 0 0 1 ]
";

    #[test]
    fn parse_splits_runs_and_ignores_preamble() {
        let runs = OpptLogPartitioner::new().parse(LOG);
        assert_eq!(runs.len(), 4);
        assert_eq!(
            runs.iter().map(|r| r.run_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(runs[0].states, vec![vec![0.0, 0.0, 1.0], vec![0.0, 1.0, 1.0]]);
        assert!(runs[0].lines.iter().all(|l| !l.contains("ABT planner")));
    }

    #[test]
    fn classify_requires_goal_without_collision() {
        let runs = OpptLogPartitioner::new().parse(LOG);
        let outcomes: Vec<_> = runs.iter().map(classify).collect();
        assert_eq!(
            outcomes,
            vec![
                RunOutcome::Safe,
                RunOutcome::Unsafe,
                RunOutcome::Safe,
                RunOutcome::Incomplete
            ]
        );
        let safe = successful_trajectories(&runs);
        assert_eq!(safe.len(), 2);
        assert_eq!(safe[1], vec![vec![1.0, 2.0, 3.0], vec![1.0, 3.0, 3.0]]);
    }

    #[test]
    fn header_parsing_is_strict_about_shape() {
        assert_eq!(parse_header("Run #12"), Some(12));
        assert_eq!(parse_header("  Run # 3 started"), Some(3));
        assert_eq!(parse_header("Running #3"), None);
        assert_eq!(parse_header("Run #"), None);
        assert_eq!(parse_header("State: Run #1"), None);
    }

    #[test]
    fn malformed_state_disqualifies_run() {
        let runs = OpptLogPartitioner::new().parse("Run #1\nState: [ a b ]\nGoal reached: true\n");
        assert_eq!(runs[0].malformed_states, 1);
        assert_eq!(classify(&runs[0]), RunOutcome::Incomplete);
    }

    #[test]
    fn non_finite_state_values_are_malformed() {
        for value in ["nan", "inf", "-inf", "NaN", "infinity"] {
            let log = format!("Run #1\nState: [ {} 0 0 ]\nGoal reached: true\n", value);
            let runs = OpptLogPartitioner::new().parse(&log);
            assert_eq!(runs[0].malformed_states, 1, "{}", value);
            assert!(runs[0].states.is_empty());
            assert_eq!(classify(&runs[0]), RunOutcome::Incomplete);
        }
    }

    #[test]
    fn safe_trajectories_survive_persist_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = "Run #1\nState: [ nan 1 0 ]\nGoal reached: true\n\
                   Run #2\nState: [ 0.25 -1e3 0 ]\nGoal reached: true\n";
        let trajectories = successful_trajectories(&OpptLogPartitioner::new().parse(log));
        assert_eq!(trajectories, vec![vec![vec![0.25, -1000.0, 0.0]]]);
        let dest = dir.path().join("safe.json");
        crate::store::persist(&trajectories, &dest).expect("persist");
        let loaded: Vec<Trajectory> = crate::store::load(&dest).expect("load");
        assert_eq!(loaded, trajectories);
    }

    #[test]
    fn split_runs_writes_one_file_per_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("planner.log");
        fs::write(&log, LOG).expect("log");
        let workdir = dir.path().join("validator");
        let runs = OpptLogPartitioner::new()
            .split_runs(&log, &workdir)
            .expect("split");
        assert_eq!(runs.len(), 4);
        let run2 = fs::read_to_string(workdir.join("run_2.log")).expect("run_2");
        assert!(run2.starts_with("Run #2\n"));
        assert!(run2.contains("Collision: true"));
    }

    #[test]
    fn missing_log_is_log_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let partitioner = OpptLogPartitioner::new();
        let validator = SafeTrajValidator::new(
            dir.path().join("absent.log"),
            dir.path().join("validator"),
            &partitioner,
        );
        assert!(matches!(
            validator.validate(),
            Err(TrajGenError::LogNotFound { .. })
        ));
    }

    #[test]
    fn validate_reports_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("planner.log");
        fs::write(&log, LOG).expect("log");
        let partitioner = OpptLogPartitioner::new();
        let validation = SafeTrajValidator::new(&log, dir.path().join("v"), &partitioner)
            .validate()
            .expect("validate");
        assert_eq!(validation.runs_total, 4);
        assert_eq!(validation.trajectories.len(), 2);
    }
}
