use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};

use crate::config::GenerationConfig;
use crate::error::{GenerationError, GoalLabel, Result, Stage, TrajGenError};
use crate::fsutil::{atomic_write_bytes, create_fresh_dir, sha256_file};
use crate::layout::{compute_layout, GoalArea, PathLayout, RunIdentity};
use crate::planner::{Planner, PlannerInvocation, ProcessResult};
use crate::run_config::{PlannerRunConfig, RunConfigBuilder};
use crate::store;
use crate::validator::{LogPartitioner, OpptLogPartitioner, SafeTrajValidator};

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    pub config_path: PathBuf,
    pub module_output_dir: PathBuf,
    pub template_path: PathBuf,
    pub goal_area_index: usize,
    pub timestamp: String,
}

/// Outcome of a completed generation run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub goal_area: GoalArea,
    pub timestamp: String,
    pub run_config: PathBuf,
    pub log_file: PathBuf,
    pub trajectories_file: PathBuf,
    pub manifest: PathBuf,
    pub planner_exit_code: Option<i32>,
    pub runs_total: usize,
    pub safe_trajectories: usize,
}

/// Generates safe pedestrian trajectories for one goal area.
///
/// Construction loads the config and fixes the output layout; [`run`](Self::run)
/// claims the output tree, drives the planner and persists the safe runs. A
/// run identity can be used once: a second `run` against the same
/// timestamp and goal area fails with `DirectoryConflict`.
pub struct SafeTrajGenerator {
    config: GenerationConfig,
    goal_area: GoalArea,
    layout: PathLayout,
    builder: RunConfigBuilder,
    partitioner: Box<dyn LogPartitioner>,
}

impl SafeTrajGenerator {
    pub fn new(options: GeneratorOptions) -> std::result::Result<Self, GenerationError> {
        let fail = |source: TrajGenError| GenerationError {
            stage: Stage::LoadConfig,
            timestamp: options.timestamp.clone(),
            goal_area: GoalLabel::Index(options.goal_area_index),
            source,
        };
        let config = GenerationConfig::load(&options.config_path).map_err(fail)?;
        let goal_area = config.goal_area(options.goal_area_index).map_err(fail)?;
        let identity = RunIdentity::new(options.timestamp, goal_area);
        let layout = compute_layout(&options.module_output_dir, &identity);
        Ok(Self {
            config,
            goal_area,
            layout,
            builder: RunConfigBuilder::new(options.template_path),
            partitioner: Box::new(OpptLogPartitioner::new()),
        })
    }

    pub fn with_partitioner(mut self, partitioner: Box<dyn LogPartitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn goal_area(&self) -> GoalArea {
        self.goal_area
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    fn stage_error(&self, stage: Stage) -> impl Fn(TrajGenError) -> GenerationError + '_ {
        move |source| GenerationError {
            stage,
            timestamp: self.layout.identity.timestamp.clone(),
            goal_area: GoalLabel::Selected(self.goal_area),
            source,
        }
    }

    pub fn run(
        &self,
        planner: &dyn Planner,
    ) -> std::result::Result<GenerationReport, GenerationError> {
        let span = info_span!(
            "safe_traj_gen",
            goal = %self.goal_area,
            timestamp = %self.layout.identity.timestamp
        );
        let _entered = span.enter();

        self.create_output_dirs()
            .map_err(self.stage_error(Stage::CreateDirectories))?;
        info!(logs = %self.layout.planner_logs_dir.display(), "output directories created");

        let run_config = self
            .builder
            .build(&self.layout, &self.config, self.goal_area)
            .map_err(self.stage_error(Stage::BuildRunConfig))?;

        let stdout_file = self.layout.planner_stdout_file();
        let stderr_file = self.layout.planner_stderr_file();
        let process = planner
            .run(&PlannerInvocation {
                run_config: &run_config.path,
                stdout_file: &stdout_file,
                stderr_file: &stderr_file,
            })
            .map_err(self.stage_error(Stage::ExecutePlanner))?;
        if !process.timed_out && !process.success() {
            warn!(
                exit_code = ?process.exit_code,
                stderr = %process.stderr_tail(20),
                "planner_nonzero_exit: continuing with whatever log it produced"
            );
        }

        let validation = SafeTrajValidator::new(
            self.layout.log_file(),
            &self.layout.validator_dir,
            self.partitioner.as_ref(),
        )
        .validate()
        .map_err(self.stage_error(Stage::ValidateLog))?;

        store::persist(&validation.trajectories, &self.layout.trajectories_file)
            .map_err(self.stage_error(Stage::PersistTrajectories))?;

        let report = GenerationReport {
            goal_area: self.goal_area,
            timestamp: self.layout.identity.timestamp.clone(),
            run_config: run_config.path.clone(),
            log_file: self.layout.log_file(),
            trajectories_file: self.layout.trajectories_file.clone(),
            manifest: self.layout.manifest_file(),
            planner_exit_code: process.exit_code,
            runs_total: validation.runs_total,
            safe_trajectories: validation.trajectories.len(),
        };
        self.write_manifest(&run_config, &process, &report)
            .map_err(self.stage_error(Stage::PersistTrajectories))?;

        if process.timed_out {
            return Err(self.stage_error(Stage::ExecutePlanner)(
                TrajGenError::PlannerTimeout {
                    timeout: process.timeout.unwrap_or(process.elapsed),
                    saved: report.safe_trajectories,
                },
            ));
        }
        info!(
            runs = report.runs_total,
            safe = report.safe_trajectories,
            file = %report.trajectories_file.display(),
            "safe trajectories generated"
        );
        Ok(report)
    }

    fn create_output_dirs(&self) -> Result<()> {
        let dirs = self.layout.guarded_dirs();
        if let Some(existing) = dirs.iter().find(|d| d.exists()) {
            return Err(TrajGenError::DirectoryConflict {
                path: existing.to_path_buf(),
            });
        }
        for dir in dirs {
            create_fresh_dir(dir).map_err(|source| claim_error(dir, source))?;
        }
        Ok(())
    }

    fn write_manifest(
        &self,
        run_config: &PlannerRunConfig,
        process: &ProcessResult,
        report: &GenerationReport,
    ) -> Result<()> {
        let digest = sha256_file(&run_config.path).map_err(|source| TrajGenError::TemplateIo {
            path: run_config.path.clone(),
            source,
        })?;
        let manifest = json!({
            "schema_version": "safe_traj_gen_manifest_v1",
            "timestamp": report.timestamp,
            "goal_area": report.goal_area,
            "config": self.config,
            "template": self.builder.template_path().to_string_lossy(),
            "run_config": run_config.path.to_string_lossy(),
            "run_config_digest": digest,
            "planner": {
                "exit_code": process.exit_code,
                "timed_out": process.timed_out,
                "elapsed_ms": process.elapsed.as_millis() as u64,
            },
            "log_file": report.log_file.to_string_lossy(),
            "runs_total": report.runs_total,
            "safe_trajectories": report.safe_trajectories,
            "trajectories_file": report.trajectories_file.to_string_lossy(),
            "created_at": Utc::now().to_rfc3339(),
        });
        let path = self.layout.manifest_file();
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        atomic_write_bytes(&path, &bytes)
            .map_err(|source| TrajGenError::PersistWrite { path, source })
    }
}

fn claim_error(dir: &Path, source: io::Error) -> TrajGenError {
    if source.kind() == io::ErrorKind::AlreadyExists {
        TrajGenError::DirectoryConflict {
            path: dir.to_path_buf(),
        }
    } else {
        TrajGenError::DirectoryCreate {
            path: dir.to_path_buf(),
            source,
        }
    }
}
