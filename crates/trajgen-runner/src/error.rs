use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::layout::GoalArea;

/// Failures raised by the individual pipeline components.
#[derive(Debug, Error)]
pub enum TrajGenError {
    #[error("config_read: cannot read {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config_parse: {path} is not valid YAML: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config_missing: {path} has no safe_traj_gen_configs section")]
    ConfigMissing { path: PathBuf },

    #[error("config_field: {field}: {reason}")]
    ConfigField { field: &'static str, reason: String },

    #[error("directory_conflict: {path} already exists")]
    DirectoryConflict { path: PathBuf },

    #[error("directory_create: cannot create {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("template_missing: {path}")]
    TemplateMissing { path: PathBuf },

    #[error("template_key_not_found: no `{key} =` line in {path}")]
    TemplateKeyNotFound { key: &'static str, path: PathBuf },

    #[error("template_io: {path}: {source}")]
    TemplateIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("planner_launch: cannot start {executable}: {source}")]
    PlannerLaunch {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("planner_wait: lost track of planner process: {source}")]
    PlannerWait {
        #[source]
        source: io::Error,
    },

    #[error("planner_output: {path}: {source}")]
    PlannerOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "planner_timeout: planner killed after {timeout:?}; \
         {saved} trajectories recovered from partial log"
    )]
    PlannerTimeout { timeout: Duration, saved: usize },

    #[error("log_not_found: planner produced no log at {path}")]
    LogNotFound { path: PathBuf },

    #[error("log_read: {path}: {source}")]
    LogRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("persist_write: {path}: {source}")]
    PersistWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("trajectories_load: {path}: {reason}")]
    TrajectoriesLoad { path: PathBuf, reason: String },

    #[error("persist_encode: {0}")]
    PersistEncode(#[from] serde_json::Error),
}

impl TrajGenError {
    /// Stable machine-readable kind, the prefix of the display form.
    pub fn code(&self) -> &'static str {
        match self {
            TrajGenError::ConfigRead { .. } => "config_read",
            TrajGenError::ConfigParse { .. } => "config_parse",
            TrajGenError::ConfigMissing { .. } => "config_missing",
            TrajGenError::ConfigField { .. } => "config_field",
            TrajGenError::DirectoryConflict { .. } => "directory_conflict",
            TrajGenError::DirectoryCreate { .. } => "directory_create",
            TrajGenError::TemplateMissing { .. } => "template_missing",
            TrajGenError::TemplateKeyNotFound { .. } => "template_key_not_found",
            TrajGenError::TemplateIo { .. } => "template_io",
            TrajGenError::PlannerLaunch { .. } => "planner_launch",
            TrajGenError::PlannerWait { .. } => "planner_wait",
            TrajGenError::PlannerOutput { .. } => "planner_output",
            TrajGenError::PlannerTimeout { .. } => "planner_timeout",
            TrajGenError::LogNotFound { .. } => "log_not_found",
            TrajGenError::LogRead { .. } => "log_read",
            TrajGenError::PersistWrite { .. } => "persist_write",
            TrajGenError::TrajectoriesLoad { .. } => "trajectories_load",
            TrajGenError::PersistEncode(_) => "persist_encode",
        }
    }
}

/// Pipeline stage being entered when a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadConfig,
    CreateDirectories,
    BuildRunConfig,
    ExecutePlanner,
    ValidateLog,
    PersistTrajectories,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::LoadConfig => "load_config",
            Stage::CreateDirectories => "create_directories",
            Stage::BuildRunConfig => "build_run_config",
            Stage::ExecutePlanner => "execute_planner",
            Stage::ValidateLog => "validate_log",
            Stage::PersistTrajectories => "persist_trajectories",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A component failure annotated with the orchestration it aborted.
#[derive(Debug, Error)]
#[error("stage {stage} failed for {goal_area} at {timestamp}: {source}")]
pub struct GenerationError {
    pub stage: Stage,
    pub timestamp: String,
    /// Unknown when the config could not be loaded far enough to select one.
    pub goal_area: GoalLabel,
    #[source]
    pub source: TrajGenError,
}

impl GenerationError {
    pub fn kind(&self) -> &TrajGenError {
        &self.source
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalLabel {
    Selected(GoalArea),
    Index(usize),
}

impl fmt::Display for GoalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalLabel::Selected(goal) => write!(f, "{}", goal),
            GoalLabel::Index(idx) => write!(f, "goal_areas[{}]", idx),
        }
    }
}

pub type Result<T, E = TrajGenError> = std::result::Result<T, E>;
