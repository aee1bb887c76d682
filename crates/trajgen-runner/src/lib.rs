//! Safe pedestrian-crossing trajectory generation.
//!
//! One [`SafeTrajGenerator`] handles one goal area: it instantiates the
//! planner's run-config template, runs the planner, splits the resulting log
//! into runs and persists the runs that reached the goal without an unsafe
//! event.

pub mod config;
pub mod error;
mod fsutil;
pub mod generator;
pub mod layout;
pub mod planner;
pub mod run_config;
pub mod store;
pub mod validator;

pub use config::GenerationConfig;
pub use error::{GenerationError, GoalLabel, Stage, TrajGenError};
pub use generator::{GenerationReport, GeneratorOptions, SafeTrajGenerator};
pub use layout::{compute_layout, GoalArea, PathLayout, RunIdentity};
pub use planner::{Planner, PlannerInvocation, ProcessPlanner, ProcessResult};
pub use run_config::{PlannerRunConfig, RunConfigBuilder};
pub use validator::{
    LogPartitioner, OpptLogPartitioner, RunOutcome, RunRecord, SafeTrajValidator, Trajectory,
};
