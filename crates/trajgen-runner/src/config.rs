use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, TrajGenError};
use crate::layout::GoalArea;

const SECTION: &str = "safe_traj_gen_configs";

/// Typed view of the `safe_traj_gen_configs` section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub goal_areas: Vec<GoalArea>,
    pub goal_margins: Vec<f64>,
    pub samples_per_goal: u64,
    pub initial_state: Vec<f64>,
}

impl GenerationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| TrajGenError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw, path)
    }

    /// `origin` only labels errors.
    pub fn from_yaml_str(raw: &str, origin: &Path) -> Result<Self> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|source| TrajGenError::ConfigParse {
                path: origin.to_path_buf(),
                source,
            })?;
        let section = match doc.get(SECTION) {
            Some(v) if !v.is_null() => v,
            _ => {
                return Err(TrajGenError::ConfigMissing {
                    path: origin.to_path_buf(),
                })
            }
        };
        if !section.is_mapping() {
            return Err(TrajGenError::ConfigMissing {
                path: origin.to_path_buf(),
            });
        }

        let goal_areas: Vec<GoalArea> = required_field(section, "goal_areas")?;
        if goal_areas.is_empty() {
            return Err(field_error("goal_areas", "must list at least one goal area"));
        }
        let goal_margins: Vec<f64> = required_field(section, "goal_margins")?;
        if goal_margins.is_empty() {
            return Err(field_error("goal_margins", "must not be empty"));
        }
        let samples_per_goal: u64 = required_field(section, "samples_per_goal")?;
        if samples_per_goal == 0 {
            return Err(field_error("samples_per_goal", "must be a positive integer"));
        }
        let initial_state: Vec<f64> = required_field(section, "initial_state")?;
        if initial_state.is_empty() {
            return Err(field_error("initial_state", "must not be empty"));
        }

        let config = Self {
            goal_areas,
            goal_margins,
            samples_per_goal,
            initial_state,
        };
        debug!(
            origin = %origin.display(),
            goals = config.goal_areas.len(),
            "loaded generation config"
        );
        Ok(config)
    }

    pub fn goal_area(&self, index: usize) -> Result<GoalArea> {
        self.goal_areas.get(index).copied().ok_or_else(|| {
            field_error(
                "goal_areas",
                format!(
                    "goal area index {} out of range ({} configured)",
                    index,
                    self.goal_areas.len()
                ),
            )
        })
    }
}

fn field_error(field: &'static str, reason: impl Into<String>) -> TrajGenError {
    TrajGenError::ConfigField {
        field,
        reason: reason.into(),
    }
}

fn required_field<T: DeserializeOwned>(
    section: &serde_yaml::Value,
    field: &'static str,
) -> Result<T> {
    let value = section
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| field_error(field, "missing"))?;
    serde_yaml::from_value(value.clone()).map_err(|e| field_error(field, e.to_string()))
}
