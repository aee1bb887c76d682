//! Instantiates the planner's `SafeTrajGen.cfg` template for one goal area.
//!
//! The template is line oriented: `key = value`, one assignment per line.
//! Each recognised key has its first assignment rewritten in process; every
//! key must be present or the build fails before anything is written.

use regex::{Captures, Regex};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::GenerationConfig;
use crate::error::{Result, TrajGenError};
use crate::fsutil::atomic_write_bytes;
use crate::layout::{GoalArea, PathLayout};

pub const LOG_PATH: &str = "logPath";
pub const LOG_FILE_POSTFIX: &str = "logFilePostfix";
pub const N_RUNS: &str = "nRuns";
pub const LOWER_BOUND: &str = "lowerBound";
pub const UPPER_BOUND: &str = "upperBound";
pub const SAFETY_GOAL_AREA: &str = "safetyGoalArea";
pub const GOAL_MARGINS: &str = "goalMargins";

pub const TEMPLATE_KEYS: [&str; 7] = [
    LOG_PATH,
    LOG_FILE_POSTFIX,
    N_RUNS,
    LOWER_BOUND,
    UPPER_BOUND,
    SAFETY_GOAL_AREA,
    GOAL_MARGINS,
];

/// The filled-in run configuration handed to the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerRunConfig {
    pub path: PathBuf,
    pub substitutions: Vec<(&'static str, String)>,
}

impl PlannerRunConfig {
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.substitutions
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// `[ v1 v2 ... ]`, the planner's vector syntax.
pub fn render_list<T: Display>(values: &[T]) -> String {
    let mut out = String::from("[");
    for v in values {
        out.push(' ');
        out.push_str(&v.to_string());
    }
    out.push_str(" ]");
    out
}

pub struct RunConfigBuilder {
    template_path: PathBuf,
}

impl RunConfigBuilder {
    pub fn new(template_path: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    pub fn build(
        &self,
        layout: &PathLayout,
        config: &GenerationConfig,
        goal_area: GoalArea,
    ) -> Result<PlannerRunConfig> {
        if !self.template_path.is_file() {
            return Err(TrajGenError::TemplateMissing {
                path: self.template_path.clone(),
            });
        }
        let template =
            fs::read_to_string(&self.template_path).map_err(|source| TrajGenError::TemplateIo {
                path: self.template_path.clone(),
                source,
            })?;

        // Lower and upper belief bounds coincide so every run starts from the same state.
        let initial = render_list(&config.initial_state);
        let substitutions: Vec<(&'static str, String)> = vec![
            (LOG_PATH, layout.planner_logs_dir.to_string_lossy().to_string()),
            (LOG_FILE_POSTFIX, layout.identity.log_postfix()),
            (N_RUNS, config.samples_per_goal.to_string()),
            (LOWER_BOUND, initial.clone()),
            (UPPER_BOUND, initial),
            (SAFETY_GOAL_AREA, render_list(&[goal_area.x, goal_area.y])),
            (GOAL_MARGINS, render_list(&config.goal_margins)),
        ];

        let mut text = template;
        for &(key, ref value) in &substitutions {
            text = substitute_key(&text, key, value).ok_or_else(|| {
                TrajGenError::TemplateKeyNotFound {
                    key,
                    path: self.template_path.clone(),
                }
            })?;
            debug!(key, value = %value, "template key substituted");
        }

        let dest = layout.run_config_file();
        atomic_write_bytes(&dest, text.as_bytes()).map_err(|source| TrajGenError::TemplateIo {
            path: dest.clone(),
            source,
        })?;
        info!(run_config = %dest.display(), goal = %goal_area, "built planner run config");
        Ok(PlannerRunConfig {
            path: dest,
            substitutions,
        })
    }
}

fn key_pattern(key: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?m)^(?P<indent>[ \t]*){}[ \t]*=[^\r\n]*", regex::escape(key))).ok()
}

/// Rewrites the first `key = ...` line; `None` when the key is absent.
pub fn substitute_key(text: &str, key: &str, value: &str) -> Option<String> {
    let re = key_pattern(key)?;
    if !re.is_match(text) {
        return None;
    }
    let replaced = re.replacen(text, 1, |caps: &Captures| {
        format!("{}{} = {}", &caps["indent"], key, value)
    });
    Some(replaced.into_owned())
}

/// Reads back the value of the first `key = ...` line.
pub fn read_key(text: &str, key: &str) -> Option<String> {
    let re = key_pattern(key)?;
    let m = re.find(text)?;
    let line = m.as_str();
    line.split_once('=').map(|(_, v)| v.trim().to_string())
}
