//! Output tree for one generation run.
//!
//! Every artifact lives under `<module_output_dir>/<category>/<timestamp>/goal_<gx>_<gy>`,
//! so distinct run identities never share a directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Integer coordinates of a goal area, as listed in `goal_areas`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i64; 2]", into = "[i64; 2]")]
pub struct GoalArea {
    pub x: i64,
    pub y: i64,
}

impl GoalArea {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// `<gx>_<gy>`, shared by directory and file names.
    pub fn suffix(&self) -> String {
        format!("{}_{}", self.x, self.y)
    }
}

impl From<[i64; 2]> for GoalArea {
    fn from(v: [i64; 2]) -> Self {
        Self { x: v[0], y: v[1] }
    }
}

impl From<GoalArea> for [i64; 2] {
    fn from(g: GoalArea) -> Self {
        [g.x, g.y]
    }
}

impl fmt::Display for GoalArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "goal_{}", self.suffix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunIdentity {
    pub timestamp: String,
    pub goal_area: GoalArea,
}

impl RunIdentity {
    pub fn new(timestamp: impl Into<String>, goal_area: GoalArea) -> Self {
        Self {
            timestamp: timestamp.into(),
            goal_area,
        }
    }

    /// Postfix the planner appends to its log file name.
    pub fn log_postfix(&self) -> String {
        format!("{}_safe_traj_gen_g_{}", self.timestamp, self.goal_area.suffix())
    }

    fn namespace(&self) -> PathBuf {
        PathBuf::from(&self.timestamp).join(self.goal_area.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    pub identity: RunIdentity,
    pub planner_logs_dir: PathBuf,
    pub experiment_cfgs_dir: PathBuf,
    pub trajectories_db_dir: PathBuf,
    pub validator_dir: PathBuf,
    pub trajectories_file: PathBuf,
}

pub fn compute_layout(module_output_dir: &Path, identity: &RunIdentity) -> PathLayout {
    let ns = identity.namespace();
    let trajectories_db_dir = module_output_dir.join("safe_trajectories_db").join(&ns);
    let trajectories_file = trajectories_db_dir.join(format!(
        "safe_traj_gen_g_{}.json",
        identity.goal_area.suffix()
    ));
    PathLayout {
        identity: identity.clone(),
        planner_logs_dir: module_output_dir.join("oppt_logs").join(&ns),
        experiment_cfgs_dir: module_output_dir.join("oppt_experiment_cfgs").join(&ns),
        trajectories_db_dir,
        validator_dir: module_output_dir
            .join("safe_traj_validator_outdir")
            .join(&ns),
        trajectories_file,
    }
}

impl PathLayout {
    /// Directories claimed up front; an existing one means the identity was already used.
    pub fn guarded_dirs(&self) -> [&Path; 3] {
        [
            self.planner_logs_dir.as_path(),
            self.experiment_cfgs_dir.as_path(),
            self.trajectories_db_dir.as_path(),
        ]
    }

    pub fn log_file_name(&self) -> String {
        format!("log_ABT_Pedestrian_{}.log", self.identity.log_postfix())
    }

    pub fn log_file(&self) -> PathBuf {
        self.planner_logs_dir.join(self.log_file_name())
    }

    pub fn run_config_file(&self) -> PathBuf {
        self.experiment_cfgs_dir.join(format!(
            "SafeTrajGen_Goal_{}.cfg",
            self.identity.goal_area.suffix()
        ))
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.experiment_cfgs_dir.join("manifest.json")
    }

    pub fn planner_stdout_file(&self) -> PathBuf {
        self.planner_logs_dir.join("planner_stdout.log")
    }

    pub fn planner_stderr_file(&self) -> PathBuf {
        self.planner_logs_dir.join("planner_stderr.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn layout(ts: &str, x: i64, y: i64) -> PathLayout {
        compute_layout(Path::new("/out"), &RunIdentity::new(ts, GoalArea::new(x, y)))
    }

    #[test]
    fn five_distinct_paths_share_identity_namespace() {
        let l = layout("10-16-09-30", 1, 2);
        let paths = [
            &l.planner_logs_dir,
            &l.experiment_cfgs_dir,
            &l.trajectories_db_dir,
            &l.validator_dir,
            &l.trajectories_file,
        ];
        let unique: BTreeSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), 5);
        for dir in &paths[..4] {
            assert!(dir.ends_with("10-16-09-30/goal_1_2"), "{}", dir.display());
        }
        assert_eq!(
            l.trajectories_file,
            PathBuf::from("/out/safe_trajectories_db/10-16-09-30/goal_1_2/safe_traj_gen_g_1_2.json")
        );
    }

    #[test]
    fn log_file_uses_planner_naming() {
        let l = layout("01-02-03-04", 3, -1);
        assert_eq!(
            l.log_file(),
            PathBuf::from(
                "/out/oppt_logs/01-02-03-04/goal_3_-1/log_ABT_Pedestrian_01-02-03-04_safe_traj_gen_g_3_-1.log"
            )
        );
    }

    #[test]
    fn distinct_identities_do_not_collide() {
        let a = layout("t1", 1, 2);
        let b = layout("t1", 2, 1);
        let c = layout("t2", 1, 2);
        assert_ne!(a.planner_logs_dir, b.planner_logs_dir);
        assert_ne!(a.planner_logs_dir, c.planner_logs_dir);
        assert_ne!(a.trajectories_file, b.trajectories_file);
    }

    #[test]
    fn goal_area_deserializes_from_pair() {
        let goal: GoalArea = serde_json::from_str("[4, 7]").expect("pair");
        assert_eq!(goal, GoalArea::new(4, 7));
        assert_eq!(goal.to_string(), "goal_4_7");
    }
}
