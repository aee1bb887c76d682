use anyhow::Result;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use trajgen_runner::{
    compute_layout, GenerationConfig, GenerationError, GenerationReport, GeneratorOptions,
    PathLayout, ProcessPlanner, RunIdentity, SafeTrajGenerator,
};

#[derive(Parser)]
#[command(
    name = "safe-traj-gen",
    version,
    about = "Adversary safe trajectory generator"
)]
struct Cli {
    /// Default log filter; RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Target {
    /// Generation config document (YAML with a safe_traj_gen_configs section).
    /// Spelled `--cfg` or `-c`; the single-dash `-cfg` form is not accepted.
    #[arg(short = 'c', long = "cfg")]
    config: PathBuf,
    /// Parent output directory of the module.
    #[arg(short = 'o', long = "outdir")]
    outdir: PathBuf,
    #[arg(long, default_value_t = 0)]
    goal_index: usize,
    /// Run identity prefix; defaults to the current local time as %m-%d-%H-%M.
    #[arg(long)]
    timestamp: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, run and validate safe trajectories for one goal area.
    Run {
        #[command(flatten)]
        target: Target,
        /// Planner run-config template (SafeTrajGen.cfg).
        #[arg(long, env = "SAFE_TRAJ_TEMPLATE")]
        template: PathBuf,
        /// Planner executable, invoked as `<planner> --cfg <run-config>`.
        #[arg(long, env = "SAFE_TRAJ_PLANNER")]
        planner: PathBuf,
        /// Kill the planner after this many seconds and salvage its partial log.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Validate the config and print the output layout without running anything.
    Describe {
        #[command(flatten)]
        target: Target,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let json_mode = match &cli.command {
        Commands::Run { target, .. } | Commands::Describe { target } => target.json,
    };
    match run_command(cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&error_payload(&err));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_timestamp(explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| Local::now().format("%m-%d-%H-%M").to_string())
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            target,
            template,
            planner,
            timeout_secs,
        } => {
            let options = GeneratorOptions {
                config_path: target.config,
                module_output_dir: target.outdir,
                template_path: template,
                goal_area_index: target.goal_index,
                timestamp: resolve_timestamp(target.timestamp),
            };
            let generator = SafeTrajGenerator::new(options)?;
            let planner =
                ProcessPlanner::new(planner).with_timeout(timeout_secs.map(Duration::from_secs));
            let report = generator.run(&planner)?;
            if target.json {
                let report = serde_json::to_value(&report)?;
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "report": report,
                })));
            }
            print_report(&report);
        }
        Commands::Describe { target } => {
            let config = GenerationConfig::load(&target.config)?;
            let goal = config.goal_area(target.goal_index)?;
            let identity = RunIdentity::new(resolve_timestamp(target.timestamp), goal);
            let layout = compute_layout(&target.outdir, &identity);
            if target.json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "config": config,
                    "layout": layout_to_json(&layout),
                })));
            }
            println!("goal_areas: {}", config.goal_areas.len());
            println!("samples_per_goal: {}", config.samples_per_goal);
            print_layout(&layout);
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_payload(err: &anyhow::Error) -> Value {
    if let Some(gen_err) = err.downcast_ref::<GenerationError>() {
        return json_error(
            gen_err.kind().code(),
            err.to_string(),
            json!({
                "stage": gen_err.stage.as_str(),
                "goal_area": gen_err.goal_area.to_string(),
                "timestamp": gen_err.timestamp,
            }),
        );
    }
    if let Some(kind) = err.downcast_ref::<trajgen_runner::TrajGenError>() {
        return json_error(kind.code(), err.to_string(), json!({}));
    }
    json_error("command_failed", err.to_string(), json!({}))
}

fn print_report(report: &GenerationReport) {
    println!("goal_area: {}", report.goal_area);
    println!("timestamp: {}", report.timestamp);
    println!("run_config: {}", report.run_config.display());
    match report.planner_exit_code {
        Some(code) => println!("planner_exit_code: {}", code),
        None => println!("planner_exit_code: signal"),
    }
    println!("runs_total: {}", report.runs_total);
    println!("safe_trajectories: {}", report.safe_trajectories);
    println!("trajectories_file: {}", report.trajectories_file.display());
}

fn layout_to_json(layout: &PathLayout) -> Value {
    json!({
        "planner_logs_dir": layout.planner_logs_dir.display().to_string(),
        "experiment_cfgs_dir": layout.experiment_cfgs_dir.display().to_string(),
        "trajectories_db_dir": layout.trajectories_db_dir.display().to_string(),
        "validator_dir": layout.validator_dir.display().to_string(),
        "trajectories_file": layout.trajectories_file.display().to_string(),
        "log_file": layout.log_file().display().to_string(),
    })
}

fn print_layout(layout: &PathLayout) {
    println!("goal_area: {}", layout.identity.goal_area);
    println!("timestamp: {}", layout.identity.timestamp);
    println!("planner_logs_dir: {}", layout.planner_logs_dir.display());
    println!("experiment_cfgs_dir: {}", layout.experiment_cfgs_dir.display());
    println!("trajectories_db_dir: {}", layout.trajectories_db_dir.display());
    println!("validator_dir: {}", layout.validator_dir.display());
    println!("trajectories_file: {}", layout.trajectories_file.display());
    println!("log_file: {}", layout.log_file().display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cfg_accepts_long_and_short_forms() {
        for flag in ["--cfg", "-c"] {
            let cli =
                Cli::try_parse_from(["safe-traj-gen", "describe", flag, "skd.yaml", "-o", "out"])
                    .expect("parses");
            match cli.command {
                Commands::Describe { target } => {
                    assert_eq!(target.config, PathBuf::from("skd.yaml"))
                }
                Commands::Run { .. } => panic!("wrong subcommand"),
            }
        }
    }

    #[test]
    fn single_dash_cfg_is_rejected() {
        let parsed =
            Cli::try_parse_from(["safe-traj-gen", "describe", "-cfg", "skd.yaml", "-o", "out"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn cfg_help_names_the_long_form() {
        let help = <Cli as clap::CommandFactory>::command()
            .find_subcommand_mut("describe")
            .expect("describe")
            .render_long_help()
            .to_string();
        assert!(help.contains("--cfg"));
        assert!(help.contains("single-dash"));
    }
}
