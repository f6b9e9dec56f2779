use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "taskmesh", version, about = "Run dependency graphs of tasks on an execution backend")]
pub struct Args {
    /// Config file; defaults to ~/.taskmesh/config.toml, then ./config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// TOML plan file with `[[task]]` tables.
    #[arg(long)]
    pub plan: PathBuf,

    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Per-task deadline for a terminal event, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Run parameter passed to expansion lookups (KEY=VALUE).
    /// Can be specified multiple times.
    #[arg(long = "param", action = clap::ArgAction::Append)]
    pub params: Vec<String>,

    /// Task run alone before everything else.
    #[arg(long)]
    pub primacy: Option<String>,

    /// Write the JSON run report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub progress: bool,

    #[arg(long)]
    pub backend_url: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long)]
    pub plan: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a plan against the configured backend.
    Run(RunArgs),
    /// Check a plan for structural errors without contacting the backend.
    Validate(ValidateArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let args = Args::try_parse_from([
            "taskmesh",
            "run",
            "--plan",
            "plan.toml",
            "--max-parallel",
            "3",
            "--param",
            "a=1",
            "--param",
            "b=2",
            "--report",
            "out.json",
        ])
        .unwrap();

        let Commands::Run(run) = args.command else {
            panic!("expected run command");
        };
        assert_eq!(run.plan, PathBuf::from("plan.toml"));
        assert_eq!(run.max_parallel, Some(3));
        assert_eq!(run.params, vec!["a=1", "b=2"]);
        assert_eq!(run.report, Some(PathBuf::from("out.json")));
        assert!(!run.progress);
    }

    #[test]
    fn validate_requires_plan() {
        assert!(Args::try_parse_from(["taskmesh", "validate"]).is_err());
    }
}
