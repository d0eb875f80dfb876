use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use stagehand::config::DEPLOY_FILE;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "stagehand", version, about = "Staged deployments over SSH")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Deploy file; stage files are read from `deploy/` next to it.
    #[arg(long, short = 'c', default_value = DEPLOY_FILE, global = true)]
    pub config: PathBuf,

    /// Print results (and logs) as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy (or roll back) a stage.
    Deploy(DeployArgs),
    /// Print the resolved task order.
    Tasks(TasksArgs),
    /// List stages and whether they resolve.
    Stages,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DeployArgs {
    /// Stage name; the configured default stage when omitted.
    pub stage: Option<String>,

    /// Only run on hosts of this role. Can be specified multiple times.
    #[arg(long = "role", value_name = "NAME", action = ArgAction::Append)]
    pub roles: Vec<String>,

    /// Render commands without connecting to any host.
    #[arg(long)]
    pub dry_run: bool,

    /// Point `current` back at the previous release.
    #[arg(long)]
    pub rollback: bool,

    /// Override a stage parameter (KEY=VALUE). Can be specified multiple times.
    #[arg(long = "set", value_name = "KEY=VALUE", action = ArgAction::Append)]
    pub overrides: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct TasksArgs {
    /// Resolve this stage and show the hosts of each task.
    pub stage: Option<String>,

    /// Show the rollback pipeline instead of the deploy pipeline.
    #[arg(long)]
    pub rollback: bool,

    /// Override a stage parameter (KEY=VALUE).
    #[arg(long = "set", value_name = "KEY=VALUE", action = ArgAction::Append)]
    pub overrides: Vec<String>,
}
