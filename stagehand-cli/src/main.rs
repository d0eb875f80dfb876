use anyhow::Context as _;
use clap::Parser;
use stagehand::config::{DeployConfig, StageContext, StageId, StageParams};
use stagehand::errors::StagehandError;
use stagehand::events::LoggingEventSink;
use stagehand::executor::Executor;
use stagehand::session::SshTransport;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod cli;
mod output;

use cli::{Args, Commands, DeployArgs, TasksArgs};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose, args.json);

    let json = args.json;
    let exit = match real_main(args).await {
        Ok(code) => code,
        Err(err) => {
            if json {
                println!("{}", output::error_json(&err));
            } else {
                eprintln!("error: {err:#}");
                if let Some(hint) = err.downcast_ref::<StagehandError>().and_then(StagehandError::fix_hint) {
                    eprintln!("hint: {hint}");
                }
            }
            exit_code_for_error(&err)
        }
    };
    std::process::exit(i32::from(exit));
}

/// Log directives used when `RUST_LOG` is unset.
fn default_directives(verbose: u8) -> &'static str {
    match verbose {
        0 => "stagehand=info",
        1 => "stagehand=debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Exit code 2 for configuration problems, 1 for anything unclassified.
fn exit_code_for_error(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<StagehandError>()
        .map_or(1, |e| e.kind().exit_code())
}

async fn real_main(args: Args) -> anyhow::Result<u8> {
    let config = DeployConfig::load(&args.config).map_err(StagehandError::from)?;
    match &args.command {
        Commands::Deploy(deploy_args) => deploy(&config, deploy_args, args.json).await,
        Commands::Tasks(tasks_args) => tasks(&config, tasks_args, args.json),
        Commands::Stages => stages(&config, args.json),
    }
}

fn stage_id(config: &DeployConfig, raw: Option<&str>) -> anyhow::Result<StageId> {
    match raw {
        Some(raw) => Ok(raw.parse::<StageId>().map_err(StagehandError::from)?),
        None => Ok(config.default_stage()),
    }
}

fn resolve(config: &DeployConfig, stage: StageId, overrides: &[String]) -> anyhow::Result<StageContext> {
    let overrides = StageParams::from_overrides(overrides).map_err(StagehandError::from)?;
    Ok(config
        .resolver()
        .resolve(stage, &overrides)
        .map_err(StagehandError::from)?)
}

async fn deploy(config: &DeployConfig, args: &DeployArgs, json: bool) -> anyhow::Result<u8> {
    let stage = stage_id(config, args.stage.as_deref())?;
    let context = resolve(config, stage, &args.overrides)?;
    let graph = config.task_graph(args.rollback)?;

    let executor = Executor::new(Arc::new(SshTransport::default()))
        .with_event_sink(Arc::new(LoggingEventSink::new(Level::DEBUG)))
        .dry_run(args.dry_run);
    let cancel = executor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel("Interrupted");
        }
    });

    let result = executor.run(&graph, &context, &args.roles).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize run result")?
        );
    } else {
        print!("{}", output::run_table(&result));
    }
    Ok(result.exit_code())
}

fn tasks(config: &DeployConfig, args: &TasksArgs, json: bool) -> anyhow::Result<u8> {
    let graph = config.task_graph(args.rollback)?;
    let context = match args.stage.as_deref() {
        Some(raw) => Some(resolve(config, stage_id(config, Some(raw))?, &args.overrides)?),
        None => None,
    };

    if json {
        let tasks: Vec<serde_json::Value> = graph
            .tasks()
            .iter()
            .zip(graph.phases())
            .map(|(task, phase)| {
                serde_json::json!({
                    "id": task.id,
                    "phase": phase,
                    "action": task.action.label(),
                    "roles": task.roles,
                    "best_effort": task.best_effort,
                    "description": task.description,
                    "commands": task.templates().iter().map(|t| t.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else {
        print!("{}", output::task_list(&graph, context.as_ref()));
    }
    Ok(0)
}

fn stages(config: &DeployConfig, json: bool) -> anyhow::Result<u8> {
    let resolver = config.resolver();
    let default = config.default_stage();
    let mut rows = Vec::new();
    for stage in StageId::ALL {
        let configured = resolver.stages().any(|s| s == stage);
        let resolved = configured.then(|| resolver.resolve(stage, &StageParams::default()));
        rows.push(match resolved {
            Some(Ok(context)) => serde_json::json!({
                "stage": stage,
                "default": stage == default,
                "configured": true,
                "branch": context.branch,
                "hosts": context.hosts.iter().map(|h| h.as_str()).collect::<Vec<_>>(),
            }),
            Some(Err(err)) => serde_json::json!({
                "stage": stage,
                "default": stage == default,
                "configured": true,
                "error": err.to_string(),
            }),
            None => serde_json::json!({
                "stage": stage,
                "default": stage == default,
                "configured": false,
            }),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(0);
    }
    for row in &rows {
        let marker = if row["default"] == true { "*" } else { " " };
        let detail = if let Some(err) = row["error"].as_str() {
            err.to_string()
        } else if row["configured"] == true {
            format!("branch={} hosts={}", row["branch"].as_str().unwrap_or_default(), row["hosts"])
        } else {
            "not configured".to_string()
        };
        println!("{marker} {:<12} {detail}", row["stage"].as_str().unwrap_or_default());
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_by_verbosity() {
        assert_eq!(default_directives(0), "stagehand=info");
        assert_eq!(default_directives(1), "stagehand=debug");
        assert_eq!(default_directives(3), "trace");
    }
}
