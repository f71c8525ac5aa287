use clap::{Parser, Subcommand};
use foreman::agent::Agent;
use foreman::config::Config;
use foreman::error::Result;
use foreman::orchestration::{SessionPool, StepOutcome, WorkflowEngine};
use foreman::worker::ProcessBackend;
use foreman::workflow::{StepGraph, WorkflowRegistry};
use foreman::{flog, flog_error};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "foreman", about = "Workflow orchestration over agent worker sessions")]
struct Cli {
    /// Write debug-level entries to the log file
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a workflow from a definition file
    Run {
        /// Workflow definition file (.toml or .json)
        file: PathBuf,
        /// Template variables as key=value, repeatable
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
        /// Working directory for spawned sessions (defaults to cwd)
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Validate a workflow definition file without running it
    Validate {
        /// Workflow definition file (.toml or .json)
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    foreman::log::init(cli.debug);
    let result = match cli.command {
        Command::Run { file, vars, cwd } => run(file, vars, cwd).await,
        Command::Validate { file } => validate(file),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            flog_error!("{}", e);
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn parse_vars(vars: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in vars {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            foreman::error::Error::Validation(format!("invalid --var '{pair}', expected KEY=VALUE"))
        })?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

async fn run(file: PathBuf, vars: Vec<String>, cwd: Option<PathBuf>) -> Result<ExitCode> {
    let config = Config::load()?;
    let variables = parse_vars(&vars)?;
    let cwd = match cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir()?,
    };

    let mut registry = WorkflowRegistry::new();
    let workflow_id = registry.load_file(&file)?;

    let agent = Agent::from_config(&config);
    let backend = Arc::new(ProcessBackend::new(agent));
    let (event_tx, mut event_rx) = mpsc::channel(100);
    let pool = SessionPool::new(
        config.max_sessions,
        config.grace_period(),
        backend.clone(),
        event_tx,
    );
    let engine = WorkflowEngine::new(registry, pool.clone(), cwd);

    // Worker exits flow back to the pool through the reaper; without it the
    // run would wait forever for terminal session events.
    let reaper = backend.spawn_reaper(pool.clone(), Duration::from_millis(200));

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flog!("Interrupt received, cancelling run");
            ctrl_c_token.cancel();
        }
    });

    let result = engine
        .run(&workflow_id, variables, &mut event_rx, cancel)
        .await;
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            reaper.abort();
            return Err(e);
        }
    };

    let mut step_ids: Vec<&String> = result.outcomes.keys().collect();
    step_ids.sort();
    for step_id in step_ids {
        match &result.outcomes[step_id] {
            StepOutcome::Succeeded { output, .. } => match output {
                Some(output) => println!("{step_id}: succeeded ({output})"),
                None => println!("{step_id}: succeeded"),
            },
            StepOutcome::Failed { reason } => println!("{step_id}: failed ({reason})"),
            StepOutcome::Skipped { reason } => println!("{step_id}: skipped ({reason})"),
        }
    }

    if result.cancelled {
        // The reaper keeps reporting exits while shutdown drains the pool.
        pool.shutdown_all().await;
        reaper.abort();
        println!("run cancelled");
        return Ok(ExitCode::FAILURE);
    }
    reaper.abort();
    Ok(if result.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn validate(file: PathBuf) -> Result<ExitCode> {
    let mut registry = WorkflowRegistry::new();
    let workflow_id = registry.load_file(&file)?;
    let definition = registry.get(&workflow_id)?;
    let graph = StepGraph::from_definition(definition)?;
    println!(
        "workflow '{}' valid ({} steps)",
        workflow_id,
        definition.steps.len()
    );
    for step in graph.topological_order()? {
        if step.depends_on.is_empty() {
            println!("  {}", step.id);
        } else {
            println!("  {} (after {})", step.id, step.depends_on.join(", "));
        }
    }
    Ok(ExitCode::SUCCESS)
}
