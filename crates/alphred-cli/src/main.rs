//! `alphred` - CLI entry point for the workflow execution engine.
//!
//! Invokes `alphred-engine` in-process: there is no daemon to dial, so
//! unlike a client/server CLI pair this binary links the engine crate
//! directly and drives it to completion (or a paused/blocked boundary)
//! before exiting.

mod render;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use alphred_core::{Config, ExitCode};
use alphred_engine::{materialize_run, ClaudeCliProvider, Executor, ProviderRegistry, Storage};
use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

/// Application-level result type composing the crate's typed errors at
/// the binary boundary.
pub type AppResult<T> = eyre::Result<T>;

/// Control plane for the Alphred workflow execution engine.
#[derive(Parser)]
#[command(name = "alphred")]
#[command(about = "Drives LLM-agent workflow trees to completion")]
#[command(version)]
struct Cli {
    /// Path to the SQLite database file (resolved relative to cwd when
    /// not absolute).
    #[arg(long, global = true, env = "ALPHRED_DB_PATH", default_value = "alphred.db")]
    db_path: PathBuf,

    /// Path to a TOML config file overriding the engine's default design
    /// parameters. Any key it omits keeps its default value.
    #[arg(long = "config", global = true, env = "ALPHRED_CONFIG")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Materialize and execute a run.
    Run {
        /// The tree_key to materialize and run.
        #[arg(long = "tree")]
        tree: Option<String>,

        /// Repository spec to associate with the run (opaque to the core).
        #[arg(long = "repo")]
        repo: Option<String>,

        /// Branch name to associate with the run (opaque to the core).
        #[arg(long = "branch")]
        branch: Option<String>,

        #[command(subcommand)]
        control: Option<RunControl>,

        /// Run id, required by every lifecycle control subcommand.
        #[arg(long = "run")]
        run: Option<String>,
    },
    /// Print run status and per-node latest-attempt summary.
    Status {
        #[arg(long = "run")]
        run: String,
    },
    /// Repo helper, delegated to an external collaborator.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },
    /// Reserved, not implemented.
    List,
}

#[derive(Subcommand)]
enum RunControl {
    Pause,
    Resume,
    Cancel,
    Retry,
}

#[derive(Subcommand)]
enum RepoAction {
    Add { spec: Option<String> },
    List,
    Show { name: Option<String> },
    Remove { name: Option<String> },
    Sync { name: Option<String> },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code as i32);
}

async fn run(cli: Cli) -> ExitCode {
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to execute run: {e:#}");
            return ExitCode::Usage;
        }
    };

    match cli.command {
        Command::Run {
            tree,
            repo,
            branch,
            control,
            run,
        } => match control {
            Some(control) => handle_control(&config, control, run).await,
            None => handle_run(&config, tree, repo, branch).await,
        },
        Command::Status { run } => handle_status(&config, &run).await,
        Command::Repo { action } => handle_repo(action),
        Command::List => {
            eprintln!("list: reserved, not implemented");
            ExitCode::RuntimeFailure
        }
    }
}

/// Builds the engine `Config` for this invocation: defaults, overridden
/// by `--config`'s file contents (if given), then by `--db-path`, then
/// resolved against the current working directory.
fn load_config(cli: &Cli) -> AppResult<Config> {
    let mut config = Config::default();
    if let Some(path) = &cli.config_path {
        config
            .load_file(path)
            .wrap_err_with(|| format!("failed to load config from {}", path.display()))?;
    }
    config.db_path = cli.db_path.clone();
    config.resolve_paths(&std::env::current_dir().unwrap_or_default());
    Ok(config)
}

async fn open_storage(config: &Config) -> Result<Storage, ExitCode> {
    match Storage::new(&config.db_path).await {
        Ok(storage) => match storage.migrate_embedded().await {
            Ok(()) => Ok(storage),
            Err(e) => {
                eprintln!("Failed to execute run: {e}");
                Err(ExitCode::RuntimeFailure)
            }
        },
        Err(e) => {
            eprintln!("Failed to execute run: {e}");
            Err(ExitCode::RuntimeFailure)
        }
    }
}

fn build_executor(storage: Arc<Storage>, config: Config) -> Executor {
    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(ClaudeCliProvider::new()));
    Executor::new(storage, Arc::new(providers), config)
}

async fn handle_run(
    config: &Config,
    tree: Option<String>,
    repo: Option<String>,
    branch: Option<String>,
) -> ExitCode {
    let Some(tree_key) = tree else {
        eprintln!("Failed to execute run: --tree is required");
        return ExitCode::Usage;
    };

    let storage = match open_storage(config).await {
        Ok(s) => Arc::new(s),
        Err(code) => return code,
    };

    let has_repo = repo.is_some();
    let materialized = materialize_run(&storage, &tree_key, repo, branch).await;
    let run = match materialized {
        Ok(run) => run,
        Err(alphred_engine::MaterializeError::TreeNotFound(key)) => {
            if has_repo {
                eprintln!("Failed to execute run --repo: WORKFLOW_TREE_NOT_FOUND: {key}");
            } else {
                eprintln!("Failed to execute run: WORKFLOW_TREE_NOT_FOUND: {key}");
            }
            return ExitCode::NotFound;
        }
        Err(e) => {
            eprintln!("Failed to execute run: {e}");
            return ExitCode::RuntimeFailure;
        }
    };

    let executor = build_executor(Arc::clone(&storage), config.clone());
    let result = executor
        .execute_run(&run.id, |terminal| {
            tracing::info!(run_id = %terminal.id, status = terminal.status.as_str(), "run reached terminal status");
        })
        .await;

    match result {
        Ok(finished) => {
            println!(
                "{}",
                serde_json::json!({"workflowRunId": finished.id.to_string(), "runStatus": finished.status.as_str()})
            );
            if finished.status == alphred_core::RunStatus::Failed {
                ExitCode::RuntimeFailure
            } else {
                ExitCode::Success
            }
        }
        Err(e) => {
            eprintln!("Failed to execute run: {e}");
            ExitCode::RuntimeFailure
        }
    }
}

async fn handle_control(config: &Config, control: RunControl, run: Option<String>) -> ExitCode {
    let Some(run_id) = run else {
        eprintln!("Failed to execute run: --run is required");
        return ExitCode::Usage;
    };

    let storage = match open_storage(config).await {
        Ok(s) => Arc::new(s),
        Err(code) => return code,
    };
    let executor = build_executor(Arc::clone(&storage), config.clone());
    let id = alphred_core::Id::from_string(run_id);

    let outcome = match control {
        RunControl::Pause => executor.pause_run(&id).await,
        RunControl::Resume => executor.resume_run(&id).await,
        RunControl::Cancel => executor.cancel_run(&id).await,
        RunControl::Retry => executor.retry_run(&id).await,
    };

    match outcome {
        Ok(outcome) => {
            println!("{}", serde_json::to_string(&outcome).unwrap());
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("Failed to execute run: {e}");
            ExitCode::RuntimeFailure
        }
    }
}

async fn handle_status(config: &Config, run_id: &str) -> ExitCode {
    let storage = match open_storage(config).await {
        Ok(s) => Arc::new(s),
        Err(code) => return code,
    };

    let id = alphred_core::Id::from_string(run_id);
    let run = match storage.get_run(&id).await {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Failed to execute run: {e}");
            return ExitCode::NotFound;
        }
    };
    let nodes = match storage.list_latest_attempt_run_nodes(&id).await {
        Ok(nodes) => nodes,
        Err(e) => {
            eprintln!("Failed to execute run: {e}");
            return ExitCode::RuntimeFailure;
        }
    };

    render::print_run_status(&run, &nodes);
    ExitCode::Success
}

/// Delegated to the repo helper (an external-collaborator seam, see §1).
/// This CLI ships a pass-through implementation that reports "not
/// configured" rather than performing any Git operation, since the Git
/// worktree/repo lifecycle is explicitly out of scope for the core.
fn handle_repo(action: RepoAction) -> ExitCode {
    match action {
        RepoAction::Add { .. }
        | RepoAction::List
        | RepoAction::Show { .. }
        | RepoAction::Remove { .. }
        | RepoAction::Sync { .. } => {
            println!("repo: not configured (no repo helper registered)");
            ExitCode::Success
        }
    }
}
