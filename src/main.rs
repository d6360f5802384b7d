//! Boot-time init supervisor CLI.
//!
//! Commands:
//! - `run`     execute the boot plan at `<base>/init.toml`
//! - `clean`   remove instance history (current instance, or all with `--all`)
//! - `version` print version information
//!
//! Must run as root on macOS; the host service manager invokes `run` on
//! every boot and restarts the process on nonzero exit, which is why every
//! fatal exit of `run` is filtered through the crash-loop guard.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use initvisor::core::{FatalGuard, Scheduler};
use initvisor::{
    acquire_instance_id, load_config, paths, HistoryStore, HttpImds, InitError, InstanceHistory,
    LogWriter, ModuleContext, ProbePolicy, RunPlan, Subscribe,
};

#[derive(Parser)]
#[command(name = "initvisor", about = "Boot-time initialization supervisor")]
struct Cli {
    /// Base directory holding init.toml and instance history.
    #[arg(long, global = true, default_value = paths::DEFAULT_BASE_DIR)]
    base_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run init using the configuration in <base-dir>/init.toml.
    Run,
    /// Remove instance history from disk.
    Clean {
        /// Remove all instance history. Default is the current instance only.
        #[arg(long)]
        all: bool,
    },
    /// Print version information.
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if !cfg!(target_os = "macos") {
        tracing::error!("can only be run from macOS");
        return ExitCode::from(1);
    }

    if !nix::unistd::geteuid().is_root() {
        tracing::error!("must be run with root permissions");
        return ExitCode::from(64);
    }

    // A missing or unknown command exits 2 through the parser.
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => cmd_run(&cli.base_dir).await,
        Commands::Clean { all } => cmd_clean(&cli.base_dir, all).await,
        Commands::Version => {
            print_version();
            ExitCode::SUCCESS
        }
    }
}

/// Orchestrates one boot: identity, config, history, scheduling, and the
/// final history write. Every fatal exit goes through the crash-loop guard.
async fn cmd_run(base: &Path) -> ExitCode {
    let guard = FatalGuard::at_default_location();
    let cancel = spawn_signal_listener();
    let imds = Arc::new(HttpImds::new());

    // An instance ID is a prerequisite for everything else: history is
    // keyed by it and modules read per-instance metadata.
    tracing::info!("fetching instance ID from IMDS...");
    let instance_id =
        match acquire_instance_id(imds.as_ref(), &ProbePolicy::default(), &cancel).await {
            Ok(id) => id,
            Err(e) => return fatal(&guard, &e, "unable to get instance ID"),
        };
    tracing::info!(instance_id = %instance_id, "running on instance");

    let start = Instant::now();

    tracing::info!("reading init config...");
    let modules = match load_config(&paths::init_config(base)) {
        Ok(modules) => modules,
        Err(e) => return fatal(&guard, &e, "error while reading init config"),
    };
    let plan = RunPlan::from_modules(modules);
    tracing::info!(
        modules = plan.module_count(),
        groups = plan.bucket_count(),
        "successfully validated and prioritized config"
    );

    let store = HistoryStore::new(paths::all_instances_history(base), paths::HISTORY_JSON);
    let instance_dir = match store.ensure_instance_dir(&instance_id) {
        Ok(dir) => dir,
        Err(e) => return fatal(&guard, &e, "error creating instance history directory"),
    };

    tracing::info!("getting instance history...");
    let history = match store.read_all() {
        Ok(history) => history,
        Err(e) => return fatal(&guard, &e, "error getting instance history"),
    };
    tracing::info!(instances = history.len(), "successfully gathered instance history");

    let ctx = ModuleContext::new(imds, instance_dir);
    let scheduler = Scheduler::new(ctx, vec![Arc::new(LogWriter) as Arc<dyn Subscribe>]);
    let outcome = scheduler.run(plan, &instance_id, history).await;

    tracing::info!(instance_id = %instance_id, "writing instance history...");
    let record = InstanceHistory::now(&instance_id, outcome.plan.records());
    if let Err(e) = store.write(&record) {
        return fatal(&guard, &e, "error writing instance history file");
    }
    tracing::info!("successfully wrote instance history");

    if let Some(module) = outcome.fatal_module {
        tracing::error!(
            module = %module,
            elapsed = ?start.elapsed(),
            "exiting due to failure in module with FatalOnError set"
        );
        return exit_code(guard.filter_exit_code(1));
    }

    tracing::info!(elapsed = ?start.elapsed(), "init completed");
    ExitCode::SUCCESS
}

/// Removes instance history: the current instance's by default, everything
/// with `--all`.
async fn cmd_clean(base: &Path, all: bool) -> ExitCode {
    let store = HistoryStore::new(paths::all_instances_history(base), paths::HISTORY_JSON);

    if all {
        tracing::info!("removing all instance history");
        if let Err(e) = store.clean_all() {
            tracing::error!(error = %e, "unable to remove instance history");
            return exit_code(e.exit_code());
        }
    } else {
        tracing::info!("getting current instance ID from IMDS");
        let imds = HttpImds::new();
        let cancel = spawn_signal_listener();
        let instance_id =
            match acquire_instance_id(&imds, &ProbePolicy::default(), &cancel).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(error = %e, "unable to get instance ID");
                    return exit_code(e.exit_code());
                }
            };
        tracing::info!(instance_id = %instance_id, "removing history for the current instance");
        if let Err(e) = store.clean_instance(&instance_id) {
            tracing::error!(error = %e, "unable to remove instance history");
            return exit_code(e.exit_code());
        }
    }

    tracing::info!("clean complete");
    ExitCode::SUCCESS
}

fn print_version() {
    println!(
        "\nInitvisor\nVersion: {}\nBoot-time initialization supervisor for cloud macOS instances\n",
        env!("CARGO_PKG_VERSION")
    );
}

/// Logs a pipeline error and exits with its contract code, filtered
/// through the crash-loop guard.
fn fatal(guard: &FatalGuard, err: &InitError, context: &str) -> ExitCode {
    tracing::error!(error = %err, label = err.as_label(), "{context}");
    exit_code(guard.filter_exit_code(err.exit_code()))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Cancels the returned token when the process receives SIGINT, SIGTERM,
/// or SIGQUIT, so the identity probe stops waiting during shutdown.
fn spawn_signal_listener() -> CancellationToken {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigint, mut sigterm, mut sigquit) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
            signal(SignalKind::quit()),
        ) {
            (Ok(a), Ok(b), Ok(c)) => (a, b, c),
            _ => {
                tracing::warn!("unable to register signal handlers");
                return;
            }
        };
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
            _ = sigquit.recv() => {}
        }
        child.cancel();
    });
    cancel
}
