/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Running break handler against the simulated host with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
[UPDATE]: 2026-10-16 Add init/check subcommands and rolling log file
[UPDATE]: 2026-10-16 Planner skips disabled tasks
*/

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use breakhandler_adapter::SimulatedHost;
use breakhandler_scheduler::{
    AutomationSettings, BreakError, BreakHandle, BreakHandlerConfig, BreakRegistry, BreakService,
    CredentialBlob, EventHub, ServiceSettings, SessionSelector, SystemClock, Task,
};

mod cli;

#[derive(Parser, Debug)]
#[command(name = "breakhandler", version, about = "Break scheduler and idle/logout automation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the break handler against the simulated host
    Run(RunArgs),
    /// Interactively write a configuration file
    Init {
        #[arg(long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file and exit
    Check {
        #[arg(long = "config", value_name = "PATH")]
        config_path: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    /// Also write logs to a daily-rotated file
    #[arg(long = "log-file", value_name = "PATH")]
    log_file: Option<PathBuf>,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    match args.command {
        Command::Init { output } => {
            let output = match output {
                Some(path) => path,
                None => BreakHandlerConfig::default_path()?,
            };
            cli::init::run_init(output)
        }
        Command::Check { config_path } => {
            init_tracing("warn", None)?;
            let path = resolve_config_path(config_path)?;
            let config = load_config(&path)?;
            println!("{}", path.display());
            for (name, validity) in task_validity(&config) {
                match validity {
                    Ok(()) => println!("  {name}: ok"),
                    Err(err) => println!("  {name}: {err}"),
                }
            }
            validate_config(&config)?;
            println!("{} task(s) OK", config.tasks.len());
            Ok(())
        }
        Command::Run(run) => {
            let _guard = init_tracing(&run.log_level, run.log_file.as_deref())?;
            run_service(run).await
        }
    }
}

async fn run_service(args: RunArgs) -> Result<()> {
    let path = resolve_config_path(args.config_path)?;
    info!(
        config_path = %path.display(),
        dry_run = args.dry_run,
        "starting breakhandler"
    );

    let config = load_config(&path)?;
    validate_config(&config)?;
    info!(task_count = config.tasks.len(), "configuration loaded");

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let store = Arc::new(config.to_store());
    let blob = config
        .load_credential_blob()
        .context("load credential profiles")?
        .map(CredentialBlob::new);
    let selector = SessionSelector::new(store.clone(), blob);

    let host = SimulatedHost::logged_in();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    host.attach(event_tx);

    let settings = ServiceSettings {
        automation: AutomationSettings::from(&config.automation),
        ..ServiceSettings::default()
    };
    let (handle, mut runner) = BreakService::new(Arc::new(host.clone()), store, selector)
        .with_settings(settings)
        .spawn(event_rx);
    info!(run_id = %runner.run_id(), "break service spawned");

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let tasks: Vec<Task> = config.tasks.iter().map(|t| Task::new(&t.name)).collect();
    for (task, task_config) in tasks.iter().zip(&config.tasks) {
        handle.register_task(task.clone(), task_config.enabled)?;
        handle.start_task(task.clone()).await.context("start task")?;
    }
    info!("tasks started");

    let tick_period = Duration::from_millis(config.automation.tick_interval_ms.max(1));
    let ticker = spawn_host_ticker(host.clone(), tick_period, shutdown.clone());
    let planner = spawn_break_planner(handle.clone(), planned_tasks(&config), shutdown.clone());

    shutdown.cancelled().await;
    info!("shutdown signal received");

    for task in &tasks {
        if let Err(err) = handle.stop_task(task.clone()) {
            debug!(task = %task, error = %err, "task stop skipped");
        }
    }

    runner
        .shutdown_and_wait()
        .await
        .context("shutdown break service")?;
    for worker in [ticker, planner] {
        if let Err(err) = worker.await {
            warn!(error = %err, "worker did not exit cleanly");
        }
    }
    host.detach();

    info!(
        ticks = host.ticks(),
        logouts = host.logouts(),
        logins = host.logins(),
        idle_disconnects = host.idle_disconnects(),
        "breakhandler stopped"
    );
    Ok(())
}

/// Drive the simulated game clock
fn spawn_host_ticker(
    host: SimulatedHost,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => host.advance_tick(),
            }
        }
    })
}

/// Tasks the planner drives; disabled tasks are never planned
fn planned_tasks(config: &BreakHandlerConfig) -> Vec<Task> {
    config
        .tasks
        .iter()
        .filter(|task_config| task_config.enabled)
        .map(|task_config| Task::new(&task_config.name))
        .collect()
}

/// Plan each task's next break and start it once due
fn spawn_break_planner(
    handle: BreakHandle,
    tasks: Vec<Task>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    for task in &tasks {
                        if let Err(err) = plan_or_start(&handle, task).await {
                            warn!(task = %task, error = %err, "break planning failed");
                        }
                    }
                }
            }
        }
    })
}

async fn plan_or_start(handle: &BreakHandle, task: &Task) -> Result<()> {
    if handle.active_breaks().contains_key(task) {
        return Ok(());
    }
    if handle.planned_break(task.clone()).await?.is_none() {
        let at = handle.plan_break(task.clone()).await?;
        info!(task = %task, at = %at, "next break planned");
        return Ok(());
    }
    if handle.should_break(task.clone()).await? {
        let window = handle.start_break(task.clone()).await?;
        info!(task = %task, ends_at = %window.ends_at, "break started");
    }
    Ok(())
}

fn init_tracing(log_level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;

    let Some(log_file) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|err| anyhow!(err))
            .context("initialize tracing subscriber")?;
        return Ok(None);
    };

    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .context("log file path must name a file")?;
    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(Some(guard))
}

fn resolve_config_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => BreakHandlerConfig::default_path().context("locate default config"),
    }
}

fn load_config(path: &Path) -> Result<BreakHandlerConfig> {
    BreakHandlerConfig::from_file(path).context("load config")
}

/// Break config validity of every configured task, in file order
fn task_validity(config: &BreakHandlerConfig) -> Vec<(String, Result<(), BreakError>)> {
    let mut registry = BreakRegistry::new(
        Arc::new(config.to_store()),
        Arc::new(SystemClock),
        EventHub::new(),
    );
    config
        .tasks
        .iter()
        .map(|task_config| {
            let task = Task::new(&task_config.name);
            registry.register_task(task.clone(), task_config.enabled);
            (task_config.name.clone(), registry.validate_break_config(&task))
        })
        .collect()
}

/// Every task must have numeric, ordered bounds
fn validate_config(config: &BreakHandlerConfig) -> Result<()> {
    let errors: Vec<BreakError> = task_validity(config)
        .into_iter()
        .filter_map(|(_, validity)| validity.err())
        .collect();
    let Some(first) = errors.first() else {
        return Ok(());
    };
    for err in &errors {
        warn!(error = %err, "invalid task break config");
    }
    bail!("{} task(s) have invalid break config: {first}", errors.len())
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
