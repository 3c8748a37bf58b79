//! gantry-runner — pulls experiment work from a project's task queues and
//! dispatches what the host can accommodate.
//!
//! Credentials are located through `GANTRY_CREDENTIALS`; the project comes
//! from `GANTRY_PROJECT`. Every flag below also reads its `GANTRY_*`
//! environment variable, so containerized deployments can skip the CLI
//! entirely.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gantry_core::config::load_dotenv;
use gantry_core::{Config, ExperimentRequest};
use gantry_notify::{Notifier, OperatorChannel, WebhookNotifier};
use gantry_queue::{InMemoryTaskQueue, TaskQueue};
use gantry_sched::{
    HostCapacity, Processor, ProcessorError, SchedulerBuilder, SystemCapacity, Verdict,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// gantry compute-job runner.
#[derive(Parser, Debug)]
#[command(name = "gantry-runner", version, about)]
struct Cli {
    /// Local working directory used for runner storage (defaults to
    /// $TMPDIR, or /tmp).
    #[arg(long, env = "GANTRY_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Leave debugging artifacts in place; can take a large amount of
    /// disk space (intended for developers only).
    #[arg(long, env = "GANTRY_DEBUG", default_value_t = false)]
    debug: bool,

    /// Maximum number of cores to be used (0 = all cores available).
    #[arg(long, env = "GANTRY_MAX_CORES")]
    max_cores: Option<u32>,

    /// Maximum memory allocated to tasks using SI/IEC units, for example
    /// 512gb, 16GiB, 1024mb (0gb = all available RAM).
    #[arg(long, env = "GANTRY_MAX_MEM")]
    max_mem: Option<String>,

    /// Maximum local disk storage allocated to tasks using SI/IEC units
    /// (0gb = unbounded).
    #[arg(long, env = "GANTRY_MAX_DISK")]
    max_disk: Option<String>,
}

// ── Dry-run processor ───────────────────────────────────────────────

/// Stand-in execution engine for local development: validates and logs
/// what would run, then acknowledges without executing anything.
struct DryRunProcessor;

#[async_trait]
impl Processor for DryRunProcessor {
    async fn process(
        &self,
        cancel: CancellationToken,
        request: ExperimentRequest,
        _credentials: String,
    ) -> Result<Verdict, ProcessorError> {
        if cancel.is_cancelled() {
            return Err(ProcessorError {
                ack: false,
                broadcast: false,
                reason: "cancelled before execution".into(),
            });
        }
        info!(
            experiment = %request.experiment.key,
            resource = %request.experiment.resource,
            "dry run: experiment acknowledged without execution"
        );
        Ok(Verdict {
            ack: true,
            broadcast: false,
        })
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.working_dir {
        config.working_dir = dir;
    }
    config.debug = cli.debug;
    if let Some(cores) = cli.max_cores {
        config.max_cores = cores;
    }
    if let Some(mem) = cli.max_mem {
        config.max_mem = mem;
    }
    if let Some(disk) = cli.max_disk {
        config.max_disk = disk;
    }

    // One pass over everything that can be wrong so the operator fixes it
    // all at once.
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("{problem}");
        }
        anyhow::bail!("{} fatal configuration problem(s)", problems.len());
    }
    config.log_summary();

    let limits = config.limits()?;
    let boards = config.boards()?;
    let host: Arc<dyn HostCapacity> = Arc::new(SystemCapacity::new(limits, boards));

    let operator = match &config.webhook_url {
        Some(url) => {
            let webhook: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(url.clone()));
            OperatorChannel::with_channels(vec![webhook])
        }
        None => OperatorChannel::empty(),
    };

    let tasker: Arc<dyn TaskQueue> = match config.driver.as_str() {
        "memory" => Arc::new(InMemoryTaskQueue::new(
            config.project.clone(),
            config.credentials.clone(),
        )),
        other => anyhow::bail!(
            "unsupported task-queue driver '{other}'; set GANTRY_DRIVER to a supported driver"
        ),
    };

    let cancel = CancellationToken::new();

    // CTRL-C / SIGTERM tear down every worker before the process exits.
    {
        let token = cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            warn!("shutdown signal seen");
            token.cancel();
        });
    }

    // Low-frequency capacity logging so operators can watch headroom.
    {
        let host = host.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        debug!(capacity = %host.sample(), "host capacity");
                    }
                }
            }
        });
    }

    let scheduler = SchedulerBuilder::new(config.project.clone(), config.credentials.clone())
        .operator(operator)
        .build(tasker, Arc::new(DryRunProcessor), host);

    info!(project = %config.project, "started");

    // Blocks until shutdown is requested or the refresher fails.
    let result = scheduler.run(cancel.clone()).await;
    cancel.cancel();

    result.map_err(Into::into)
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}
