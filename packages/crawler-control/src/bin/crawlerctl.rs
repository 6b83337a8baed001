//! Crawler control CLI.
//!
//! `serve` is the composition root: it wires the run store, notification
//! channel, distributor, process controller and config watcher, then runs
//! until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crawler_control::common::InvocationParams;
use crawler_control::kernel::notifications::{
    NotificationChannel, NotificationDistributor, PgListenerConnector,
};
use crawler_control::kernel::{PostgresRunStore, RunStore};
use crawler_control::process::{global, ConfigWatcher, Invocation, ProcessController};
use crawler_control::Config;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "crawlerctl")]
#[command(about = "Supervise the crawler worker and stream its progress")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller until interrupted
    Serve {
        /// Start a run immediately for this industry
        #[arg(long)]
        industry: Option<String>,
        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Print the worker command line without running it
    Command {
        #[arg(long)]
        industry: String,
        #[command(flatten)]
        worker: WorkerArgs,
    },

    /// Apply database migrations
    Migrate,
}

#[derive(Args, Debug, Clone)]
struct WorkerArgs {
    #[arg(long, default_value_t = 15)]
    qpi: u32,
    /// learning, aggressive or snippet_only
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    smart: bool,
    #[arg(long)]
    force: bool,
    #[arg(long)]
    once: bool,
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    daterestrict: Option<String>,
}

impl WorkerArgs {
    fn into_params(self, industry: String) -> InvocationParams {
        InvocationParams {
            industry,
            qpi: self.qpi,
            mode: self.mode,
            smart: self.smart,
            force: self.force,
            once: self.once,
            dry_run: self.dry_run,
            daterestrict: self.daterestrict,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crawler_control=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { industry, worker } => {
            let params = industry.map(|industry| worker.into_params(industry));
            serve(config, params).await
        }
        Commands::Command { industry, worker } => {
            let params = worker.into_params(industry);
            let invocation = Invocation::describe(&config.controller, &params, params.qpi);
            println!("{}", invocation.command_line());
            Ok(())
        }
        Commands::Migrate => {
            let pool = connect(config.require_database_url()?).await?;
            migrate(&pool).await
        }
    }
}

async fn connect(database_url: &str) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");
    Ok(pool)
}

async fn migrate(pool: &PgPool) -> Result<()> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");
    Ok(())
}

async fn serve(config: Config, params: Option<InvocationParams>) -> Result<()> {
    let database_url = config.require_database_url()?.to_string();
    let pool = connect(&database_url).await?;
    migrate(&pool).await?;

    let store: Arc<dyn RunStore> = Arc::new(PostgresRunStore::new(pool));
    let distributor = Arc::new(NotificationDistributor::new(&config.distributor));

    let connector = PgListenerConnector::new(&database_url, &config.channel.channel_name);
    let mut channel = NotificationChannel::new(Arc::new(connector), config.channel.clone());
    channel.start(distributor.clone());

    let controller = ProcessController::new(&config, store.clone(), Some(distributor.clone()));
    if global::install(controller.clone()).is_err() {
        bail!("process controller already installed");
    }

    if let Some(run_id) = controller.recover().await? {
        tracing::info!(run_id = %run_id, "resumed supervision of existing crawler run");
    }

    if let Some(params) = params {
        match controller.start(params).await {
            Ok(outcome) => tracing::info!(run_id = %outcome.run_id, pid = ?outcome.pid, "crawler started"),
            Err(e) => tracing::error!(code = e.code(), error = %e, hint = e.recovery_hint(), "crawler start refused"),
        }
    }

    let cancel = CancellationToken::new();
    let watcher = ConfigWatcher::new(controller.clone(), store, config.watcher.clone());
    let watcher_task = tokio::spawn(watcher.run(cancel.clone()));
    let sweeper_task = tokio::spawn(sweep_buffers(
        distributor.clone(),
        config.distributor.sweep_interval,
        cancel.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");

    cancel.cancel();
    join_background("config_watcher", watcher_task).await;
    join_background("buffer_sweeper", sweeper_task).await;
    channel.stop().await;

    if let Some(outcome) = global::shutdown().await {
        tracing::info!(run_id = ?outcome.run_id, forced = outcome.forced, "crawler stopped for shutdown");
    }
    Ok(())
}

/// Wait for a background task, logging a panic or cancellation.
async fn join_background(name: &str, task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(task = name, error = %e, "background task ended abnormally");
            false
        }
    }
}

async fn sweep_buffers(
    distributor: Arc<NotificationDistributor>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let removed = distributor.sweep();
        let stats = distributor.stats();
        tracing::debug!(
            removed,
            buffers = stats.total_buffers,
            buffered = stats.total_buffered,
            "swept notification buffers"
        );
    }
}
