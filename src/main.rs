use std::sync::atomic::Ordering;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sqlwatch::config::Config;
use sqlwatch::Engine;

#[derive(Parser)]
#[command(name = "sqlwatch", about = "Cross-database SQL workload observability and optimization engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run migrations and start the discovery scheduler (default).
    Serve,
    /// Run migrations and exit without starting the scheduler.
    Migrate,
    /// Poll every monitoring-enabled connection once and exit.
    PollOnce,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load()?;
    init_logging(&config.logging);

    tracing::info!("sqlwatch starting up");
    tracing::info!("configuration loaded successfully");

    let engine = Engine::bootstrap(config).await?;
    tracing::info!("engine bootstrapped, migrations applied, pattern library seeded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            tracing::info!("migrate: nothing further to do, exiting");
        },
        Command::PollOnce => {
            tracing::info!("poll-once: triggering a synchronous poll of every connection");
            engine.capability.monitoring.trigger(None).await?;
        },
        Command::Serve => {
            engine.start();
            tracing::info!("discovery scheduler started, sqlwatch is running");

            tokio::signal::ctrl_c().await?;
            tracing::info!("shutdown signal received, stopping discovery scheduler");
            engine.discovery.shutdown_handle().store(true, Ordering::Relaxed);
        },
    }

    Ok(())
}

fn init_logging(logging: &sqlwatch::config::LoggingConfig) {
    let log_filter = tracing_subscriber::EnvFilter::new(&logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("sqlwatch.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        // Leaking the guard keeps the non-blocking writer flushing for the
        // life of the process; main() never returns except on shutdown.
        Box::leak(Box::new(_guard));
        registry.with(tracing_subscriber::fmt::layer().with_writer(non_blocking)).with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
