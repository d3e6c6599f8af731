//! throne: HTTP server for the household admission queue.

mod config;

use std::process;
use std::sync::Arc;

use throne::{FileLedger, HouseService, Ledger, QueueConfig, TracingLedger};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, ConfigError, USAGE};

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let base_level = match std::env::var("THRONE_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };

        EnvFilter::new(format!(
            "throne={level},throne_server={level}",
            level = base_level
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Help) => {
            eprintln!("{USAGE}");
            process::exit(0);
        }
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!();
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(config) {
        tracing::error!(error = %e, "Server failed");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

#[tokio::main]
async fn run(config: Config) -> anyhow::Result<()> {
    let ledger: Arc<dyn Ledger> = match &config.journal {
        Some(path) => Arc::new(FileLedger::open(path)?),
        None => Arc::new(TracingLedger),
    };

    let service = Arc::new(HouseService::with_ledger(ledger, QueueConfig::default()));
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        journal = ?config.journal,
        "Configuration loaded"
    );

    throne::transport::serve(config.server, service).await
}
