//! Push Probe Relay Server
//!
//! HTTP front end for device registration, push fan-out through the FCM v1
//! gateway and end-to-end delivery acknowledgment.

mod auth;
mod cleanup;
mod config;
mod error;
mod handlers;
mod rate_limit;
mod server;

use clap::Parser;
use pushprobe_core::{CredentialProvider, DeviceRegistry, Dispatcher, Storage, TestRuns};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pushprobe-relay", about = "Push probe relay server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Directory holding file-backed secrets
    #[arg(long)]
    secrets_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        config::RelayConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        config::RelayConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.storage_path = database;
    }
    if let Some(secrets_dir) = cli.secrets_dir {
        cfg.secrets_dir = secrets_dir;
    }

    tracing::info!("Starting push probe relay on {}", cfg.listen_addr);

    let storage = Storage::open(&cfg.storage_path)?;
    let registry = DeviceRegistry::new(storage.clone());
    let test_runs = TestRuns::new(storage.clone());
    let secrets = cfg.secret_provider();
    let auth = auth::Authenticator::from_provider(secrets.as_ref(), &cfg.auth_secret);
    let credentials = Arc::new(CredentialProvider::new(cfg.credential_config())?);
    let dispatcher = Dispatcher::new(
        registry.clone(),
        test_runs.clone(),
        credentials,
        secrets,
        cfg.dispatch_config(),
    )?;
    let limiter = rate_limit::RateLimiter::new(cfg.rate_limit_per_minute);

    cleanup::spawn_cleanup_task(
        test_runs.clone(),
        limiter.clone(),
        cfg.test_run_retention_days,
        cfg.cleanup_interval_secs,
    );

    let state = server::AppState {
        storage,
        registry,
        test_runs,
        dispatcher: Arc::new(dispatcher),
        limiter,
        auth: Arc::new(auth),
    };
    let app = server::build_router(state, &cfg);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
