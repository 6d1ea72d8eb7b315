mod client;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::{ProbeClient, ProbeOutcome};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_TIMEOUT: u8 = 2;

/// Push probe CLI - operator client and end-to-end delivery harness
#[derive(Parser)]
#[command(name = "pushprobe")]
#[command(about = "Operator client and delivery harness for the push probe relay", long_about = None)]
struct Cli {
    /// Base URL of the relay
    #[arg(long, env = "PUSHPROBE_API_URL", default_value = "http://127.0.0.1:8744")]
    api_url: String,

    /// Bearer token for operator routes such as `users`
    #[arg(long, env = "PUSHPROBE_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Per-request HTTP timeout
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register or refresh a device
    Register {
        #[arg(long)]
        user: String,

        #[arg(long)]
        device: String,

        /// Push gateway registration token
        #[arg(long)]
        token: String,

        /// android or ios
        #[arg(long)]
        platform: String,
    },

    /// Send a notification to every active device of a user
    Send {
        #[arg(long)]
        user: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        body: String,

        /// Data payload as a JSON document
        #[arg(long)]
        data: Option<String>,
    },

    /// Acknowledge a test run
    Ack { nonce: String },

    /// Show the status of a test run
    Status { nonce: String },

    /// List users with registered devices
    Users,

    /// Send a tagged probe and wait for the device to acknowledge it
    E2e {
        #[arg(long)]
        user: String,

        /// How long to wait for the acknowledgment
        #[arg(long = "wait-secs", default_value_t = 30)]
        wait_secs: u64,

        #[arg(long, default_value_t = 2)]
        poll_interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let client = ProbeClient::new(&cli.api_url, Duration::from_secs(cli.timeout_secs))?
        .with_api_token(cli.api_token);

    match cli.command {
        Commands::Register {
            user,
            device,
            token,
            platform,
        } => {
            let response = client.register(&user, &device, &token, &platform).await?;
            print_json(&response)?;
        }
        Commands::Send {
            user,
            title,
            body,
            data,
        } => {
            let data = data
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--data must be valid JSON")?;
            let response = client.send(&user, &title, &body, data).await?;
            print_json(&response)?;
        }
        Commands::Ack { nonce } => {
            client.ack(&nonce).await?;
            print_json(&serde_json::json!({ "ok": true }))?;
        }
        Commands::Status { nonce } => {
            let response = client.status(&nonce).await?;
            print_json(&response)?;
        }
        Commands::Users => {
            let response = client.users().await?;
            print_json(&response)?;
        }
        Commands::E2e {
            user,
            wait_secs,
            poll_interval_secs,
        } => {
            return run_e2e(
                &client,
                &user,
                Duration::from_secs(wait_secs),
                Duration::from_secs(poll_interval_secs),
            )
            .await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run_e2e(
    client: &ProbeClient,
    user: &str,
    wait: Duration,
    poll_interval: Duration,
) -> Result<ExitCode> {
    let nonce = uuid::Uuid::new_v4().to_string();
    info!(%nonce, user, "sending e2e probe");

    let data = serde_json::json!({ "type": "e2e_test", "nonce": nonce });
    let sent = client
        .send(user, "Push Probe E2E Test", "Test message", Some(data))
        .await
        .context("probe send failed")?;
    info!(sent_count = sent.sent_count, attempted = sent.attempted, "probe dispatched");

    info!(wait_secs = wait.as_secs(), "polling for acknowledgment");
    match client.wait_for_ack(&nonce, wait, poll_interval).await {
        ProbeOutcome::Acked { acked_at } => {
            info!(%nonce, acked_at = acked_at.as_deref().unwrap_or("-"), "probe acknowledged");
            Ok(ExitCode::SUCCESS)
        }
        ProbeOutcome::TimedOut => {
            error!(%nonce, "timed out waiting for status ACKED");
            Ok(ExitCode::from(EXIT_TIMEOUT))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
