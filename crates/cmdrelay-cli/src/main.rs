//! cmdrelay - シェルコマンド実行ワーカー
//!
//! `POST /execute` とコマンドキューの両方からコマンドを受け付けて `sh -c` で実行する。

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cmdrelay_core::impls::{MessageEncoding, ShellExecutor};
use cmdrelay_core::{AppBuilder, QueueBackend, RelayConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cmdrelay", version, about = "Run shell commands from HTTP and a message queue")]
struct Cli {
    /// Queue backend: azure or memory (memory is local-only, for development)
    #[arg(long = "queue", env = "QUEUE_BACKEND", default_value = "azure")]
    queue_backend: QueueBackend,

    /// Azure Storage connection string
    #[arg(long, env = "AZURE_STORAGE_CONNECTION_STRING", hide_env_values = true)]
    connection_string: Option<String>,

    #[arg(long, env = "COMMAND_QUEUE", default_value = "commandqueue")]
    command_queue: String,

    #[arg(long, env = "RESPONSE_QUEUE", default_value = "responsequeue")]
    response_queue: String,

    /// Message text encoding on the queue: plain or base64
    #[arg(long, env = "QUEUE_MESSAGE_ENCODING", default_value = "plain")]
    message_encoding: MessageEncoding,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Root directory that relative project names resolve under
    #[arg(long, env = "PROJECTS_DIR", default_value = "/projects")]
    projects_dir: PathBuf,

    #[arg(long, env = "SHELL_BIN", default_value = "sh")]
    shell: String,

    /// Kill commands running longer than this many seconds
    #[arg(long, env = "COMMAND_TIMEOUT_SECS")]
    command_timeout_secs: Option<u64>,

    /// Queue verification attempts before starting without verified queues
    #[arg(long, env = "PROBE_MAX_RETRIES", default_value_t = 10)]
    probe_max_retries: u32,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> RelayConfig {
        RelayConfig {
            queue_backend: self.queue_backend,
            connection_string: self.connection_string,
            command_queue: self.command_queue,
            response_queue: self.response_queue,
            message_encoding: self.message_encoding,
            port: self.port,
            projects_dir: self.projects_dir,
            shell: self.shell,
            command_timeout_secs: self.command_timeout_secs,
            probe_max_retries: self.probe_max_retries,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.into_config();
    config.validate().context("invalid configuration")?;
    info!(
        backend = ?config.queue_backend,
        command_queue = %config.command_queue,
        response_queue = %config.response_queue,
        projects_dir = %config.projects_dir.display(),
        "starting command relay"
    );

    // the only fatal runtime condition: no usable shell
    let shell = ShellExecutor::new(config.shell.clone());
    if let Err(err) = shell.check_available().await {
        error!(error = %err, "shell check failed");
        std::process::exit(1);
    }
    info!(shell = shell.shell(), "shell available");

    let app = AppBuilder::new(config)
        .build()
        .context("failed to build application")?;
    match app.storage_account() {
        Some(account) => info!(account, "using storage account"),
        None => info!("no storage account (in-memory queues)"),
    }

    let readiness = app.run(shutdown_signal()).await?;
    if !readiness.ready {
        warn!(attempts = readiness.attempts, "ran without verified queues");
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["cmdrelay", "--queue", "memory"]).unwrap();
        let config = cli.into_config();
        assert_eq!(config.queue_backend, QueueBackend::Memory);
        assert_eq!(config.command_queue, "commandqueue");
        assert_eq!(config.message_encoding, MessageEncoding::Plain);
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["cmdrelay", "--queue", "sqs"]).is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
