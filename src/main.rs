use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use media_relay::cli::{self, Cli, Command, ConfigCommand};
use media_relay::config;
use media_relay::logging::{self, targets};
use media_relay::server::{run_server_with_config, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        // No subcommand or explicit `start` both launch the server.
        None | Some(Command::Start) => run_server().await,

        Some(Command::Config(sub)) => {
            match sub {
                ConfigCommand::Show => cli::handle_config_show()?,
                ConfigCommand::Path => cli::handle_config_path(),
            }
            Ok(())
        }

        Some(Command::Check { url, iframe }) => cli::handle_check(&url, iframe).await,

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    logging::init_logging(logging::LogConfig::from_config(&cfg))?;

    for issue in config::validate_config(&cfg) {
        warn!(target: targets::CONFIG, path = %issue.path, "{}", issue.message);
    }

    let policy = Arc::new(config::build_policy(&cfg)?);
    let settings = config::build_server_settings(&cfg)?;
    let addr = settings.socket_addr()?;

    info!(
        target: targets::RELAY,
        version = env!("CARGO_PKG_VERSION"),
        config = %config::get_config_path().display(),
        media_hosts = policy.media_hosts.len(),
        iframe_hosts = policy.iframe_hosts.len(),
        max_bytes = policy.max_bytes,
        timeout_ms = policy.timeout_ms,
        "starting media relay"
    );

    let handle = run_server_with_config(ServerConfig::new(policy, addr)).await?;

    let shutdown_tx = handle.shutdown_sender();
    tokio::spawn(async move {
        let reason = await_shutdown_trigger().await;
        info!(target: targets::RELAY, "Shutdown signal received ({})", reason);
        let _ = shutdown_tx.send(true);
    });

    handle.wait().await;
    info!(target: targets::RELAY, "Media relay shut down");
    Ok(())
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                target: targets::RELAY,
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            wait_ctrl_c().await
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    wait_ctrl_c().await
}

async fn wait_ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            warn!(target: targets::RELAY, "Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<&'static str>().await
        }
    }
}
