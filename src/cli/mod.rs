//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the relay server
//! - `config show|path` -- inspect the effective configuration
//! - `check <url>` -- run the validation gates locally without fetching
//! - `version` -- print version info

use clap::{Parser, Subcommand};
use serde_json::json;

use crate::config;
use crate::embed::IframeSanitizer;
use crate::media::MediaFetchPipeline;

/// Media relay with SSRF protection and iframe sanitization.
#[derive(Parser, Debug)]
#[command(
    name = "media-relay",
    version = env!("CARGO_PKG_VERSION"),
    about = "Allow-listed media relay and iframe embed sanitizer"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the relay server (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Validate a URL against the configured policy without fetching it.
    Check {
        /// URL to check.
        url: String,

        /// Validate as an iframe embed instead of a media URL.
        #[arg(long)]
        iframe: bool,
    },

    /// Print version information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration (defaults applied).
    Show,
    /// Print the configuration file path.
    Path,
}

/// Run the `config show` subcommand.
pub fn handle_config_show() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    for issue in config::validate_config(&cfg) {
        eprintln!("warning: {}: {}", issue.path, issue.message);
    }
    let pretty = serde_json::to_string_pretty(&cfg)?;
    println!("{}", pretty);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path() {
    println!("{}", config::get_config_path().display());
}

/// Run the `check <url>` subcommand.
///
/// Media URLs go through parse, allow-list, scheme and SSRF checks (DNS is
/// queried); iframe URLs go through the sanitizer. Exits non-zero when the
/// URL would be rejected.
pub async fn handle_check(url: &str, iframe: bool) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config()?;
    let policy = config::build_policy(&cfg)?;

    let outcome = if iframe {
        IframeSanitizer::new(&policy)
            .validate_share_url(url)
            .map(|descriptor| serde_json::to_value(descriptor).unwrap_or_default())
    } else {
        let pipeline = MediaFetchPipeline::with_defaults(std::sync::Arc::new(policy));
        pipeline.check(url).await.map(|target| {
            json!({
                "url": target.url.as_str(),
                "resolved": target.resolved.iter().map(|ip| ip.to_string()).collect::<Vec<_>>(),
            })
        })
    };

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&json!({ "ok": true, "data": value }))?);
            Ok(())
        }
        Err(e) => {
            // Local diagnostics: show the detailed reason, not the public message
            eprintln!("rejected ({} {}): {}", e.status_code().as_u16(), e.code(), e);
            std::process::exit(1);
        }
    }
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("media-relay {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}
