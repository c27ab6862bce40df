//! OSC listener
//!
//! Binds an OSC server, logs every message matching the given patterns and
//! shuts down cleanly on Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use oscroute_core::Message;
use oscroute_router::{Dispatcher, Server, ServerConfig};
use serde::Deserialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Address depths covered when no pattern is given
const CATCH_ALL_DEPTH: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "oscroute-listen")]
#[command(about = "Log OSC messages received over UDP")]
#[command(version)]
struct Cli {
    /// Host to bind
    #[arg(long)]
    host: Option<String>,

    /// UDP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Address pattern to log (repeatable)
    #[arg(short = 'P', long = "pattern")]
    patterns: Vec<String>,

    /// Number of handler worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Config file layout: server settings plus the patterns to log
#[derive(Debug, Default, Deserialize)]
struct ListenConfig {
    #[serde(flatten)]
    server: ServerConfig,
    #[serde(default)]
    patterns: Vec<String>,
}

impl ListenConfig {
    fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
            }
            None => ListenConfig::default(),
        };

        // Command line wins over the file
        if let Some(host) = &cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(workers) = cli.workers {
            config.server.workers = workers;
        }
        if !cli.patterns.is_empty() {
            config.patterns = cli.patterns.clone();
        }
        if config.patterns.is_empty() {
            config.patterns = catch_all_patterns();
        }

        config.server.validate()?;
        Ok(config)
    }
}

/// `/*`, `/*/*`, ... up to [`CATCH_ALL_DEPTH`] segments
fn catch_all_patterns() -> Vec<String> {
    (1..=CATCH_ALL_DEPTH).map(|depth| "/*".repeat(depth)).collect()
}

fn log_message(message: &Message) {
    tracing::info!("{}", message);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ListenConfig::load(&cli)?;

    let dispatcher = Dispatcher::new();
    for pattern in &config.patterns {
        dispatcher
            .map(pattern, log_message)
            .with_context(|| format!("registering {}", pattern))?;
        tracing::debug!("Logging messages matching {}", pattern);
    }

    let server = Server::builder(config.server)
        .dispatcher(dispatcher)
        .listen()
        .await?;
    tracing::info!("Listening on {}, press Ctrl-C to stop", server.local_addr());

    tokio::signal::ctrl_c().await?;

    let stats = server.stats();
    server.shutdown().await?;
    tracing::info!(
        "Received {} packets ({} messages, {} malformed, {} dropped)",
        stats.packets_received,
        stats.messages_received,
        stats.decode_errors,
        stats.messages_dropped
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "oscroute-listen",
            "--host",
            "0.0.0.0",
            "-p",
            "9001",
            "-P",
            "/tracking/*",
            "--pattern",
            "/synth/{osc,lfo}",
        ]);
        let config = ListenConfig::load(&cli).unwrap();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:9001");
        assert_eq!(config.patterns, vec!["/tracking/*", "/synth/{osc,lfo}"]);
    }

    #[test]
    fn test_default_patterns_cover_depths() {
        let cli = Cli::parse_from(["oscroute-listen"]);
        let config = ListenConfig::load(&cli).unwrap();
        assert_eq!(config.patterns.len(), CATCH_ALL_DEPTH);
        assert_eq!(config.patterns[1], "/*/*");
    }

    #[test]
    fn test_config_file_layout() {
        let config: ListenConfig = toml::from_str(
            r#"
            port = 8000
            workers = 2
            patterns = ["/a/*"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.workers, 2);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.patterns, vec!["/a/*"]);
    }

    #[test]
    fn test_invalid_worker_count() {
        let cli = Cli::parse_from(["oscroute-listen", "-w", "0"]);
        assert!(ListenConfig::load(&cli).is_err());
    }
}
