//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Resilient HTTP transport CLI
#[derive(Parser, Debug)]
#[command(name = "resilient-transport")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Client configuration file (YAML)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one request through the circuit breaker, rate limiter, and retries
    Request {
        /// HTTP method
        method: String,

        /// Absolute URL, or a path joined to the configured base URL
        url: String,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Extra header as `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Meter the call with the proactive reports limiter
        #[arg(long)]
        reports: bool,

        /// Per-request timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Pretty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let cli = Cli::try_parse_from([
            "resilient-transport",
            "request",
            "POST",
            "/v2/time_entries",
            "--data",
            "{}",
            "-H",
            "Account-Id: 1",
            "--reports",
        ])
        .unwrap();

        match cli.command {
            Commands::Request {
                method,
                url,
                data,
                headers,
                reports,
                timeout_secs,
            } => {
                assert_eq!(method, "POST");
                assert_eq!(url, "/v2/time_entries");
                assert_eq!(data.as_deref(), Some("{}"));
                assert_eq!(headers, vec!["Account-Id: 1".to_string()]);
                assert!(reports);
                assert!(timeout_secs.is_none());
            }
            Commands::Config => panic!("Expected request command"),
        }
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn test_parse_global_config() {
        let cli = Cli::try_parse_from(["resilient-transport", "config", "-C", "client.yaml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("client.yaml")));
        assert!(matches!(cli.command, Commands::Config));
    }
}
