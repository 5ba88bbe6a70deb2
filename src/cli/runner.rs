//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig, RateLimitSnapshot, RequestConfig};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        let config = self.load_config()?;
        match &self.cli.command {
            Commands::Request {
                method,
                url,
                data,
                headers,
                reports,
                timeout_secs,
            } => {
                let request = build_request_config(data.as_deref(), headers, *timeout_secs)?;
                self.request(&config, method, url, request, *reports).await
            }
            Commands::Config => {
                print!("{}", config.to_yaml()?);
                Ok(())
            }
        }
    }

    fn load_config(&self) -> Result<ClientConfig> {
        match &self.cli.config {
            Some(path) => ClientConfig::from_file(path),
            None => Ok(ClientConfig::default()),
        }
    }

    async fn request(
        &self,
        config: &ClientConfig,
        method: &str,
        url: &str,
        request: RequestConfig,
        reports: bool,
    ) -> Result<()> {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|e| Error::config(format!("Invalid method '{method}': {e}")))?;
        let client = HttpClient::with_config(HttpClientConfig::from_config(config)?)?;

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, cancelling request");
                on_interrupt.cancel();
            }
        });

        let start = Instant::now();
        let sent = if reports {
            client.request_reports(method, url, request, &cancel).await
        } else {
            client.request(method, url, request, &cancel).await
        };
        let elapsed = start.elapsed();

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_cancellation() => {
                self.output_message(&json!({
                    "cancelled": true,
                    "reason": e.to_string(),
                    "elapsed_ms": elapsed.as_millis() as u64,
                }));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let status = response.status().as_u16();
        let body = response.text().await?;

        let limiter = client.rate_limiter().map(|l| snapshot_json(&l.snapshot()));
        let reports_limiter = snapshot_json(&client.reports_rate_limiter().snapshot());
        self.output_message(&json!({
            "status": status,
            "elapsed_ms": elapsed.as_millis() as u64,
            "circuit_breaker": {
                "open": client.circuit_breaker().is_open(),
                "failures": client.circuit_breaker().failures(),
            },
            "rate_limit": limiter,
            "reports_rate_limit": reports_limiter,
            "body": body,
        }));
        Ok(())
    }

    /// Output a message
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

fn build_request_config(
    data: Option<&str>,
    headers: &[String],
    timeout_secs: Option<u64>,
) -> Result<RequestConfig> {
    let mut request = RequestConfig::new();
    for raw in headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| Error::invalid_header(raw.as_str(), "expected 'Name: value'"))?;
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = data {
        request = request.body(data.to_string());
    }
    if let Some(secs) = timeout_secs {
        request = request.timeout(Duration::from_secs(secs));
    }
    Ok(request)
}

fn snapshot_json(snapshot: &RateLimitSnapshot) -> Value {
    let resets_in_ms = snapshot.reset_at.map(|reset| {
        reset
            .saturating_duration_since(tokio::time::Instant::now())
            .as_millis() as u64
    });
    json!({
        "limit": snapshot.limit,
        "remaining": snapshot.remaining,
        "resets_in_ms": resets_in_ms,
    })
}
