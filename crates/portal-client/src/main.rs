//! portal - command-line RPC client
//!
//! Sends a single call to a portal peer and prints the response body.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use portal_client::{CallOptions, Client, ClientConfig};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "portal")]
#[command(about = "Call/response RPC client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a remote method and print its result
    Call {
        /// Service name
        service: String,

        /// Method name
        method: String,

        /// Parameters as JSON; an array is spread into positional arguments
        params: Option<String>,

        /// Peer WebSocket URL (overrides the config file)
        #[arg(long, env = "PORTAL_URL")]
        url: Option<String>,

        /// Path to config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "portal.json")]
        output: PathBuf,

        /// Peer URL
        #[arg(long, default_value = "wss://localhost")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("portal_client=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Call {
            service,
            method,
            params,
            url,
            config,
            timeout_secs,
        } => {
            let config = load_config(config, url)?;
            let params = parse_params(params.as_deref())?;
            call(&config, &service, &method, params, Duration::from_secs(timeout_secs)).await?;
        }

        Commands::InitConfig { output, url } => {
            init_config(output, url)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>, url: Option<String>) -> anyhow::Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::from_file(&path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = url {
        config.url = url;
    }
    config.validate()?;
    Ok(config)
}

fn parse_params(raw: Option<&str>) -> anyhow::Result<Vec<Value>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let value: Value = serde_json::from_str(raw).context("params must be valid JSON")?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

async fn call(
    config: &ClientConfig,
    service: &str,
    method: &str,
    params: Vec<Value>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let client = Client::connect(config)?;
    info!(service, method, "calling");

    let result = client
        .call_with_timeout(service, method, params, CallOptions::new(), timeout)
        .await;
    client.close();

    match result {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "call failed");
            anyhow::bail!("{}", e)
        }
    }
}

fn init_config(output: PathBuf, url: String) -> anyhow::Result<()> {
    let config = ClientConfig::new(url);
    config.validate()?;
    config.save(&output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Then run:");
    println!("  portal call <service> <method> '[args]' --config {}", output.display());

    Ok(())
}
