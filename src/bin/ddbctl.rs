//! ddbctl - Command line tool for inspecting ddbsync nodes
//!
//! Usage:
//!   ddbctl status        - Show the node's view of the cluster
//!   ddbctl stats         - Show replication counters
//!   ddbctl ping          - Check the node answers
//!   ddbctl check-config  - Validate a configuration file

use std::path::PathBuf;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

/// ddbsync Cluster Control Tool
#[derive(Parser)]
#[command(name = "ddbctl")]
#[command(about = "Inspect ddbsync cluster nodes", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ddbsync.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the node's view of the cluster
    Status,
    /// Show replication counters
    Stats,
    /// Check the node answers
    Ping,
    /// Check configuration file for errors
    CheckConfig {
        /// Path to config file to check (defaults to --config path)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct NodesResponse {
    node_id: String,
    address: String,
    writer: String,
    #[serde(default)]
    replicas: Vec<String>,
    is_writer: bool,
    #[serde(default)]
    election_in_progress: bool,
    #[serde(default)]
    election_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    node_id: String,
    role: String,
    uptime_seconds: u64,
    replication: ReplicationCounters,
}

#[derive(Debug, Deserialize)]
struct ReplicationCounters {
    operations: u64,
    tasks: u64,
    attempts: u64,
    delivered: u64,
    exhausted: u64,
    in_flight: u64,
}

/// Resolve the API endpoint from the flag or the config file
fn resolve_endpoint(cli: &Cli) -> String {
    const FALLBACK: &str = "http://127.0.0.1:8001";

    if let Some(endpoint) = &cli.endpoint {
        return endpoint.trim_end_matches('/').to_string();
    }

    match ddbsync::DdbConfig::from_file(&cli.config) {
        Ok(config) => {
            let addr = config.api.bind_address;
            if let Some(port) = addr.strip_prefix("0.0.0.0:") {
                format!("http://127.0.0.1:{}", port)
            } else {
                format!("http://{}", addr)
            }
        }
        Err(_) => FALLBACK.to_string(),
    }
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let endpoint = resolve_endpoint(&cli);

    let result = match &cli.command {
        Commands::Status => show_status(&endpoint).await,
        Commands::Stats => show_stats(&endpoint).await,
        Commands::Ping => ping(&endpoint).await,
        Commands::CheckConfig { file } => {
            let path = file.clone().unwrap_or_else(|| cli.config.clone());
            check_config(&path)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// ============ Commands ============

async fn get(endpoint: &str, path: &str) -> anyhow::Result<reqwest::Response> {
    let url = format!("{}{}", endpoint, path);
    let response = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", url))?;

    if !response.status().is_success() {
        bail!("API error: {}", response.status());
    }
    Ok(response)
}

async fn show_status(endpoint: &str) -> anyhow::Result<()> {
    let nodes: NodesResponse = get(endpoint, "/nodes").await?.json().await?;

    println!();
    println!("Node Status (ddbctl v{})", env!("CARGO_PKG_VERSION"));
    println!("==========================");
    println!();
    println!("Node ID:      {}", nodes.node_id);
    println!("Address:      {}", nodes.address);
    println!("Role:         {}", if nodes.is_writer { "WRITER" } else { "REPLICA" });
    println!("Writer:       {}", nodes.writer);
    if nodes.election_in_progress {
        println!("Election:     \x1b[33min progress\x1b[0m");
    } else if let Some(state) = &nodes.election_state {
        println!("Election:     {}", state);
    }
    println!();
    println!("Replicas ({}):", nodes.replicas.len());
    for replica in &nodes.replicas {
        println!("  {}", replica);
    }
    println!();

    Ok(())
}

async fn show_stats(endpoint: &str) -> anyhow::Result<()> {
    let stats: StatsResponse = get(endpoint, "/stats").await?.json().await?;
    let r = &stats.replication;

    println!();
    println!("Replication Stats");
    println!("=================");
    println!();
    println!("Node:         {} ({})", stats.node_id, stats.role);
    let uptime = std::time::Duration::from_secs(stats.uptime_seconds);
    println!("Uptime:       {}", format_duration(uptime));
    println!();
    println!("Operations:   {}", r.operations);
    println!("Tasks:        {}", r.tasks);
    println!("Attempts:     {}", r.attempts);
    println!("Delivered:    \x1b[32m{}\x1b[0m", r.delivered);
    println!("Exhausted:    \x1b[31m{}\x1b[0m", r.exhausted);
    println!("In flight:    {}", r.in_flight);
    println!();

    Ok(())
}

async fn ping(endpoint: &str) -> anyhow::Result<()> {
    let started = std::time::Instant::now();
    let body = get(endpoint, "/ping").await?.text().await?;
    println!("{} from {} in {:?}", body.trim(), endpoint, started.elapsed());
    Ok(())
}

fn check_config(path: &PathBuf) -> anyhow::Result<()> {
    let config = ddbsync::DdbConfig::from_file(path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;

    println!("✓ {} is valid", path.display());
    println!("  Node:     {} at {}", config.node.id, config.node.address);
    println!("  Writer:   {}", config.cluster.writer);
    println!("  Replicas: {}", config.cluster.replicas.len());
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
