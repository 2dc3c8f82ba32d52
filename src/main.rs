//! ddbsync - Single-writer MariaDB replication coordinator
//!
//! Runs one cluster node: the HTTP API, asynchronous replication to
//! replicas and automatic writer failover.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ddbsync::config::DdbConfig;
use ddbsync::error::Result;
use ddbsync::node::Node;

/// ddbsync - Single-writer MariaDB replication coordinator
#[derive(Parser)]
#[command(name = "ddbsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ddbsync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "ddbsync.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the node
async fn run_start(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    let config = match DdbConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            init_logging(log_level.as_deref().unwrap_or("info"), "pretty");
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };

    init_logging(
        log_level.as_deref().unwrap_or(&config.logging.level),
        &config.logging.format,
    );
    tracing::info!("Loaded configuration for node: {}", config.node.id);

    let node = match Node::connect(config).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("Failed to start node: {}", e);
            return Err(e);
        }
    };

    node.run().await
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    std::fs::write(&output, DdbConfig::sample(&node_id))?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure your database and cluster settings.");
    println!("Then start with: ddbsync --config {} start", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match DdbConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Address: {}", config.node.address);
            println!("  Writer: {}", config.cluster.writer);
            println!("  Replicas: {}", config.cluster.replicas.len());
            println!("  Starts as writer: {}", config.starts_as_writer());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = DdbConfig::from_file(&config_path)?;

    println!("ddbsync Node Information");
    println!("========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Address:          {}", config.node.address);
    println!("API Bind:         {}", config.api.bind_address);
    println!();
    println!("Database Configuration:");
    println!("  Host:           {}:{}", config.database.host, config.database.port);
    println!("  Pool Size:      {}", config.database.pool_size);
    println!();
    println!("Cluster Configuration:");
    println!("  Writer:         {}", config.cluster.writer);
    println!("  Replicas:       {:?}", config.cluster.replicas);
    println!("  Primary:        {}", config.cluster.primary_identity);
    println!("  Probe:          {} ms", config.cluster.probe_interval_ms);
    println!("  Auto Failover:  {}", config.cluster.auto_failover);
    println!();
    println!("Replication:");
    println!("  Max Attempts:   {}", config.replication.max_attempts);
    println!("  Base Delay:     {} ms", config.replication.base_delay_ms);

    Ok(())
}
