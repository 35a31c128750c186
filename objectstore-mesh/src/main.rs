//! Object store mesh simulator
//!
//! Starts N coordinators on an in-memory mesh and runs the remote put /
//! observe scenario across them:
//!   1. the last device writes an object owned by the first
//!   2. the second device (with three or more) observes it and is notified
//!
//! Usage:
//!   objectstore-mesh --devices 3 --config coordinator.json

use anyhow::{Context, Result};
use clap::Parser;
use objectstore_coordinator::CoordinatorConfig;
use objectstore_mesh::{run, ScenarioOptions};
use std::{fs, path::PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "objectstore-mesh")]
#[command(about = "Run the object store coordinator over an in-memory device mesh")]
struct Args {
    /// Number of devices in the mesh (at least 2)
    #[arg(short, long, default_value = "3")]
    devices: usize,

    /// Path to a JSON coordinator config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name of the object written by the scenario
    #[arg(long, default_value = "f")]
    object: String,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<CoordinatorConfig> {
    let Some(path) = path else {
        return Ok(ScenarioOptions::default().config);
    };
    info!("Loading config from {:?}", path);
    let json = fs::read_to_string(path).context("Failed to read config file")?;
    CoordinatorConfig::from_json(&json).context("Failed to parse config file")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let options = ScenarioOptions {
        devices: args.devices,
        object_name: args.object,
        config: load_config(args.config.as_ref())?,
    };
    info!(devices = options.devices, app = %options.config.app_name, "starting mesh");

    let report = run(&options).await.context("Scenario failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n========================================");
    println!("  Object Store Mesh");
    println!("========================================");
    println!("  Key:      {}", report.key);
    println!("  Owner:    {}", report.owner);
    println!("  Writer:   {}", report.writer);
    if let Some(observer) = &report.observer {
        println!("  Observer: {}", observer);
    }
    for (field, value) in &report.value {
        println!("  {} = {}", field, value);
    }
    println!("\n  Traffic:");
    for (message_type, count) in &report.traffic {
        println!("  {:<22} {}", message_type, count);
    }
    println!("========================================\n");
    Ok(())
}
