//! favo command-line tool.
//!
//! # Usage
//!
//! ```bash
//! # Run a local 4-validator network until 10 blocks are final
//! favo devnet --config favo.toml --validators 4 --blocks 10
//!
//! # Decode a header's extra data
//! favo decode-extra 0x0000...
//!
//! # Validate a configuration file
//! favo check-config --config favo.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use favo_production::{init_telemetry, Devnet, NodeConfig};
use favo_types::Extra;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// favobft consensus tooling.
#[derive(Parser, Debug)]
#[command(name = "favo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level filter (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an in-process validator network and print its final state
    Devnet {
        /// Path to configuration file (TOML); defaults apply without one
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of validators (overrides config)
        #[arg(long)]
        validators: Option<usize>,

        /// Blocks to finalize before stopping (overrides config)
        #[arg(long)]
        blocks: Option<u64>,

        /// Key seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Decode a hex-encoded extra-data blob
    DecodeExtra {
        /// Extra data, with or without a 0x prefix
        hex: String,
    },

    /// Validate a configuration file
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<NodeConfig> {
    match path {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(NodeConfig::default()),
    }
}

async fn run_devnet(
    mut config: NodeConfig,
    validators: Option<usize>,
    blocks: Option<u64>,
    seed: Option<u64>,
) -> Result<()> {
    if let Some(validators) = validators {
        config.devnet.validators = validators;
    }
    if let Some(blocks) = blocks {
        config.devnet.blocks = blocks;
    }
    if let Some(seed) = seed {
        config.devnet.seed = seed;
    }

    let target = config.devnet.blocks;
    let timeout = Duration::from_secs(config.devnet.timeout_secs);
    let devnet = Devnet::start(&config).context("Failed to start devnet")?;

    let outcome = tokio::select! {
        result = devnet.wait_for_height(target, timeout) => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    for report in devnet.reports() {
        println!("{report}");
    }
    let shutdown = devnet.shutdown().await;

    outcome.context("Devnet did not reach the target height")?;
    shutdown.context("Devnet shut down with errors")?;
    Ok(())
}

fn decode_extra(input: &str) -> Result<()> {
    let trimmed = input.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .context("Extra data is not valid hex")?;
    let extra = Extra::decode(&bytes).context("Malformed extra data")?;

    println!("vanity:      0x{}", hex::encode(extra.vanity));
    println!("round:       {}", extra.round);
    println!("epoch:       {}", extra.checkpoint.epoch_number);
    println!(
        "epoch start: #{} {}",
        extra.checkpoint.epoch_start_number, extra.checkpoint.epoch_start_hash
    );
    println!("event root:  {}", extra.checkpoint.event_root);
    println!("added:       {}", extra.validators.added.len());
    for v in &extra.validators.added {
        println!("  + {} power={} key={}", v.address, v.voting_power, v.public_key);
    }
    println!("removed:     {}", extra.validators.removed.len());
    for address in &extra.validators.removed {
        println!("  - {address}");
    }
    println!("seals:       {}", extra.committed_seals.len());
    for seal in &extra.committed_seals {
        println!("  * {}", seal.signer);
    }
    Ok(())
}

fn check_config(path: &PathBuf) -> Result<()> {
    let config = load_config(Some(path))?;
    config
        .validate()
        .with_context(|| format!("Invalid config: {}", path.display()))?;
    let bft = config.bft_config()?;
    println!("{}: ok", path.display());
    println!(
        "  period_size={} epoch_size={} block_interval={:?} round_timeout={:?}",
        bft.period_size, bft.epoch_size, bft.block_interval, bft.round_timeout
    );
    println!(
        "  devnet validators={} blocks={}",
        config.devnet.validators, config.devnet.blocks
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Devnet {
            config,
            validators,
            blocks,
            seed,
        } => {
            let mut node_config = load_config(config.as_ref())?;
            if let Some(level) = cli.log_level {
                node_config.telemetry.log_level = level;
            }
            init_telemetry(&node_config.telemetry)?;
            run_devnet(node_config, validators, blocks, seed).await
        }
        Command::DecodeExtra { hex } => decode_extra(&hex),
        Command::CheckConfig { config } => check_config(&config),
    }
}
