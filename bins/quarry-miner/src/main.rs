//! Quarry miner: runs a local proof-of-work chain.
//!
//! Builds the genesis block for the selected preset, then mines on top of it
//! with the configured beneficiary until Ctrl+C or `--blocks` commits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use quarry_consensus::ProofOfWork;
use quarry_core::chain_state::MemoryChain;
use quarry_core::genesis::genesis_block;
use quarry_core::mempool::TxPool;
use quarry_core::traits::Engine;
use quarry_core::types::Address;
use quarry_node_lib::executor::UnavailableExecutor;
use quarry_node_lib::{ChainEvent, ChannelBroadcaster, Miner, MinerConfig, MinerSettings, SharedChain};

/// How often the hashrate is logged.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "quarry-miner", version, about = "Quarry proof-of-work miner")]
struct Args {
    /// Config file (TOML). Defaults to <config_dir>/quarry/miner.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address credited with rewards and fees (0x-prefixed hex).
    #[arg(long)]
    beneficiary: Option<String>,

    /// Seal worker threads (0 = one per CPU).
    #[arg(long)]
    threads: Option<usize>,

    /// Stop after committing this many blocks.
    #[arg(long)]
    blocks: Option<u64>,

    /// Dev chain preset with empty blocks enabled.
    #[arg(long)]
    dev: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: text or json.
    #[arg(long)]
    log_format: Option<String>,
}

impl Args {
    /// Layer CLI flags over the loaded configuration.
    fn apply(&self, config: &mut MinerConfig) -> Result<()> {
        if let Some(raw) = &self.beneficiary {
            config.beneficiary = raw.parse::<Address>().context("invalid --beneficiary")?;
        }
        if let Some(threads) = self.threads {
            config.pow.threads = threads;
        }
        if self.dev {
            config.chain = "dev".into();
            config.allow_empty_blocks = true;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.clone();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = MinerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config)?;
    config.validate().context("invalid configuration")?;

    init_logging(&config.log_level, &config.log_format);

    info!("quarry-miner v{}", env!("CARGO_PKG_VERSION"));
    info!("chain: {}", config.chain);
    info!("beneficiary: {}", config.beneficiary);
    info!("seal threads: {}", config.pow.threads);
    if config.beneficiary == Address::ZERO {
        warn!("beneficiary is the zero address; rewards will be unspendable");
    }
    if !config.allow_empty_blocks {
        info!("empty blocks disabled; waiting for transactions");
    }

    let chain_config = config.chain_config().context("invalid chain preset")?;
    let (genesis, genesis_state) = genesis_block(&chain_config, &[]);
    info!(hash = %genesis.hash(), "genesis block");
    let chain = SharedChain::new(MemoryChain::new(chain_config.clone(), genesis, genesis_state));

    let engine = Arc::new(ProofOfWork::new(chain_config.params.clone(), config.pow.clone()));
    let broadcaster = Arc::new(ChannelBroadcaster::default());
    let events = broadcaster.subscribe();
    let miner = Arc::new(Miner::new(
        Arc::clone(&engine),
        chain,
        Arc::new(Mutex::new(TxPool::default())),
        Arc::new(UnavailableExecutor),
        broadcaster,
        MinerSettings::from(&config),
    ));

    let shutdown = Arc::clone(&miner);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("received SIGINT, shutting down...");
        shutdown.stop();
    });
    tokio::spawn(log_events(events));
    tokio::spawn(log_stats(Arc::clone(&miner)));

    let worker = Arc::clone(&miner);
    let blocks = args.blocks;
    let mined = tokio::task::spawn_blocking(move || worker.run(blocks))
        .await
        .context("miner task panicked")?
        .context("mining failed")?;

    if !engine.close() {
        debug!("engine already closed");
    }
    info!(mined, height = miner.chain().height(), "miner shutdown complete");
    Ok(())
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<ChainEvent>) {
    loop {
        match events.recv().await {
            Ok(ChainEvent::NewBlock(block)) => info!(
                number = block.number(),
                hash = %block.hash(),
                txs = block.transactions.len(),
                difficulty = %block.header.difficulty,
                "new block"
            ),
            Ok(ChainEvent::NewTransaction(tx)) => debug!(hash = %tx.hash(), "new transaction"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn log_stats(miner: Arc<Miner>) {
    loop {
        tokio::time::sleep(STATS_INTERVAL).await;
        info!(
            "hashrate: {:.2} H/s | blocks committed: {}",
            miner.hashrate(),
            miner.blocks_committed()
        );
    }
}

fn init_logging(level: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
