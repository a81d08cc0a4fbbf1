//! [`ProofOfWork`]: the memory-hard PoW implementation of [`Engine`].
//!
//! Header rules live in [`crate::verify`], the nonce search in
//! [`crate::sealer`]. The engine owns the epoch dataset cache and shares it
//! between seal verification (cache only) and sealing (full dataset).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use primitive_types::U256;
use quarry_core::clock::{self, Clock};
use quarry_core::constants::DifficultyParams;
use quarry_core::error::{EngineError, HeaderError, SealError, UncleError};
use quarry_core::signal::Signal;
use quarry_core::traits::{ChainHeaderReader, ChainReader, Engine, SealOutcome, StateAccessor};
use quarry_core::types::{Address, Block, BlockHeader, Hash256, Receipt, Transaction, Withdrawal};
use quarry_core::{difficulty, reward};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::{Dataset, DatasetOptions};
use crate::epoch_cache::DatasetCache;
use crate::sealer::SealScheduler;
use crate::verify;

/// RPC namespaces exposed alongside a PoW engine.
pub const APIS: [&str; 5] = ["eth", "net", "web3", "miner", "admin"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowMode {
    #[default]
    Normal,
    /// Accept every seal and seal instantly with nonce 0. Development only.
    Fake,
}

/// Engine tuning. Consensus constants come from [`DifficultyParams`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowConfig {
    /// Seal workers (0 = available CPUs).
    pub threads: usize,
    /// Dataset generation workers (0 = available CPUs).
    pub dataset_threads: usize,
    /// Epochs kept in the dataset cache.
    pub epoch_window: usize,
    pub poll_interval_ms: u64,
    pub slow_generation_secs: u64,
    pub mode: PowMode,
}

impl Default for PowConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            dataset_threads: 0,
            epoch_window: 3,
            poll_interval_ms: 100,
            slow_generation_secs: 60,
            mode: PowMode::Normal,
        }
    }
}

pub struct ProofOfWork {
    config: PowConfig,
    cache: Arc<DatasetCache>,
    scheduler: SealScheduler,
    clock: Clock,
    closed: AtomicBool,
}

impl std::fmt::Debug for ProofOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofOfWork")
            .field("mode", &self.config.mode)
            .field("threads", &self.scheduler.threads())
            .finish_non_exhaustive()
    }
}

impl ProofOfWork {
    /// Engine using the system clock.
    pub fn new(params: DifficultyParams, config: PowConfig) -> Self {
        Self::with_clock(params, config, clock::system_clock())
    }

    /// Engine reading "now" from `clock`, for deterministic timestamp checks.
    pub fn with_clock(params: DifficultyParams, config: PowConfig, clock: Clock) -> Self {
        let options = DatasetOptions {
            threads: config.dataset_threads,
            slow_threshold: Duration::from_secs(config.slow_generation_secs),
        };
        let cache = Arc::new(DatasetCache::new(params, config.epoch_window, options));
        let scheduler = SealScheduler::new(config.threads, Duration::from_millis(config.poll_interval_ms.max(1)));
        info!(mode = ?config.mode, threads = scheduler.threads(), window = config.epoch_window, "proof-of-work engine ready");
        Self {
            config,
            cache,
            scheduler,
            clock,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PowConfig {
        &self.config
    }

    pub fn datasets(&self) -> &Arc<DatasetCache> {
        &self.cache
    }

    fn is_fake(&self) -> bool {
        self.config.mode == PowMode::Fake
    }

    /// Recompute the seal in light mode and check mix digest and target.
    pub fn verify_seal(&self, header: &BlockHeader) -> Result<(), HeaderError> {
        if self.is_fake() {
            return Ok(());
        }
        if header.difficulty.is_zero() {
            return Err(HeaderError::ZeroDifficulty);
        }
        let out = self
            .cache
            .verification(header.number)
            .and_then(|ds| ds.hashimoto_light(&header.seal_hash(), header.nonce))
            .map_err(|e| HeaderError::Unavailable(e.to_string()))?;
        if out.digest != header.mix_hash {
            return Err(HeaderError::InvalidMixDigest);
        }
        if !difficulty::meets_target(&out.result, header.difficulty) {
            return Err(HeaderError::InvalidPoW);
        }
        Ok(())
    }

    /// Full dataset for block `number`; see [`DatasetCache::dataset`].
    pub fn dataset(&self, number: u64, asynchronous: bool) -> Result<Option<Arc<Dataset>>, SealError> {
        Ok(self.cache.dataset(number, asynchronous)?)
    }

    pub fn hashrate(&self) -> f64 {
        self.scheduler.hashrate()
    }

    /// Restart in-flight seals, e.g. after the chain head moved.
    pub fn notify_update(&self) {
        self.scheduler.notify_update();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Engine for ProofOfWork {
    fn author(&self, header: &BlockHeader) -> Address {
        header.beneficiary
    }

    fn verify_header(&self, chain: &dyn ChainHeaderReader, header: &BlockHeader) -> Result<(), HeaderError> {
        let result = verify::verify_header(chain, header, (self.clock)());
        if let Err(e) = &result {
            warn!(number = header.number, hash = %header.hash(), "header rejected: {e}");
        }
        result
    }

    fn verify_headers(
        &self,
        chain: Arc<dyn ChainHeaderReader>,
        headers: Vec<BlockHeader>,
    ) -> (Signal, Receiver<Result<(), HeaderError>>) {
        if self.is_fake() {
            let (tx, rx) = crossbeam_channel::bounded(headers.len().max(1));
            for _ in &headers {
                let _ = tx.send(Ok(()));
            }
            return (Signal::new(), rx);
        }
        verify::spawn_batch(chain, headers, (self.clock)())
    }

    fn verify_uncles(&self, chain: &dyn ChainReader, block: &Block) -> Result<(), UncleError> {
        if self.is_fake() {
            return Ok(());
        }
        let result = verify::verify_uncles(chain, block);
        if let Err(e) = &result {
            warn!(number = block.number(), "uncles rejected: {e}");
        }
        result
    }

    fn prepare(&self, chain: &dyn ChainHeaderReader, header: &mut BlockHeader) -> Result<(), EngineError> {
        let parent = match header.number.checked_sub(1) {
            Some(number) => chain
                .get_header(&header.parent_hash, number)
                .map_err(|e| HeaderError::Unavailable(e.to_string()))?,
            None => None,
        };
        if parent.is_none() {
            return Err(HeaderError::UnknownParent(header.parent_hash).into());
        }
        Ok(())
    }

    fn finalize(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
        state: &mut dyn StateAccessor,
        _transactions: &[Transaction],
        uncles: &[BlockHeader],
        _withdrawals: &[Withdrawal],
    ) {
        reward::accumulate_rewards(&chain.config().params, state, header, uncles);
    }

    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainHeaderReader,
        mut header: BlockHeader,
        state: &mut dyn StateAccessor,
        transactions: Vec<Transaction>,
        uncles: Vec<BlockHeader>,
        receipts: &[Receipt],
        withdrawals: Vec<Withdrawal>,
    ) -> Result<Block, EngineError> {
        if !withdrawals.is_empty() {
            return Err(EngineError::WithdrawalsUnsupported);
        }
        self.finalize(chain, &header, state, &transactions, &uncles, &withdrawals);
        header.state_root = state.current_state_root();
        Ok(Block::new(header, transactions, uncles, receipts))
    }

    fn seal(
        &self,
        _chain: &dyn ChainHeaderReader,
        block: Block,
        results: Sender<Block>,
        stop: Signal,
    ) -> Result<SealOutcome, SealError> {
        if self.is_closed() {
            return Err(SealError::Closed);
        }
        if self.is_fake() {
            let sealed = block.with_seal(0, Hash256::ZERO);
            debug!(number = sealed.number(), "fake seal");
            if results.send(sealed).is_err() {
                warn!("sealed block dropped: result receiver gone");
            }
            return Ok(SealOutcome::Sealed);
        }
        self.scheduler.seal(&self.cache, block, &results, &stop)
    }

    fn seal_hash(&self, header: &BlockHeader) -> Hash256 {
        header.seal_hash()
    }

    fn calc_difficulty(&self, chain: &dyn ChainHeaderReader, time: u64, parent: &BlockHeader) -> U256 {
        difficulty::calc_difficulty(chain.config(), time, parent)
    }

    fn apis(&self, _chain: &dyn ChainHeaderReader) -> Vec<&'static str> {
        APIS.to_vec()
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.scheduler.close();
        self.cache.clear();
        info!("proof-of-work engine closed");
        true
    }
}
