//! Block production loop.
//!
//! One cycle builds a candidate on the current head, hands it to the engine's
//! seal search on a dedicated thread, and commits the sealed block if the head
//! has not moved in the meantime:
//!
//! ```text
//! Idle -> BuildingCandidate -> Sealing -> Committed | Superseded | Stopped
//! ```
//!
//! [`Miner::run`] repeats cycles, rebuilding after `Superseded`, backing off
//! after `Idle` or a rejected seal, and returning after `Stopped` or a fatal error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use quarry_consensus::ProofOfWork;
use quarry_core::chain_state::InsertOutcome;
use quarry_core::clock::{self, Clock};
use quarry_core::error::{ChainError, EngineError, HeaderError, PoolError, SealError, TransactionError, UncleError};
use quarry_core::mempool::TxPool;
use quarry_core::signal::Signal;
use quarry_core::state::WorldState;
use quarry_core::traits::{Broadcaster, Engine, Executor, SealOutcome};
use quarry_core::types::{Address, Block, BlockHeader, Hash256, Receipt, Transaction};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::apply::{apply_transaction, BlockContext};
use crate::chain::SharedChain;
use crate::config::MinerConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MinerError {
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Engine(#[from] EngineError),
    #[error(transparent)] Seal(#[from] SealError),
    #[error("sealed block rejected: {0}")] Header(#[from] HeaderError),
    #[error("sealed block rejected: {0}")] Uncle(#[from] UncleError),
    #[error("seal thread panicked")] SealPanicked,
    #[error("cannot spawn seal thread: {0}")] Spawn(String),
}

impl MinerError {
    /// Whether the mining loop can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MinerError::Header(_) | MinerError::Uncle(_))
    }
}

/// Knobs the miner reads on every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerSettings {
    pub beneficiary: Address,
    pub extra_data: Vec<u8>,
    pub gas_limit: u64,
    pub max_block_transactions: usize,
    pub allow_empty_blocks: bool,
    pub poll_interval: Duration,
    pub idle_backoff: Duration,
}

impl From<&MinerConfig> for MinerSettings {
    fn from(cfg: &MinerConfig) -> Self {
        Self {
            beneficiary: cfg.beneficiary,
            extra_data: cfg.extra_data.as_bytes().to_vec(),
            gas_limit: cfg.gas_limit,
            max_block_transactions: cfg.max_block_transactions,
            allow_empty_blocks: cfg.allow_empty_blocks,
            poll_interval: cfg.poll_interval(),
            idle_backoff: cfg.idle_backoff(),
        }
    }
}

impl Default for MinerSettings {
    fn default() -> Self {
        Self::from(&MinerConfig::default())
    }
}

/// An unsealed block together with the state it commits to.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub block: Block,
    /// Post-reward state; `block.header.state_root` is its root.
    pub state: WorldState,
    pub receipts: Vec<Receipt>,
    /// Pool transactions left out, with the reason.
    pub skipped: Vec<(Hash256, TransactionError)>,
}

/// How one mining cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The sealed block is the new head.
    Committed(Hash256),
    /// The head moved while sealing; the candidate is stale.
    Superseded,
    /// Mining was stopped before a seal was found.
    Stopped,
    /// Nothing to mine.
    Idle,
}

pub struct Miner {
    engine: Arc<ProofOfWork>,
    chain: SharedChain,
    pool: Arc<Mutex<TxPool>>,
    executor: Arc<dyn Executor>,
    broadcaster: Arc<dyn Broadcaster>,
    settings: MinerSettings,
    clock: Clock,
    running: AtomicBool,
    stop_requested: AtomicBool,
    current_stop: Mutex<Option<Signal>>,
    committed: AtomicU64,
}

impl std::fmt::Debug for Miner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Miner")
            .field("beneficiary", &self.settings.beneficiary)
            .field("running", &self.is_running())
            .field("committed", &self.blocks_committed())
            .finish_non_exhaustive()
    }
}

impl Miner {
    pub fn new(
        engine: Arc<ProofOfWork>,
        chain: SharedChain,
        pool: Arc<Mutex<TxPool>>,
        executor: Arc<dyn Executor>,
        broadcaster: Arc<dyn Broadcaster>,
        settings: MinerSettings,
    ) -> Self {
        Self {
            engine,
            chain,
            pool,
            executor,
            broadcaster,
            settings,
            clock: clock::system_clock(),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            current_stop: Mutex::new(None),
            committed: AtomicU64::new(0),
        }
    }

    /// Replace the clock used for candidate timestamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &MinerSettings {
        &self.settings
    }

    pub fn chain(&self) -> &SharedChain {
        &self.chain
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn blocks_committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn hashrate(&self) -> f64 {
        self.engine.hashrate()
    }

    /// Pool a transaction and announce it.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, PoolError> {
        let hash = self.pool.lock().insert(tx.clone())?;
        self.broadcaster.broadcast_transaction(&tx);
        Ok(hash)
    }

    /// Ask [`run`](Self::run) to return and abort any seal in flight.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        if let Some(stop) = self.current_stop.lock().as_ref() {
            stop.raise();
        }
    }

    fn stopping(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Build an unsealed block on the current head.
    ///
    /// Pool transactions are applied one by one, each against its own clone of
    /// the running state; failures are skipped and leave no trace. Permanently
    /// invalid transactions are also dropped from the pool.
    pub fn create_block_candidate(&self) -> Result<Candidate, MinerError> {
        let parent = self.chain.head_header().ok_or(ChainError::EmptyChain)?;
        let mut state = self.chain.head_state()?;
        let timestamp = (self.clock)().max(parent.timestamp.saturating_add(1));

        let pending = self.pool.lock().pending(self.settings.max_block_transactions);
        let mut ctx = BlockContext {
            beneficiary: self.settings.beneficiary,
            gas_used: 0,
            gas_limit: self.settings.gas_limit,
        };
        let mut accepted = Vec::new();
        let mut receipts = Vec::new();
        let mut skipped = Vec::new();
        for tx in pending {
            let mut trial = state.clone();
            match apply_transaction(&mut trial, &tx, &ctx, self.executor.as_ref()) {
                Ok(gas_used) => {
                    state = trial;
                    ctx.gas_used += gas_used;
                    receipts.push(Receipt { success: true, gas_used, cumulative_gas_used: ctx.gas_used });
                    accepted.push(tx);
                }
                Err(e) => {
                    let hash = tx.hash();
                    debug!(%hash, "transaction skipped: {e}");
                    skipped.push((hash, e));
                }
            }
        }
        self.drop_invalid(&skipped);

        let mut header = BlockHeader {
            number: parent.number + 1,
            parent_hash: parent.hash(),
            beneficiary: self.settings.beneficiary,
            difficulty: self.engine.calc_difficulty(&self.chain, timestamp, &parent),
            gas_limit: self.settings.gas_limit,
            gas_used: ctx.gas_used,
            timestamp,
            extra_data: self.settings.extra_data.clone(),
            ..Default::default()
        };
        self.engine.prepare(&self.chain, &mut header)?;
        let block = self.engine.finalize_and_assemble(
            &self.chain,
            header,
            &mut state,
            accepted,
            Vec::new(),
            &receipts,
            Vec::new(),
        )?;
        debug!(
            number = block.number(),
            txs = block.transactions.len(),
            skipped = skipped.len(),
            difficulty = %block.header.difficulty,
            "candidate built"
        );
        Ok(Candidate { block, state, receipts, skipped })
    }

    fn drop_invalid(&self, skipped: &[(Hash256, TransactionError)]) {
        let mut pool = self.pool.lock();
        for (hash, err) in skipped {
            let permanent = match err {
                TransactionError::InvalidSignature | TransactionError::InvalidPayload(_) => true,
                TransactionError::InvalidNonce { expected, got, .. } => got < expected,
                _ => false,
            };
            if permanent && pool.remove(hash).is_some() {
                debug!(%hash, "dropped invalid transaction from pool");
            }
        }
    }

    /// Seal `block` on a background thread.
    ///
    /// Returns `Ok(None)` when mining is stopped or the chain head moves away
    /// from the block's parent before a seal is found.
    pub fn mine_block(&self, block: Block) -> Result<Option<Block>, MinerError> {
        let parent_hash = block.header.parent_hash;
        let number = block.number();
        let stop = Signal::new();
        *self.current_stop.lock() = Some(stop.clone());
        if self.stopping() {
            stop.raise();
        }

        let (results_tx, results_rx) = crossbeam_channel::bounded(1);
        let engine = Arc::clone(&self.engine);
        let chain = self.chain.clone();
        let seal_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("miner-seal".into())
            .spawn(move || engine.seal(&chain, block, results_tx, seal_stop))
            .map_err(|e| MinerError::Spawn(e.to_string()))?;

        let sealed = loop {
            match results_rx.recv_timeout(self.settings.poll_interval) {
                Ok(sealed) => break Some(sealed),
                Err(RecvTimeoutError::Timeout) => {
                    if self.stopping() {
                        debug!(number, "mining stopped");
                        stop.raise();
                    } else if self.chain.head_hash() != Some(parent_hash) {
                        debug!(number, "head moved, abandoning seal");
                        stop.raise();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break None,
            }
        };
        stop.raise();
        *self.current_stop.lock() = None;

        let outcome = handle.join().map_err(|_| MinerError::SealPanicked)?;
        match (sealed, outcome) {
            (Some(block), _) => Ok(Some(block)),
            (None, Ok(SealOutcome::Sealed)) => Ok(results_rx.try_recv().ok()),
            (None, Ok(SealOutcome::Stopped)) => Ok(None),
            (None, Err(e)) => Err(e.into()),
        }
    }

    /// Validate a sealed block, append it and announce it.
    fn commit(&self, block: Block, state: WorldState) -> Result<Option<Hash256>, MinerError> {
        self.engine.verify_header(&self.chain, &block.header)?;
        self.engine.verify_seal(&block.header)?;
        self.engine.verify_uncles(&self.chain, &block)?;

        let hash = block.hash();
        if self.chain.insert(block.clone(), state)? == InsertOutcome::SideChain {
            info!(number = block.number(), %hash, "sealed block landed on a side chain");
            return Ok(None);
        }
        let removed = self.pool.lock().remove_included(&block.transactions);
        self.broadcaster.broadcast_block(&block);
        self.committed.fetch_add(1, Ordering::Relaxed);
        info!(
            number = block.number(),
            %hash,
            txs = block.transactions.len(),
            removed,
            nonce = block.header.nonce,
            "block committed"
        );
        Ok(Some(hash))
    }

    /// Run one build/seal/commit cycle.
    pub fn mine_cycle(&self) -> Result<CycleOutcome, MinerError> {
        let candidate = self.create_block_candidate()?;
        if candidate.block.transactions.is_empty() && !self.settings.allow_empty_blocks {
            return Ok(CycleOutcome::Idle);
        }
        let parent_hash = candidate.block.header.parent_hash;
        let sealed = self.mine_block(candidate.block)?;
        let head_moved = self.chain.head_hash() != Some(parent_hash);
        match sealed {
            Some(_) if head_moved => Ok(CycleOutcome::Superseded),
            Some(block) => Ok(match self.commit(block, candidate.state)? {
                Some(hash) => CycleOutcome::Committed(hash),
                None => CycleOutcome::Superseded,
            }),
            None if head_moved => Ok(CycleOutcome::Superseded),
            None => Ok(CycleOutcome::Stopped),
        }
    }

    /// Mine until stopped, a fatal error occurs, or `max_blocks` are committed.
    ///
    /// Returns the number of blocks committed by this call. A [`stop`](Self::stop)
    /// issued before the call is honoured; the request is consumed when `run` returns.
    pub fn run(&self, max_blocks: Option<u64>) -> Result<u64, MinerError> {
        self.running.store(true, Ordering::Release);
        info!(beneficiary = %self.settings.beneficiary, ?max_blocks, "miner started");
        let result = self.run_loop(max_blocks);
        self.running.store(false, Ordering::Release);
        self.stop_requested.store(false, Ordering::Release);
        match &result {
            Ok(mined) => info!(mined, "miner stopped"),
            Err(e) => error!("miner stopped: {e}"),
        }
        result
    }

    fn run_loop(&self, max_blocks: Option<u64>) -> Result<u64, MinerError> {
        let mut mined = 0u64;
        while !self.stopping() && max_blocks.is_none_or(|max| mined < max) {
            match self.mine_cycle() {
                Ok(CycleOutcome::Committed(_)) => mined += 1,
                Ok(CycleOutcome::Superseded) => debug!("candidate superseded, rebuilding"),
                Ok(CycleOutcome::Stopped) => break,
                Ok(CycleOutcome::Idle) => self.idle_wait(),
                Err(e) if e.is_recoverable() => {
                    warn!("mining cycle failed: {e}");
                    self.idle_wait();
                }
                Err(e) => return Err(e),
            }
        }
        Ok(mined)
    }

    /// Sleep for the idle back-off, waking early on stop.
    fn idle_wait(&self) {
        let deadline = Instant::now() + self.settings.idle_backoff;
        let slice = self.settings.poll_interval.min(Duration::from_millis(50));
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}
