//! Trait interfaces for the Quarry consensus core.
//!
//! These traits define the contracts between crates:
//! - [`ChainHeaderReader`] / [`ChainReader`]: read-only chain access (quarry-node implements)
//! - [`StateAccessor`]: balance/state-root view used by reward finalization
//! - [`Executor`]: opaque smart-contract sandbox
//! - [`Broadcaster`]: fire-and-forget block/transaction propagation
//! - [`Engine`]: consensus engine (quarry-consensus implements)

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use primitive_types::U256;

use crate::constants::ChainConfig;
use crate::error::{EngineError, ExecutorError, HeaderError, QuarryError, SealError, UncleError};
use crate::signal::Signal;
use crate::types::{Address, Block, BlockHeader, ContractCode, Hash256, Receipt, Transaction, Withdrawal};

/// Read-only access to canonical headers.
///
/// Lookups return `Ok(None)` when the item is absent; `Err` is reserved for
/// storage failures.
pub trait ChainHeaderReader: Send + Sync {
    /// Chain configuration (difficulty parameters and fork table).
    fn config(&self) -> &ChainConfig;

    /// Head of the canonical chain. `None` only before genesis is stored.
    fn current_header(&self) -> Result<Option<BlockHeader>, QuarryError>;

    /// Header by hash, regardless of number.
    fn get_header_by_hash(&self, hash: &Hash256) -> Result<Option<BlockHeader>, QuarryError>;

    /// Canonical header at `number`.
    fn get_header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, QuarryError>;

    /// Total difficulty of the chain ending at `hash`.
    fn get_total_difficulty(&self, hash: &Hash256, number: u64) -> Result<Option<U256>, QuarryError>;

    /// Header by hash, only if it carries `number`.
    ///
    /// Default implementation filters [`get_header_by_hash`](Self::get_header_by_hash).
    fn get_header(&self, hash: &Hash256, number: u64) -> Result<Option<BlockHeader>, QuarryError> {
        Ok(self.get_header_by_hash(hash)?.filter(|h| h.number == number))
    }
}

/// Header reader with block bodies.
pub trait ChainReader: ChainHeaderReader {
    fn get_block(&self, hash: &Hash256, number: u64) -> Result<Option<Block>, QuarryError>;
}

/// Mutable account view handed to `Engine::finalize`.
pub trait StateAccessor {
    fn add_balance(&mut self, address: &Address, amount: U256);

    fn balance(&self, address: &Address) -> U256;

    fn current_state_root(&self) -> Hash256;
}

/// Raw result of one contract invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    /// Output lines; `STATE_CHANGE:`-prefixed lines carry JSON state events.
    pub logs: Vec<String>,
    pub gas_used: u64,
}

/// Smart-contract sandbox. The consensus core only reads gas usage and
/// state-change events from its output.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        code: &ContractCode,
        function: &str,
        params: &serde_json::Value,
    ) -> Result<ExecutionOutput, ExecutorError>;
}

/// Fire-and-forget propagation of new blocks and transactions.
pub trait Broadcaster: Send + Sync {
    fn broadcast_block(&self, block: &Block);

    fn broadcast_transaction(&self, tx: &Transaction);
}

/// Terminal state of a seal call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealOutcome {
    /// A sealed block was pushed onto the results channel.
    Sealed,
    /// The stop signal was raised first.
    Stopped,
}

/// A consensus engine: header rules, rewards and block sealing.
pub trait Engine: Send + Sync {
    /// Address the block's rewards are paid to.
    fn author(&self, header: &BlockHeader) -> Address;

    /// Check `header` against its parent and the consensus rules.
    fn verify_header(&self, chain: &dyn ChainHeaderReader, header: &BlockHeader) -> Result<(), HeaderError>;

    /// Verify a contiguous batch on a background thread.
    ///
    /// Yields one result per header, in input order. Raising the returned
    /// signal stops the worker before the next header.
    fn verify_headers(
        &self,
        chain: Arc<dyn ChainHeaderReader>,
        headers: Vec<BlockHeader>,
    ) -> (Signal, Receiver<Result<(), HeaderError>>);

    fn verify_uncles(&self, chain: &dyn ChainReader, block: &Block) -> Result<(), UncleError>;

    /// Validation gate before assembly; fails if the parent is unknown.
    fn prepare(&self, chain: &dyn ChainHeaderReader, header: &mut BlockHeader) -> Result<(), EngineError>;

    /// Apply block and uncle rewards to `state`.
    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        chain: &dyn ChainHeaderReader,
        header: &BlockHeader,
        state: &mut dyn StateAccessor,
        transactions: &[Transaction],
        uncles: &[BlockHeader],
        withdrawals: &[Withdrawal],
    );

    /// Finalize, stamp the post-reward state root and assemble the block.
    #[allow(clippy::too_many_arguments)]
    fn finalize_and_assemble(
        &self,
        chain: &dyn ChainHeaderReader,
        header: BlockHeader,
        state: &mut dyn StateAccessor,
        transactions: Vec<Transaction>,
        uncles: Vec<BlockHeader>,
        receipts: &[Receipt],
        withdrawals: Vec<Withdrawal>,
    ) -> Result<Block, EngineError>;

    /// Search for a valid seal, pushing the sealed block onto `results`.
    ///
    /// Blocks until a seal is found, `stop` is raised, or the search fails.
    fn seal(
        &self,
        chain: &dyn ChainHeaderReader,
        block: Block,
        results: Sender<Block>,
        stop: Signal,
    ) -> Result<SealOutcome, SealError>;

    /// Hash of the header without its seal fields.
    fn seal_hash(&self, header: &BlockHeader) -> Hash256;

    fn calc_difficulty(&self, chain: &dyn ChainHeaderReader, time: u64, parent: &BlockHeader) -> U256;

    /// RPC namespaces the engine contributes.
    fn apis(&self, chain: &dyn ChainHeaderReader) -> Vec<&'static str>;

    /// Release caches and stop background work.
    ///
    /// Idempotent: returns `true` only for the call that did the release.
    fn close(&self) -> bool;
}
