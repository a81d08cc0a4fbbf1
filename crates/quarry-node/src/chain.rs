//! Lock-guarded chain handle shared by the miner and the engine.
//!
//! [`SharedChain`] wraps a [`MemoryChain`] in an `Arc<RwLock<_>>` and
//! implements the read-only chain traits by taking a read lock per call. The
//! chain configuration is kept outside the lock so `config()` can hand out a
//! plain reference.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard};
use primitive_types::U256;
use quarry_core::chain_state::{InsertOutcome, MemoryChain};
use quarry_core::constants::ChainConfig;
use quarry_core::error::{ChainError, QuarryError};
use quarry_core::state::WorldState;
use quarry_core::traits::{ChainHeaderReader, ChainReader};
use quarry_core::types::{Block, BlockHeader, Hash256};

#[derive(Clone)]
pub struct SharedChain {
    config: Arc<ChainConfig>,
    inner: Arc<RwLock<MemoryChain>>,
}

impl std::fmt::Debug for SharedChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedChain")
            .field("chain", &self.config.name)
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

impl SharedChain {
    pub fn new(chain: MemoryChain) -> Self {
        Self {
            config: Arc::new(chain.config().clone()),
            inner: Arc::new(RwLock::new(chain)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, MemoryChain> {
        self.inner.read()
    }

    pub fn head_header(&self) -> Option<BlockHeader> {
        self.inner.read().head().map(|b| b.header.clone())
    }

    pub fn head_hash(&self) -> Option<Hash256> {
        self.inner.read().head_hash()
    }

    pub fn height(&self) -> u64 {
        self.inner.read().height()
    }

    /// Copy-on-write snapshot of the head state.
    pub fn head_state(&self) -> Result<WorldState, ChainError> {
        self.inner.read().head_state()
    }

    /// Append a block with its post-state. Single writer at a time.
    pub fn insert(&self, block: Block, state: WorldState) -> Result<InsertOutcome, ChainError> {
        self.inner.write().insert_block(block, state)
    }
}

impl ChainHeaderReader for SharedChain {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn current_header(&self) -> Result<Option<BlockHeader>, QuarryError> {
        Ok(self.head_header())
    }

    fn get_header_by_hash(&self, hash: &Hash256) -> Result<Option<BlockHeader>, QuarryError> {
        Ok(self.inner.read().header(hash).cloned())
    }

    fn get_header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, QuarryError> {
        self.inner.read().get_header_by_number(number)
    }

    fn get_total_difficulty(&self, hash: &Hash256, number: u64) -> Result<Option<U256>, QuarryError> {
        self.inner.read().get_total_difficulty(hash, number)
    }
}

impl ChainReader for SharedChain {
    fn get_block(&self, hash: &Hash256, number: u64) -> Result<Option<Block>, QuarryError> {
        self.inner.read().get_block(hash, number)
    }
}
