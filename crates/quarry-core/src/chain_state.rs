//! In-memory chain store.
//!
//! [`MemoryChain`] keeps every inserted block together with the world state
//! after it, tracks total difficulty per block, and follows the heaviest
//! chain: when an insertion produces a greater total difficulty than the
//! current head, the canonical number index is rebuilt from the new head back
//! to the fork point.
//!
//! Blocks passed to [`MemoryChain::insert_block`] must already be validated.
//! The store only checks linkage (known parent, consecutive number, no duplicate).

use std::collections::HashMap;

use primitive_types::U256;

use crate::constants::ChainConfig;
use crate::error::{ChainError, QuarryError};
use crate::state::WorldState;
use crate::traits::{ChainHeaderReader, ChainReader};
use crate::types::{Block, BlockHeader, Hash256};

#[derive(Debug, Clone)]
struct StoredBlock {
    block: Block,
    state: WorldState,
    total_difficulty: U256,
}

/// Whether an insertion moved the canonical head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The block is the new head.
    Canonical,
    /// Stored on a side chain with less total difficulty than the head.
    SideChain,
}

/// Not thread-safe; quarry-node wraps it in an `RwLock`.
#[derive(Debug)]
pub struct MemoryChain {
    config: ChainConfig,
    blocks: HashMap<Hash256, StoredBlock>,
    canonical: Vec<Hash256>,
}

impl MemoryChain {
    /// Start a chain from a genesis block (number 0) and its state.
    pub fn new(config: ChainConfig, genesis: Block, genesis_state: WorldState) -> Self {
        let hash = genesis.hash();
        let total_difficulty = genesis.header.difficulty;
        let mut blocks = HashMap::new();
        blocks.insert(hash, StoredBlock { block: genesis, state: genesis_state, total_difficulty });
        Self {
            config,
            blocks,
            canonical: vec![hash],
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn head(&self) -> Option<&Block> {
        let hash = self.canonical.last()?;
        self.blocks.get(hash).map(|s| &s.block)
    }

    pub fn head_hash(&self) -> Option<Hash256> {
        self.canonical.last().copied()
    }

    /// Number of the canonical head.
    pub fn height(&self) -> u64 {
        self.canonical.len().saturating_sub(1) as u64
    }

    /// World state after the canonical head.
    pub fn head_state(&self) -> Result<WorldState, ChainError> {
        let hash = self.canonical.last().ok_or(ChainError::EmptyChain)?;
        self.state_at(hash)
    }

    /// World state after block `hash`.
    pub fn state_at(&self, hash: &Hash256) -> Result<WorldState, ChainError> {
        self.blocks
            .get(hash)
            .map(|s| s.state.clone())
            .ok_or(ChainError::BlockNotFound(*hash))
    }

    pub fn block(&self, hash: &Hash256) -> Option<&Block> {
        self.blocks.get(hash).map(|s| &s.block)
    }

    pub fn header(&self, hash: &Hash256) -> Option<&BlockHeader> {
        self.block(hash).map(|b| &b.header)
    }

    pub fn canonical_hash(&self, number: u64) -> Option<Hash256> {
        self.canonical.get(number as usize).copied()
    }

    pub fn total_difficulty(&self, hash: &Hash256) -> Option<U256> {
        self.blocks.get(hash).map(|s| s.total_difficulty)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Store a validated block with the state produced by executing it.
    pub fn insert_block(&mut self, block: Block, state: WorldState) -> Result<InsertOutcome, ChainError> {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return Err(ChainError::DuplicateBlock(hash));
        }
        let parent = self
            .blocks
            .get(&block.header.parent_hash)
            .ok_or(ChainError::UnknownParent(block.header.parent_hash))?;
        let expected = parent.block.number() + 1;
        if block.number() != expected {
            return Err(ChainError::NumberMismatch { expected, got: block.number() });
        }
        let total_difficulty = parent.total_difficulty.saturating_add(block.header.difficulty);
        let head_td = self
            .canonical
            .last()
            .and_then(|h| self.total_difficulty(h))
            .unwrap_or_default();

        self.blocks.insert(hash, StoredBlock { block, state, total_difficulty });

        if total_difficulty > head_td {
            self.reorg_to(hash)?;
            Ok(InsertOutcome::Canonical)
        } else {
            Ok(InsertOutcome::SideChain)
        }
    }

    /// Rewrite the canonical index so it ends at `head`.
    fn reorg_to(&mut self, head: Hash256) -> Result<(), ChainError> {
        let mut branch = Vec::new();
        let mut cursor = head;
        loop {
            let stored = self.blocks.get(&cursor).ok_or(ChainError::BlockNotFound(cursor))?;
            let number = stored.block.number() as usize;
            if self.canonical.get(number) == Some(&cursor) {
                self.canonical.truncate(number + 1);
                break;
            }
            branch.push(cursor);
            if number == 0 {
                self.canonical.clear();
                break;
            }
            cursor = stored.block.header.parent_hash;
        }
        self.canonical.extend(branch.into_iter().rev());
        Ok(())
    }
}

impl ChainHeaderReader for MemoryChain {
    fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn current_header(&self) -> Result<Option<BlockHeader>, QuarryError> {
        Ok(self.head().map(|b| b.header.clone()))
    }

    fn get_header_by_hash(&self, hash: &Hash256) -> Result<Option<BlockHeader>, QuarryError> {
        Ok(self.header(hash).cloned())
    }

    fn get_header_by_number(&self, number: u64) -> Result<Option<BlockHeader>, QuarryError> {
        Ok(self
            .canonical_hash(number)
            .and_then(|h| self.header(&h))
            .cloned())
    }

    fn get_total_difficulty(&self, hash: &Hash256, number: u64) -> Result<Option<U256>, QuarryError> {
        Ok(self
            .blocks
            .get(hash)
            .filter(|s| s.block.number() == number)
            .map(|s| s.total_difficulty))
    }
}

impl ChainReader for MemoryChain {
    fn get_block(&self, hash: &Hash256, number: u64) -> Result<Option<Block>, QuarryError> {
        Ok(self.block(hash).filter(|b| b.number() == number).cloned())
    }
}
