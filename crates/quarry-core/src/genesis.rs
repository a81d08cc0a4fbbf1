//! Genesis block construction.
//!
//! The genesis block is number 0 with a zero parent hash. Its state is built
//! from an allocation list, and the header commits to that state's root, so
//! every node given the same config and allocation derives the same hash.

use primitive_types::U256;

use crate::constants::ChainConfig;
use crate::state::WorldState;
use crate::types::{Address, Block, BlockHeader, Hash256};

/// Genesis timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_767_225_600;

pub const GENESIS_EXTRA_DATA: &[u8] = b"quarry genesis";

/// Build the genesis block and the state it commits to.
pub fn genesis_block(config: &ChainConfig, alloc: &[(Address, U256)]) -> (Block, WorldState) {
    let mut state = WorldState::default();
    for (address, amount) in alloc {
        state.credit(address, *amount);
    }
    let header = BlockHeader {
        number: 0,
        parent_hash: Hash256::ZERO,
        difficulty: config.params.minimum_difficulty,
        gas_limit: config.gas_limit,
        timestamp: GENESIS_TIMESTAMP,
        state_root: state.state_root(),
        extra_data: GENESIS_EXTRA_DATA.to_vec(),
        ..Default::default()
    };
    (Block::new(header, vec![], vec![], &[]), state)
}
