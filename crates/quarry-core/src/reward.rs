//! Block and uncle rewards.
//!
//! For every uncle at number `u` included by a header at number `h`, the
//! uncle's beneficiary receives `(u + 8 - h) * block_reward / 8` and the
//! including block earns an extra 1/32 of that amount. The block's
//! beneficiary then receives `block_reward` plus the accumulated inclusion
//! bonuses. Multiplication happens before division in both steps.

use primitive_types::U256;

use crate::constants::DifficultyParams;
use crate::traits::StateAccessor;
use crate::types::{Address, BlockHeader};

/// Reward owed to the beneficiary of `uncle` when included by a block at `header_number`.
///
/// Zero once the uncle is 8 or more generations behind.
pub fn uncle_reward(params: &DifficultyParams, header_number: u64, uncle: &BlockHeader) -> U256 {
    let factor = uncle.number.saturating_add(8).saturating_sub(header_number);
    U256::from(factor).saturating_mul(params.block_reward) / 8
}

/// Every credit a block produces, uncles first, the block beneficiary last.
pub fn block_credits(
    params: &DifficultyParams,
    header: &BlockHeader,
    uncles: &[BlockHeader],
) -> Vec<(Address, U256)> {
    let mut credits = Vec::with_capacity(uncles.len() + 1);
    let mut reward = params.block_reward;
    for uncle in uncles {
        let r = uncle_reward(params, header.number, uncle);
        credits.push((uncle.beneficiary, r));
        reward = reward.saturating_add(r / 32);
    }
    credits.push((header.beneficiary, reward));
    credits
}

/// Credit block and uncle rewards to `state`.
pub fn accumulate_rewards(
    params: &DifficultyParams,
    state: &mut dyn StateAccessor,
    header: &BlockHeader,
    uncles: &[BlockHeader],
) {
    for (address, amount) in block_credits(params, header, uncles) {
        state.add_balance(&address, amount);
    }
}
