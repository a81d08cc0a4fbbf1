//! Difficulty adjustment and proof-of-work targets.
//!
//! # Frontier rule
//!
//! `adjust = parent.difficulty / bound_divisor`. A block arriving less than
//! `duration_limit` seconds after its parent raises difficulty by `adjust`,
//! otherwise it drops by `adjust`. The result is clamped to
//! `minimum_difficulty`, then the exponential period bonus
//! `2^((parent.number + 1) / exp_diff_period - 2)` is added once the period
//! count exceeds 1, and the floor is applied again.
//!
//! # Target semantics
//!
//! A seal is valid when its 32-byte result, read as a big-endian integer, is
//! at most `2^256 / difficulty`. Higher difficulty means a smaller target.

use primitive_types::U256;

use crate::constants::{ChainConfig, DifficultyParams, DifficultyRule};
use crate::types::{BlockHeader, Hash256};

/// Difficulty for a child of `parent` stamped with `time`, under the rule the
/// fork schedule activates for `parent.number + 1`.
pub fn calc_difficulty(config: &ChainConfig, time: u64, parent: &BlockHeader) -> U256 {
    match config.forks.rule_at(parent.number.saturating_add(1)) {
        DifficultyRule::Frontier => frontier_difficulty(&config.params, time, parent),
        DifficultyRule::Fixed(d) => d,
    }
}

/// Frontier adjustment with the exponential period bonus.
pub fn frontier_difficulty(params: &DifficultyParams, time: u64, parent: &BlockHeader) -> U256 {
    let adjust = parent.difficulty / U256::from(params.bound_divisor.max(1));
    let mut diff = if time.saturating_sub(parent.timestamp) < params.duration_limit {
        parent.difficulty.saturating_add(adjust)
    } else {
        parent.difficulty.saturating_sub(adjust)
    };
    diff = diff.max(params.minimum_difficulty);

    let period_count = parent.number.saturating_add(1) / params.exp_diff_period.max(1);
    if period_count > 1 {
        diff = diff.saturating_add(exp_bonus(period_count - 2));
        diff = diff.max(params.minimum_difficulty);
    }
    diff
}

/// `2^exponent`, saturating at `U256::MAX` once the shift leaves 256 bits.
fn exp_bonus(exponent: u64) -> U256 {
    if exponent >= 256 {
        U256::MAX
    } else {
        U256::one() << exponent as usize
    }
}

/// `2^256 / difficulty`, or `None` for zero difficulty.
///
/// Difficulty 1 yields `U256::MAX` (the true quotient does not fit).
///
/// # Examples
///
/// ```
/// use quarry_core::difficulty::target_for;
/// use primitive_types::U256;
/// assert_eq!(target_for(U256::zero()), None);
/// assert_eq!(target_for(U256::one()), Some(U256::MAX));
/// assert_eq!(target_for(U256::from(2u64)), Some(U256::one() << 255));
/// ```
pub fn target_for(difficulty: U256) -> Option<U256> {
    if difficulty.is_zero() {
        return None;
    }
    if difficulty == U256::one() {
        return Some(U256::MAX);
    }
    // 2^256 = MAX + 1, so floor(2^256 / d) = floor(MAX / d) + [MAX % d == d - 1]
    let (quot, rem) = U256::MAX.div_mod(difficulty);
    let carry = if rem == difficulty - U256::one() { U256::one() } else { U256::zero() };
    Some(quot + carry)
}

/// Whether a PoW result satisfies `difficulty`. Zero difficulty never does.
pub fn meets_target(result: &Hash256, difficulty: U256) -> bool {
    match target_for(difficulty) {
        Some(target) => result.to_u256() <= target,
        None => false,
    }
}
