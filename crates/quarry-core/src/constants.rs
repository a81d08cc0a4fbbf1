//! Consensus parameters and chain configuration.
//!
//! [`DifficultyParams`] holds every protocol constant the engine reads; it is
//! immutable once a [`ChainConfig`] is built. [`ForkSchedule`] maps activation
//! heights to the difficulty rule in force.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Gas charged for a plain value transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// Block reward in the base unit (5 * 10^18).
pub const BLOCK_REWARD: u128 = 5_000_000_000_000_000_000;

/// Protocol constants for difficulty, rewards, header bounds and the PoW geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyParams {
    /// Divisor of the parent difficulty giving the per-block adjustment step.
    pub bound_divisor: u64,
    /// Floor below which difficulty never drops.
    pub minimum_difficulty: U256,
    /// Block times strictly below this many seconds raise difficulty.
    pub duration_limit: u64,
    /// Blocks per exponential difficulty period.
    pub exp_diff_period: u64,
    pub block_reward: U256,
    pub max_extra_data_size: usize,
    /// Seconds a header timestamp may run ahead of the local clock.
    pub allowed_future_block_time: u64,
    pub max_gas_limit: u64,
    pub max_uncles: usize,
    /// How many ancestor generations uncle validation walks.
    pub uncle_generations: u64,
    pub epoch_length: u64,
    pub word_bytes: u64,
    pub hash_bytes: u64,
    pub hash_words: u64,
    pub mix_bytes: u64,
    pub loop_accesses: u64,
    pub cache_init_bytes: u64,
    pub cache_growth_bytes: u64,
    pub dataset_init_bytes: u64,
    pub dataset_growth_bytes: u64,
    pub cache_rounds: u64,
}

impl DifficultyParams {
    /// Production parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use quarry_core::constants::DifficultyParams;
    /// let p = DifficultyParams::mainnet();
    /// assert_eq!(p.bound_divisor, 2048);
    /// assert_eq!(p.epoch_length, 30_000);
    /// ```
    pub fn mainnet() -> Self {
        Self {
            bound_divisor: 2048,
            minimum_difficulty: U256::from(131_072u64),
            duration_limit: 13,
            exp_diff_period: 100_000,
            block_reward: U256::from(BLOCK_REWARD),
            max_extra_data_size: 32,
            allowed_future_block_time: 15,
            max_gas_limit: 0x7fff_ffff_ffff_ffff,
            max_uncles: 2,
            uncle_generations: 7,
            epoch_length: 30_000,
            word_bytes: 4,
            hash_bytes: 64,
            hash_words: 16,
            mix_bytes: 128,
            loop_accesses: 64,
            cache_init_bytes: 1 << 24,
            cache_growth_bytes: 1 << 17,
            dataset_init_bytes: 1 << 30,
            dataset_growth_bytes: 1 << 23,
            cache_rounds: 3,
        }
    }

    /// Local development parameters: identical rules, kilobyte-sized
    /// cache/dataset and a tiny difficulty floor so blocks seal in milliseconds.
    pub fn dev() -> Self {
        Self {
            minimum_difficulty: U256::from(16u64),
            epoch_length: 100,
            cache_init_bytes: 1 << 12,
            cache_growth_bytes: 1 << 7,
            dataset_init_bytes: 1 << 15,
            dataset_growth_bytes: 1 << 10,
            ..Self::mainnet()
        }
    }

    /// Epoch a block number belongs to.
    pub fn epoch(&self, number: u64) -> u64 {
        number / self.epoch_length
    }
}

/// Difficulty rule active from a given block number onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DifficultyRule {
    /// Frontier adjustment with the exponential period bonus.
    Frontier,
    /// A constant difficulty, independent of the parent.
    Fixed(U256),
}

/// Ordered list of `(activation_number, rule)` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkSchedule {
    entries: Vec<(u64, DifficultyRule)>,
}

impl ForkSchedule {
    /// Build a schedule; entries are sorted by activation number.
    pub fn new(mut entries: Vec<(u64, DifficultyRule)>) -> Self {
        entries.sort_by_key(|(activation, _)| *activation);
        Self { entries }
    }

    /// Rule in force for block `number`: the last entry whose activation is
    /// at or below it. Falls back to [`DifficultyRule::Frontier`].
    ///
    /// # Examples
    ///
    /// ```
    /// use quarry_core::constants::{DifficultyRule, ForkSchedule};
    /// use primitive_types::U256;
    /// let forks = ForkSchedule::new(vec![
    ///     (0, DifficultyRule::Frontier),
    ///     (500, DifficultyRule::Fixed(U256::from(7u64))),
    /// ]);
    /// assert_eq!(forks.rule_at(499), DifficultyRule::Frontier);
    /// assert_eq!(forks.rule_at(500), DifficultyRule::Fixed(U256::from(7u64)));
    /// ```
    pub fn rule_at(&self, number: u64) -> DifficultyRule {
        self.entries
            .iter()
            .rev()
            .find(|(activation, _)| *activation <= number)
            .map(|(_, rule)| rule.clone())
            .unwrap_or(DifficultyRule::Frontier)
    }

    pub fn entries(&self) -> &[(u64, DifficultyRule)] {
        &self.entries
    }
}

impl Default for ForkSchedule {
    fn default() -> Self {
        Self::new(vec![(0, DifficultyRule::Frontier)])
    }
}

/// Settings returned by `ChainHeaderReader::config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    pub params: DifficultyParams,
    pub forks: ForkSchedule,
    /// Gas limit stamped on genesis and new candidates.
    pub gas_limit: u64,
}

impl ChainConfig {
    pub fn mainnet() -> Self {
        Self {
            name: "mainnet".into(),
            params: DifficultyParams::mainnet(),
            forks: ForkSchedule::default(),
            gas_limit: 8_000_000,
        }
    }

    pub fn dev() -> Self {
        Self {
            name: "dev".into(),
            params: DifficultyParams::dev(),
            forks: ForkSchedule::default(),
            gas_limit: 8_000_000,
        }
    }

    /// Look up a preset by name (`mainnet` or `dev`).
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "mainnet" => Some(Self::mainnet()),
            "dev" => Some(Self::dev()),
            _ => None,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_matches_protocol_table() {
        let p = DifficultyParams::mainnet();
        assert_eq!(p.minimum_difficulty, U256::from(131_072u64));
        assert_eq!(p.exp_diff_period, 100_000);
        assert_eq!(p.block_reward, U256::from(5u64) * U256::exp10(18));
        assert_eq!(p.max_extra_data_size, 32);
        assert_eq!(p.allowed_future_block_time, 15);
        assert_eq!(p.max_gas_limit, 0x7fffffffffffffff);
        assert_eq!(p.hash_words * p.word_bytes, p.hash_bytes);
        assert_eq!(p.loop_accesses, 64);
    }

    #[test]
    fn dev_keeps_rules_shrinks_geometry() {
        let dev = DifficultyParams::dev();
        let main = DifficultyParams::mainnet();
        assert_eq!(dev.bound_divisor, main.bound_divisor);
        assert_eq!(dev.mix_bytes, main.mix_bytes);
        assert!(dev.cache_init_bytes < main.cache_init_bytes);
        assert!(dev.minimum_difficulty < main.minimum_difficulty);
    }

    #[test]
    fn epoch_of_block() {
        let p = DifficultyParams::mainnet();
        assert_eq!(p.epoch(0), 0);
        assert_eq!(p.epoch(29_999), 0);
        assert_eq!(p.epoch(30_000), 1);
    }

    #[test]
    fn fork_schedule_sorts_and_resolves() {
        let forks = ForkSchedule::new(vec![
            (1000, DifficultyRule::Fixed(U256::one())),
            (10, DifficultyRule::Frontier),
        ]);
        assert_eq!(forks.entries()[0].0, 10);
        // before first activation: fallback
        assert_eq!(forks.rule_at(5), DifficultyRule::Frontier);
        assert_eq!(forks.rule_at(999), DifficultyRule::Frontier);
        assert_eq!(forks.rule_at(u64::MAX), DifficultyRule::Fixed(U256::one()));
    }

    #[test]
    fn preset_lookup() {
        assert_eq!(ChainConfig::preset("dev").unwrap().name, "dev");
        assert!(ChainConfig::preset("moon").is_none());
    }
}
