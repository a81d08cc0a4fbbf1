//! Adversarial property-based test suite for Quarry.
//!
//! These tests try to break consensus and mining invariants with randomized
//! or deliberately malformed input, fed through the same engine and miner
//! entry points a peer or a pool submitter reaches.
//!
//! Attack vectors tested:
//! - Timestamp manipulation (future blocks, non-increasing timestamps)
//! - Difficulty forgery and adjustment bounds under adversarial timing
//! - Seal tampering (nonce and mix digest)
//! - Uncle abuse (ancestors, duplicates, dangling and excess uncles)
//! - Transaction replay and signature malleation
//! - Balance conservation across candidate blocks

use std::sync::Arc;

use primitive_types::U256;
use proptest::prelude::*;
use quarry_consensus::PowMode;
use quarry_core::chain_state::MemoryChain;
use quarry_core::constants::{ChainConfig, DifficultyParams};
use quarry_core::difficulty;
use quarry_core::error::{HeaderError, PoolError, TransactionError, UncleError};
use quarry_core::mempool::TxPool;
use quarry_core::state::WorldState;
use quarry_core::traits::{ChainHeaderReader, Engine};
use quarry_core::types::{Address, Block, BlockHeader, Hash256};
use quarry_node_lib::SharedChain;
use quarry_tests::helpers::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn genesis_header(chain: &MemoryChain) -> BlockHeader {
    chain.head().unwrap().header.clone()
}

/// Insert an empty block on top of `parent` and return its header.
fn extend(chain: &mut MemoryChain, parent: &BlockHeader, tag: u8, uncles: Vec<BlockHeader>) -> BlockHeader {
    let header = child_header(&ChainConfig::dev(), parent, 20, Address([tag; 20]));
    let block = Block::new(header, vec![], uncles, &[]);
    chain.insert_block(block.clone(), WorldState::default()).unwrap();
    block.header
}

/// genesis -> b1 -> b2, returned as (chain, [genesis, b1, b2]).
fn three_block_chain() -> (MemoryChain, Vec<BlockHeader>) {
    let mut chain = dev_chain(&[]);
    let genesis = genesis_header(&chain);
    let b1 = extend(&mut chain, &genesis, 1, vec![]);
    let b2 = extend(&mut chain, &b1, 2, vec![]);
    (chain, vec![genesis, b1, b2])
}

/// Block 3 on top of `parent` carrying `uncles`.
fn block_with_uncles(parent: &BlockHeader, uncles: Vec<BlockHeader>) -> Block {
    let header = child_header(&ChainConfig::dev(), parent, 20, Address([3; 20]));
    Block::new(header, vec![], uncles, &[])
}

fn mined_header(node: &TestNode) -> BlockHeader {
    assert_eq!(node.miner.run(Some(1)).unwrap(), 1);
    node.chain.get_header_by_number(1).unwrap().unwrap()
}

fn total_balance(state: &WorldState, accounts: &[Address]) -> U256 {
    accounts.iter().fold(U256::zero(), |acc, a| acc + state.balance(a))
}

// ---------------------------------------------------------------------------
// Timestamp manipulation
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Headers stamped beyond the allowed drift of the engine clock are rejected.
    #[test]
    fn future_blocks_rejected(excess in 16u64..1_000_000) {
        let engine = dev_engine(PowMode::Normal);
        let chain = dev_chain(&[]);
        let genesis = genesis_header(&chain);
        let mut header = child_header(&ChainConfig::dev(), &genesis, 1, Address([1; 20]));
        header.timestamp = NOW + excess;
        header.difficulty = difficulty::calc_difficulty(chain.config(), header.timestamp, &genesis);
        let result = engine.verify_header(&chain, &header);
        prop_assert_eq!(
            result,
            Err(HeaderError::FutureBlock { timestamp: NOW + excess, allowed: NOW + 15 })
        );
    }

    /// Anything within the drift allowance is accepted.
    #[test]
    fn drift_within_allowance_accepted(ahead in 0u64..=15) {
        let engine = dev_engine(PowMode::Normal);
        let chain = dev_chain(&[]);
        let genesis = genesis_header(&chain);
        let mut header = child_header(&ChainConfig::dev(), &genesis, 1, Address([1; 20]));
        header.timestamp = NOW + ahead;
        header.difficulty = difficulty::calc_difficulty(chain.config(), header.timestamp, &genesis);
        prop_assert_eq!(engine.verify_header(&chain, &header), Ok(()));
    }

    /// A child can never share or precede its parent's timestamp.
    #[test]
    fn non_increasing_timestamp_rejected(back in 0u64..10_000) {
        let engine = dev_engine(PowMode::Normal);
        let (chain, headers) = three_block_chain();
        let parent = &headers[2];
        let mut header = child_header(&ChainConfig::dev(), parent, 1, Address([1; 20]));
        header.timestamp = parent.timestamp.saturating_sub(back);
        let is_older = matches!(
            engine.verify_header(&chain, &header),
            Err(HeaderError::OlderBlockTime { .. })
        );
        prop_assert!(is_older, "timestamp {} accepted after parent {}", header.timestamp, parent.timestamp);
    }
}

// ---------------------------------------------------------------------------
// Difficulty
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// One adjustment step is exactly parent / 2048 in either direction,
    /// never below the floor.
    #[test]
    fn difficulty_moves_one_step(
        parent_diff in 16u64..u64::MAX / 2,
        dt in 1u64..200,
        number in 0u64..90_000,
    ) {
        let params = DifficultyParams::dev();
        let parent = BlockHeader {
            number,
            timestamp: 1_000,
            difficulty: U256::from(parent_diff),
            ..Default::default()
        };
        let got = difficulty::frontier_difficulty(&params, parent.timestamp + dt, &parent);
        let step = U256::from(parent_diff / 2048);
        let expected = if dt < params.duration_limit {
            parent.difficulty + step
        } else {
            (parent.difficulty - step).max(params.minimum_difficulty)
        };
        prop_assert_eq!(got, expected);
        prop_assert!(got >= params.minimum_difficulty);
    }

    /// Any difficulty other than the computed one is refused.
    #[test]
    fn forged_difficulty_rejected(delta in 1u64..1_000_000, raise in any::<bool>()) {
        let engine = dev_engine(PowMode::Normal);
        let (chain, headers) = three_block_chain();
        let mut header = child_header(&ChainConfig::dev(), &headers[2], 5, Address([1; 20]));
        let expected = header.difficulty;
        header.difficulty = if raise {
            expected + U256::from(delta)
        } else {
            expected.saturating_sub(U256::from(delta))
        };
        let rejected = matches!(
            engine.verify_header(&chain, &header),
            Err(HeaderError::InvalidDifficulty { .. })
        );
        prop_assert!(rejected, "forged difficulty {} accepted (expected {})", header.difficulty, expected);
    }

    /// Skipped or repeated block numbers are caught against the real parent.
    #[test]
    fn wrong_number_rejected(number in 0u64..1_000) {
        prop_assume!(number != 3);
        let (chain, headers) = three_block_chain();
        let mut header = child_header(&ChainConfig::dev(), &headers[2], 20, Address([1; 20]));
        header.number = number;
        let result = quarry_consensus::verify::verify_against_parent(
            chain.config(),
            &header,
            &headers[2],
            Some(header.timestamp),
        );
        prop_assert_eq!(result, Err(HeaderError::InvalidNumber { got: number, expected: 3 }));
    }
}

#[test]
fn batch_reports_each_forged_header_in_order() {
    let engine = dev_engine(PowMode::Normal);
    let chain = SharedChain::new(dev_chain(&[]));
    let config = ChainConfig::dev();
    let genesis = chain.head_header().unwrap();
    let h1 = child_header(&config, &genesis, 10, Address([1; 20]));
    let mut h2 = child_header(&config, &h1, 10, Address([2; 20]));
    let h3 = child_header(&config, &h2, 10, Address([3; 20]));
    h2.difficulty += U256::one();

    let (_abort, results) = engine.verify_headers(Arc::new(chain), vec![h1, h2, h3.clone()]);
    let results: Vec<_> = results.iter().collect();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Ok(()));
    assert!(matches!(results[1], Err(HeaderError::InvalidDifficulty { .. })));
    // h3 no longer links to the forged h2 and its real parent is unknown
    assert_eq!(results[2], Err(HeaderError::UnknownParent(h3.parent_hash)));
}

// ---------------------------------------------------------------------------
// Seal tampering
// ---------------------------------------------------------------------------

#[test]
fn tampered_mix_digest_rejected() {
    let node = test_node(PowMode::Normal, &[], true);
    let mut header = mined_header(&node);
    node.engine.verify_seal(&header).unwrap();
    header.mix_hash = Hash256([0xAB; 32]);
    assert_eq!(node.engine.verify_seal(&header), Err(HeaderError::InvalidMixDigest));
}

#[test]
fn zero_difficulty_seal_rejected() {
    let node = test_node(PowMode::Normal, &[], true);
    let mut header = mined_header(&node);
    header.difficulty = U256::zero();
    assert_eq!(node.engine.verify_seal(&header), Err(HeaderError::ZeroDifficulty));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Moving the nonce invalidates the recorded mix digest.
    #[test]
    fn tampered_nonce_rejected(offset in 1u64..u64::MAX) {
        let node = test_node(PowMode::Normal, &[], true);
        let mut header = mined_header(&node);
        header.nonce = header.nonce.wrapping_add(offset);
        prop_assert!(node.engine.verify_seal(&header).is_err());
    }
}

// ---------------------------------------------------------------------------
// Uncle abuse
// ---------------------------------------------------------------------------

#[test]
fn ancestor_as_uncle_rejected() {
    let engine = dev_engine(PowMode::Normal);
    let (chain, headers) = three_block_chain();
    let block = block_with_uncles(&headers[2], vec![headers[1].clone()]);
    assert_eq!(
        engine.verify_uncles(&chain, &block),
        Err(UncleError::UncleIsAncestor(headers[1].hash()))
    );
}

#[test]
fn same_uncle_twice_rejected() {
    let engine = dev_engine(PowMode::Normal);
    let (chain, headers) = three_block_chain();
    let uncle = child_header(&ChainConfig::dev(), &headers[2], 30, Address([9; 20]));
    let block = block_with_uncles(&headers[2], vec![uncle.clone(), uncle.clone()]);
    assert_eq!(engine.verify_uncles(&chain, &block), Err(UncleError::DuplicateUncle(uncle.hash())));
}

#[test]
fn uncle_already_included_by_an_ancestor_rejected() {
    let engine = dev_engine(PowMode::Normal);
    let (mut chain, headers) = three_block_chain();
    let uncle = child_header(&ChainConfig::dev(), &headers[2], 30, Address([9; 20]));
    let b3 = extend(&mut chain, &headers[2], 3, vec![uncle.clone()]);
    let block = block_with_uncles(&b3, vec![uncle.clone()]);
    assert_eq!(engine.verify_uncles(&chain, &block), Err(UncleError::DuplicateUncle(uncle.hash())));
}

#[test]
fn sibling_of_parent_is_dangling() {
    let engine = dev_engine(PowMode::Normal);
    let (chain, headers) = three_block_chain();
    // child of b1: a sibling of b2, not of the new block
    let uncle = child_header(&ChainConfig::dev(), &headers[1], 30, Address([9; 20]));
    let block = block_with_uncles(&headers[2], vec![uncle.clone()]);
    assert_eq!(engine.verify_uncles(&chain, &block), Err(UncleError::DanglingUncle(uncle.hash())));
}

#[test]
fn unknown_uncle_parent_is_dangling() {
    let engine = dev_engine(PowMode::Normal);
    let (chain, headers) = three_block_chain();
    let mut uncle = child_header(&ChainConfig::dev(), &headers[2], 30, Address([9; 20]));
    uncle.parent_hash = Hash256([0xDD; 32]);
    let block = block_with_uncles(&headers[2], vec![uncle.clone()]);
    assert_eq!(engine.verify_uncles(&chain, &block), Err(UncleError::DanglingUncle(uncle.hash())));
}

#[test]
fn excess_uncles_rejected() {
    let engine = dev_engine(PowMode::Normal);
    let (chain, headers) = three_block_chain();
    let uncles = (0..3)
        .map(|i| child_header(&ChainConfig::dev(), &headers[2], 30 + i, Address([9; 20])))
        .collect();
    let block = block_with_uncles(&headers[2], uncles);
    assert_eq!(engine.verify_uncles(&chain, &block), Err(UncleError::TooManyUncles { count: 3, max: 2 }));
}

#[test]
fn uncle_with_forged_difficulty_rejected() {
    let engine = dev_engine(PowMode::Normal);
    let (chain, headers) = three_block_chain();
    let mut uncle = child_header(&ChainConfig::dev(), &headers[2], 30, Address([9; 20]));
    uncle.difficulty += U256::one();
    let block = block_with_uncles(&headers[2], vec![uncle.clone()]);
    assert!(matches!(
        engine.verify_uncles(&chain, &block),
        Err(UncleError::InvalidUncle { source: HeaderError::InvalidDifficulty { .. }, .. })
    ));
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[test]
fn replayed_transaction_is_dropped() {
    let alice = keypair(1);
    let node = test_node(PowMode::Fake, &[(alice.address(), U256::from(1_000_000u64))], false);
    let tx = transfer(&alice, 0, Address([0xB0; 20]), 10, 1);
    node.miner.submit_transaction(tx.clone()).unwrap();
    node.miner.mine_cycle().unwrap();
    assert!(node.pool.lock().is_empty());

    // the included copy was removed, so the pool takes it again
    node.miner.submit_transaction(tx.clone()).unwrap();
    let candidate = node.miner.create_block_candidate().unwrap();
    assert!(candidate.block.transactions.is_empty());
    assert!(matches!(
        candidate.skipped.as_slice(),
        [(hash, TransactionError::InvalidNonce { expected: 1, got: 0, .. })] if *hash == tx.hash()
    ));
    assert!(node.pool.lock().is_empty());
}

#[test]
fn future_nonce_stays_pooled() {
    let alice = keypair(1);
    let node = test_node(PowMode::Fake, &[(alice.address(), U256::from(1_000_000u64))], false);
    node.miner.submit_transaction(transfer(&alice, 5, Address([0xB0; 20]), 10, 1)).unwrap();
    let candidate = node.miner.create_block_candidate().unwrap();
    assert!(candidate.block.transactions.is_empty());
    assert_eq!(node.pool.lock().len(), 1);
}

#[test]
fn pool_rejects_duplicates_and_malleated_transactions() {
    let alice = keypair(1);
    let mut pool = TxPool::default();
    let tx = transfer(&alice, 0, Address([0xB0; 20]), 10, 1);
    let hash = pool.insert(tx.clone()).unwrap();
    assert_eq!(pool.insert(tx.clone()), Err(PoolError::AlreadyKnown(hash)));

    let mut forged = tx;
    forged.value = 10_000;
    assert_eq!(pool.insert(forged.clone()), Err(PoolError::InvalidSignature(forged.hash())));
    assert_eq!(pool.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Transfers only move balances around: the candidate state holds exactly
    /// the genesis funds plus the block reward.
    #[test]
    fn candidate_conserves_balances(
        txs in prop::collection::vec((0usize..3, 0usize..3, 0u64..400_000, 1u64..5), 1..12),
    ) {
        let keys: Vec<_> = (1..=3).map(keypair).collect();
        let alloc: Vec<_> = keys.iter().map(|k| (k.address(), U256::from(500_000u64))).collect();
        let node = test_node(PowMode::Fake, &alloc, false);

        let mut nonces = [0u64; 3];
        for (from, to, value, gas_price) in txs {
            let tx = transfer(&keys[from], nonces[from], keys[to].address(), value, gas_price);
            nonces[from] += 1;
            // distinct (sender, nonce) pairs never collide in the pool
            node.miner.submit_transaction(tx).unwrap();
        }

        let candidate = node.miner.create_block_candidate().unwrap();
        let mut accounts: Vec<_> = keys.iter().map(|k| k.address()).collect();
        accounts.push(BENEFICIARY);
        let expected = U256::from(1_500_000u64) + DifficultyParams::dev().block_reward;
        prop_assert_eq!(total_balance(&candidate.state, &accounts), expected);
        prop_assert_eq!(candidate.block.header.state_root, candidate.state.state_root());
        prop_assert!(candidate.block.header.gas_used <= candidate.block.header.gas_limit);
    }
}
