//! Shared test helpers for E2E and adversarial tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use primitive_types::U256;
use quarry_consensus::{PowConfig, PowMode, ProofOfWork};
use quarry_core::chain_state::MemoryChain;
use quarry_core::clock;
use quarry_core::constants::{ChainConfig, TRANSFER_GAS};
use quarry_core::crypto::{sign_transaction, KeyPair};
use quarry_core::difficulty;
use quarry_core::error::ExecutorError;
use quarry_core::genesis::{genesis_block, GENESIS_TIMESTAMP};
use quarry_core::mempool::TxPool;
use quarry_core::traits::{ExecutionOutput, Executor};
use quarry_core::types::{Address, BlockHeader, ContractAction, ContractCode, Transaction};
use quarry_node_lib::executor::{UnavailableExecutor, STATE_CHANGE_PREFIX};
use quarry_node_lib::{ChannelBroadcaster, Miner, MinerSettings, SharedChain};

/// Wall clock every test engine and miner is frozen at.
pub const NOW: u64 = GENESIS_TIMESTAMP + 1_000_000;

/// Beneficiary used by [`test_node`].
pub const BENEFICIARY: Address = Address([0xBE; 20]);

/// Deterministic keypair from a seed byte.
pub fn keypair(seed: u8) -> KeyPair {
    KeyPair::from_secret_bytes([seed; 32])
}

/// Signed plain transfer.
pub fn transfer(from: &KeyPair, nonce: u64, to: Address, value: u64, gas_price: u64) -> Transaction {
    let mut tx = Transaction {
        nonce,
        gas_price,
        gas_limit: TRANSFER_GAS,
        to: Some(to),
        value,
        data: vec![],
        public_key: [0; 32],
        signature: vec![],
    };
    sign_transaction(&mut tx, from);
    tx
}

/// Signed contract action with a 100k gas limit.
pub fn contract_tx(from: &KeyPair, nonce: u64, action: &ContractAction) -> Transaction {
    let to = match action {
        ContractAction::CallContract { contract_address, .. } => Some(*contract_address),
        ContractAction::DeployContract { .. } => None,
    };
    let mut tx = Transaction {
        nonce,
        gas_price: 1,
        gas_limit: 100_000,
        to,
        value: 0,
        // serializing a derived enum cannot fail
        data: serde_json::to_vec(action).unwrap_or_default(),
        public_key: [0; 32],
        signature: vec![],
    };
    sign_transaction(&mut tx, from);
    tx
}

pub fn token_code() -> ContractCode {
    ContractCode { version: "1".into(), module: "kv".into(), name: "Store".into() }
}

/// Engine on the dev geometry with a frozen clock.
pub fn dev_engine(mode: PowMode) -> Arc<ProofOfWork> {
    let config = PowConfig {
        threads: 2,
        dataset_threads: 2,
        poll_interval_ms: 10,
        mode,
        ..Default::default()
    };
    Arc::new(ProofOfWork::with_clock(
        ChainConfig::dev().params,
        config,
        clock::fixed_clock(NOW),
    ))
}

/// Dev chain holding only a genesis block funded by `alloc`.
pub fn dev_chain(alloc: &[(Address, U256)]) -> MemoryChain {
    let config = ChainConfig::dev();
    let (genesis, state) = genesis_block(&config, alloc);
    MemoryChain::new(config, genesis, state)
}

/// Child of `parent` after `dt` seconds, with the difficulty the rules expect.
pub fn child_header(config: &ChainConfig, parent: &BlockHeader, dt: u64, beneficiary: Address) -> BlockHeader {
    let timestamp = parent.timestamp + dt;
    BlockHeader {
        number: parent.number + 1,
        parent_hash: parent.hash(),
        beneficiary,
        timestamp,
        difficulty: difficulty::calc_difficulty(config, timestamp, parent),
        gas_limit: config.gas_limit,
        ..Default::default()
    }
}

/// Key/value contract sandbox.
///
/// `init` costs 5_000 gas. `set` expects `{"contract", "key", "value"}` and
/// reports one storage write; `pay` expects `{"to", "amount"}` and reports one
/// balance credit. Anything else fails.
#[derive(Debug, Default)]
pub struct KvExecutor;

impl Executor for KvExecutor {
    fn execute(
        &self,
        _code: &ContractCode,
        function: &str,
        params: &serde_json::Value,
    ) -> Result<ExecutionOutput, ExecutorError> {
        let event = match function {
            "init" => return Ok(ExecutionOutput { logs: vec!["ready".into()], gas_used: 5_000 }),
            "set" => {
                let mut changes = serde_json::Map::new();
                let key = params["key"].as_str().unwrap_or_default().to_owned();
                changes.insert(key, params["value"].clone());
                serde_json::json!({
                    "type": "contract_state",
                    "contract_address": params["contract"],
                    "storage_changes": changes,
                })
            }
            "pay" => serde_json::json!({
                "type": "address_state",
                "address": params["to"],
                "balance_change": params["amount"],
            }),
            other => return Err(ExecutorError::Failed(format!("no function {other}"))),
        };
        Ok(ExecutionOutput {
            logs: vec![format!("{STATE_CHANGE_PREFIX} {event}")],
            gas_used: 20_000,
        })
    }
}

/// A miner wired to an in-memory chain, ready to mine.
pub struct TestNode {
    pub miner: Arc<Miner>,
    pub engine: Arc<ProofOfWork>,
    pub chain: SharedChain,
    pub pool: Arc<Mutex<TxPool>>,
    pub broadcaster: Arc<ChannelBroadcaster>,
}

pub fn test_node(mode: PowMode, alloc: &[(Address, U256)], allow_empty_blocks: bool) -> TestNode {
    build_node(mode, alloc, allow_empty_blocks, Arc::new(UnavailableExecutor))
}

pub fn test_node_with_executor(
    mode: PowMode,
    alloc: &[(Address, U256)],
    executor: Arc<dyn Executor>,
) -> TestNode {
    build_node(mode, alloc, false, executor)
}

fn build_node(
    mode: PowMode,
    alloc: &[(Address, U256)],
    allow_empty_blocks: bool,
    executor: Arc<dyn Executor>,
) -> TestNode {
    let engine = dev_engine(mode);
    let chain = SharedChain::new(dev_chain(alloc));
    let pool = Arc::new(Mutex::new(TxPool::default()));
    let broadcaster = Arc::new(ChannelBroadcaster::new(64));
    let settings = MinerSettings {
        beneficiary: BENEFICIARY,
        allow_empty_blocks,
        poll_interval: Duration::from_millis(10),
        idle_backoff: Duration::from_millis(10),
        ..Default::default()
    };
    let miner = Miner::new(
        Arc::clone(&engine),
        chain.clone(),
        Arc::clone(&pool),
        executor,
        broadcaster.clone(),
        settings,
    )
    .with_clock(clock::fixed_clock(NOW));
    TestNode { miner: Arc::new(miner), engine, chain, pool, broadcaster }
}
