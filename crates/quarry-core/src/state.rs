//! Copy-on-write account state.
//!
//! [`WorldState`] clones in O(1): each map sits behind an `Arc` and is only
//! copied on the first write after a clone (`Arc::make_mut`). The miner takes a
//! clone of the committed state as a candidate snapshot and a further clone per
//! transaction trial, so rejected transactions leave no trace.

use std::collections::BTreeMap;
use std::sync::Arc;

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::TransactionError;
use crate::traits::StateAccessor;
use crate::types::{Address, ContractCode, Hash256};

/// A deployed contract: its code reference, deployer and key/value storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAccount {
    pub code: ContractCode,
    pub owner: Address,
    pub storage: BTreeMap<String, serde_json::Value>,
}

/// A structured state mutation reported by the contract executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateChange {
    AddressState {
        address: Address,
        balance_change: i64,
    },
    ContractState {
        contract_address: Address,
        storage_changes: BTreeMap<String, serde_json::Value>,
    },
}

/// Canonical shape hashed by [`WorldState::state_root`]. Maps are walked in
/// key order; JSON storage values are committed in their compact text form.
#[derive(bincode::Encode)]
struct StateRecord {
    balances: Vec<(Address, [u8; 32])>,
    nonces: Vec<(Address, u64)>,
    contracts: Vec<ContractRecord>,
}

#[derive(bincode::Encode)]
struct ContractRecord {
    address: Address,
    owner: Address,
    version: String,
    module: String,
    name: String,
    storage: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldState {
    balances: Arc<BTreeMap<Address, U256>>,
    nonces: Arc<BTreeMap<Address, u64>>,
    contracts: Arc<BTreeMap<Address, ContractAccount>>,
}

impl WorldState {
    pub fn balance(&self, address: &Address) -> U256 {
        self.balances.get(address).copied().unwrap_or_default()
    }

    /// Next expected transaction nonce for `address`.
    pub fn nonce(&self, address: &Address) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, address: &Address, amount: U256) {
        if amount.is_zero() {
            return;
        }
        let entry = Arc::make_mut(&mut self.balances).entry(*address).or_default();
        *entry = entry.saturating_add(amount);
    }

    pub fn debit(&mut self, address: &Address, amount: U256) -> Result<(), TransactionError> {
        let have = self.balance(address);
        if have < amount {
            return Err(TransactionError::InsufficientFunds { address: *address, have, need: amount });
        }
        Arc::make_mut(&mut self.balances).insert(*address, have - amount);
        Ok(())
    }

    pub fn increment_nonce(&mut self, address: &Address) {
        let entry = Arc::make_mut(&mut self.nonces).entry(*address).or_insert(0);
        *entry = entry.saturating_add(1);
    }

    pub fn contract(&self, address: &Address) -> Option<&ContractAccount> {
        self.contracts.get(address)
    }

    pub fn deploy_contract(&mut self, address: Address, account: ContractAccount) {
        Arc::make_mut(&mut self.contracts).insert(address, account);
    }

    /// Apply one executor-reported change.
    pub fn apply_change(&mut self, change: &StateChange) -> Result<(), TransactionError> {
        match change {
            StateChange::AddressState { address, balance_change } => {
                let magnitude = U256::from(balance_change.unsigned_abs());
                if *balance_change >= 0 {
                    self.credit(address, magnitude);
                    Ok(())
                } else {
                    self.debit(address, magnitude)
                        .map_err(|_| TransactionError::BalanceUnderflow(*address))
                }
            }
            StateChange::ContractState { contract_address, storage_changes } => {
                let contracts = Arc::make_mut(&mut self.contracts);
                let account = contracts
                    .get_mut(contract_address)
                    .ok_or(TransactionError::UnknownContract(*contract_address))?;
                for (key, value) in storage_changes {
                    account.storage.insert(key.clone(), value.clone());
                }
                Ok(())
            }
        }
    }

    /// Deterministic commitment over balances, nonces and contract storage.
    pub fn state_root(&self) -> Hash256 {
        let record = StateRecord {
            balances: self.balances.iter().map(|(a, b)| (*a, codec::u256_bytes(b))).collect(),
            nonces: self.nonces.iter().map(|(a, n)| (*a, *n)).collect(),
            contracts: self
                .contracts
                .iter()
                .map(|(address, account)| ContractRecord {
                    address: *address,
                    owner: account.owner,
                    version: account.code.version.clone(),
                    module: account.code.module.clone(),
                    name: account.code.name.clone(),
                    storage: account.storage.iter().map(|(k, v)| (k.clone(), v.to_string())).collect(),
                })
                .collect(),
        };
        Hash256::digest(&codec::encode(&record))
    }

    /// Number of accounts with a recorded balance.
    pub fn account_count(&self) -> usize {
        self.balances.len()
    }
}

impl StateAccessor for WorldState {
    fn add_balance(&mut self, address: &Address, amount: U256) {
        self.credit(address, amount);
    }

    fn balance(&self, address: &Address) -> U256 {
        WorldState::balance(self, address)
    }

    fn current_state_root(&self) -> Hash256 {
        self.state_root()
    }
}
