//! Tentative application of one transaction to a candidate state.
//!
//! [`apply_transaction`] mutates the state it is given and may leave it
//! half-updated on error; callers pass a copy-on-write clone and keep it only
//! when the call succeeds.

use primitive_types::U256;
use quarry_core::codec;
use quarry_core::constants::TRANSFER_GAS;
use quarry_core::error::TransactionError;
use quarry_core::state::{ContractAccount, WorldState};
use quarry_core::traits::Executor;
use quarry_core::types::{Address, ContractAction, ContractCode, Transaction};
use tracing::trace;

use crate::executor::parse_state_changes;

/// Contract function run right after deployment.
pub const INIT_FUNCTION: &str = "init";

/// Block-level inputs to transaction application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    /// Receives the execution fee.
    pub beneficiary: Address,
    /// Gas already reserved by earlier transactions in the block.
    pub gas_used: u64,
    pub gas_limit: u64,
}

/// Apply `tx` to `state`, returning the gas it consumed.
///
/// The sender must hold `value + gas_price * gas_limit` up front; it is
/// charged `value + gas_used * gas_price`, with the fee credited to the
/// block beneficiary. Transfers cost [`TRANSFER_GAS`]; contract actions cost
/// what the executor reports, which may not exceed the transaction's gas limit.
pub fn apply_transaction(
    state: &mut WorldState,
    tx: &Transaction,
    ctx: &BlockContext,
    executor: &dyn Executor,
) -> Result<u64, TransactionError> {
    if !tx.is_valid() {
        return Err(TransactionError::InvalidSignature);
    }
    let sender = tx.sender();
    let expected = state.nonce(&sender);
    if tx.nonce != expected {
        return Err(TransactionError::InvalidNonce { address: sender, expected, got: tx.nonce });
    }

    let reserved = ctx.gas_used.checked_add(tx.gas_limit).ok_or(TransactionError::GasOverflow)?;
    if reserved > ctx.gas_limit {
        return Err(TransactionError::BlockGasExhausted {
            used: ctx.gas_used,
            requested: tx.gas_limit,
            limit: ctx.gas_limit,
        });
    }

    let action = tx.action()?;
    let value = U256::from(tx.value);
    let need = value.saturating_add(tx.max_fee());
    let have = state.balance(&sender);
    if have < need {
        return Err(TransactionError::InsufficientFunds { address: sender, have, need });
    }

    let (recipient, gas_used) = match action {
        None => {
            let to = tx
                .to
                .ok_or_else(|| TransactionError::InvalidPayload("transfer without recipient".into()))?;
            if tx.gas_limit < TRANSFER_GAS {
                return Err(TransactionError::OutOfGas { used: TRANSFER_GAS, limit: tx.gas_limit });
            }
            (to, TRANSFER_GAS)
        }
        Some(ContractAction::DeployContract { contract_code }) => {
            let address = codec::contract_address(&sender, tx.nonce);
            state.deploy_contract(
                address,
                ContractAccount { code: contract_code.clone(), owner: sender, storage: Default::default() },
            );
            let gas = run_contract(state, executor, tx, &contract_code, INIT_FUNCTION, &serde_json::json!([]))?;
            trace!(%address, gas, "contract deployed");
            (address, gas)
        }
        Some(ContractAction::CallContract { contract_address, function, parameters }) => {
            let code = state
                .contract(&contract_address)
                .map(|c| c.code.clone())
                .ok_or(TransactionError::UnknownContract(contract_address))?;
            let gas = run_contract(state, executor, tx, &code, &function, &parameters)?;
            (contract_address, gas)
        }
    };

    let fee = U256::from(gas_used) * U256::from(tx.gas_price);
    state.debit(&sender, value.saturating_add(fee))?;
    state.credit(&recipient, value);
    state.credit(&ctx.beneficiary, fee);
    state.increment_nonce(&sender);
    Ok(gas_used)
}

fn run_contract(
    state: &mut WorldState,
    executor: &dyn Executor,
    tx: &Transaction,
    code: &ContractCode,
    function: &str,
    params: &serde_json::Value,
) -> Result<u64, TransactionError> {
    let output = executor.execute(code, function, params)?;
    if output.gas_used > tx.gas_limit {
        return Err(TransactionError::OutOfGas { used: output.gas_used, limit: tx.gas_limit });
    }
    for change in parse_state_changes(&output.logs) {
        state.apply_change(&change)?;
    }
    Ok(output.gas_used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::crypto::{sign_transaction, KeyPair};
    use quarry_core::error::ExecutorError;
    use quarry_core::traits::ExecutionOutput;

    use crate::executor::UnavailableExecutor;

    const MINER: Address = Address([0xEE; 20]);

    /// Executor returning canned logs and gas.
    struct ScriptedExecutor {
        logs: Vec<String>,
        gas: u64,
    }

    impl Executor for ScriptedExecutor {
        fn execute(
            &self,
            _code: &ContractCode,
            _function: &str,
            _params: &serde_json::Value,
        ) -> Result<ExecutionOutput, ExecutorError> {
            Ok(ExecutionOutput { logs: self.logs.clone(), gas_used: self.gas })
        }
    }

    fn keypair() -> KeyPair {
        KeyPair::from_secret_bytes([7; 32])
    }

    fn ctx() -> BlockContext {
        BlockContext { beneficiary: MINER, gas_used: 0, gas_limit: 8_000_000 }
    }

    fn funded(amount: u64) -> WorldState {
        let mut state = WorldState::default();
        state.credit(&keypair().address(), U256::from(amount));
        state
    }

    fn signed(nonce: u64, to: Option<Address>, value: u64, data: Vec<u8>) -> Transaction {
        let mut tx = Transaction {
            nonce,
            gas_price: 2,
            gas_limit: 50_000,
            to,
            value,
            data,
            public_key: [0; 32],
            signature: vec![],
        };
        sign_transaction(&mut tx, &keypair());
        tx
    }

    fn code() -> ContractCode {
        ContractCode { version: "1".into(), module: "token".into(), name: "Token".into() }
    }

    // --- transfers ---

    #[test]
    fn transfer_moves_value_and_fee() {
        let mut state = funded(1_000_000);
        let to = Address([5; 20]);
        let tx = signed(0, Some(to), 1_000, vec![]);
        let gas = apply_transaction(&mut state, &tx, &ctx(), &UnavailableExecutor).unwrap();
        assert_eq!(gas, TRANSFER_GAS);
        let fee = TRANSFER_GAS * 2;
        assert_eq!(state.balance(&keypair().address()), U256::from(1_000_000 - 1_000 - fee));
        assert_eq!(state.balance(&to), U256::from(1_000u64));
        assert_eq!(state.balance(&MINER), U256::from(fee));
        assert_eq!(state.nonce(&keypair().address()), 1);
    }

    #[test]
    fn balance_must_cover_worst_case_fee() {
        // 1_000 + 21_000*2 would suffice, but 1_000 + 50_000*2 is required
        let mut state = funded(50_000);
        let tx = signed(0, Some(Address([5; 20])), 1_000, vec![]);
        let err = apply_transaction(&mut state, &tx, &ctx(), &UnavailableExecutor).unwrap_err();
        assert!(matches!(err, TransactionError::InsufficientFunds { .. }));
    }

    #[test]
    fn rejects_bad_signature() {
        let mut state = funded(1_000_000);
        let mut tx = signed(0, Some(Address([5; 20])), 1, vec![]);
        tx.value = 2;
        let err = apply_transaction(&mut state, &tx, &ctx(), &UnavailableExecutor).unwrap_err();
        assert_eq!(err, TransactionError::InvalidSignature);
    }

    #[test]
    fn rejects_wrong_nonce() {
        let mut state = funded(1_000_000);
        let tx = signed(3, Some(Address([5; 20])), 1, vec![]);
        let err = apply_transaction(&mut state, &tx, &ctx(), &UnavailableExecutor).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidNonce { expected: 0, got: 3, .. }));
    }

    #[test]
    fn rejects_transfer_without_recipient() {
        let mut state = funded(1_000_000);
        let tx = signed(0, None, 1, vec![]);
        let err = apply_transaction(&mut state, &tx, &ctx(), &UnavailableExecutor).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidPayload(_)));
    }

    #[test]
    fn respects_block_gas_limit() {
        let mut state = funded(1_000_000);
        let tx = signed(0, Some(Address([5; 20])), 1, vec![]);
        let nearly_full = BlockContext { gas_used: 7_990_000, ..ctx() };
        let err = apply_transaction(&mut state, &tx, &nearly_full, &UnavailableExecutor).unwrap_err();
        assert!(matches!(err, TransactionError::BlockGasExhausted { requested: 50_000, .. }));

        let overflow = BlockContext { gas_used: u64::MAX, gas_limit: u64::MAX, ..ctx() };
        let err = apply_transaction(&mut state, &tx, &overflow, &UnavailableExecutor).unwrap_err();
        assert_eq!(err, TransactionError::GasOverflow);
    }

    // --- contracts ---

    fn deploy_data() -> Vec<u8> {
        serde_json::to_vec(&ContractAction::DeployContract { contract_code: code() }).unwrap()
    }

    #[test]
    fn deploy_stores_contract_and_applies_changes() {
        let mut state = funded(1_000_000);
        let address = codec::contract_address(&keypair().address(), 0);
        let exec = ScriptedExecutor {
            logs: vec![format!(
                r#"STATE_CHANGE: {{"type":"contract_state","contract_address":"{address}","storage_changes":{{"owner":"me"}}}}"#
            )],
            gas: 30_000,
        };
        let tx = signed(0, None, 0, deploy_data());
        let gas = apply_transaction(&mut state, &tx, &ctx(), &exec).unwrap();
        assert_eq!(gas, 30_000);
        let account = state.contract(&address).unwrap();
        assert_eq!(account.owner, keypair().address());
        assert_eq!(account.storage["owner"], serde_json::json!("me"));
        assert_eq!(state.balance(&MINER), U256::from(60_000u64));
        assert_eq!(state.balance(&keypair().address()), U256::from(1_000_000u64 - 60_000));
    }

    #[test]
    fn call_requires_existing_contract() {
        let mut state = funded(1_000_000);
        let data = serde_json::to_vec(&ContractAction::CallContract {
            contract_address: Address([9; 20]),
            function: "mint".into(),
            parameters: serde_json::json!([1]),
        })
        .unwrap();
        let tx = signed(0, Some(Address([9; 20])), 0, data);
        let exec = ScriptedExecutor { logs: vec![], gas: 1 };
        let err = apply_transaction(&mut state, &tx, &ctx(), &exec).unwrap_err();
        assert_eq!(err, TransactionError::UnknownContract(Address([9; 20])));
    }

    #[test]
    fn call_applies_balance_changes() {
        let mut state = funded(1_000_000);
        let exec = ScriptedExecutor { logs: vec![], gas: 10_000 };
        apply_transaction(&mut state, &signed(0, None, 0, deploy_data()), &ctx(), &exec).unwrap();

        let contract = codec::contract_address(&keypair().address(), 0);
        let payee = Address([4; 20]);
        let exec = ScriptedExecutor {
            logs: vec![format!(
                r#"STATE_CHANGE: {{"type":"address_state","address":"{payee}","balance_change":77}}"#
            )],
            gas: 5_000,
        };
        let data = serde_json::to_vec(&ContractAction::CallContract {
            contract_address: contract,
            function: "pay".into(),
            parameters: serde_json::json!({"to": payee.to_string()}),
        })
        .unwrap();
        let gas = apply_transaction(&mut state, &signed(1, Some(contract), 0, data), &ctx(), &exec).unwrap();
        assert_eq!(gas, 5_000);
        assert_eq!(state.balance(&payee), U256::from(77u64));
        assert_eq!(state.nonce(&keypair().address()), 2);
    }

    #[test]
    fn executor_gas_above_limit_is_out_of_gas() {
        let mut state = funded(1_000_000);
        let exec = ScriptedExecutor { logs: vec![], gas: 50_001 };
        let err = apply_transaction(&mut state, &signed(0, None, 0, deploy_data()), &ctx(), &exec).unwrap_err();
        assert_eq!(err, TransactionError::OutOfGas { used: 50_001, limit: 50_000 });
    }

    #[test]
    fn executor_failure_is_reported() {
        let mut state = funded(1_000_000);
        let err = apply_transaction(&mut state, &signed(0, None, 0, deploy_data()), &ctx(), &UnavailableExecutor)
            .unwrap_err();
        assert_eq!(err, TransactionError::Executor(ExecutorError::Unavailable));
    }

    #[test]
    fn invalid_payload_is_rejected() {
        let mut state = funded(1_000_000);
        let tx = signed(0, None, 0, b"{\"action\":\"selfdestruct\"}".to_vec());
        let err = apply_transaction(&mut state, &tx, &ctx(), &UnavailableExecutor).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidPayload(_)));
    }

    #[test]
    fn snapshot_is_untouched_on_failure() {
        let committed = funded(1_000_000);
        let mut trial = committed.clone();
        let exec = ScriptedExecutor {
            logs: vec![r#"STATE_CHANGE: {"type":"address_state","address":"0x0404040404040404040404040404040404040404","balance_change":-1}"#.into()],
            gas: 1_000,
        };
        assert!(apply_transaction(&mut trial, &signed(0, None, 0, deploy_data()), &ctx(), &exec).is_err());
        assert_eq!(committed.balance(&keypair().address()), U256::from(1_000_000u64));
        assert_eq!(committed.nonce(&keypair().address()), 0);
    }
}
