//! Contract executor boundary.
//!
//! The sandbox itself lives outside this workspace. This module provides the
//! placeholder executor used when none is configured and the parser for the
//! `STATE_CHANGE:` events a sandbox reports in its log stream.

use quarry_core::error::ExecutorError;
use quarry_core::state::StateChange;
use quarry_core::traits::{ExecutionOutput, Executor};
use quarry_core::types::ContractCode;
use tracing::{debug, warn};

/// Prefix of log lines carrying a JSON state-change event.
pub const STATE_CHANGE_PREFIX: &str = "STATE_CHANGE:";

/// Executor that rejects every invocation.
///
/// Contract transactions are skipped from candidates while this is in use;
/// plain transfers are unaffected.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableExecutor;

impl Executor for UnavailableExecutor {
    fn execute(
        &self,
        _code: &ContractCode,
        _function: &str,
        _params: &serde_json::Value,
    ) -> Result<ExecutionOutput, ExecutorError> {
        Err(ExecutorError::Unavailable)
    }
}

/// Extract state changes from executor logs, in order.
///
/// Lines without the prefix are ignored. Malformed payloads are skipped with a
/// warning; well-formed events of an unknown type are skipped silently.
pub fn parse_state_changes(logs: &[String]) -> Vec<StateChange> {
    let mut changes = Vec::new();
    for line in logs {
        let Some(payload) = line.trim_start().strip_prefix(STATE_CHANGE_PREFIX) else {
            continue;
        };
        let value: serde_json::Value = match serde_json::from_str(payload.trim()) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "skipping malformed state change");
                continue;
            }
        };
        let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or_default().to_owned();
        if !matches!(kind.as_str(), "address_state" | "contract_state") {
            debug!(kind, "ignoring unknown state change type");
            continue;
        }
        match serde_json::from_value::<StateChange>(value) {
            Ok(change) => changes.push(change),
            Err(e) => warn!(kind, error = %e, "skipping malformed state change"),
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::types::Address;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unavailable_executor_fails() {
        let code = ContractCode { version: "1".into(), module: "token".into(), name: "Token".into() };
        let err = UnavailableExecutor.execute(&code, "init", &serde_json::json!([])).unwrap_err();
        assert_eq!(err, ExecutorError::Unavailable);
    }

    #[test]
    fn parses_both_event_kinds_in_order() {
        let addr = "0x0202020202020202020202020202020202020202";
        let logs = lines(&[
            "starting",
            &format!(r#"STATE_CHANGE: {{"type":"address_state","address":"{addr}","balance_change":-5}}"#),
            &format!(r#"STATE_CHANGE:{{"type":"contract_state","contract_address":"{addr}","storage_changes":{{"supply":100}}}}"#),
        ]);
        let changes = parse_state_changes(&logs);
        assert_eq!(changes.len(), 2);
        assert_eq!(
            changes[0],
            StateChange::AddressState { address: Address([2; 20]), balance_change: -5 }
        );
        match &changes[1] {
            StateChange::ContractState { contract_address, storage_changes } => {
                assert_eq!(*contract_address, Address([2; 20]));
                assert_eq!(storage_changes["supply"], serde_json::json!(100));
            }
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[test]
    fn skips_malformed_and_unknown() {
        let logs = lines(&[
            "STATE_CHANGE: {not json",
            r#"STATE_CHANGE: {"type":"mint","amount":3}"#,
            r#"STATE_CHANGE: {"type":"address_state","address":"0xzz","balance_change":1}"#,
            r#"STATE_CHANGE: {"type":"address_state","address":"0x0303030303030303030303030303030303030303","balance_change":7}"#,
        ]);
        let changes = parse_state_changes(&logs);
        assert_eq!(
            changes,
            vec![StateChange::AddressState { address: Address([3; 20]), balance_change: 7 }]
        );
    }

    #[test]
    fn no_events_is_empty() {
        assert!(parse_state_changes(&lines(&["hello", "world"])).is_empty());
        assert!(parse_state_changes(&[]).is_empty());
    }
}
