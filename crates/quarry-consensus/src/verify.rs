//! Header and uncle rules.
//!
//! Checks run cheapest first: known block and missing parent short-circuit
//! before any field is inspected. Uncle headers are checked with the same
//! parent rules, minus the future-timestamp bound.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use quarry_core::constants::ChainConfig;
use quarry_core::difficulty;
use quarry_core::error::{HeaderError, UncleError};
use quarry_core::signal::Signal;
use quarry_core::traits::{ChainHeaderReader, ChainReader};
use quarry_core::types::{Block, BlockHeader, Hash256};
use tracing::{debug, error};

/// Rules relating `header` to an already resolved `parent`.
///
/// `now` is the local clock in Unix seconds. `None` selects uncle mode, which
/// skips the future-timestamp bound.
pub fn verify_against_parent(
    config: &ChainConfig,
    header: &BlockHeader,
    parent: &BlockHeader,
    now: Option<u64>,
) -> Result<(), HeaderError> {
    let params = &config.params;

    if header.extra_data.len() > params.max_extra_data_size {
        return Err(HeaderError::ExtraDataTooLong {
            len: header.extra_data.len(),
            max: params.max_extra_data_size,
        });
    }

    if let Some(now) = now {
        let allowed = now.saturating_add(params.allowed_future_block_time);
        if header.timestamp > allowed {
            return Err(HeaderError::FutureBlock { timestamp: header.timestamp, allowed });
        }
    }

    if header.timestamp <= parent.timestamp {
        return Err(HeaderError::OlderBlockTime {
            timestamp: header.timestamp,
            parent: parent.timestamp,
        });
    }

    let expected = difficulty::calc_difficulty(config, header.timestamp, parent);
    if header.difficulty != expected {
        return Err(HeaderError::InvalidDifficulty { got: header.difficulty, expected });
    }

    if header.gas_limit > params.max_gas_limit {
        return Err(HeaderError::GasLimitTooHigh { limit: header.gas_limit, max: params.max_gas_limit });
    }

    if header.gas_used > header.gas_limit {
        return Err(HeaderError::GasUsedExceedsLimit { used: header.gas_used, limit: header.gas_limit });
    }

    let expected_number = parent.number.saturating_add(1);
    if header.number != expected_number {
        return Err(HeaderError::InvalidNumber { got: header.number, expected: expected_number });
    }

    Ok(())
}

fn parent_of(chain: &dyn ChainHeaderReader, header: &BlockHeader) -> Result<BlockHeader, HeaderError> {
    let Some(number) = header.number.checked_sub(1) else {
        return Err(HeaderError::UnknownParent(header.parent_hash));
    };
    chain
        .get_header(&header.parent_hash, number)
        .map_err(|e| HeaderError::Unavailable(e.to_string()))?
        .ok_or(HeaderError::UnknownParent(header.parent_hash))
}

/// Full header check against the chain: not already known, parent present,
/// then [`verify_against_parent`].
pub fn verify_header(chain: &dyn ChainHeaderReader, header: &BlockHeader, now: u64) -> Result<(), HeaderError> {
    let hash = header.hash();
    let known = chain
        .get_header(&hash, header.number)
        .map_err(|e| HeaderError::Unavailable(e.to_string()))?;
    if known.is_some() {
        return Err(HeaderError::KnownBlock(hash));
    }
    let parent = parent_of(chain, header)?;
    verify_against_parent(chain.config(), header, &parent, Some(now))
}

/// Verify `headers` as a contiguous run on a background thread.
///
/// The first header's parent comes from `chain`; each later header uses its
/// predecessor in the batch when it links to it, otherwise `chain`. Results
/// arrive in input order. The worker checks `abort` before each header.
pub fn spawn_batch(
    chain: Arc<dyn ChainHeaderReader>,
    headers: Vec<BlockHeader>,
    now: u64,
) -> (Signal, Receiver<Result<(), HeaderError>>) {
    let abort = Signal::new();
    let (tx, rx) = crossbeam_channel::bounded(headers.len().max(1));
    if headers.is_empty() {
        return (abort, rx);
    }

    let worker_abort = abort.clone();
    let spawned = std::thread::Builder::new()
        .name("header-verifier".into())
        .spawn(move || {
            for (i, header) in headers.iter().enumerate() {
                if worker_abort.is_raised() {
                    debug!(verified = i, total = headers.len(), "header batch aborted");
                    return;
                }
                let linked = i
                    .checked_sub(1)
                    .map(|prev| &headers[prev])
                    .filter(|prev| prev.hash() == header.parent_hash);
                let result = match linked {
                    Some(parent) => verify_against_parent(chain.config(), header, parent, Some(now)),
                    None => parent_of(chain.as_ref(), header)
                        .and_then(|parent| verify_against_parent(chain.config(), header, &parent, Some(now))),
                };
                if tx.send(result).is_err() {
                    return;
                }
            }
        });
    if let Err(e) = spawned {
        error!("cannot start header verifier: {e}");
    }
    (abort, rx)
}

/// Uncle rules for `block`.
///
/// Walks up to `uncle_generations` ancestors from the block's parent,
/// collecting their hashes and every uncle they already include. Each
/// uncle must be new, must not be an ancestor, must share the block's
/// parent, and must pass the header rules in uncle mode.
pub fn verify_uncles(chain: &dyn ChainReader, block: &Block) -> Result<(), UncleError> {
    let params = &chain.config().params;
    if block.uncles.len() > params.max_uncles {
        return Err(UncleError::TooManyUncles { count: block.uncles.len(), max: params.max_uncles });
    }
    if block.uncles.is_empty() {
        return Ok(());
    }

    let mut seen: HashSet<Hash256> = HashSet::new();
    let mut ancestors: HashMap<Hash256, BlockHeader> = HashMap::new();
    let mut hash = block.header.parent_hash;
    let mut number = block.header.number.checked_sub(1);
    for _ in 0..params.uncle_generations {
        let Some(n) = number else { break };
        let Some(ancestor) = chain
            .get_block(&hash, n)
            .map_err(|e| UncleError::AncestorLookup(e.to_string()))?
        else {
            break;
        };
        seen.insert(hash);
        seen.extend(ancestor.uncles.iter().map(BlockHeader::hash));
        let next = ancestor.header.parent_hash;
        ancestors.insert(hash, ancestor.header);
        hash = next;
        number = n.checked_sub(1);
    }

    let block_hash = block.hash();
    ancestors.insert(block_hash, block.header.clone());
    seen.insert(block_hash);

    for uncle in &block.uncles {
        let hash = uncle.hash();
        if ancestors.contains_key(&hash) {
            return Err(UncleError::UncleIsAncestor(hash));
        }
        if !seen.insert(hash) {
            return Err(UncleError::DuplicateUncle(hash));
        }
        let parent = ancestors
            .get(&uncle.parent_hash)
            .filter(|_| uncle.parent_hash == block.header.parent_hash)
            .ok_or(UncleError::DanglingUncle(hash))?;
        verify_against_parent(chain.config(), uncle, parent, None)
            .map_err(|source| UncleError::InvalidUncle { hash, source })?;
    }
    Ok(())
}
