//! Error types for the Quarry consensus core.
use primitive_types::U256;
use thiserror::Error;

use crate::types::{Address, Hash256};

/// A header violated one of the consensus rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("block already known: {0}")] KnownBlock(Hash256),
    #[error("unknown parent: {0}")] UnknownParent(Hash256),
    #[error("extra data too long: {len} > {max}")] ExtraDataTooLong { len: usize, max: usize },
    #[error("block in the future: timestamp {timestamp} > allowed {allowed}")] FutureBlock { timestamp: u64, allowed: u64 },
    #[error("timestamp {timestamp} not after parent {parent}")] OlderBlockTime { timestamp: u64, parent: u64 },
    #[error("invalid difficulty: got {got}, expected {expected}")] InvalidDifficulty { got: U256, expected: U256 },
    #[error("gas limit too high: {limit} > {max}")] GasLimitTooHigh { limit: u64, max: u64 },
    #[error("gas used {used} exceeds gas limit {limit}")] GasUsedExceedsLimit { used: u64, limit: u64 },
    #[error("invalid block number: got {got}, expected {expected}")] InvalidNumber { got: u64, expected: u64 },
    #[error("zero difficulty")] ZeroDifficulty,
    #[error("invalid mix digest")] InvalidMixDigest,
    #[error("invalid proof-of-work")] InvalidPoW,
    #[error("verification unavailable: {0}")] Unavailable(String),
}

/// An uncle list failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UncleError {
    #[error("too many uncles: {count} > {max}")] TooManyUncles { count: usize, max: usize },
    #[error("duplicate uncle: {0}")] DuplicateUncle(Hash256),
    #[error("uncle is ancestor: {0}")] UncleIsAncestor(Hash256),
    #[error("dangling uncle: {0}")] DanglingUncle(Hash256),
    #[error("invalid uncle {hash}: {source}")] InvalidUncle { hash: Hash256, source: HeaderError },
    #[error("ancestor lookup failed: {0}")] AncestorLookup(String),
}

/// Chain data was missing or could not be stored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("header not found: {0}")] HeaderNotFound(Hash256),
    #[error("block not found: {0}")] BlockNotFound(Hash256),
    #[error("duplicate block: {0}")] DuplicateBlock(Hash256),
    #[error("unknown parent: {0}")] UnknownParent(Hash256),
    #[error("number mismatch: expected {expected}, got {got}")] NumberMismatch { expected: u64, got: u64 },
    #[error("empty chain: no genesis block")] EmptyChain,
}

/// Opaque failure reported by the contract sandbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("execution failed: {0}")] Failed(String),
    #[error("executor unavailable")] Unavailable,
}

/// A transaction could not be applied to the candidate state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("invalid signature")] InvalidSignature,
    #[error("invalid nonce for {address}: expected {expected}, got {got}")] InvalidNonce { address: Address, expected: u64, got: u64 },
    #[error("insufficient funds for {address}: have {have}, need {need}")] InsufficientFunds { address: Address, have: U256, need: U256 },
    #[error("invalid payload: {0}")] InvalidPayload(String),
    #[error("unknown contract: {0}")] UnknownContract(Address),
    #[error("out of gas: used {used}, limit {limit}")] OutOfGas { used: u64, limit: u64 },
    #[error("block gas limit reached: {used} + {requested} > {limit}")] BlockGasExhausted { used: u64, requested: u64, limit: u64 },
    #[error("gas arithmetic overflow")] GasOverflow,
    #[error("balance underflow for {0}")] BalanceUnderflow(Address),
    #[error("executor: {0}")] Executor(#[from] ExecutorError),
}

/// Malformed bytes handed to the canonical codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unexpected end of input: {0} more bytes needed")] UnexpectedEnd(usize),
    #[error("trailing bytes: {0}")] TrailingBytes(usize),
    #[error("encode: {0}")] Encode(String),
    #[error("decode: {0}")] Decode(String),
}

/// Per-epoch dataset construction failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatasetError {
    #[error("cannot allocate {bytes} bytes for epoch {epoch}")] Allocation { epoch: u64, bytes: u64 },
    #[error("worker pool: {0}")] WorkerPool(String),
}

/// The nonce search could not run to completion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SealError {
    #[error(transparent)] Dataset(#[from] DatasetError),
    #[error("zero difficulty")] ZeroDifficulty,
    #[error("all seal workers exited without a result")] WorkersExited,
    #[error("engine closed")] Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("withdrawals are not supported by this engine")] WithdrawalsUnsupported,
    #[error(transparent)] Header(#[from] HeaderError),
    #[error(transparent)] Chain(#[from] ChainError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("transaction already in pool: {0}")] AlreadyKnown(Hash256),
    #[error("pool full")] PoolFull,
    #[error("invalid signature on {0}")] InvalidSignature(Hash256),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid hex: {0}")] InvalidHex(String),
    #[error("invalid length: {0}")] InvalidLength(usize),
}

#[derive(Error, Debug)]
pub enum QuarryError {
    #[error(transparent)] Header(#[from] HeaderError),
    #[error(transparent)] Uncle(#[from] UncleError),
    #[error(transparent)] Chain(#[from] ChainError),
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Encoding(#[from] EncodingError),
    #[error(transparent)] Dataset(#[from] DatasetError),
    #[error(transparent)] Seal(#[from] SealError),
    #[error(transparent)] Engine(#[from] EngineError),
    #[error(transparent)] Pool(#[from] PoolError),
    #[error("storage: {0}")] Storage(String),
}
