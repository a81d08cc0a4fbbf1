//! Core chain types: headers, blocks, transactions, receipts.
//!
//! Balances, difficulty and rewards are 256-bit unsigned integers ([`U256`]).
//! Gas quantities, nonces and timestamps are u64.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;
use std::str::FromStr;

use crate::codec;
use crate::error::{AddressError, TransactionError};

pub use primitive_types::U256;

/// A 32-byte hash value.
///
/// Used for header hashes, seal hashes, epoch seeds and body roots (all Sha3-256).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Parent of the genesis block.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Sha3-256 of arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha3_256::digest(data).into())
    }

    /// Interpret the hash as a big-endian 256-bit integer (PoW comparison).
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 20-byte account address. Serialized as a `0x`-prefixed hex string.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    /// Derive an address from an ed25519 public key: the last 20 bytes of its Sha3-256.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        Self::from_hash(&Hash256::digest(public_key))
    }

    /// Last 20 bytes of a 32-byte hash.
    pub fn from_hash(hash: &Hash256) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash.0[12..]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        let arr: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Block header.
///
/// `hash()` covers every field; `seal_hash()` covers every field except
/// `nonce` and `mix_hash`, and is the pre-image the PoW nonce is mixed into.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: Hash256,
    pub uncles_hash: Hash256,
    /// Address credited with the block reward.
    pub beneficiary: Address,
    pub difficulty: U256,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    pub transaction_root: Hash256,
    pub state_root: Hash256,
    pub receipts_root: Hash256,
    pub logs_bloom: Vec<u8>,
    /// Free-form bytes, at most `DifficultyParams::max_extra_data_size`.
    pub extra_data: Vec<u8>,
    /// Digest produced by sealing; bound into the header for verification.
    pub mix_hash: Hash256,
}

impl BlockHeader {
    /// Sha3-256 of the full canonical encoding.
    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&codec::encode_header(self))
    }

    /// Sha3-256 of the canonical encoding without `nonce` and `mix_hash`.
    pub fn seal_hash(&self) -> Hash256 {
        Hash256::digest(&codec::encode_seal_fields(self))
    }
}

/// A withdrawal record. Carried in the block body; this engine rejects any.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Withdrawal {
    pub index: u64,
    pub address: Address,
    pub amount: u64,
}

/// Contract source reference used by deploy actions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ContractCode {
    pub version: String,
    pub module: String,
    pub name: String,
}

/// The JSON action carried in a transaction's `data` field.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ContractAction {
    DeployContract {
        contract_code: ContractCode,
    },
    CallContract {
        contract_address: Address,
        function: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
}

/// A signed account-model transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Per-sender sequence number.
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    /// Recipient. `None` for contract deployment.
    pub to: Option<Address>,
    pub value: u64,
    /// Empty for plain transfers, otherwise a JSON [`ContractAction`].
    pub data: Vec<u8>,
    /// Ed25519 public key of the sender.
    pub public_key: [u8; 32],
    /// Ed25519 signature over [`signing_hash`](Self::signing_hash) (64 bytes).
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Hash of every field except the signature.
    pub fn signing_hash(&self) -> Hash256 {
        Hash256::digest(&codec::encode_transaction_unsigned(self))
    }

    /// Transaction identity: hash of the full canonical encoding, signature included.
    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&codec::encode(self))
    }

    pub fn sender(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    /// Verify the ed25519 signature against the embedded public key.
    pub fn is_valid(&self) -> bool {
        crate::crypto::verify_transaction(self).is_ok()
    }

    /// Decode the contract action, if any. `Ok(None)` for plain transfers.
    pub fn action(&self) -> Result<Option<ContractAction>, TransactionError> {
        if self.data.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&self.data)
            .map(Some)
            .map_err(|e| TransactionError::InvalidPayload(e.to_string()))
    }

    /// Maximum fee the sender can be charged: `gas_price * gas_limit`.
    pub fn max_fee(&self) -> U256 {
        U256::from(self.gas_price) * U256::from(self.gas_limit)
    }
}

/// Outcome of applying one transaction to a candidate block.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Receipt {
    pub success: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
}

/// A complete block: header plus ordered bodies.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<BlockHeader>,
    pub withdrawals: Vec<Withdrawal>,
}

impl Block {
    /// Assemble a block, recomputing `transaction_root`, `uncles_hash` and
    /// `receipts_root` from the given bodies.
    pub fn new(
        mut header: BlockHeader,
        transactions: Vec<Transaction>,
        uncles: Vec<BlockHeader>,
        receipts: &[Receipt],
    ) -> Self {
        header.transaction_root = codec::transactions_root(&transactions);
        header.uncles_hash = codec::uncles_hash(&uncles);
        header.receipts_root = codec::receipts_root(receipts);
        Self {
            header,
            transactions,
            uncles,
            withdrawals: Vec::new(),
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Copy of this block with the seal fields replaced.
    pub fn with_seal(&self, nonce: u64, mix_hash: Hash256) -> Self {
        let mut sealed = self.clone();
        sealed.header.nonce = nonce;
        sealed.header.mix_hash = mix_hash;
        sealed
    }
}
