//! Canonical byte encoding for headers, transactions and block bodies.
//!
//! Everything hashed goes through bincode with the [`canonical`] config:
//! fixed-width little-endian integers, u64 length prefixes, and a decode
//! limit so a forged length prefix cannot request an absurd allocation.
//! `U256` has no bincode impl and is carried as 32 big-endian bytes.
//!
//! Header seal fields are encoded in this order: parent_hash, uncles_hash,
//! beneficiary, state_root, transaction_root, receipts_root, logs_bloom,
//! difficulty, number, gas_limit, gas_used, timestamp, extra_data. The full
//! header appends mix_hash and nonce, so the seal encoding is a prefix of it.

use bincode::config::{Configuration, Fixint, Limit, LittleEndian};
use bincode::error::DecodeError;
use bincode::{Decode, Encode};

use crate::error::EncodingError;
use crate::types::{Address, Block, BlockHeader, Hash256, Receipt, Transaction, U256, Withdrawal};

/// Largest value [`decode_header`] and [`decode_block`] accept.
pub const MAX_DECODE_BYTES: usize = 16 << 20;

/// The bincode configuration behind every canonical encoding.
pub fn canonical() -> Configuration<LittleEndian, Fixint, Limit<MAX_DECODE_BYTES>> {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .with_limit::<MAX_DECODE_BYTES>()
}

/// Canonical bytes of any bincode value.
pub fn encode<T: Encode>(value: &T) -> Vec<u8> {
    // encoding into a Vec only fails on writer errors, which a Vec never raises
    bincode::encode_to_vec(value, canonical()).unwrap_or_default()
}

fn decode<T: Decode<()>>(bytes: &[u8]) -> Result<T, EncodingError> {
    let (value, read) = bincode::decode_from_slice(bytes, canonical()).map_err(|e| match e {
        DecodeError::UnexpectedEnd { additional } => EncodingError::UnexpectedEnd(additional),
        other => EncodingError::Decode(other.to_string()),
    })?;
    match bytes.len() - read {
        0 => Ok(value),
        n => Err(EncodingError::TrailingBytes(n)),
    }
}

pub fn u256_bytes(v: &U256) -> [u8; 32] {
    let mut be = [0u8; 32];
    v.to_big_endian(&mut be);
    be
}

#[derive(Encode, Decode)]
struct SealFields {
    parent_hash: Hash256,
    uncles_hash: Hash256,
    beneficiary: Address,
    state_root: Hash256,
    transaction_root: Hash256,
    receipts_root: Hash256,
    logs_bloom: Vec<u8>,
    difficulty: [u8; 32],
    number: u64,
    gas_limit: u64,
    gas_used: u64,
    timestamp: u64,
    extra_data: Vec<u8>,
}

impl From<&BlockHeader> for SealFields {
    fn from(h: &BlockHeader) -> Self {
        Self {
            parent_hash: h.parent_hash,
            uncles_hash: h.uncles_hash,
            beneficiary: h.beneficiary,
            state_root: h.state_root,
            transaction_root: h.transaction_root,
            receipts_root: h.receipts_root,
            logs_bloom: h.logs_bloom.clone(),
            difficulty: u256_bytes(&h.difficulty),
            number: h.number,
            gas_limit: h.gas_limit,
            gas_used: h.gas_used,
            timestamp: h.timestamp,
            extra_data: h.extra_data.clone(),
        }
    }
}

#[derive(Encode, Decode)]
struct HeaderRecord {
    seal: SealFields,
    mix_hash: Hash256,
    nonce: u64,
}

impl From<&BlockHeader> for HeaderRecord {
    fn from(h: &BlockHeader) -> Self {
        Self { seal: SealFields::from(h), mix_hash: h.mix_hash, nonce: h.nonce }
    }
}

impl From<HeaderRecord> for BlockHeader {
    fn from(r: HeaderRecord) -> Self {
        let s = r.seal;
        Self {
            number: s.number,
            parent_hash: s.parent_hash,
            uncles_hash: s.uncles_hash,
            beneficiary: s.beneficiary,
            difficulty: U256::from_big_endian(&s.difficulty),
            nonce: r.nonce,
            gas_limit: s.gas_limit,
            gas_used: s.gas_used,
            timestamp: s.timestamp,
            transaction_root: s.transaction_root,
            state_root: s.state_root,
            receipts_root: s.receipts_root,
            logs_bloom: s.logs_bloom,
            extra_data: s.extra_data,
            mix_hash: r.mix_hash,
        }
    }
}

/// Canonical encoding of every header field except `nonce` and `mix_hash`.
pub fn encode_seal_fields(h: &BlockHeader) -> Vec<u8> {
    encode(&SealFields::from(h))
}

/// Full canonical header encoding (seal fields, then mix_hash, then nonce).
pub fn encode_header(h: &BlockHeader) -> Vec<u8> {
    encode(&HeaderRecord::from(h))
}

/// Decode a full canonical header. Fails on truncation or trailing bytes.
pub fn decode_header(bytes: &[u8]) -> Result<BlockHeader, EncodingError> {
    decode::<HeaderRecord>(bytes).map(BlockHeader::from)
}

#[derive(Encode)]
struct UnsignedTransaction {
    nonce: u64,
    gas_price: u64,
    gas_limit: u64,
    to: Option<Address>,
    value: u64,
    data: Vec<u8>,
    public_key: [u8; 32],
}

/// Canonical encoding of a transaction without its signature.
pub fn encode_transaction_unsigned(tx: &Transaction) -> Vec<u8> {
    encode(&UnsignedTransaction {
        nonce: tx.nonce,
        gas_price: tx.gas_price,
        gas_limit: tx.gas_limit,
        to: tx.to,
        value: tx.value,
        data: tx.data.clone(),
        public_key: tx.public_key,
    })
}

/// Root over an ordered list of transactions: hash of their encoded ids.
pub fn transactions_root(txs: &[Transaction]) -> Hash256 {
    let ids: Vec<Hash256> = txs.iter().map(Transaction::hash).collect();
    Hash256::digest(&encode(&ids))
}

/// Hash over an ordered list of uncle headers.
pub fn uncles_hash(uncles: &[BlockHeader]) -> Hash256 {
    let hashes: Vec<Hash256> = uncles.iter().map(BlockHeader::hash).collect();
    Hash256::digest(&encode(&hashes))
}

/// `uncles_hash` of a block without uncles.
pub fn empty_uncles_hash() -> Hash256 {
    uncles_hash(&[])
}

pub fn receipts_root(receipts: &[Receipt]) -> Hash256 {
    Hash256::digest(&encode(&receipts.to_vec()))
}

/// Address of a contract deployed by `sender` with transaction nonce `nonce`.
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    Address::from_hash(&Hash256::digest(&encode(&(*sender, nonce))))
}

#[derive(Encode, Decode)]
struct BlockRecord {
    header: HeaderRecord,
    transactions: Vec<Transaction>,
    uncles: Vec<HeaderRecord>,
    withdrawals: Vec<Withdrawal>,
}

/// Serialize a block for transport or storage.
pub fn encode_block(block: &Block) -> Result<Vec<u8>, EncodingError> {
    let record = BlockRecord {
        header: HeaderRecord::from(&block.header),
        transactions: block.transactions.clone(),
        uncles: block.uncles.iter().map(HeaderRecord::from).collect(),
        withdrawals: block.withdrawals.clone(),
    };
    bincode::encode_to_vec(&record, canonical()).map_err(|e| EncodingError::Encode(e.to_string()))
}

pub fn decode_block(bytes: &[u8]) -> Result<Block, EncodingError> {
    let record: BlockRecord = decode(bytes)?;
    Ok(Block {
        header: record.header.into(),
        transactions: record.transactions,
        uncles: record.uncles.into_iter().map(BlockHeader::from).collect(),
        withdrawals: record.withdrawals,
    })
}
