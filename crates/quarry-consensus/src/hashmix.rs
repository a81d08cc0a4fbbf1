//! The memory-hard mixing function (hashimoto).
//!
//! ```text
//! seed   = sha3_512(seal_hash || le64(nonce))
//! mix    = seed words repeated to mix_bytes / 4 words
//! repeat loop_accesses times:
//!     page = fnv(i ^ seed[0], mix[i % mix_words]) % (dataset_size / mix_bytes)
//!     mix  = fnv(mix, items[page * (mix_bytes / hash_bytes) ..][.. mix_bytes / hash_bytes])
//! digest = mix compressed 4:1 with fnv, little-endian
//! result = sha3_256(seed || digest)
//! ```
//!
//! Dataset items are 64-byte rows read as sixteen little-endian u32 words.
//! The full variant reads them from the generated dataset; the light variant
//! derives each item from the epoch cache on demand.

use quarry_core::constants::DifficultyParams;
use quarry_core::types::Hash256;
use sha3::{Digest, Sha3_256, Sha3_512};

/// Bytes per dataset item (one Sha3-512 output).
pub const HASH_BYTES: usize = 64;

/// u32 words per dataset item.
pub const HASH_WORDS: usize = HASH_BYTES / 4;

pub const FNV_PRIME: u32 = 0x0100_0193;

/// A 64-byte row as words.
pub type Item = [u32; HASH_WORDS];

#[inline]
pub fn fnv(a: u32, b: u32) -> u32 {
    a.wrapping_mul(FNV_PRIME) ^ b
}

/// Word-wise `fnv` of `data` into `mix`.
#[inline]
pub fn fnv_hash(mix: &mut [u32], data: &[u32]) {
    for (m, d) in mix.iter_mut().zip(data) {
        *m = fnv(*m, *d);
    }
}

/// Read a 64-byte row as little-endian words. `bytes` must hold 64 bytes.
pub fn item_from_bytes(bytes: &[u8]) -> Item {
    let mut out = [0u32; HASH_WORDS];
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    out
}

pub fn item_to_bytes(item: &Item) -> [u8; HASH_BYTES] {
    let mut out = [0u8; HASH_BYTES];
    for (chunk, word) in out.chunks_exact_mut(4).zip(item) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

/// Sha3-512 of a row, returned as words.
pub fn sha3_512_item(item: &Item) -> Item {
    let digest = Sha3_512::digest(item_to_bytes(item));
    item_from_bytes(&digest)
}

/// Output of one hashimoto evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixOutput {
    /// Compressed mix; stored in the header as `mix_hash`.
    pub digest: Hash256,
    /// Value compared against the difficulty target.
    pub result: Hash256,
}

/// Evaluate hashimoto over a dataset of `dataset_size` bytes, fetching items through `lookup`.
pub fn hashimoto<F>(
    params: &DifficultyParams,
    dataset_size: u64,
    seal_hash: &Hash256,
    nonce: u64,
    lookup: F,
) -> MixOutput
where
    F: Fn(u64) -> Item,
{
    let mut preimage = [0u8; 40];
    preimage[..32].copy_from_slice(seal_hash.as_bytes());
    preimage[32..].copy_from_slice(&nonce.to_le_bytes());
    let seed_bytes = Sha3_512::digest(preimage);
    let seed = item_from_bytes(&seed_bytes);

    let mix_words = (params.mix_bytes / 4) as usize;
    let items_per_page = (params.mix_bytes / HASH_BYTES as u64).max(1);
    let pages = (dataset_size / params.mix_bytes).max(1);

    let mut mix: Vec<u32> = (0..mix_words).map(|i| seed[i % HASH_WORDS]).collect();

    for i in 0..params.loop_accesses {
        let page = u64::from(fnv(i as u32 ^ seed[0], mix[i as usize % mix_words])) % pages;
        for j in 0..items_per_page {
            let item = lookup(page * items_per_page + j);
            let start = j as usize * HASH_WORDS;
            fnv_hash(&mut mix[start..start + HASH_WORDS], &item);
        }
    }

    let mut digest = [0u8; 32];
    for (chunk, quad) in digest.chunks_exact_mut(4).zip(mix.chunks_exact(4)) {
        let word = fnv(fnv(fnv(quad[0], quad[1]), quad[2]), quad[3]);
        chunk.copy_from_slice(&word.to_le_bytes());
    }

    let mut hasher = Sha3_256::new();
    hasher.update(seed_bytes);
    hasher.update(digest);
    MixOutput {
        digest: Hash256(digest),
        result: Hash256(hasher.finalize().into()),
    }
}

/// Hashimoto over a fully generated dataset.
pub fn hashimoto_full(params: &DifficultyParams, dataset: &[u8], seal_hash: &Hash256, nonce: u64) -> MixOutput {
    let rows = (dataset.len() / HASH_BYTES).max(1) as u64;
    hashimoto(params, dataset.len() as u64, seal_hash, nonce, |index| {
        let offset = (index % rows) as usize * HASH_BYTES;
        item_from_bytes(&dataset[offset..offset + HASH_BYTES])
    })
}

/// Hashimoto deriving each dataset item from the verification cache.
pub fn hashimoto_light(
    params: &DifficultyParams,
    dataset_size: u64,
    cache: &[u8],
    seal_hash: &Hash256,
    nonce: u64,
) -> MixOutput {
    hashimoto(params, dataset_size, seal_hash, nonce, |index| {
        crate::dataset::calc_dataset_item(params, cache, index)
    })
}
