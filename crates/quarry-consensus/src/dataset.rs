//! Per-epoch cache and dataset generation.
//!
//! Each epoch has a seed (Sha3-256 applied `epoch` times to 32 zero bytes), a
//! verification cache built from the seed, and a full dataset expanded from
//! the cache. Both sizes start from a linear formula in the epoch number and
//! step down by `2 * hash_bytes` until `size / hash_bytes` is prime.
//!
//! A [`Dataset`] owns both blobs for one epoch. Generation is idempotent:
//! callers racing on the same epoch serialize on a per-dataset lock and the
//! losers return the blob the winner produced.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use quarry_core::constants::DifficultyParams;
use quarry_core::error::DatasetError;
use quarry_core::types::Hash256;
use rayon::prelude::*;
use sha3::{Digest, Sha3_256, Sha3_512};
use tracing::{debug, info, warn};

use crate::hashmix::{self, HASH_BYTES, HASH_WORDS, Item, MixOutput, fnv, fnv_hash};

/// Seed for `epoch`: Sha3-256 iterated `epoch` times over 32 zero bytes.
pub fn seed_hash(epoch: u64) -> Hash256 {
    let mut seed = [0u8; 32];
    for _ in 0..epoch {
        seed = Sha3_256::digest(seed).into();
    }
    Hash256(seed)
}

pub fn cache_size(params: &DifficultyParams, epoch: u64) -> u64 {
    let start = params
        .cache_init_bytes
        .saturating_add(params.cache_growth_bytes.saturating_mul(epoch))
        .saturating_sub(params.hash_bytes);
    prime_size(start, params.hash_bytes)
}

pub fn dataset_size(params: &DifficultyParams, epoch: u64) -> u64 {
    let start = params
        .dataset_init_bytes
        .saturating_add(params.dataset_growth_bytes.saturating_mul(epoch))
        .saturating_sub(params.hash_bytes);
    prime_size(start, params.hash_bytes)
}

/// Step `size` down by `2 * unit` until `size / unit` is prime.
fn prime_size(mut size: u64, unit: u64) -> u64 {
    let floor = 2 * unit;
    while size > floor && !is_prime(size / unit) {
        size -= 2 * unit;
    }
    size.max(floor)
}

/// Deterministic Miller-Rabin, exact for every u64.
pub fn is_prime(n: u64) -> bool {
    const WITNESSES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];
    if n < 2 {
        return false;
    }
    for p in WITNESSES {
        if n % p == 0 {
            return n == p;
        }
    }
    let mut d = n - 1;
    let mut s = 0;
    while d % 2 == 0 {
        d /= 2;
        s += 1;
    }
    'witness: for a in WITNESSES {
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..s {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

fn mul_mod(a: u64, b: u64, m: u64) -> u64 {
    (u128::from(a) * u128::from(b) % u128::from(m)) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, m: u64) -> u64 {
    let mut acc = 1u64;
    base %= m;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, m);
        }
        base = mul_mod(base, base, m);
        exp >>= 1;
    }
    acc
}

fn allocate(epoch: u64, bytes: u64) -> Result<Vec<u8>, DatasetError> {
    let len = usize::try_from(bytes).map_err(|_| DatasetError::Allocation { epoch, bytes })?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| DatasetError::Allocation { epoch, bytes })?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Build the verification cache for `epoch` (`size` bytes).
pub fn generate_cache(params: &DifficultyParams, epoch: u64, size: u64) -> Result<Vec<u8>, DatasetError> {
    let mut cache = allocate(epoch, size)?;
    let rows = cache.len() / HASH_BYTES;
    if rows == 0 {
        return Ok(cache);
    }

    let seed = seed_hash(epoch);
    cache[..HASH_BYTES].copy_from_slice(&Sha3_512::digest(seed.as_bytes()));
    for i in 1..rows {
        let (done, rest) = cache.split_at_mut(i * HASH_BYTES);
        let prev = &done[(i - 1) * HASH_BYTES..];
        rest[..HASH_BYTES].copy_from_slice(&Sha3_512::digest(prev));
    }

    let mut temp = [0u8; HASH_BYTES];
    for _ in 0..params.cache_rounds {
        for dst in 0..rows {
            let src = (dst + rows - 1) % rows;
            let dst_off = dst * HASH_BYTES;
            let pick = u32::from_le_bytes([
                cache[dst_off],
                cache[dst_off + 1],
                cache[dst_off + 2],
                cache[dst_off + 3],
            ]) as usize
                % rows;
            for (k, byte) in temp.iter_mut().enumerate() {
                *byte = cache[src * HASH_BYTES + k] ^ cache[pick * HASH_BYTES + k];
            }
            cache[dst_off..dst_off + HASH_BYTES].copy_from_slice(&Sha3_512::digest(temp));
        }
    }
    Ok(cache)
}

/// Derive dataset item `index` from the cache.
pub fn calc_dataset_item(params: &DifficultyParams, cache: &[u8], index: u64) -> Item {
    let rows = (cache.len() / HASH_BYTES).max(1) as u64;
    let row = |r: u64| {
        let off = r as usize * HASH_BYTES;
        hashmix::item_from_bytes(&cache[off..off + HASH_BYTES])
    };

    let mut mix = row(index % rows);
    mix[0] ^= index as u32;
    mix = hashmix::sha3_512_item(&mix);
    for j in 0..params.loop_accesses {
        let parent = u64::from(fnv(index as u32 ^ j as u32, mix[j as usize % HASH_WORDS])) % rows;
        fnv_hash(&mut mix, &row(parent));
    }
    hashmix::sha3_512_item(&mix)
}

/// Expand `cache` into the full dataset on a pool of `threads` workers.
///
/// Items are written by index, so the output does not depend on scheduling.
pub fn generate_dataset(
    params: &DifficultyParams,
    epoch: u64,
    cache: &[u8],
    size: u64,
    threads: usize,
) -> Result<Vec<u8>, DatasetError> {
    let mut dataset = allocate(epoch, size)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(move |i| format!("dataset-{epoch}-{i}"))
        .build()
        .map_err(|e| DatasetError::WorkerPool(e.to_string()))?;
    pool.install(|| {
        dataset
            .par_chunks_mut(HASH_BYTES)
            .enumerate()
            .for_each(|(index, chunk)| {
                let item = calc_dataset_item(params, cache, index as u64);
                chunk.copy_from_slice(&hashmix::item_to_bytes(&item));
            });
    });
    Ok(dataset)
}

/// Generation knobs shared by every epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetOptions {
    /// Workers for full dataset expansion (0 = available CPUs).
    pub threads: usize,
    /// Generation running longer than this logs a warning.
    pub slow_threshold: Duration,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            slow_threshold: Duration::from_secs(60),
        }
    }
}

/// Cache and dataset for one epoch.
pub struct Dataset {
    epoch: u64,
    params: DifficultyParams,
    cache_size: u64,
    dataset_size: u64,
    options: DatasetOptions,
    lock: Mutex<()>,
    cache: OnceLock<Vec<u8>>,
    full: OnceLock<Vec<u8>>,
    scheduled: AtomicBool,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("epoch", &self.epoch)
            .field("cache_size", &self.cache_size)
            .field("dataset_size", &self.dataset_size)
            .field("generated", &self.generated())
            .finish_non_exhaustive()
    }
}

impl Dataset {
    pub fn new(
        epoch: u64,
        params: DifficultyParams,
        cache_size: u64,
        dataset_size: u64,
        options: DatasetOptions,
    ) -> Self {
        Self {
            epoch,
            params,
            cache_size,
            dataset_size,
            options,
            lock: Mutex::new(()),
            cache: OnceLock::new(),
            full: OnceLock::new(),
            scheduled: AtomicBool::new(false),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn params(&self) -> &DifficultyParams {
        &self.params
    }

    pub fn cache_size(&self) -> u64 {
        self.cache_size
    }

    pub fn dataset_size(&self) -> u64 {
        self.dataset_size
    }

    /// Whether the full dataset is ready.
    pub fn generated(&self) -> bool {
        self.full.get().is_some()
    }

    pub fn cache_generated(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Claim the right to generate in the background. Only the first caller wins.
    pub(crate) fn claim_background(&self) -> bool {
        !self.scheduled.swap(true, Ordering::AcqRel)
    }

    /// Build the verification cache if needed and return it.
    pub fn generate_cache(&self) -> Result<&[u8], DatasetError> {
        if let Some(cache) = self.cache.get() {
            return Ok(cache);
        }
        let _guard = self.lock.lock();
        self.cache_locked()
    }

    /// Build cache and full dataset if needed and return the dataset.
    pub fn generate(&self) -> Result<&[u8], DatasetError> {
        if let Some(full) = self.full.get() {
            return Ok(full);
        }
        let _guard = self.lock.lock();
        if let Some(full) = self.full.get() {
            return Ok(full);
        }
        let cache = self.cache_locked()?;
        let watch = SlowWatch::start(self.epoch, "dataset", self.options.slow_threshold);
        let started = Instant::now();
        let threads = match self.options.threads {
            0 => num_cpus::get(),
            n => n,
        };
        info!(epoch = self.epoch, bytes = self.dataset_size, threads, "generating dataset");
        let full = generate_dataset(&self.params, self.epoch, cache, self.dataset_size, threads)?;
        drop(watch);
        info!(epoch = self.epoch, elapsed_ms = started.elapsed().as_millis() as u64, "dataset generated");
        Ok(self.full.get_or_init(|| full))
    }

    /// Caller must hold `self.lock`.
    fn cache_locked(&self) -> Result<&[u8], DatasetError> {
        if let Some(cache) = self.cache.get() {
            return Ok(cache);
        }
        let watch = SlowWatch::start(self.epoch, "cache", self.options.slow_threshold);
        let started = Instant::now();
        debug!(epoch = self.epoch, bytes = self.cache_size, "generating verification cache");
        let cache = generate_cache(&self.params, self.epoch, self.cache_size)?;
        drop(watch);
        info!(epoch = self.epoch, elapsed_ms = started.elapsed().as_millis() as u64, "verification cache generated");
        Ok(self.cache.get_or_init(|| cache))
    }

    /// Full-dataset hashimoto, generating the dataset first if needed.
    pub fn hashimoto_full(&self, seal_hash: &Hash256, nonce: u64) -> Result<MixOutput, DatasetError> {
        let full = self.generate()?;
        Ok(hashmix::hashimoto_full(&self.params, full, seal_hash, nonce))
    }

    /// Cache-only hashimoto. Uses the full dataset instead when it is already built.
    pub fn hashimoto_light(&self, seal_hash: &Hash256, nonce: u64) -> Result<MixOutput, DatasetError> {
        if let Some(full) = self.full.get() {
            return Ok(hashmix::hashimoto_full(&self.params, full, seal_hash, nonce));
        }
        let cache = self.generate_cache()?;
        Ok(hashmix::hashimoto_light(&self.params, self.dataset_size, cache, seal_hash, nonce))
    }
}

/// Logs a warning if dropped later than `threshold` after `start`.
struct SlowWatch {
    _done: crossbeam_channel::Sender<()>,
}

impl SlowWatch {
    fn start(epoch: u64, what: &'static str, threshold: Duration) -> Self {
        let (done, rx) = crossbeam_channel::bounded::<()>(0);
        let spawned = std::thread::Builder::new()
            .name(format!("{what}-watch-{epoch}"))
            .spawn(move || {
                if let Err(crossbeam_channel::RecvTimeoutError::Timeout) = rx.recv_timeout(threshold) {
                    warn!(epoch, what, threshold_secs = threshold.as_secs(), "generation is taking too long");
                }
            });
        if let Err(e) = spawned {
            debug!(epoch, what, "slow-generation watchdog unavailable: {e}");
        }
        Self { _done: done }
    }
}
