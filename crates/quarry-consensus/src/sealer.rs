//! Parallel nonce search.
//!
//! One seal call spawns a fixed set of named worker threads, each starting
//! from its own random nonce. Workers share an abort [`Signal`] and a
//! single-slot result channel; the first to find a nonce fills the slot and
//! the rest see the abort on their next iteration. The calling thread waits
//! on the slot with a timed receive so it can observe `stop`, engine updates
//! and engine shutdown between polls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use primitive_types::U256;
use quarry_core::difficulty;
use quarry_core::error::{DatasetError, SealError};
use quarry_core::signal::Signal;
use quarry_core::traits::SealOutcome;
use quarry_core::types::Block;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::epoch_cache::DatasetCache;
use crate::hashmix;

/// Hashes a worker accumulates before publishing them to the shared counter.
const HASH_BATCH: u64 = 1 << 15;

enum WorkerEvent {
    Found(Block),
    Failed(DatasetError),
}

/// How a single search round ended.
enum Round {
    Done(Result<SealOutcome, SealError>),
    Restart,
}

pub struct SealScheduler {
    threads: usize,
    poll_interval: Duration,
    rng: Mutex<Option<StdRng>>,
    hashes: Arc<AtomicU64>,
    started: Instant,
    /// Bumped by every update; each seal call compares against its own snapshot.
    updates: AtomicU64,
    restarts: AtomicU64,
    closed: Signal,
}

impl std::fmt::Debug for SealScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealScheduler")
            .field("threads", &self.threads)
            .field("hashes", &self.hashes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SealScheduler {
    /// `threads == 0` uses every available CPU.
    pub fn new(threads: usize, poll_interval: Duration) -> Self {
        Self {
            threads,
            poll_interval,
            rng: Mutex::new(None),
            hashes: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
            updates: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            closed: Signal::new(),
        }
    }

    pub fn threads(&self) -> usize {
        match self.threads {
            0 => num_cpus::get(),
            n => n,
        }
    }

    /// Ask in-flight searches to restart.
    pub fn notify_update(&self) {
        self.updates.fetch_add(1, Ordering::AcqRel);
    }

    /// Abort in-flight searches and refuse new ones.
    pub fn close(&self) {
        self.closed.raise();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_raised()
    }

    /// Total hashes computed since creation.
    pub fn total_hashes(&self) -> u64 {
        self.hashes.load(Ordering::Relaxed)
    }

    /// Searches restarted by an update since creation.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Average hashes per second since creation.
    pub fn hashrate(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.total_hashes() as f64 / elapsed
    }

    /// One starting nonce per worker, drawn from the shared generator.
    fn draw_seeds(&self, count: usize) -> Vec<u64> {
        let mut guard = self.rng.lock();
        let rng = guard.get_or_insert_with(StdRng::from_entropy);
        (0..count).map(|_| rng.r#gen::<u64>()).collect()
    }

    /// Search for a nonce sealing `block`, pushing the sealed block onto `results`.
    ///
    /// Returns `Stopped` as soon as `stop` is observed. An update notified after
    /// the call starts restarts the search on the same block.
    pub fn seal(
        &self,
        cache: &Arc<DatasetCache>,
        block: Block,
        results: &Sender<Block>,
        stop: &Signal,
    ) -> Result<SealOutcome, SealError> {
        let target = difficulty::target_for(block.header.difficulty).ok_or(SealError::ZeroDifficulty)?;
        let mut seen = self.updates.load(Ordering::Acquire);
        loop {
            if self.closed.is_raised() {
                return Err(SealError::Closed);
            }
            if stop.is_raised() {
                return Ok(SealOutcome::Stopped);
            }
            match self.round(cache, &block, target, results, stop, &mut seen) {
                Round::Done(outcome) => return outcome,
                Round::Restart => {
                    self.restarts.fetch_add(1, Ordering::Relaxed);
                    debug!(number = block.number(), "restarting seal search");
                }
            }
        }
    }

    fn round(
        &self,
        cache: &Arc<DatasetCache>,
        block: &Block,
        target: U256,
        results: &Sender<Block>,
        stop: &Signal,
        seen: &mut u64,
    ) -> Round {
        let abort = Signal::new();
        let (found_tx, found_rx) = crossbeam_channel::bounded::<WorkerEvent>(1);
        let seeds = self.draw_seeds(self.threads());
        let mut spawned = 0usize;
        for (id, seed) in seeds.into_iter().enumerate() {
            let worker = Worker {
                id,
                seed,
                target,
                block: block.clone(),
                cache: cache.clone(),
                abort: abort.clone(),
                found: found_tx.clone(),
                hashes: self.hashes.clone(),
            };
            match std::thread::Builder::new()
                .name(format!("seal-worker-{id}"))
                .spawn(move || worker.run())
            {
                Ok(_) => spawned += 1,
                Err(e) => warn!(id, "cannot start seal worker: {e}"),
            }
        }
        drop(found_tx);
        debug!(number = block.number(), workers = spawned, "seal search started");

        loop {
            match found_rx.recv_timeout(self.poll_interval) {
                Ok(WorkerEvent::Found(sealed)) => {
                    abort.raise();
                    info!(number = sealed.number(), nonce = sealed.header.nonce, hash = %sealed.hash(), "block sealed");
                    if results.send(sealed).is_err() {
                        warn!("sealed block dropped: result receiver gone");
                    }
                    return Round::Done(Ok(SealOutcome::Sealed));
                }
                Ok(WorkerEvent::Failed(e)) => {
                    abort.raise();
                    return Round::Done(Err(e.into()));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if stop.is_raised() {
                        abort.raise();
                        debug!(number = block.number(), "seal search stopped");
                        return Round::Done(Ok(SealOutcome::Stopped));
                    }
                    if self.closed.is_raised() {
                        abort.raise();
                        return Round::Done(Err(SealError::Closed));
                    }
                    let current = self.updates.load(Ordering::Acquire);
                    if current != *seen {
                        *seen = current;
                        abort.raise();
                        return Round::Restart;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if stop.is_raised() {
                        return Round::Done(Ok(SealOutcome::Stopped));
                    }
                    return Round::Done(Err(SealError::WorkersExited));
                }
            }
        }
    }
}

struct Worker {
    id: usize,
    seed: u64,
    target: U256,
    block: Block,
    cache: Arc<DatasetCache>,
    abort: Signal,
    found: Sender<WorkerEvent>,
    hashes: Arc<AtomicU64>,
}

impl Worker {
    fn run(self) {
        let dataset = match self.cache.dataset_blocking(self.block.number()) {
            Ok(ds) => ds,
            Err(e) => {
                let _ = self.found.try_send(WorkerEvent::Failed(e));
                return;
            }
        };
        let full = match dataset.generate() {
            Ok(full) => full,
            Err(e) => {
                let _ = self.found.try_send(WorkerEvent::Failed(e));
                return;
            }
        };

        let seal_hash = self.block.header.seal_hash();
        let params = dataset.params();
        let mut nonce = self.seed;
        let mut attempts = 0u64;
        trace!(id = self.id, seed = self.seed, "seal worker started");

        while !self.abort.is_raised() {
            let out = hashmix::hashimoto_full(params, full, &seal_hash, nonce);
            attempts += 1;
            if out.result.to_u256() <= self.target {
                // count before publishing so the total is final once the result is seen
                self.hashes.fetch_add(attempts % HASH_BATCH, Ordering::Relaxed);
                let sealed = self.block.with_seal(nonce, out.digest);
                if self.found.try_send(WorkerEvent::Found(sealed)).is_ok() {
                    trace!(id = self.id, nonce, attempts, "nonce found");
                }
                return;
            }
            if attempts % HASH_BATCH == 0 {
                self.hashes.fetch_add(HASH_BATCH, Ordering::Relaxed);
                trace!(id = self.id, attempts, "seal worker progress");
            }
            nonce = nonce.wrapping_add(1);
        }
        self.hashes.fetch_add(attempts % HASH_BATCH, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetOptions;
    use quarry_core::constants::DifficultyParams;
    use quarry_core::types::BlockHeader;

    fn cache() -> Arc<DatasetCache> {
        Arc::new(DatasetCache::new(
            DifficultyParams::dev(),
            3,
            DatasetOptions { threads: 2, ..Default::default() },
        ))
    }

    fn scheduler() -> SealScheduler {
        SealScheduler::new(2, Duration::from_millis(10))
    }

    fn block(difficulty: U256) -> Block {
        let header = BlockHeader { number: 1, difficulty, timestamp: 1_000, ..Default::default() };
        Block::new(header, vec![], vec![], &[])
    }

    #[test]
    fn sealed_block_meets_target() {
        let cache = cache();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let b = block(U256::from(16u64));
        let outcome = scheduler().seal(&cache, b.clone(), &tx, &Signal::new()).unwrap();
        assert_eq!(outcome, SealOutcome::Sealed);

        let sealed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(sealed.header.seal_hash(), b.header.seal_hash());
        let ds = cache.verification(sealed.number()).unwrap();
        let out = ds.hashimoto_light(&sealed.header.seal_hash(), sealed.header.nonce).unwrap();
        assert_eq!(out.digest, sealed.header.mix_hash);
        assert!(difficulty::meets_target(&out.result, sealed.header.difficulty));
    }

    #[test]
    fn stop_ends_search() {
        let cache = cache();
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let stop = Signal::new();
        let stopper = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                stop.raise();
            })
        };
        let started = Instant::now();
        let outcome = scheduler().seal(&cache, block(U256::MAX), &tx, &stop).unwrap();
        stopper.join().unwrap();
        assert_eq!(outcome, SealOutcome::Stopped);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn raised_stop_returns_immediately() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let stop = Signal::new();
        stop.raise();
        assert_eq!(scheduler().seal(&cache(), block(U256::MAX), &tx, &stop), Ok(SealOutcome::Stopped));
    }

    #[test]
    fn update_restarts_instead_of_stopping() {
        let cache = cache();
        let sched = Arc::new(scheduler());
        let stop = Signal::new();
        let handle = {
            let (sched, cache, stop) = (sched.clone(), cache.clone(), stop.clone());
            std::thread::spawn(move || {
                let (tx, _rx) = crossbeam_channel::bounded(1);
                sched.seal(&cache, block(U256::MAX), &tx, &stop)
            })
        };
        std::thread::sleep(Duration::from_millis(100));
        sched.notify_update();
        std::thread::sleep(Duration::from_millis(200));
        assert!(!handle.is_finished(), "update must not end the seal call");
        stop.raise();
        assert_eq!(handle.join().unwrap(), Ok(SealOutcome::Stopped));
    }

    #[test]
    fn update_reaches_every_concurrent_seal() {
        let cache = cache();
        let sched = Arc::new(scheduler());
        let stop = Signal::new();
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (sched, cache, stop) = (sched.clone(), cache.clone(), stop.clone());
                std::thread::spawn(move || {
                    let (tx, _rx) = crossbeam_channel::bounded(1);
                    sched.seal(&cache, block(U256::MAX), &tx, &stop)
                })
            })
            .collect();
        std::thread::sleep(Duration::from_millis(100));
        sched.notify_update();

        let deadline = Instant::now() + Duration::from_secs(10);
        while sched.restarts() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        stop.raise();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(SealOutcome::Stopped));
        }
        assert_eq!(sched.restarts(), 2);
    }

    #[test]
    fn update_before_seal_is_not_replayed() {
        let sched = Arc::new(scheduler());
        sched.notify_update();
        let stop = Signal::new();
        let handle = {
            let (sched, stop) = (sched.clone(), stop.clone());
            std::thread::spawn(move || {
                let (tx, _rx) = crossbeam_channel::bounded(1);
                sched.seal(&cache(), block(U256::MAX), &tx, &stop)
            })
        };
        std::thread::sleep(Duration::from_millis(200));
        stop.raise();
        assert_eq!(handle.join().unwrap(), Ok(SealOutcome::Stopped));
        assert_eq!(sched.restarts(), 0);
    }

    #[test]
    fn zero_difficulty_rejected() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        assert_eq!(
            scheduler().seal(&cache(), block(U256::zero()), &tx, &Signal::new()),
            Err(SealError::ZeroDifficulty)
        );
    }

    #[test]
    fn closed_scheduler_refuses() {
        let sched = scheduler();
        sched.close();
        let (tx, _rx) = crossbeam_channel::bounded(1);
        assert_eq!(
            sched.seal(&cache(), block(U256::from(16u64)), &tx, &Signal::new()),
            Err(SealError::Closed)
        );
    }

    #[test]
    fn close_aborts_in_flight_search() {
        let sched = Arc::new(scheduler());
        let handle = {
            let sched = sched.clone();
            std::thread::spawn(move || {
                let (tx, _rx) = crossbeam_channel::bounded(1);
                sched.seal(&cache(), block(U256::MAX), &tx, &Signal::new())
            })
        };
        std::thread::sleep(Duration::from_millis(100));
        sched.close();
        assert_eq!(handle.join().unwrap(), Err(SealError::Closed));
    }

    #[test]
    fn seeds_differ_per_worker() {
        let seeds = scheduler().draw_seeds(8);
        assert_eq!(seeds.len(), 8);
        let unique: std::collections::HashSet<_> = seeds.iter().collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn hash_counter_advances() {
        let cache = cache();
        let sched = scheduler();
        let (tx, _rx) = crossbeam_channel::bounded(1);
        sched.seal(&cache, block(U256::from(16u64)), &tx, &Signal::new()).unwrap();
        assert!(sched.total_hashes() >= 1);
        assert!(sched.hashrate() > 0.0);
    }

    #[test]
    fn zero_threads_means_all_cpus() {
        assert_eq!(SealScheduler::new(0, Duration::from_millis(10)).threads(), num_cpus::get());
        assert_eq!(scheduler().threads(), 2);
    }
}
