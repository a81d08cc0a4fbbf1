//! Bounded epoch → [`Dataset`] cache owned by the engine.
//!
//! Entries are handed out as `Arc<Dataset>`, so evicting an epoch from the LRU
//! only drops the cache's reference. A worker still generating or hashing
//! against that dataset keeps it alive until it finishes.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use quarry_core::constants::DifficultyParams;
use quarry_core::error::DatasetError;
use tracing::{debug, error, info};

use crate::dataset::{self, Dataset, DatasetOptions};

/// What the cache knows about an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochState {
    /// No entry; nothing has referenced this epoch (or it was evicted).
    Absent,
    /// An entry exists but its full dataset is not built yet.
    Pending,
    /// The full dataset is ready for sealing.
    Ready,
}

pub struct DatasetCache {
    params: DifficultyParams,
    options: DatasetOptions,
    entries: Mutex<LruCache<u64, Arc<Dataset>>>,
    sizes: Mutex<HashMap<u64, (u64, u64)>>,
}

impl std::fmt::Debug for DatasetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("DatasetCache")
            .field("window", &entries.cap())
            .field("len", &entries.len())
            .finish_non_exhaustive()
    }
}

impl DatasetCache {
    /// A cache holding at most `window` epochs (minimum one).
    pub fn new(params: DifficultyParams, window: usize, options: DatasetOptions) -> Self {
        let window = NonZeroUsize::new(window).unwrap_or(NonZeroUsize::MIN);
        Self {
            params,
            options,
            entries: Mutex::new(LruCache::new(window)),
            sizes: Mutex::new(HashMap::new()),
        }
    }

    pub fn params(&self) -> &DifficultyParams {
        &self.params
    }

    /// `(cache_size, dataset_size)` for `epoch`, computed once.
    pub fn sizes(&self, epoch: u64) -> (u64, u64) {
        if let Some(sizes) = self.sizes.lock().get(&epoch) {
            return *sizes;
        }
        let sizes = (
            dataset::cache_size(&self.params, epoch),
            dataset::dataset_size(&self.params, epoch),
        );
        self.sizes.lock().insert(epoch, sizes);
        sizes
    }

    pub fn lookup(&self, epoch: u64) -> EpochState {
        match self.entries.lock().peek(&epoch) {
            None => EpochState::Absent,
            Some(ds) if ds.generated() => EpochState::Ready,
            Some(_) => EpochState::Pending,
        }
    }

    /// Entry for `epoch`, inserting an ungenerated one if absent.
    pub fn entry(&self, epoch: u64) -> Arc<Dataset> {
        let mut entries = self.entries.lock();
        if let Some(ds) = entries.get(&epoch) {
            return ds.clone();
        }
        let (cache_size, dataset_size) = self.sizes(epoch);
        let ds = Arc::new(Dataset::new(epoch, self.params.clone(), cache_size, dataset_size, self.options));
        if let Some((evicted, _)) = entries.push(epoch, ds.clone()) {
            if evicted != epoch {
                debug!(evicted, "evicted epoch dataset");
            }
        }
        ds
    }

    /// Dataset for block `number` with its verification cache built.
    pub fn verification(&self, number: u64) -> Result<Arc<Dataset>, DatasetError> {
        let ds = self.entry(self.params.epoch(number));
        ds.generate_cache()?;
        Ok(ds)
    }

    /// Dataset for block `number`, generating it on this thread if needed.
    pub fn dataset_blocking(&self, number: u64) -> Result<Arc<Dataset>, DatasetError> {
        let ds = self.entry(self.params.epoch(number));
        ds.generate()?;
        Ok(ds)
    }

    /// Full dataset for block `number`.
    ///
    /// Synchronous calls generate in place. Asynchronous calls return the
    /// dataset only when it is already built; otherwise they schedule
    /// background generation and return `Ok(None)`.
    pub fn dataset(&self, number: u64, asynchronous: bool) -> Result<Option<Arc<Dataset>>, DatasetError> {
        if !asynchronous {
            return self.dataset_blocking(number).map(Some);
        }
        let epoch = self.params.epoch(number);
        match self.lookup(epoch) {
            EpochState::Ready => Ok(Some(self.entry(epoch))),
            EpochState::Absent | EpochState::Pending => {
                self.prefetch(epoch)?;
                Ok(None)
            }
        }
    }

    /// Start generating `epoch` in the background unless already scheduled or built.
    pub fn prefetch(&self, epoch: u64) -> Result<(), DatasetError> {
        let ds = self.entry(epoch);
        if ds.generated() || !ds.claim_background() {
            return Ok(());
        }
        info!(epoch, "scheduling background dataset generation");
        std::thread::Builder::new()
            .name(format!("dataset-prefetch-{epoch}"))
            .spawn(move || {
                if let Err(e) = ds.generate() {
                    error!(epoch, "background dataset generation failed: {e}");
                }
            })
            .map(|_| ())
            .map_err(|e| DatasetError::WorkerPool(e.to_string()))
    }

    /// Drop every cached epoch. In-flight holders keep their datasets.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn cache(window: usize) -> DatasetCache {
        DatasetCache::new(
            DifficultyParams::dev(),
            window,
            DatasetOptions { threads: 2, ..Default::default() },
        )
    }

    fn wait_ready(c: &DatasetCache, epoch: u64) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while c.lookup(epoch) != EpochState::Ready {
            assert!(Instant::now() < deadline, "background generation did not finish");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn absent_pending_ready_are_distinct() {
        let c = cache(3);
        assert_eq!(c.lookup(0), EpochState::Absent);
        c.entry(0);
        assert_eq!(c.lookup(0), EpochState::Pending);
        c.dataset_blocking(0).unwrap();
        assert_eq!(c.lookup(0), EpochState::Ready);
    }

    #[test]
    fn async_lookup_on_missing_epoch_schedules() {
        let c = cache(3);
        assert!(c.dataset(0, true).unwrap().is_none());
        wait_ready(&c, 0);
        let ds = c.dataset(0, true).unwrap().unwrap();
        assert!(ds.generated());
    }

    #[test]
    fn synchronous_lookup_generates() {
        let c = cache(3);
        let ds = c.dataset(150, false).unwrap().unwrap();
        assert_eq!(ds.epoch(), 1);
        assert!(ds.generated());
    }

    #[test]
    fn same_epoch_shares_entry() {
        let c = cache(3);
        let a = c.entry(0);
        let b = c.entry(0);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn lru_evicts_oldest_epoch() {
        let c = cache(2);
        c.entry(0);
        c.entry(1);
        c.entry(0);
        c.entry(2);
        assert_eq!(c.len(), 2);
        assert_eq!(c.lookup(1), EpochState::Absent);
        assert_ne!(c.lookup(0), EpochState::Absent);
    }

    #[test]
    fn eviction_keeps_held_dataset_alive() {
        let c = cache(1);
        let held = c.entry(0);
        c.entry(1);
        assert_eq!(c.lookup(0), EpochState::Absent);
        held.generate().unwrap();
        assert!(held.generated());
    }

    #[test]
    fn sizes_are_memoised() {
        let c = cache(3);
        let first = c.sizes(4);
        assert_eq!(first, (dataset::cache_size(c.params(), 4), dataset::dataset_size(c.params(), 4)));
        assert_eq!(c.sizes(4), first);
        assert_eq!(c.sizes.lock().len(), 1);
    }

    #[test]
    fn verification_builds_cache_only() {
        let c = cache(3);
        let ds = c.verification(0).unwrap();
        assert!(ds.cache_generated());
        assert_eq!(c.lookup(0), EpochState::Pending);
    }

    #[test]
    fn zero_window_still_holds_one() {
        let c = cache(0);
        c.entry(7);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn clear_empties() {
        let c = cache(3);
        c.entry(0);
        c.entry(1);
        c.clear();
        assert!(c.is_empty());
    }
}
