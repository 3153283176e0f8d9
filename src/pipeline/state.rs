//! Aggregation state store
//!
//! Owns every live accumulator, keyed by `(WindowId, AggregationKey)`.
//!
//! The store is split into shards selected by key hash. Ingestion routes a
//! key to the worker with the same index, so each shard has a single writer
//! and its mutex is only contended by window extraction.
//!
//! Extraction visits the shards one at a time. Inside each shard lock it
//! raises the shard's closed watermark and removes the window, so:
//! - a merge already holding the lock finishes before the window is taken
//! - a merge acquiring the lock afterwards sees the watermark and is rejected
//!   as late instead of resurrecting purged state
//!
//! `merge_assigned` picks the window while holding the shard lock, so a
//! merge serialized after an extraction also reads the clock after it.

use super::error::{PipelineError, PipelineResult};
use super::types::{Accumulator, AggregationKey};
use super::windows::WindowId;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

/// Result of a successful merge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First event for this `(window, key)`
    Created,
    /// Added to an existing accumulator
    Updated,
}

#[derive(Debug, Default)]
struct Shard {
    windows: HashMap<WindowId, HashMap<AggregationKey, Accumulator>>,
    /// Highest `end` of any window extracted from this store
    closed_through: Option<i64>,
}

impl Shard {
    fn is_closed(&self, window: &WindowId) -> bool {
        self.closed_through.map_or(false, |end| window.end <= end)
    }

    fn merge(
        &mut self,
        window: WindowId,
        key: &AggregationKey,
        volume: u64,
    ) -> PipelineResult<MergeOutcome> {
        if self.is_closed(&window) {
            return Err(PipelineError::LateEvent(window));
        }

        let accumulators = self.windows.entry(window).or_default();

        if let Some(acc) = accumulators.get_mut(key) {
            acc.add(volume)?;
            return Ok(MergeOutcome::Updated);
        }

        accumulators.insert(key.clone(), Accumulator::new(key, volume));
        Ok(MergeOutcome::Created)
    }

    fn mark_closed(&mut self, window: &WindowId) {
        self.closed_through = Some(self.closed_through.map_or(window.end, |end| end.max(window.end)));
    }
}

/// Sharded owner of all per-window, per-key accumulators
#[derive(Debug)]
pub struct AggregationStateStore {
    shards: Vec<Mutex<Shard>>,
}

impl AggregationStateStore {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::default())).collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard (and worker) index owning `key`
    pub fn shard_for(&self, key: &AggregationKey) -> usize {
        shard_index(key, self.shards.len())
    }

    /// Add `volume` to the accumulator for `(window, key)`, creating it if needed
    ///
    /// Fails with `LateEvent` if the window has already been extracted.
    pub fn merge(
        &self,
        window: WindowId,
        key: &AggregationKey,
        volume: u64,
    ) -> PipelineResult<MergeOutcome> {
        let mut shard = self.shards[self.shard_for(key)].lock();
        shard.merge(window, key, volume)
    }

    /// Merge into the window chosen by `assign`, evaluated under the shard lock
    ///
    /// Extraction of a window happens once the clock has reached its end. A
    /// merge that takes the lock after that extraction reads the clock later
    /// too, so it lands in a following window instead of being rejected.
    pub fn merge_assigned<F>(
        &self,
        key: &AggregationKey,
        volume: u64,
        assign: F,
    ) -> PipelineResult<(WindowId, MergeOutcome)>
    where
        F: FnOnce() -> WindowId,
    {
        let mut shard = self.shards[self.shard_for(key)].lock();
        let window = assign();
        let outcome = shard.merge(window, key, volume)?;
        Ok((window, outcome))
    }

    /// Remove and return every accumulator of `window`, ordered by key
    ///
    /// A second call for the same window returns an empty vector.
    pub fn extract_and_purge(&self, window: WindowId) -> Vec<(AggregationKey, Accumulator)> {
        let mut extracted = Vec::new();

        for shard in &self.shards {
            let mut shard = shard.lock();
            shard.mark_closed(&window);
            if let Some(accumulators) = shard.windows.remove(&window) {
                extracted.extend(accumulators);
            }
        }

        extracted.sort_by(|(a, _), (b, _)| a.cmp(b));
        extracted
    }

    /// Windows currently holding at least one accumulator, ascending
    pub fn open_windows(&self) -> Vec<WindowId> {
        let mut windows = BTreeSet::new();
        for shard in &self.shards {
            windows.extend(shard.lock().windows.keys().copied());
        }
        windows.into_iter().collect()
    }

    pub fn live_accumulators(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().windows.values().map(HashMap::len).sum::<usize>())
            .sum()
    }

    /// Copy of a single accumulator, if live
    pub fn get(&self, window: WindowId, key: &AggregationKey) -> Option<Accumulator> {
        let shard = self.shards[self.shard_for(key)].lock();
        shard.windows.get(&window).and_then(|accs| accs.get(key)).cloned()
    }

    pub fn is_closed(&self, window: WindowId) -> bool {
        self.shards.iter().all(|shard| shard.lock().is_closed(&window))
    }
}

pub fn shard_index(key: &AggregationKey, shard_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shard_count.max(1) as u64) as usize
}
