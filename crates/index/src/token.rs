use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;

use matchbook_core::{Configuration, LookupMode, Record};
use ordered_float::OrderedFloat;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::error::IndexError;
use crate::store::SqliteStore;
use crate::table::RecordTable;
use crate::CandidateIndex;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Retrieval limits for [`TokenIndex`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenIndexSettings {
    /// Upper bound on returned candidates.
    pub max_results: usize,
    /// Share of the query's total bucket score a candidate must reach.
    /// Admission also stops once the admitted buckets pass this share.
    pub min_relevance: f64,
    /// Stop admitting candidates past `cutoff_factor_1 * max_results`.
    pub cutoff_factor_1: usize,
    /// Stop bumping at the first bucket larger than
    /// `cutoff_factor_2 * candidates`.
    pub cutoff_factor_2: usize,
}

impl Default for TokenIndexSettings {
    fn default() -> Self {
        Self {
            max_results: 1_000_000,
            min_relevance: 0.0,
            cutoff_factor_1: 20,
            cutoff_factor_2: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

const KIND: &str = "token";

/// Inverted index from (property, token) to the records containing it.
///
/// Buckets hold slots in ascending order. A bucket's score is `1/size`, so
/// rare tokens count for more. Queries walk buckets from rarest to most
/// common: the rarest buckets admit candidates, the tail only raises the
/// scores of candidates already admitted. A candidate's score is its share
/// of the query's total bucket score, so a record holding every query token
/// scores 1.0.
pub struct TokenIndex {
    config: Arc<Configuration>,
    settings: TokenIndexSettings,
    table: RecordTable,
    buckets: FxHashMap<String, Vec<u32>>,
    store: Option<SqliteStore>,
    closed: bool,
}

struct BucketRef<'a> {
    property: &'a str,
    slots: &'a [u32],
}

impl BucketRef<'_> {
    fn score(&self) -> f64 {
        1.0 / self.slots.len() as f64
    }
}

fn bucket_key(property: &str, token: &str) -> String {
    format!("{property}\u{1f}{token}")
}

impl TokenIndex {
    pub fn in_memory(config: Arc<Configuration>, settings: TokenIndexSettings) -> Self {
        Self {
            config,
            settings,
            table: RecordTable::default(),
            buckets: FxHashMap::default(),
            store: None,
            closed: false,
        }
    }

    /// Opens a persistent index, reloading everything committed to `path`.
    pub fn open(
        path: &Path,
        config: Arc<Configuration>,
        settings: TokenIndexSettings,
    ) -> Result<Self, IndexError> {
        let store = SqliteStore::open(path, KIND)?;
        let records = store.load()?;
        let mut index = Self::in_memory(config, settings);
        for record in records {
            index.insert(Arc::new(record))?;
        }
        log::debug!("token index reloaded {} records from {}", index.table.len(), path.display());
        index.store = Some(store);
        Ok(index)
    }

    pub fn settings(&self) -> &TokenIndexSettings {
        &self.settings
    }

    /// Bucket keys of `record`, deduplicated, in lookup-property order.
    fn keys(&self, record: &Record) -> Vec<(String, String)> {
        let mut seen = FxHashSet::default();
        let mut keys = Vec::new();
        for property in self.config.lookup_properties() {
            for value in record.values(property.name()) {
                for token in value.split_whitespace() {
                    let key = bucket_key(property.name(), token);
                    if seen.insert(key.clone()) {
                        keys.push((property.name().to_string(), key));
                    }
                }
            }
        }
        keys
    }

    fn insert(&mut self, record: Arc<Record>) -> Result<u32, IndexError> {
        let identity = self
            .config
            .identity_of(&record)
            .ok_or_else(|| IndexError::MissingIdentity(self.config.identity_property().name().to_string()))?
            .to_string();

        let keys = self.keys(&record);
        let (slot, previous) = self.table.upsert(&identity, record);

        if let Some(previous) = previous {
            for (_, key) in self.keys(&previous) {
                if let Some(bucket) = self.buckets.get_mut(&key) {
                    if let Ok(pos) = bucket.binary_search(&slot) {
                        bucket.remove(pos);
                    }
                    if bucket.is_empty() {
                        self.buckets.remove(&key);
                    }
                }
            }
        }

        for (_, key) in keys {
            let bucket = self.buckets.entry(key).or_default();
            if let Err(pos) = bucket.binary_search(&slot) {
                bucket.insert(pos, slot);
            }
        }
        Ok(slot)
    }

    fn lookup<'a>(&'a self, keys: &'a [(String, String)]) -> Vec<BucketRef<'a>> {
        keys.iter()
            .filter_map(|(property, key)| {
                self.buckets.get(key).map(|slots| BucketRef { property, slots })
            })
            .collect()
    }

    fn ensure_open(&self) -> Result<(), IndexError> {
        if self.closed {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    /// Candidate slots with their share of the query's total bucket score.
    fn score_candidates(&self, buckets: &[BucketRef<'_>]) -> FxHashMap<u32, f64> {
        let settings = &self.settings;
        let total: f64 = buckets.iter().map(BucketRef::score).sum();

        // Admit from the rarest bucket until the admitted share passes
        // min_relevance or the candidate cap is hit. A zero min_relevance
        // leaves only the cap.
        let mut candidates: FxHashMap<u32, f64> = FxHashMap::default();
        let limit = settings.cutoff_factor_1.saturating_mul(settings.max_results);
        let mut admitted = 0.0;
        let mut ix = 0;
        while ix < buckets.len() && candidates.len() < limit {
            let bucket = &buckets[ix];
            let score = bucket.score();
            for &slot in bucket.slots {
                *candidates.entry(slot).or_insert(0.0) += score;
            }
            admitted += score;
            ix += 1;
            if settings.min_relevance > 0.0 && admitted / total > settings.min_relevance {
                break;
            }
        }

        for bucket in &buckets[ix..] {
            if bucket.slots.len() > settings.cutoff_factor_2.saturating_mul(candidates.len()) {
                break;
            }
            let score = bucket.score();
            for (slot, value) in candidates.iter_mut() {
                if bucket.slots.binary_search(slot).is_ok() {
                    *value += score;
                }
            }
        }

        for value in candidates.values_mut() {
            *value /= total;
        }
        candidates
    }

    /// Drops candidates that share no token with the query on a required
    /// property. Properties the query has no tokens for impose nothing.
    fn apply_required(&self, buckets: &[BucketRef<'_>], candidates: &mut FxHashMap<u32, f64>) {
        for property in self.config.lookup_properties() {
            if property.lookup() != LookupMode::Required {
                continue;
            }
            let own: Vec<&BucketRef<'_>> =
                buckets.iter().filter(|b| b.property == property.name()).collect();
            if own.is_empty() {
                continue;
            }
            candidates.retain(|slot, _| own.iter().any(|b| b.slots.binary_search(slot).is_ok()));
        }
    }
}

impl CandidateIndex for TokenIndex {
    fn index(&mut self, record: Arc<Record>) -> Result<(), IndexError> {
        self.ensure_open()?;
        let slot = self.insert(record.clone())?;
        if let Some(store) = self.store.as_mut() {
            let identity = self.config.identity_of(&record).unwrap_or_default();
            store.stage(slot, identity, &record)?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), IndexError> {
        self.ensure_open()?;
        if let Some(store) = self.store.as_mut() {
            let written = store.flush()?;
            log::debug!("token index committed {written} records");
        }
        Ok(())
    }

    fn find_candidates(&self, record: &Record) -> Result<Vec<Arc<Record>>, IndexError> {
        self.ensure_open()?;
        let keys = self.keys(record);
        let mut buckets = self.lookup(&keys);
        if buckets.is_empty() {
            return Ok(Vec::new());
        }
        buckets.sort_by_key(|b| b.slots.len());

        let mut candidates = self.score_candidates(&buckets);
        self.apply_required(&buckets, &mut candidates);

        let settings = &self.settings;
        let mut scored: Vec<(OrderedFloat<f64>, Reverse<u32>)> = candidates
            .into_iter()
            .map(|(slot, score)| (OrderedFloat(score), Reverse(slot)))
            .collect();

        let selected: Vec<u32> = if settings.max_results > scored.len() && settings.min_relevance == 0.0 {
            scored.sort_unstable_by(|a, b| b.cmp(a));
            scored.into_iter().map(|(_, Reverse(slot))| slot).collect()
        } else {
            let count = scored.len().min(settings.max_results);
            let mut heap = BinaryHeap::from(scored);
            let mut selected = Vec::with_capacity(count);
            for _ in 0..count {
                let Some((score, Reverse(slot))) = heap.pop() else { break };
                if score.0 >= settings.min_relevance {
                    selected.push(slot);
                }
            }
            selected
        };

        log::debug!("token index: {} buckets, {} candidates", buckets.len(), selected.len());
        Ok(selected.into_iter().filter_map(|slot| self.table.get(slot).cloned()).collect())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Arc<Record>>, IndexError> {
        self.ensure_open()?;
        Ok(self.table.find(id).cloned())
    }

    fn close(&mut self) -> Result<(), IndexError> {
        if self.closed {
            return Ok(());
        }
        self.commit()?;
        self.closed = true;
        Ok(())
    }

    fn is_in_memory(&self) -> bool {
        self.store.is_none()
    }

    fn len(&self) -> usize {
        self.table.len()
    }
}
