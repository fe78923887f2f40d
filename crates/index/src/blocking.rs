use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use matchbook_core::{Configuration, Record};
use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::error::IndexError;
use crate::keys::{BlockingKeySpec, KeyFunction, KeyFunctionRegistry};
use crate::store::SqliteStore;
use crate::table::RecordTable;
use crate::CandidateIndex;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlockingSettings {
    /// Records to gather on each side of the matching block.
    pub window_size: usize,
    pub keys: Vec<BlockingKeySpec>,
}

impl Default for BlockingSettings {
    fn default() -> Self {
        Self { window_size: 5, keys: Vec::new() }
    }
}

const KIND: &str = "blocking";

/// Sorted-neighbourhood index: one ordered map of key -> block per key
/// function.
///
/// A query takes the first block at or after its key. If that block is
/// small, neighbouring blocks below and above are added until each side has
/// contributed about `window_size` records. A block larger than
/// `2 * window_size` is taken alone.
pub struct BlockingIndex {
    config: Arc<Configuration>,
    window_size: usize,
    functions: Vec<Arc<dyn KeyFunction>>,
    maps: Vec<BTreeMap<String, Vec<u32>>>,
    table: RecordTable,
    store: Option<SqliteStore>,
    closed: bool,
}

impl BlockingIndex {
    pub fn in_memory(
        config: Arc<Configuration>,
        window_size: usize,
        functions: Vec<Arc<dyn KeyFunction>>,
    ) -> Self {
        let maps = functions.iter().map(|_| BTreeMap::new()).collect();
        Self {
            config,
            window_size,
            functions,
            maps,
            table: RecordTable::default(),
            store: None,
            closed: false,
        }
    }

    /// Builds the key functions named in `settings`.
    pub fn from_settings(
        config: Arc<Configuration>,
        settings: &BlockingSettings,
        registry: &KeyFunctionRegistry,
    ) -> Result<Self, IndexError> {
        let functions = settings.keys.iter().map(|k| registry.resolve(k)).collect::<Result<Vec<_>, _>>()?;
        Ok(Self::in_memory(config, settings.window_size, functions))
    }

    /// Opens a persistent index, reloading everything committed to `path`.
    pub fn open(
        path: &Path,
        config: Arc<Configuration>,
        window_size: usize,
        functions: Vec<Arc<dyn KeyFunction>>,
    ) -> Result<Self, IndexError> {
        let store = SqliteStore::open(path, KIND)?;
        let records = store.load()?;
        let mut index = Self::in_memory(config, window_size, functions);
        for record in records {
            index.insert(Arc::new(record))?;
        }
        log::debug!("blocking index reloaded {} records from {}", index.table.len(), path.display());
        index.store = Some(store);
        Ok(index)
    }

    pub fn key_functions(&self) -> &[Arc<dyn KeyFunction>] {
        &self.functions
    }

    fn insert(&mut self, record: Arc<Record>) -> Result<u32, IndexError> {
        let identity = self
            .config
            .identity_of(&record)
            .ok_or_else(|| IndexError::MissingIdentity(self.config.identity_property().name().to_string()))?
            .to_string();
        let (slot, previous) = self.table.upsert(&identity, record.clone());

        for (function, map) in self.functions.iter().zip(self.maps.iter_mut()) {
            if let Some(previous) = &previous {
                let old_key = function.make_key(previous);
                if let Some(block) = map.get_mut(&old_key) {
                    block.retain(|&s| s != slot);
                    if block.is_empty() {
                        map.remove(&old_key);
                    }
                }
            }
            let block = map.entry(function.make_key(&record)).or_default();
            if !block.contains(&slot) {
                block.push(slot);
            }
        }
        Ok(slot)
    }

    fn ensure_open(&self) -> Result<(), IndexError> {
        if self.closed {
            return Err(IndexError::Closed);
        }
        Ok(())
    }

    fn collect(&self, map: &BTreeMap<String, Vec<u32>>, key: &str, found: &mut Vec<u32>, seen: &mut FxHashSet<u32>) {
        let mut add = |block: &Vec<u32>| {
            for &slot in block {
                if seen.insert(slot) {
                    found.push(slot);
                }
            }
            block.len()
        };

        let Some((start, block)) = map.range::<str, _>((Bound::Included(key), Bound::Unbounded)).next() else {
            return;
        };
        let added = add(block);
        if added > self.window_size * 2 {
            return;
        }

        let mut this_way = added / 2;
        let mut lower = map.range::<str, _>((Bound::Unbounded, Bound::Excluded(start.as_str()))).rev();
        while this_way < self.window_size {
            let Some((_, block)) = lower.next() else { break };
            this_way += add(block);
        }

        let mut this_way = added / 2;
        let mut higher = map.range::<str, _>((Bound::Excluded(start.as_str()), Bound::Unbounded));
        while this_way < self.window_size {
            let Some((_, block)) = higher.next() else { break };
            this_way += add(block);
        }
    }
}

impl CandidateIndex for BlockingIndex {
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
            log::debug!("blocking index committed {written} records");
        }
        Ok(())
    }

    fn find_candidates(&self, record: &Record) -> Result<Vec<Arc<Record>>, IndexError> {
        self.ensure_open()?;
        let mut found = Vec::new();
        let mut seen = FxHashSet::default();
        for (function, map) in self.functions.iter().zip(&self.maps) {
            let key = function.make_key(record);
            self.collect(map, &key, &mut found, &mut seen);
        }
        log::debug!("blocking index: {} candidates", found.len());
        Ok(found.into_iter().filter_map(|slot| self.table.get(slot).cloned()).collect())
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
