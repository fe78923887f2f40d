use std::sync::Arc;

use matchbook_core::Record;
use rustc_hash::FxHashMap;

/// Slot-addressed record storage shared by both index kinds. A slot is
/// stable for the lifetime of an identity: re-indexing reuses it.
#[derive(Debug, Default)]
pub(crate) struct RecordTable {
    records: Vec<Arc<Record>>,
    by_identity: FxHashMap<String, u32>,
}

impl RecordTable {
    /// Stores `record` under `identity`, returning its slot and the record it
    /// replaced.
    pub fn upsert(&mut self, identity: &str, record: Arc<Record>) -> (u32, Option<Arc<Record>>) {
        if let Some(&slot) = self.by_identity.get(identity) {
            let previous = std::mem::replace(&mut self.records[slot as usize], record);
            return (slot, Some(previous));
        }
        let slot = self.records.len() as u32;
        self.records.push(record);
        self.by_identity.insert(identity.to_string(), slot);
        (slot, None)
    }

    pub fn get(&self, slot: u32) -> Option<&Arc<Record>> {
        self.records.get(slot as usize)
    }

    pub fn find(&self, identity: &str) -> Option<&Arc<Record>> {
        self.by_identity.get(identity).and_then(|&slot| self.get(slot))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
