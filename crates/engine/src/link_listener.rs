//! Keeps a link store in step with what the processor finds.
//!
//! The processor delivers all events for one record together. When the
//! next record starts, the previous record's findings are written:
//!
//! - each match becomes an INFERRED SAME link, each possible match an
//!   INFERRED POSSIBLE link (the store drops facts it already holds, and
//!   keeps asserted links over them);
//! - every live INFERRED direct link of the record that was not observed
//!   again is retracted.
//!
//! A batch commits on `batch_done` and rolls back on `batch_aborted`. A batch
//! in which any store update failed is rolled back at `batch_done` too.

use std::sync::Arc;

use matchbook_core::{Configuration, Record};
use matchbook_links::{Link, LinkKind, LinkStatus, LinkStore, LinkStoreError, PairKey};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::listener::MatchListener;

/// A link store shared between the listener and its readers.
pub type SharedLinkStore = Arc<Mutex<LinkStore>>;

pub struct LinkStoreListener {
    config: Arc<Configuration>,
    store: SharedLinkStore,
    current: Option<String>,
    observed: Vec<Link>,
    skipped: usize,
    error: Option<LinkStoreError>,
    batch_failed: bool,
}

impl LinkStoreListener {
    pub fn new(config: Arc<Configuration>, store: SharedLinkStore) -> Self {
        Self {
            config,
            store,
            current: None,
            observed: Vec::new(),
            skipped: 0,
            error: None,
            batch_failed: false,
        }
    }

    pub fn store(&self) -> &SharedLinkStore {
        &self.store
    }

    /// Records dropped because they had no identity.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// The first store error since the last call, if any.
    pub fn take_error(&mut self) -> Option<LinkStoreError> {
        self.error.take()
    }

    fn identity(&mut self, record: &Record) -> Option<String> {
        match self.config.identity_of(record) {
            Some(id) => Some(id.to_string()),
            None => {
                log::error!("record without identity reached the link store: {record:?}");
                self.skipped += 1;
                None
            }
        }
    }

    /// Switches to `id`, writing the previous record's findings first.
    fn enter(&mut self, id: String) {
        if self.current.as_deref() != Some(id.as_str()) {
            self.end_record();
            self.current = Some(id);
        }
    }

    fn observe(&mut self, r1: &Record, r2: &Record, kind: LinkKind, confidence: f64) {
        let Some(id1) = self.identity(r1) else { return };
        self.enter(id1.clone());
        let Some(id2) = self.identity(r2) else { return };
        self.observed.push(Link::inferred(&id1, &id2, kind, confidence));
    }

    fn end_record(&mut self) {
        let Some(id) = self.current.take() else { return };
        let observed = std::mem::take(&mut self.observed);
        let seen: FxHashSet<PairKey> = observed.iter().map(Link::key).collect();

        let mut store = self.store.lock();
        let mut result = Ok(());
        for link in observed {
            if let Err(e) = store.assert_link(link) {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            let stale: Vec<Link> = store
                .direct_links_for(&id)
                .into_iter()
                .filter(|l| l.is_live() && l.is_direct() && l.status == LinkStatus::Inferred)
                .filter(|l| !seen.contains(&l.key()))
                .collect();
            for link in stale {
                log::debug!("retracting {} ({}, {}): not observed again", link.kind, link.id1, link.id2);
                if let Err(e) = store.retract(&link.id1, &link.id2) {
                    result = Err(e);
                    break;
                }
            }
        }
        drop(store);
        if let Err(e) = result {
            self.fail(e);
        }
    }

    fn fail(&mut self, error: LinkStoreError) {
        log::error!("link store update failed: {error}");
        self.batch_failed = true;
        self.error.get_or_insert(error);
    }
}

impl MatchListener for LinkStoreListener {
    fn matches(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        self.observe(r1, r2, LinkKind::Same, confidence);
    }

    fn matches_perhaps(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        self.observe(r1, r2, LinkKind::Possible, confidence);
    }

    fn no_match_for(&mut self, record: &Record) {
        // An empty finding set still ends the record, retracting what it no
        // longer supports.
        if let Some(id) = self.identity(record) {
            self.enter(id);
        }
    }

    fn batch_done(&mut self) {
        self.end_record();
        if std::mem::take(&mut self.batch_failed) {
            log::warn!("rolling back batch after a failed link store update");
            self.store.lock().rollback();
            return;
        }
        let committed = self.store.lock().commit();
        if let Err(e) = committed {
            self.fail(e);
            self.batch_failed = false;
            self.store.lock().rollback();
        }
    }

    fn batch_aborted(&mut self) {
        self.current = None;
        self.observed.clear();
        self.batch_failed = false;
        self.store.lock().rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchbook_core::{ExactComparator, Property};

    fn config() -> Arc<Configuration> {
        Arc::new(
            Configuration::builder()
                .property(Property::identity("id"))
                .property(Property::new("name", Arc::new(ExactComparator), 0.3, 0.95))
                .build()
                .unwrap(),
        )
    }

    fn rec(id: &str) -> Record {
        Record::builder().value("id", id).build()
    }

    fn listener() -> (LinkStoreListener, SharedLinkStore) {
        let store = Arc::new(Mutex::new(LinkStore::in_memory()));
        (LinkStoreListener::new(config(), store.clone()), store)
    }

    #[test]
    fn writes_findings_when_the_record_ends() {
        let (mut l, store) = listener();
        l.batch_ready(2);
        l.matches(&rec("1"), &rec("2"), 0.97);
        l.matches_perhaps(&rec("1"), &rec("3"), 0.7);
        assert!(store.lock().is_empty());

        l.no_match_for(&rec("4"));
        {
            let store = store.lock();
            assert_eq!(store.link("1", "2").unwrap().kind, LinkKind::Same);
            assert_eq!(store.link("1", "3").unwrap().kind, LinkKind::Possible);
            assert_eq!(store.pending_changes(), 2);
        }
        l.batch_done();
        assert_eq!(store.lock().pending_changes(), 0);
    }

    #[test]
    fn unobserved_inferred_links_are_retracted() {
        let (mut l, store) = listener();
        l.matches(&rec("1"), &rec("2"), 0.97);
        l.matches(&rec("1"), &rec("3"), 0.96);
        l.batch_done();

        l.matches(&rec("1"), &rec("2"), 0.97);
        l.batch_done();

        let store = store.lock();
        assert!(store.link("1", "2").unwrap().is_live());
        assert_eq!(store.link("1", "3").unwrap().status, LinkStatus::Retracted);
        assert_eq!(store.class_of("1"), vec!["1", "2"]);
    }

    #[test]
    fn asserted_links_are_never_retracted() {
        let (mut l, store) = listener();
        store.lock().assert_link(Link::asserted("1", "5", LinkKind::Same, 1.0)).unwrap();
        l.no_match_for(&rec("1"));
        l.batch_done();
        assert_eq!(store.lock().link("1", "5").unwrap().status, LinkStatus::Asserted);
    }

    #[test]
    fn aborted_batch_rolls_back() {
        let (mut l, store) = listener();
        l.matches(&rec("1"), &rec("2"), 0.97);
        l.batch_done();
        l.matches(&rec("2"), &rec("3"), 0.97);
        l.no_match_for(&rec("4"));
        l.batch_aborted();

        let store = store.lock();
        assert!(store.link("2", "3").is_none());
        assert_eq!(store.class_of("2"), vec!["1", "2"]);
    }

    #[test]
    fn failed_update_rolls_the_batch_back() {
        let (mut l, store) = listener();
        l.matches(&rec("1"), &rec("2"), 0.97);
        l.matches(&rec("1"), &rec("3"), 1.5);
        l.batch_done();

        assert!(matches!(l.take_error(), Some(LinkStoreError::InvalidLink(_))));
        {
            let store = store.lock();
            assert!(store.link("1", "2").is_none());
            assert_eq!(store.pending_changes(), 0);
        }

        l.matches(&rec("1"), &rec("2"), 0.97);
        l.batch_done();
        assert!(store.lock().link("1", "2").unwrap().is_live());
        assert!(l.take_error().is_none());
    }

    #[test]
    fn records_without_identity_are_skipped() {
        let (mut l, store) = listener();
        let anonymous = Record::builder().value("name", "x").build();
        l.matches(&anonymous, &rec("2"), 0.99);
        l.matches(&rec("1"), &anonymous, 0.99);
        l.batch_done();
        assert_eq!(l.skipped(), 2);
        assert!(store.lock().is_empty());
        assert!(l.take_error().is_none());
    }
}
