//! Match notifications.
//!
//! The processor calls listeners from a single dispatching thread, in a
//! fixed order per batch:
//!
//! ```text
//! start_processing
//!   batch_ready(n)
//!     matches | matches_perhaps ...   (all events for one record together)
//!     no_match_for                    (instead, when a record matched nothing)
//!   batch_done | batch_aborted
//! end_processing
//! ```

use std::sync::Arc;

use matchbook_core::{Configuration, Record};
use parking_lot::Mutex;

/// Receives match events. Every method defaults to doing nothing.
pub trait MatchListener: Send {
    fn start_processing(&mut self) {}

    /// A batch of `size` records is about to be indexed and matched.
    fn batch_ready(&mut self, _size: usize) {}

    /// `r1` and `r2` describe the same entity.
    fn matches(&mut self, _r1: &Record, _r2: &Record, _confidence: f64) {}

    /// `r1` and `r2` may describe the same entity.
    fn matches_perhaps(&mut self, _r1: &Record, _r2: &Record, _confidence: f64) {}

    fn no_match_for(&mut self, _record: &Record) {}

    fn batch_done(&mut self) {}

    /// The batch failed part-way; events already delivered for it should be
    /// discarded.
    fn batch_aborted(&mut self) {}

    fn end_processing(&mut self) {}
}

/// Lets a caller keep a handle on a listener after registering it.
impl<L: MatchListener> MatchListener for Arc<Mutex<L>> {
    fn start_processing(&mut self) {
        self.lock().start_processing();
    }

    fn batch_ready(&mut self, size: usize) {
        self.lock().batch_ready(size);
    }

    fn matches(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        self.lock().matches(r1, r2, confidence);
    }

    fn matches_perhaps(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        self.lock().matches_perhaps(r1, r2, confidence);
    }

    fn no_match_for(&mut self, record: &Record) {
        self.lock().no_match_for(record);
    }

    fn batch_done(&mut self) {
        self.lock().batch_done();
    }

    fn batch_aborted(&mut self) {
        self.lock().batch_aborted();
    }

    fn end_processing(&mut self) {
        self.lock().end_processing();
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// One delivered event, with records reduced to their identities.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEvent {
    StartProcessing,
    BatchReady(usize),
    Matches(String, String, f64),
    MatchesPerhaps(String, String, f64),
    NoMatchFor(String),
    BatchDone,
    BatchAborted,
    EndProcessing,
}

/// Records every event it receives.
pub struct EventCollector {
    config: Arc<Configuration>,
    events: Vec<MatchEvent>,
}

impl EventCollector {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self { config, events: Vec::new() }
    }

    pub fn events(&self) -> &[MatchEvent] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<MatchEvent> {
        std::mem::take(&mut self.events)
    }

    fn id(&self, record: &Record) -> String {
        self.config.identity_of(record).unwrap_or_default().to_string()
    }
}

impl MatchListener for EventCollector {
    fn start_processing(&mut self) {
        self.events.push(MatchEvent::StartProcessing);
    }

    fn batch_ready(&mut self, size: usize) {
        self.events.push(MatchEvent::BatchReady(size));
    }

    fn matches(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        let event = MatchEvent::Matches(self.id(r1), self.id(r2), confidence);
        self.events.push(event);
    }

    fn matches_perhaps(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        let event = MatchEvent::MatchesPerhaps(self.id(r1), self.id(r2), confidence);
        self.events.push(event);
    }

    fn no_match_for(&mut self, record: &Record) {
        let event = MatchEvent::NoMatchFor(self.id(record));
        self.events.push(event);
    }

    fn batch_done(&mut self) {
        self.events.push(MatchEvent::BatchDone);
    }

    fn batch_aborted(&mut self) {
        self.events.push(MatchEvent::BatchAborted);
    }

    fn end_processing(&mut self) {
        self.events.push(MatchEvent::EndProcessing);
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Writes every event to the `log` facade.
pub struct LogListener {
    config: Arc<Configuration>,
    batches: usize,
}

impl LogListener {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self { config, batches: 0 }
    }

    fn id<'r>(&self, record: &'r Record) -> &'r str {
        self.config.identity_of(record).unwrap_or("<no identity>")
    }
}

impl MatchListener for LogListener {
    fn start_processing(&mut self) {
        log::info!("processing started");
    }

    fn batch_ready(&mut self, size: usize) {
        self.batches += 1;
        log::info!("batch {} ready: {size} records", self.batches);
    }

    fn matches(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        log::info!("MATCH {} = {} ({confidence:.4})", self.id(r1), self.id(r2));
    }

    fn matches_perhaps(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        log::info!("MAYBE {} ~ {} ({confidence:.4})", self.id(r1), self.id(r2));
    }

    fn no_match_for(&mut self, record: &Record) {
        log::debug!("no match for {}", self.id(record));
    }

    fn batch_done(&mut self) {
        log::info!("batch {} done", self.batches);
    }

    fn batch_aborted(&mut self) {
        log::warn!("batch {} aborted", self.batches);
    }

    fn end_processing(&mut self) {
        log::info!("processing finished after {} batches", self.batches);
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
                .property(Property::new("name", Arc::new(ExactComparator), 0.3, 0.9))
                .threshold(0.85)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn shared_listener_stays_readable() {
        let config = config();
        let shared = Arc::new(Mutex::new(EventCollector::new(config)));
        let mut boxed: Box<dyn MatchListener> = Box::new(shared.clone());

        let a = Record::builder().value("id", "1").build();
        let b = Record::builder().value("id", "2").build();
        boxed.batch_ready(2);
        boxed.matches(&a, &b, 0.9);
        boxed.no_match_for(&b);

        assert_eq!(
            shared.lock().events(),
            &[
                MatchEvent::BatchReady(2),
                MatchEvent::Matches("1".into(), "2".into(), 0.9),
                MatchEvent::NoMatchFor("2".into()),
            ]
        );
    }

    #[test]
    fn default_methods_do_nothing() {
        struct Quiet;
        impl MatchListener for Quiet {}

        let record = Record::builder().value("id", "1").build();
        let mut quiet = Quiet;
        quiet.start_processing();
        quiet.matches(&record, &record, 1.0);
        quiet.end_processing();
    }
}
