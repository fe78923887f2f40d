//! The batch loop: index, retrieve, score, classify, notify.
//!
//! # Invariants
//!
//! 1. **Index before read:** every batch is indexed and committed before the
//!    first candidate lookup for it. Workers only ever see a committed,
//!    read-only index.
//! 2. **One dispatcher:** listener callbacks run on the calling thread, in
//!    batch order, and all events for one record are delivered together.
//! 3. **Batch barrier:** a batch ends with `batch_done` only after every
//!    record in it has been delivered. A failed lookup ends it with
//!    `batch_aborted` instead, and nothing after the failure is delivered.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use matchbook_core::{classify, score, Configuration, MatchKind, Mode, Record};
use matchbook_index::{CandidateIndex, IndexError};
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::listener::MatchListener;
use crate::settings::ProcessorSettings;

/// Which matches a record passes on when it is matched against another
/// group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkageStrategy {
    /// Every candidate above the thresholds.
    #[default]
    All,
    /// Only the highest-scoring candidate, if it clears a threshold.
    BestOnly,
}

/// Stops a running processor at the next batch boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Work counters. Searching and comparing times are summed across workers,
/// so with several threads they can exceed wall-clock time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessorStats {
    pub batches: u64,
    pub records: u64,
    pub comparisons: u64,
    pub indexing: Duration,
    pub searching: Duration,
    pub comparing: Duration,
    pub callbacks: Duration,
}

struct Finding {
    candidate: Arc<Record>,
    confidence: f64,
    kind: MatchKind,
}

/// Everything one record's lookup produced.
struct Outcome {
    findings: Vec<Finding>,
    comparisons: u64,
    searching: Duration,
    comparing: Duration,
}

pub struct Processor {
    config: Arc<Configuration>,
    index: Box<dyn CandidateIndex>,
    listeners: Vec<Box<dyn MatchListener>>,
    settings: ProcessorSettings,
    cancel: CancelFlag,
    stats: ProcessorStats,
}

impl Processor {
    pub fn new(config: Arc<Configuration>, index: Box<dyn CandidateIndex>) -> Self {
        Self {
            config,
            index,
            listeners: Vec::new(),
            settings: ProcessorSettings::default(),
            cancel: CancelFlag::new(),
            stats: ProcessorStats::default(),
        }
    }

    pub fn with_settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn index(&self) -> &dyn CandidateIndex {
        self.index.as_ref()
    }

    /// Listeners are notified in the order they were added.
    pub fn add_listener<L: MatchListener + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener));
    }

    /// A handle that cancels this processor from any thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    /// Fused probability for one pair, counted as a comparison.
    pub fn compare(&mut self, a: &Record, b: &Record) -> Option<f64> {
        self.stats.comparisons += 1;
        score(&self.config, a, b)
    }

    pub fn close(&mut self) -> Result<(), EngineError> {
        self.index.close()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Runs the comparison the configuration's mode asks for. Deduplication
    /// treats both groups as one record set; linkage links `group2`
    /// against `group1`.
    pub fn process<I1, I2>(&mut self, group1: I1, group2: I2, strategy: LinkageStrategy) -> Result<(), EngineError>
    where
        I1: IntoIterator<Item = Record>,
        I2: IntoIterator<Item = Record>,
    {
        match self.config.mode() {
            Mode::Deduplication => self.deduplicate(group1.into_iter().chain(group2)),
            Mode::Linkage => self.link(group1, group2, strategy),
        }
    }

    /// Finds duplicates within `records`, and between them and everything
    /// indexed earlier. Each batch is indexed first, then every record in
    /// it is matched.
    pub fn deduplicate<I>(&mut self, records: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = Record>,
    {
        self.require_mode(Mode::Deduplication, "deduplicate")?;
        let batch_size = self.settings.batch_size;
        self.start_processing();
        self.run_batches(records, batch_size, |this, batch| this.deduplicate_batch(&batch))?;
        self.end_processing();
        Ok(())
    }

    /// Links `group2` against `group1`. Records are never linked within a
    /// group: only `group1` is indexed.
    pub fn link<I1, I2>(&mut self, group1: I1, group2: I2, strategy: LinkageStrategy) -> Result<(), EngineError>
    where
        I1: IntoIterator<Item = Record>,
        I2: IntoIterator<Item = Record>,
    {
        self.require_mode(Mode::Linkage, "link")?;
        let batch_size = self.settings.batch_size;
        self.start_processing();
        self.run_batches(group1, batch_size, |this, batch| this.index_batch(&batch))?;
        self.run_batches(group2, batch_size, |this, batch| this.match_batch(&batch, strategy))?;
        self.end_processing();
        Ok(())
    }

    /// Matches `records` against the index as it stands, without adding
    /// them to it.
    pub fn match_all<I>(&mut self, records: I, strategy: LinkageStrategy) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = Record>,
    {
        let batch_size = self.settings.batch_size;
        self.start_processing();
        self.run_batches(records, batch_size, |this, batch| this.match_batch(&batch, strategy))?;
        self.end_processing();
        Ok(())
    }

    /// Adds records to the index without matching them.
    pub fn index_records<I>(&mut self, records: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = Record>,
    {
        let batch_size = self.settings.batch_size;
        self.run_batches(records, batch_size, |this, batch| this.index_batch(&batch))
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    fn run_batches<I, F>(&mut self, records: I, batch_size: usize, mut step: F) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = Record>,
        F: FnMut(&mut Self, Vec<Arc<Record>>) -> Result<(), EngineError>,
    {
        let batch_size = batch_size.max(1);
        let mut batch = Vec::new();
        for record in records {
            batch.push(Arc::new(record));
            if batch.len() == batch_size {
                step(self, std::mem::take(&mut batch))?;
            }
        }
        if !batch.is_empty() {
            step(self, batch)?;
        }
        Ok(())
    }

    fn require_mode(&self, expected: Mode, operation: &'static str) -> Result<(), EngineError> {
        let actual = self.config.mode();
        if actual != expected {
            return Err(EngineError::ModeMismatch { operation, expected, actual });
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            log::info!("processing cancelled after {} batches", self.stats.batches);
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    fn deduplicate_batch(&mut self, batch: &[Arc<Record>]) -> Result<(), EngineError> {
        self.check_cancelled()?;
        log::info!("deduplicating batch of {} records", batch.len());
        self.notify(|l| l.batch_ready(batch.len()));

        let start = Instant::now();
        let indexed = self.write_index(batch);
        self.stats.indexing += start.elapsed();
        if let Err(e) = indexed {
            return Err(self.abort(e.into()));
        }

        self.find_and_deliver(batch, LinkageStrategy::All)?;
        self.finish_batch();
        Ok(())
    }

    fn index_batch(&mut self, batch: &[Arc<Record>]) -> Result<(), EngineError> {
        self.check_cancelled()?;
        let start = Instant::now();
        let indexed = self.write_index(batch);
        self.stats.indexing += start.elapsed();
        indexed?;
        log::debug!("indexed {} records", batch.len());
        Ok(())
    }

    fn match_batch(&mut self, batch: &[Arc<Record>], strategy: LinkageStrategy) -> Result<(), EngineError> {
        self.check_cancelled()?;
        log::info!("matching batch of {} records", batch.len());
        self.notify(|l| l.batch_ready(batch.len()));
        self.find_and_deliver(batch, strategy)?;
        self.finish_batch();
        Ok(())
    }

    fn write_index(&mut self, batch: &[Arc<Record>]) -> Result<(), IndexError> {
        for record in batch {
            self.index.index(record.clone())?;
        }
        self.index.commit()
    }

    fn finish_batch(&mut self) {
        self.stats.batches += 1;
        self.notify(|l| l.batch_done());
    }

    fn abort(&mut self, error: EngineError) -> EngineError {
        log::error!("batch aborted: {error}");
        self.notify(|l| l.batch_aborted());
        error
    }

    // -----------------------------------------------------------------------
    // Matching
    // -----------------------------------------------------------------------

    /// Looks up and scores every record in `batch`, delivering results in
    /// batch order.
    fn find_and_deliver(&mut self, batch: &[Arc<Record>], strategy: LinkageStrategy) -> Result<(), EngineError> {
        let threads = self.settings.threads.clamp(1, batch.len().max(1));
        let failure = {
            let Processor { config, index, listeners, stats, .. } = self;
            let config: &Configuration = config;
            let index: &dyn CandidateIndex = index.as_ref();
            if threads == 1 {
                let mut failure = None;
                for record in batch {
                    match find_matches(config, index, record, strategy) {
                        Ok(outcome) => deliver(listeners, stats, record, outcome),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                failure
            } else {
                run_pool(config, index, batch, strategy, threads, |i, outcome| {
                    deliver(listeners, stats, &batch[i], outcome)
                })
            }
        };
        match failure {
            Some(e) => Err(self.abort(e.into())),
            None => Ok(()),
        }
    }

    fn notify(&mut self, mut event: impl FnMut(&mut dyn MatchListener)) {
        let start = Instant::now();
        for listener in &mut self.listeners {
            event(listener.as_mut());
        }
        self.stats.callbacks += start.elapsed();
    }

    fn start_processing(&mut self) {
        self.cancel.reset();
        log::debug!("processing started: {} threads, index holds {} records", self.settings.threads, self.index.len());
        self.notify(|l| l.start_processing());
    }

    fn end_processing(&mut self) {
        self.notify(|l| l.end_processing());
        let s = &self.stats;
        log::info!(
            "processed {} records in {} batches: {} comparisons; indexing {:?}, searching {:?}, comparing {:?}, callbacks {:?}",
            s.records,
            s.batches,
            s.comparisons,
            s.indexing,
            s.searching,
            s.comparing,
            s.callbacks
        );
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("listeners", &self.listeners.len())
            .field("settings", &self.settings)
            .field("stats", &self.stats)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// Runs `find_matches` for every record on `threads` scoped workers. Work is
/// pulled from one shared queue; results come back over a channel and are
/// handed to `deliver` on this thread in batch order. Returns the first
/// lookup error, after which nothing more is delivered.
fn run_pool<F>(
    config: &Configuration,
    index: &dyn CandidateIndex,
    batch: &[Arc<Record>],
    strategy: LinkageStrategy,
    threads: usize,
    mut deliver: F,
) -> Option<IndexError>
where
    F: FnMut(usize, Outcome),
{
    let (work_tx, work_rx) = mpsc::channel::<usize>();
    for i in 0..batch.len() {
        if work_tx.send(i).is_err() {
            break;
        }
    }
    drop(work_tx);
    let work_rx = Mutex::new(work_rx);
    let stop = AtomicBool::new(false);
    let (result_tx, result_rx) = mpsc::channel::<(usize, Result<Outcome, IndexError>)>();

    std::thread::scope(|scope| {
        for _ in 0..threads {
            let result_tx = result_tx.clone();
            let (work_rx, stop) = (&work_rx, &stop);
            scope.spawn(move || loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let next = work_rx.lock().recv();
                let Ok(i) = next else { break };
                let outcome = find_matches(config, index, &batch[i], strategy);
                if result_tx.send((i, outcome)).is_err() {
                    break;
                }
            });
        }
        drop(result_tx);

        let mut failure = None;
        let mut ready: BTreeMap<usize, Outcome> = BTreeMap::new();
        let mut next = 0;
        for (i, outcome) in result_rx {
            match outcome {
                Ok(outcome) if failure.is_none() => {
                    ready.insert(i, outcome);
                    while let Some(outcome) = ready.remove(&next) {
                        deliver(next, outcome);
                        next += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    stop.store(true, Ordering::Relaxed);
                    failure.get_or_insert(e);
                }
            }
        }
        failure
    })
}

/// True when the two records share an identity value.
fn same_identity(a: &[String], b: &[String]) -> bool {
    a.iter().any(|v| b.contains(v))
}

fn find_matches(
    config: &Configuration,
    index: &dyn CandidateIndex,
    record: &Record,
    strategy: LinkageStrategy,
) -> Result<Outcome, IndexError> {
    let start = Instant::now();
    let candidates = index.find_candidates(record)?;
    let searching = start.elapsed();
    log::debug!("record {:?}: {} candidates", config.identity_of(record), candidates.len());

    let start = Instant::now();
    let own = config.identities(record);
    let mut comparisons = 0;
    let mut findings = Vec::new();
    let mut best: Option<(Arc<Record>, f64)> = None;
    for candidate in candidates {
        if same_identity(own, config.identities(&candidate)) {
            continue;
        }
        comparisons += 1;
        let Some(p) = score(config, record, &candidate) else { continue };
        match strategy {
            LinkageStrategy::All => {
                let kind = classify(config, Some(p));
                if kind != MatchKind::Different {
                    findings.push(Finding { candidate, confidence: p, kind });
                }
            }
            LinkageStrategy::BestOnly => {
                if best.as_ref().map_or(true, |(_, top)| p > *top) {
                    best = Some((candidate, p));
                }
            }
        }
    }
    if let Some((candidate, p)) = best {
        log::debug!("best candidate {:?} at {p:.4}", config.identity_of(&candidate));
        let kind = classify(config, Some(p));
        if kind != MatchKind::Different {
            findings.push(Finding { candidate, confidence: p, kind });
        }
    }

    Ok(Outcome { findings, comparisons, searching, comparing: start.elapsed() })
}

fn deliver(listeners: &mut [Box<dyn MatchListener>], stats: &mut ProcessorStats, record: &Record, outcome: Outcome) {
    stats.records += 1;
    stats.comparisons += outcome.comparisons;
    stats.searching += outcome.searching;
    stats.comparing += outcome.comparing;

    let start = Instant::now();
    if outcome.findings.is_empty() {
        for listener in listeners.iter_mut() {
            listener.no_match_for(record);
        }
    }
    for finding in &outcome.findings {
        for listener in listeners.iter_mut() {
            match finding.kind {
                MatchKind::Same => listener.matches(record, &finding.candidate, finding.confidence),
                MatchKind::Possible => listener.matches_perhaps(record, &finding.candidate, finding.confidence),
                MatchKind::Different => {}
            }
        }
    }
    stats.callbacks += start.elapsed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{EventCollector, MatchEvent};
    use matchbook_core::{ExactComparator, Property};
    use matchbook_index::{TokenIndex, TokenIndexSettings};

    fn config() -> Arc<Configuration> {
        Arc::new(
            Configuration::builder()
                .property(Property::identity("id"))
                .property(Property::new("name", Arc::new(ExactComparator), 0.3, 0.95))
                .property(Property::new("city", Arc::new(ExactComparator), 0.4, 0.7))
                .threshold(0.9)
                .maybe_threshold(0.6)
                .build()
                .unwrap(),
        )
    }

    fn record(id: &str, name: &str, city: &str) -> Record {
        Record::builder().value("id", id).value("name", name).value("city", city).build()
    }

    fn processor(config: &Arc<Configuration>) -> Processor {
        Processor::new(config.clone(), Box::new(TokenIndex::in_memory(config.clone(), TokenIndexSettings::default())))
    }

    #[test]
    fn same_identity_is_never_compared() {
        let config = config();
        let mut p = processor(&config);
        p.deduplicate(vec![record("1", "ann", "oslo")]).unwrap();
        assert_eq!(p.stats().comparisons, 0);
        assert_eq!(p.stats().records, 1);
    }

    #[test]
    fn best_only_keeps_the_top_candidate() {
        let config = config();
        let index = TokenIndex::in_memory(config.clone(), TokenIndexSettings::default());
        let mut p = Processor::new(config.clone(), Box::new(index));
        p.index_records(vec![record("1", "ann", "oslo"), record("2", "ann", "bergen")]).unwrap();

        let events = Arc::new(Mutex::new(EventCollector::new(config.clone())));
        p.add_listener(events.clone());
        p.match_all(vec![record("9", "ann", "oslo")], LinkageStrategy::BestOnly).unwrap();

        let matches: Vec<MatchEvent> = events
            .lock()
            .events()
            .iter()
            .filter(|e| matches!(e, MatchEvent::Matches(..) | MatchEvent::MatchesPerhaps(..)))
            .cloned()
            .collect();
        assert_eq!(matches.len(), 1);
        assert!(matches!(&matches[0], MatchEvent::Matches(a, b, _) if a == "9" && b == "1"));
    }

    fn linkage_config() -> Arc<Configuration> {
        Arc::new(
            Configuration::builder()
                .property(Property::identity("id"))
                .property(Property::new("name", Arc::new(ExactComparator), 0.3, 0.95))
                .property(Property::new("city", Arc::new(ExactComparator), 0.4, 0.7))
                .threshold(0.9)
                .mode(Mode::Linkage)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn entry_points_follow_the_configured_mode() {
        let config = linkage_config();
        let mut p = processor(&config);
        let err = p.deduplicate(vec![record("1", "ann", "oslo")]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ModeMismatch { expected: Mode::Deduplication, actual: Mode::Linkage, .. }
        ));
        assert_eq!(p.index().len(), 0);

        let config = self::config();
        let mut p = processor(&config);
        let err = p.link(Vec::new(), vec![record("1", "ann", "oslo")], LinkageStrategy::All).unwrap_err();
        assert!(matches!(err, EngineError::ModeMismatch { expected: Mode::Linkage, .. }));
    }

    #[test]
    fn process_dispatches_on_mode() {
        let group1 = || vec![record("1", "ann", "oslo"), record("2", "ann", "oslo")];
        let group2 = || vec![record("9", "ann", "oslo")];
        let same_pairs = |config: &Arc<Configuration>| {
            let mut p = processor(config);
            let events = Arc::new(Mutex::new(EventCollector::new(config.clone())));
            p.add_listener(events.clone());
            p.process(group1(), group2(), LinkageStrategy::All).unwrap();
            let mut pairs: Vec<(String, String)> = events
                .lock()
                .events()
                .iter()
                .filter_map(|e| match e {
                    MatchEvent::Matches(a, b, _) => Some((a.clone(), b.clone())),
                    _ => None,
                })
                .collect();
            pairs.sort();
            (pairs, p.index().len())
        };

        // linkage never pairs 1 with 2 and leaves group 2 out of the index
        let (pairs, indexed) = same_pairs(&linkage_config());
        assert_eq!(pairs, vec![("9".to_string(), "1".to_string()), ("9".to_string(), "2".to_string())]);
        assert_eq!(indexed, 2);

        let (pairs, indexed) = same_pairs(&config());
        assert!(pairs.contains(&("2".to_string(), "1".to_string())));
        assert!(pairs.contains(&("9".to_string(), "1".to_string())));
        assert_eq!(indexed, 3);
    }

    #[test]
    fn threads_do_not_change_the_event_stream() {
        let config = config();
        let records: Vec<Record> = (0..40)
            .map(|i| record(&i.to_string(), &format!("name{}", i % 7), &format!("city{}", i % 3)))
            .collect();

        let run = |threads: usize| {
            let mut p = processor(&config).with_settings(ProcessorSettings { threads, batch_size: 16 });
            let events = Arc::new(Mutex::new(EventCollector::new(config.clone())));
            p.add_listener(events.clone());
            p.deduplicate(records.clone()).unwrap();
            let out = events.lock().take();
            (out, p.stats().comparisons)
        };

        let (single, single_comparisons) = run(1);
        let (pooled, pooled_comparisons) = run(4);
        assert_eq!(single, pooled);
        assert_eq!(single_comparisons, pooled_comparisons);
        assert_eq!(single.iter().filter(|e| **e == MatchEvent::BatchDone).count(), 3);
    }

    #[test]
    fn compare_counts() {
        let config = config();
        let mut p = processor(&config);
        let a = record("1", "ann", "oslo");
        let b = record("2", "ann", "oslo");
        let prob = p.compare(&a, &b).unwrap();
        assert!(prob > 0.9);
        assert_eq!(p.stats().comparisons, 1);
    }
}
