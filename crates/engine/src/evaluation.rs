//! Scores a run against known answers.
//!
//! The gold standard is a link store, usually loaded from a link file. Its
//! closure counts: if the file says 1=2 and 2=3, finding 1=3 is correct.
//! Correct findings go into a second store so that their closure is counted
//! the same way.

use std::path::Path;
use std::sync::Arc;

use matchbook_core::{Configuration, Record};
use matchbook_links::{load_into, read_link_file, Link, LinkKind, LinkStore};

use crate::error::EngineError;
use crate::listener::MatchListener;

/// Final counts, computed at `end_processing`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvaluationReport {
    /// Correct SAME links found, closure included.
    pub correct_found: usize,
    /// SAME links in the gold standard, closure included.
    pub correct_total: usize,
    /// Matches the gold standard says are DIFFERENT.
    pub wrong_found: usize,
    /// Matches the gold standard says nothing about.
    pub unknown: usize,
    /// Gold SAME links of records that matched nothing.
    pub missed: usize,
    pub precision: f64,
    pub recall: f64,
    pub f_measure: f64,
}

pub struct EvaluationListener {
    config: Arc<Configuration>,
    gold: LinkStore,
    found: LinkStore,
    /// Count unknown matches as wrong when computing precision.
    pessimistic: bool,
    wrong_found: usize,
    unknown: usize,
    missed: usize,
    report: Option<EvaluationReport>,
}

impl EvaluationListener {
    pub fn new(config: Arc<Configuration>, gold: LinkStore) -> Self {
        Self {
            config,
            gold,
            found: LinkStore::in_memory(),
            pessimistic: false,
            wrong_found: 0,
            unknown: 0,
            missed: 0,
            report: None,
        }
    }

    pub fn from_link_file(config: Arc<Configuration>, path: &Path) -> Result<Self, EngineError> {
        let file = read_link_file(path)?;
        if !file.errors.is_empty() {
            log::warn!("{}: {} rows skipped", path.display(), file.errors.len());
        }
        let mut gold = LinkStore::in_memory();
        load_into(&mut gold, &file)?;
        Ok(Self::new(config, gold))
    }

    pub fn pessimistic(mut self, pessimistic: bool) -> Self {
        self.pessimistic = pessimistic;
        self
    }

    /// Available once processing has ended.
    pub fn report(&self) -> Option<&EvaluationReport> {
        self.report.as_ref()
    }

    fn ids<'r>(&self, r1: &'r Record, r2: &'r Record) -> Option<(&'r str, &'r str)> {
        Some((self.config.identity_of(r1)?, self.config.identity_of(r2)?))
    }

    fn compute(&self) -> EvaluationReport {
        let live_same = |store: &LinkStore| {
            store.all_links().iter().filter(|l| l.is_live() && l.kind == LinkKind::Same).count()
        };
        let correct_found = live_same(&self.found);
        let correct_total = live_same(&self.gold);

        let mut total = correct_found + self.wrong_found;
        if self.pessimistic {
            total += self.unknown;
        }
        let precision = if total == 0 { 0.0 } else { correct_found as f64 / total as f64 };
        let recall = if correct_total == 0 { 0.0 } else { correct_found as f64 / correct_total as f64 };
        let f_measure = if correct_found == 0 { 0.0 } else { 2.0 * precision * recall / (precision + recall) };

        EvaluationReport {
            correct_found,
            correct_total,
            wrong_found: self.wrong_found,
            unknown: self.unknown,
            missed: self.missed,
            precision,
            recall,
            f_measure,
        }
    }
}

impl MatchListener for EvaluationListener {
    fn start_processing(&mut self) {
        self.found = LinkStore::in_memory();
        self.wrong_found = 0;
        self.unknown = 0;
        self.missed = 0;
        self.report = None;
    }

    fn matches(&mut self, r1: &Record, r2: &Record, confidence: f64) {
        let Some((id1, id2)) = self.ids(r1, r2) else { return };
        match self.gold.link(id1, id2).filter(|l| l.is_live()).map(|l| l.kind) {
            Some(LinkKind::Same) => {
                if let Err(e) = self.found.assert_link(Link::inferred(id1, id2, LinkKind::Same, confidence)) {
                    log::warn!("cannot record match ({id1}, {id2}): {e}");
                }
            }
            Some(LinkKind::Different) => {
                log::debug!("incorrect match ({id1}, {id2})");
                self.wrong_found += 1;
            }
            Some(LinkKind::Possible) | None => self.unknown += 1,
        }
    }

    fn no_match_for(&mut self, record: &Record) {
        let Some(id) = self.config.identity_of(record) else { return };
        let missed = self
            .gold
            .direct_links_for(id)
            .iter()
            .filter(|l| l.is_live() && l.kind == LinkKind::Same)
            .count();
        if missed > 0 {
            log::debug!("{missed} known matches not found for {id}");
        }
        self.missed += missed;
    }

    fn end_processing(&mut self) {
        let report = self.compute();
        log::info!(
            "correct links found: {} / {}; wrong: {}; unknown: {}; precision {:.3}, recall {:.3}, f-measure {:.3}",
            report.correct_found,
            report.correct_total,
            report.wrong_found,
            report.unknown,
            report.precision,
            report.recall,
            report.f_measure
        );
        self.report = Some(report);
    }
}
