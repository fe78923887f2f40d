//! The link store: every match decision ever made, plus what follows from
//! them.
//!
//! Direct links are facts about one pair. Live direct SAME links define the
//! equivalence classes; from those the store materialises transitive links:
//! SAME between every two members of a class without a direct link, and
//! DIFFERENT between every member of two classes joined by a direct
//! DIFFERENT link.
//!
//! # Invariants
//!
//! 1. **One link per pair:** links are keyed by canonical `(id1, id2)`.
//! 2. **Classes follow the graph:** `classes` is the union-find over live
//!    direct SAME links, rebuilt whenever one of them goes away.
//! 3. **Transitive links follow their support:** after every write, each
//!    live transitive link is backed by the current classes, and each pair
//!    the classes imply has a link.
//! 4. **Nothing is deleted:** links that lose support become RETRACTED.
//!    Only `rollback` removes rows, and only rows never committed.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::clock::MonotonicClock;
use crate::contradiction::{Contradiction, ContradictionCallback, ContradictionPolicy, Resolution};
use crate::error::LinkStoreError;
use crate::link::{decide, pair_key, Link, LinkKind, Override, PairKey, Provenance};
use crate::persist::SqliteLinks;
use crate::union_find::UnionFind;

/// Result of [`LinkStore::assert_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertOutcome {
    /// Written, with a fresh timestamp.
    Stored,
    /// The store already held this exact fact; nothing changed.
    Unchanged,
    /// The existing link overrides the new one.
    Kept,
    /// Refused by the contradiction policy.
    Rejected,
}

/// Edges of the SAME graph.
fn is_class_edge(link: &Link) -> bool {
    link.is_live() && link.is_direct() && link.kind == LinkKind::Same
}

fn weakest_first(a: &Link, b: &Link) -> Ordering {
    a.strength()
        .partial_cmp(&b.strength())
        .unwrap_or(Ordering::Equal)
        .then(a.timestamp.cmp(&b.timestamp))
}

pub struct LinkStore {
    links: FxHashMap<PairKey, Link>,
    incident: FxHashMap<String, FxHashSet<PairKey>>,
    classes: UnionFind,
    policy: ContradictionPolicy,
    clock: MonotonicClock,
    /// Pre-images of every write since the last commit.
    journal: Vec<(PairKey, Option<Link>)>,
    contradictions: Vec<Contradiction>,
    committed_contradictions: usize,
    on_contradiction: Option<ContradictionCallback>,
    backend: Option<SqliteLinks>,
    closed: bool,
}

impl LinkStore {
    pub fn in_memory() -> Self {
        Self::with_policy(ContradictionPolicy::default())
    }

    pub fn with_policy(policy: ContradictionPolicy) -> Self {
        Self {
            links: FxHashMap::default(),
            incident: FxHashMap::default(),
            classes: UnionFind::new(),
            policy,
            clock: MonotonicClock::new(),
            journal: Vec::new(),
            contradictions: Vec::new(),
            committed_contradictions: 0,
            on_contradiction: None,
            backend: None,
            closed: false,
        }
    }

    /// Opens a persistent store, loading every committed link.
    pub fn open(path: &Path, policy: ContradictionPolicy) -> Result<Self, LinkStoreError> {
        let backend = SqliteLinks::open(path)?;
        let mut store = Self::with_policy(policy);
        for link in backend.load()? {
            store.clock.advance_past(link.timestamp);
            store.apply(link.key(), Some(link));
        }
        store.rebuild_classes();
        log::debug!("link store loaded {} links from {}", store.links.len(), path.display());
        store.backend = Some(backend);
        Ok(store)
    }

    pub fn policy(&self) -> ContradictionPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ContradictionPolicy) {
        self.policy = policy;
    }

    /// Called for every contradiction, after it is logged.
    pub fn on_contradiction(&mut self, callback: ContradictionCallback) {
        self.on_contradiction = Some(callback);
    }

    pub fn is_in_memory(&self) -> bool {
        self.backend.is_none()
    }

    fn ensure_open(&self) -> Result<(), LinkStoreError> {
        if self.closed {
            return Err(LinkStoreError::Closed);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Records a fact about one pair, then brings classes and transitive
    /// links up to date.
    pub fn assert_link(&mut self, mut link: Link) -> Result<AssertOutcome, LinkStoreError> {
        self.ensure_open()?;
        validate(&mut link)?;

        let key = link.key();
        let existing = self.links.get(&key).cloned();
        if let Some(old) = &existing {
            match decide(&link, old) {
                Override::Unchanged => return Ok(AssertOutcome::Unchanged),
                Override::Keep => {
                    log::debug!("link ({}, {}): existing {:?} link kept", key.0, key.1, old.status);
                    return Ok(AssertOutcome::Kept);
                }
                Override::Replace => {}
            }
        }
        link.timestamp = self.clock.next();

        // Old classes of both ends: a split must revisit all of them.
        let mut seeds: FxHashSet<String> = FxHashSet::default();
        seeds.extend(self.classes.class_of(&link.id1));
        seeds.extend(self.classes.class_of(&link.id2));

        let is_edge = is_class_edge(&link);
        let mut rebuild = existing.as_ref().is_some_and(is_class_edge) && !is_edge;
        self.set(key.clone(), Some(link.clone()));
        if rebuild {
            self.rebuild_classes();
        }

        if let Some(conflicting) = self.detect_conflict(&link) {
            let resolution = match self.policy {
                ContradictionPolicy::Flag => Resolution::Flagged,
                ContradictionPolicy::LatestWins => Resolution::Retracted,
                ContradictionPolicy::StrongestWins => {
                    if conflicting.iter().all(|c| link.outranks(c)) {
                        Resolution::Retracted
                    } else {
                        Resolution::Rejected
                    }
                }
            };
            self.report(Contradiction { link: link.clone(), conflicting: conflicting.clone(), resolution });

            match resolution {
                Resolution::Flagged => {}
                Resolution::Retracted => {
                    for c in &conflicting {
                        seeds.insert(c.id1.clone());
                        seeds.insert(c.id2.clone());
                        rebuild |= is_class_edge(c);
                        let at = self.clock.next();
                        self.set(c.key(), Some(c.retracted(at)));
                    }
                }
                Resolution::Rejected => {
                    self.set(key, existing);
                    if rebuild {
                        self.rebuild_classes();
                    }
                    return Ok(AssertOutcome::Rejected);
                }
            }
        }

        if rebuild {
            self.rebuild_classes();
        } else if is_edge {
            self.classes.union(&link.id1, &link.id2);
        }
        self.reconcile(&seeds);
        Ok(AssertOutcome::Stored)
    }

    /// Retracts the direct link on a pair, if it is live. Transitive links
    /// cannot be retracted by hand; they follow their support.
    pub fn retract(&mut self, a: &str, b: &str) -> Result<Option<Link>, LinkStoreError> {
        self.ensure_open()?;
        let key = pair_key(a, b);
        let Some(current) = self.links.get(&key).cloned() else {
            return Ok(None);
        };
        if !current.is_live() || !current.is_direct() {
            return Ok(None);
        }

        let mut seeds: FxHashSet<String> = FxHashSet::default();
        seeds.extend(self.classes.class_of(a));
        seeds.extend(self.classes.class_of(b));

        let retracted = current.retracted(self.clock.next());
        self.set(key, Some(retracted.clone()));
        if is_class_edge(&current) {
            self.rebuild_classes();
        }
        self.reconcile(&seeds);
        Ok(Some(retracted))
    }

    /// Writes every change since the last commit to the backing store in
    /// one transaction.
    pub fn commit(&mut self) -> Result<(), LinkStoreError> {
        self.ensure_open()?;
        if let Some(backend) = self.backend.as_mut() {
            let touched: FxHashSet<&PairKey> = self.journal.iter().map(|(key, _)| key).collect();
            let mut upserts = Vec::new();
            let mut deletes = Vec::new();
            for key in touched {
                match self.links.get(key) {
                    Some(link) => upserts.push(link),
                    None => deletes.push(key),
                }
            }
            backend.write(&upserts, &deletes)?;
        }
        if !self.journal.is_empty() {
            log::debug!("link store committed {} changes", self.journal.len());
        }
        self.journal.clear();
        self.committed_contradictions = self.contradictions.len();
        Ok(())
    }

    /// Discards every change since the last commit.
    pub fn rollback(&mut self) {
        if self.journal.is_empty() {
            return;
        }
        let undone = self.journal.len();
        while let Some((key, previous)) = self.journal.pop() {
            self.apply(key, previous);
        }
        self.contradictions.truncate(self.committed_contradictions);
        self.rebuild_classes();
        log::info!("link store rolled back {undone} changes");
    }

    pub fn close(&mut self) -> Result<(), LinkStoreError> {
        if self.closed {
            return Ok(());
        }
        self.commit()?;
        self.closed = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn link(&self, a: &str, b: &str) -> Option<&Link> {
        self.links.get(&pair_key(a, b))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Every link, in any status, ordered by pair.
    pub fn all_links(&self) -> Vec<Link> {
        let mut links: Vec<Link> = self.links.values().cloned().collect();
        links.sort_by(|a, b| (&a.id1, &a.id2).cmp(&(&b.id1, &b.id2)));
        links
    }

    /// Every link touching any member of `id`'s class, in any status.
    pub fn all_links_for(&self, id: &str) -> Vec<Link> {
        let mut keys: FxHashSet<&PairKey> = FxHashSet::default();
        for member in self.classes.class_of(id) {
            if let Some(set) = self.incident.get(&member) {
                keys.extend(set.iter());
            }
        }
        self.collect(keys)
    }

    /// Links on pairs that include `id` itself.
    pub fn direct_links_for(&self, id: &str) -> Vec<Link> {
        let keys: FxHashSet<&PairKey> = self.incident.get(id).into_iter().flatten().collect();
        self.collect(keys)
    }

    fn collect(&self, keys: FxHashSet<&PairKey>) -> Vec<Link> {
        let mut links: Vec<Link> = keys.into_iter().filter_map(|k| self.links.get(k).cloned()).collect();
        links.sort_by(|a, b| (&a.id1, &a.id2).cmp(&(&b.id1, &b.id2)));
        links
    }

    /// Links written after `since`, oldest first.
    pub fn changes_since(&self, since: DateTime<Utc>) -> Vec<Link> {
        let mut links: Vec<Link> = self.links.values().filter(|l| l.timestamp > since).cloned().collect();
        links.sort_by_key(|l| l.timestamp);
        links
    }

    pub fn class_of(&self, id: &str) -> Vec<String> {
        self.classes.class_of(id)
    }

    pub fn same_class(&self, a: &str, b: &str) -> bool {
        self.classes.same_class(a, b)
    }

    /// All classes with more than one member.
    pub fn classes(&self) -> Vec<Vec<String>> {
        self.classes.classes()
    }

    /// Contradictions seen since the store was created, minus any rolled
    /// back.
    pub fn contradictions(&self) -> &[Contradiction] {
        &self.contradictions
    }

    /// Uncommitted writes.
    pub fn pending_changes(&self) -> usize {
        self.journal.len()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Sets a pair's link without journaling. Returns the previous link.
    fn apply(&mut self, key: PairKey, value: Option<Link>) -> Option<Link> {
        match value {
            Some(link) => {
                self.incident.entry(key.0.clone()).or_default().insert(key.clone());
                self.incident.entry(key.1.clone()).or_default().insert(key.clone());
                self.links.insert(key, link)
            }
            None => {
                let previous = self.links.remove(&key);
                for id in [&key.0, &key.1] {
                    if let Some(set) = self.incident.get_mut(id) {
                        set.remove(&key);
                        if set.is_empty() {
                            self.incident.remove(id);
                        }
                    }
                }
                previous
            }
        }
    }

    fn set(&mut self, key: PairKey, value: Option<Link>) {
        let previous = self.apply(key.clone(), value);
        self.journal.push((key, previous));
    }

    fn rebuild_classes(&mut self) {
        self.classes.clear();
        for link in self.links.values().filter(|l| is_class_edge(l)) {
            self.classes.union(&link.id1, &link.id2);
        }
    }

    fn report(&mut self, contradiction: Contradiction) {
        let link = &contradiction.link;
        log::warn!(
            "contradiction: {} ({}, {}) conflicts with {} link(s), {:?}",
            link.kind,
            link.id1,
            link.id2,
            contradiction.conflicting.len(),
            contradiction.resolution
        );
        if let Some(callback) = self.on_contradiction.as_mut() {
            callback(&contradiction);
        }
        self.contradictions.push(contradiction);
    }

    /// Links the new fact contradicts, if any. Runs after the new link is
    /// stored but before it is merged into the classes.
    fn detect_conflict(&self, link: &Link) -> Option<Vec<Link>> {
        if !link.is_live() || !link.is_direct() {
            return None;
        }
        let conflicting = match link.kind {
            LinkKind::Possible => return None,
            LinkKind::Same => {
                if self.classes.same_class(&link.id1, &link.id2) {
                    return None;
                }
                let mut seen: FxHashSet<&PairKey> = FxHashSet::default();
                let mut found = Vec::new();
                for member in self.classes.class_of(&link.id1) {
                    for key in self.incident.get(&member).into_iter().flatten() {
                        let Some(other) = self.links.get(key) else { continue };
                        if other.kind == LinkKind::Different
                            && other.is_live()
                            && other.is_direct()
                            && self.classes.same_class(other.other_id(&member), &link.id2)
                            && seen.insert(key)
                        {
                            found.push(other.clone());
                        }
                    }
                }
                found
            }
            LinkKind::Different => {
                if !self.classes.same_class(&link.id1, &link.id2) {
                    return None;
                }
                self.plan_cut(&link.id1, &link.id2)
            }
        };
        if conflicting.is_empty() {
            None
        } else {
            Some(conflicting)
        }
    }

    /// SAME links to retract so `a` and `b` end up in different classes,
    /// weakest first along each remaining path.
    fn plan_cut(&self, a: &str, b: &str) -> Vec<Link> {
        let mut removed: FxHashSet<PairKey> = FxHashSet::default();
        while let Some(path) = self.same_path(a, b, &removed) {
            let weakest = path
                .iter()
                .filter_map(|key| self.links.get(key))
                .min_by(|x, y| weakest_first(x, y))
                .map(Link::key);
            match weakest {
                Some(key) => {
                    removed.insert(key);
                }
                None => break,
            }
        }
        let mut cut: Vec<Link> = removed.iter().filter_map(|k| self.links.get(k).cloned()).collect();
        cut.sort_by(|x, y| (&x.id1, &x.id2).cmp(&(&y.id1, &y.id2)));
        cut
    }

    /// Shortest path of SAME edges from `a` to `b`, skipping `removed`.
    fn same_path(&self, a: &str, b: &str, removed: &FxHashSet<PairKey>) -> Option<Vec<PairKey>> {
        let mut prev: FxHashMap<String, (String, PairKey)> = FxHashMap::default();
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut queue = VecDeque::new();
        visited.insert(a.to_string());
        queue.push_back(a.to_string());

        while let Some(node) = queue.pop_front() {
            if node == b {
                let mut path = Vec::new();
                let mut at = node;
                while let Some((from, key)) = prev.get(&at) {
                    path.push(key.clone());
                    at = from.clone();
                }
                return Some(path);
            }
            for key in self.incident.get(&node).into_iter().flatten() {
                if removed.contains(key) {
                    continue;
                }
                let Some(link) = self.links.get(key) else { continue };
                if !is_class_edge(link) {
                    continue;
                }
                let other = link.other_id(&node).to_string();
                if visited.insert(other.clone()) {
                    prev.insert(other.clone(), (node.clone(), key.clone()));
                    queue.push_back(other);
                }
            }
        }
        None
    }

    /// Brings transitive links up to date for the classes of `seeds`.
    fn reconcile(&mut self, seeds: &FxHashSet<String>) {
        // Current classes of everything that was touched.
        let mut inner: FxHashSet<String> = FxHashSet::default();
        for seed in seeds {
            if !inner.contains(seed) {
                inner.extend(self.classes.class_of(seed));
            }
        }

        let mut desired: FxHashMap<PairKey, (LinkKind, f64)> = FxHashMap::default();

        // SAME inside each class.
        let mut groups: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        for id in &inner {
            groups.entry(self.classes.representative(id)).or_default().push(id);
        }
        for members in groups.values().filter(|m| m.len() > 1) {
            let confidence = members
                .iter()
                .flat_map(|m| self.incident.get(*m).into_iter().flatten())
                .filter_map(|key| self.links.get(key))
                .filter(|l| is_class_edge(l))
                .map(|l| l.confidence)
                .fold(1.0f64, f64::min);
            for (i, x) in members.iter().enumerate() {
                for y in &members[i + 1..] {
                    desired.insert(pair_key(x, y), (LinkKind::Same, confidence));
                }
            }
        }

        // DIFFERENT across classes joined by a direct DIFFERENT link.
        let mut different: FxHashMap<&PairKey, f64> = FxHashMap::default();
        for id in &inner {
            for key in self.incident.get(id).into_iter().flatten() {
                if let Some(l) = self.links.get(key) {
                    if l.kind == LinkKind::Different && l.is_live() && l.is_direct() {
                        different.insert(key, l.confidence);
                    }
                }
            }
        }
        for (key, confidence) in different {
            if self.classes.same_class(&key.0, &key.1) {
                continue;
            }
            let left = self.classes.class_of(&key.0);
            let right = self.classes.class_of(&key.1);
            for x in &left {
                for y in &right {
                    let entry = desired.entry(pair_key(x, y)).or_insert((LinkKind::Different, confidence));
                    entry.1 = entry.1.max(confidence);
                }
            }
        }

        // Write what is missing or changed.
        let mut wanted: Vec<(&PairKey, &(LinkKind, f64))> = desired.iter().collect();
        wanted.sort_by(|a, b| a.0.cmp(b.0));
        let mut writes = Vec::new();
        for (key, &(kind, confidence)) in wanted {
            match self.links.get(key) {
                Some(l) if l.is_live() && l.is_direct() => continue,
                Some(l) if l.is_live() && l.kind == kind && l.confidence == confidence => continue,
                _ => writes.push((key.clone(), kind, confidence)),
            }
        }

        // Retract transitive links that lost their support.
        let mut stale: Vec<PairKey> = inner
            .iter()
            .flat_map(|id| self.incident.get(id).into_iter().flatten())
            .filter(|key| !desired.contains_key(*key))
            .filter(|key| {
                self.links
                    .get(*key)
                    .is_some_and(|l| l.is_live() && l.provenance == Provenance::Transitive)
            })
            .cloned()
            .collect();
        stale.sort();
        stale.dedup();

        for (key, kind, confidence) in writes {
            let at = self.clock.next();
            self.set(key.clone(), Some(Link::transitive(&key, kind, confidence, at)));
        }
        for key in stale {
            if let Some(link) = self.links.get(&key).cloned() {
                let at = self.clock.next();
                self.set(key, Some(link.retracted(at)));
            }
        }
    }
}

/// Canonicalises and checks a caller-supplied link.
fn validate(link: &mut Link) -> Result<(), LinkStoreError> {
    if link.id1.is_empty() || link.id2.is_empty() {
        return Err(LinkStoreError::InvalidLink("empty identity".into()));
    }
    if link.id1 == link.id2 {
        return Err(LinkStoreError::InvalidLink(format!("link from '{}' to itself", link.id1)));
    }
    if !(0.0..=1.0).contains(&link.confidence) {
        return Err(LinkStoreError::InvalidLink(format!(
            "confidence must be within [0, 1], got {}",
            link.confidence
        )));
    }
    if link.provenance == Provenance::Transitive {
        return Err(LinkStoreError::InvalidLink("transitive links are derived, not asserted".into()));
    }
    if link.id1 < link.id2 {
        std::mem::swap(&mut link.id1, &mut link.id2);
    }
    Ok(())
}

impl std::fmt::Debug for LinkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStore")
            .field("links", &self.links.len())
            .field("classes", &self.classes.classes().len())
            .field("policy", &self.policy)
            .field("pending", &self.journal.len())
            .field("in_memory", &self.backend.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkStatus;

    fn same(a: &str, b: &str) -> Link {
        Link::asserted(a, b, LinkKind::Same, 1.0)
    }

    fn different(a: &str, b: &str) -> Link {
        Link::asserted(a, b, LinkKind::Different, 1.0)
    }

    #[test]
    fn retracting_a_bridge_splits_the_class() {
        let mut store = LinkStore::in_memory();
        store.assert_link(same("1", "2")).unwrap();
        store.assert_link(same("2", "3")).unwrap();
        let derived = store.link("1", "3").unwrap().clone();
        assert_eq!(derived.provenance, Provenance::Transitive);

        store.retract("2", "3").unwrap().unwrap();
        assert_eq!(store.class_of("3"), vec!["3"]);
        assert_eq!(store.class_of("1"), vec!["1", "2"]);

        let after = store.link("1", "3").unwrap();
        assert_eq!(after.status, LinkStatus::Retracted);
        assert!(after.timestamp > derived.timestamp);
    }

    #[test]
    fn transitive_links_cannot_be_retracted_by_hand() {
        let mut store = LinkStore::in_memory();
        store.assert_link(same("1", "2")).unwrap();
        store.assert_link(same("2", "3")).unwrap();
        assert!(store.retract("1", "3").unwrap().is_none());
        assert!(store.link("1", "3").unwrap().is_live());
    }

    #[test]
    fn rollback_restores_last_commit() {
        let mut store = LinkStore::in_memory();
        store.assert_link(same("1", "2")).unwrap();
        store.commit().unwrap();
        let before = store.all_links();

        store.assert_link(same("2", "3")).unwrap();
        store.assert_link(different("1", "4")).unwrap();
        assert!(store.pending_changes() > 0);
        store.rollback();

        assert_eq!(store.pending_changes(), 0);
        assert_eq!(store.all_links(), before);
        assert_eq!(store.class_of("1"), vec!["1", "2"]);
        assert!(store.link("1", "4").is_none());
    }

    #[test]
    fn rollback_drops_uncommitted_contradictions() {
        let mut store = LinkStore::in_memory();
        store.assert_link(same("1", "2")).unwrap();
        store.assert_link(same("2", "3")).unwrap();
        store.commit().unwrap();
        store.assert_link(different("1", "3")).unwrap();
        assert_eq!(store.contradictions().len(), 1);
        store.rollback();
        assert!(store.contradictions().is_empty());
        assert_eq!(store.link("1", "3").unwrap().kind, LinkKind::Same);
    }

    #[test]
    fn flag_policy_keeps_both_sides() {
        let mut store = LinkStore::in_memory();
        store.assert_link(same("1", "2")).unwrap();
        store.assert_link(same("2", "3")).unwrap();
        assert_eq!(store.assert_link(different("1", "3")).unwrap(), AssertOutcome::Stored);

        let c = &store.contradictions()[0];
        assert_eq!(c.resolution, Resolution::Flagged);
        assert_eq!(c.conflicting.len(), 1);
        // the class stands and the DIFFERENT fact is kept as stated
        assert_eq!(store.class_of("1"), vec!["1", "2", "3"]);
        assert_eq!(store.link("1", "3").unwrap().kind, LinkKind::Different);
    }

    #[test]
    fn latest_wins_cuts_the_weakest_same_link() {
        let mut store = LinkStore::with_policy(ContradictionPolicy::LatestWins);
        store.assert_link(Link::asserted("1", "2", LinkKind::Same, 0.6)).unwrap();
        store.assert_link(Link::asserted("2", "3", LinkKind::Same, 0.9)).unwrap();
        store.assert_link(different("1", "3")).unwrap();

        assert_eq!(store.contradictions()[0].resolution, Resolution::Retracted);
        assert_eq!(store.link("1", "2").unwrap().kind, LinkKind::Different);
        assert_eq!(store.link("1", "2").unwrap().provenance, Provenance::Transitive);
        assert_eq!(store.class_of("2"), vec!["2", "3"]);
        assert_eq!(store.class_of("1"), vec!["1"]);
    }

    #[test]
    fn latest_wins_retracts_different_on_merge() {
        let mut store = LinkStore::with_policy(ContradictionPolicy::LatestWins);
        store.assert_link(different("1", "2")).unwrap();
        store.assert_link(same("2", "3")).unwrap();
        store.assert_link(same("1", "3")).unwrap();

        assert_eq!(store.class_of("1"), vec!["1", "2", "3"]);
        let l = store.link("1", "2").unwrap();
        assert_eq!((l.kind, l.provenance), (LinkKind::Same, Provenance::Transitive));
    }

    #[test]
    fn strongest_wins_rejects_weaker_fact() {
        let mut store = LinkStore::with_policy(ContradictionPolicy::StrongestWins);
        store.assert_link(same("1", "2")).unwrap();
        store.assert_link(same("2", "3")).unwrap();
        let outcome = store.assert_link(Link::inferred("1", "3", LinkKind::Different, 0.9)).unwrap();

        assert_eq!(outcome, AssertOutcome::Rejected);
        assert_eq!(store.contradictions()[0].resolution, Resolution::Rejected);
        let l = store.link("1", "3").unwrap();
        assert_eq!((l.kind, l.provenance), (LinkKind::Same, Provenance::Transitive));
        assert_eq!(store.class_of("1"), vec!["1", "2", "3"]);
    }

    #[test]
    fn strongest_wins_overrules_weaker_links() {
        let mut store = LinkStore::with_policy(ContradictionPolicy::StrongestWins);
        store.assert_link(Link::inferred("1", "2", LinkKind::Same, 0.9)).unwrap();
        store.assert_link(different("2", "3")).unwrap();
        // asserted DIFFERENT outranks inferred SAME, so merging 1 and 3 is refused
        let outcome = store.assert_link(Link::inferred("1", "3", LinkKind::Same, 0.95)).unwrap();
        assert_eq!(outcome, AssertOutcome::Rejected);
        assert_eq!(store.link("1", "3").unwrap().kind, LinkKind::Different);

        // equal strength does not outrank
        let outcome = store.assert_link(same("1", "3")).unwrap();
        assert_eq!(outcome, AssertOutcome::Rejected);
    }

    #[test]
    fn rejects_invalid_links() {
        let mut store = LinkStore::in_memory();
        assert!(matches!(store.assert_link(same("1", "1")), Err(LinkStoreError::InvalidLink(_))));
        assert!(matches!(
            store.assert_link(Link::asserted("1", "2", LinkKind::Same, 1.5)),
            Err(LinkStoreError::InvalidLink(_))
        ));
    }

    #[test]
    fn contradiction_callback_fires() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
        use std::sync::Arc;

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let mut store = LinkStore::in_memory();
        store.on_contradiction(Box::new(move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        store.assert_link(different("1", "2")).unwrap();
        store.assert_link(same("1", "2")).unwrap();
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 0);
        store.assert_link(same("2", "3")).unwrap();
        store.assert_link(different("1", "3")).unwrap();
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);
    }
}
