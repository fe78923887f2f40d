use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much a link is believed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Stated by a person or an authoritative source.
    Asserted,
    /// Concluded by the engine.
    Inferred,
    /// Once believed, no longer supported. Kept as history.
    Retracted,
}

impl LinkStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Asserted => 2,
            Self::Inferred => 1,
            Self::Retracted => 0,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(Self::Asserted),
            1 => Some(Self::Inferred),
            0 => Some(Self::Retracted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Same,
    Possible,
    Different,
}

impl LinkKind {
    pub fn code(self) -> i64 {
        match self {
            Self::Same => 1,
            Self::Possible => 2,
            Self::Different => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Same),
            2 => Some(Self::Possible),
            3 => Some(Self::Different),
            _ => None,
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Same => write!(f, "same"),
            Self::Possible => write!(f, "possible"),
            Self::Different => write!(f, "different"),
        }
    }
}

/// Where a link came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Asserted by a caller or observed by the engine for this exact pair.
    Direct,
    /// Materialised by closure over equivalence classes.
    Transitive,
}

impl Provenance {
    pub fn code(self) -> i64 {
        match self {
            Self::Direct => 0,
            Self::Transitive => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Direct),
            1 => Some(Self::Transitive),
            _ => None,
        }
    }
}

/// Canonical pair key: larger id first.
pub type PairKey = (String, String);

pub fn pair_key(a: &str, b: &str) -> PairKey {
    if a >= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// A decision about one unordered pair of identities.
///
/// `id1 >= id2` always holds, so each pair has exactly one representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id1: String,
    pub id2: String,
    pub status: LinkStatus,
    pub kind: LinkKind,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
}

impl Link {
    pub fn new(a: &str, b: &str, kind: LinkKind, status: LinkStatus, confidence: f64) -> Self {
        let (id1, id2) = pair_key(a, b);
        Self {
            id1,
            id2,
            status,
            kind,
            confidence,
            timestamp: Utc::now(),
            provenance: Provenance::Direct,
        }
    }

    pub fn asserted(a: &str, b: &str, kind: LinkKind, confidence: f64) -> Self {
        Self::new(a, b, kind, LinkStatus::Asserted, confidence)
    }

    pub fn inferred(a: &str, b: &str, kind: LinkKind, confidence: f64) -> Self {
        Self::new(a, b, kind, LinkStatus::Inferred, confidence)
    }

    pub(crate) fn transitive(key: &PairKey, kind: LinkKind, confidence: f64, at: DateTime<Utc>) -> Self {
        Self {
            id1: key.0.clone(),
            id2: key.1.clone(),
            status: LinkStatus::Inferred,
            kind,
            confidence,
            timestamp: at,
            provenance: Provenance::Transitive,
        }
    }

    pub fn key(&self) -> PairKey {
        (self.id1.clone(), self.id2.clone())
    }

    /// The retracted form of this link as of `at`.
    pub fn retracted(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: LinkStatus::Retracted,
            confidence: 0.0,
            timestamp: at,
            ..self.clone()
        }
    }

    pub fn is_live(&self) -> bool {
        self.status != LinkStatus::Retracted
    }

    pub fn is_direct(&self) -> bool {
        self.provenance == Provenance::Direct
    }

    pub fn involves(&self, id: &str) -> bool {
        self.id1 == id || self.id2 == id
    }

    /// The id at the other end from `id`.
    pub fn other_id(&self, id: &str) -> &str {
        if self.id1 == id {
            &self.id2
        } else {
            &self.id1
        }
    }

    /// Same pair and same belief. Timestamps are ignored.
    pub fn same_fact(&self, other: &Link) -> bool {
        self.id1 == other.id1
            && self.id2 == other.id2
            && self.kind == other.kind
            && self.status == other.status
            && self.confidence == other.confidence
            && self.provenance == other.provenance
    }

    /// Ordering used when contradicting links compete: status first, then
    /// confidence.
    pub(crate) fn strength(&self) -> (i64, f64) {
        (self.status.code(), self.confidence)
    }

    pub(crate) fn outranks(&self, other: &Link) -> bool {
        let (s, c) = self.strength();
        let (os, oc) = other.strength();
        s > os || (s == os && c > oc)
    }
}

/// What storing `new` over `old` amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Override {
    /// Identical belief; nothing to write.
    Unchanged,
    /// The existing link wins.
    Keep,
    Replace,
}

/// Override rule for a new fact arriving on a pair that already has a link.
pub(crate) fn decide(new: &Link, old: &Link) -> Override {
    if new.same_fact(old) {
        return Override::Unchanged;
    }
    if old.status == LinkStatus::Retracted || new.status == LinkStatus::Retracted {
        return Override::Replace;
    }
    match (new.status, old.status) {
        (LinkStatus::Asserted, LinkStatus::Inferred) => Override::Replace,
        (LinkStatus::Inferred, LinkStatus::Asserted) => Override::Keep,
        _ => {
            let material = new.kind != old.kind || new.provenance != old.provenance;
            if !material && old.confidence > new.confidence {
                Override::Keep
            } else {
                Override::Replace
            }
        }
    }
}
