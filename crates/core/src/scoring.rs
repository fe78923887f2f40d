//! Score fusion and classification.
//!
//! Each scoring property turns the best similarity over all value pairs into
//! a probability, and the probabilities are combined with naive Bayes:
//! `p1·p2 / (p1·p2 + (1-p1)(1-p2))`. Fusion is commutative and associative,
//! so the order properties are visited in never changes the result.

use crate::config::{Configuration, Property};
use crate::record::Record;

/// Outcome of classifying a fused probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    Same,
    Possible,
    Different,
}

/// Naive Bayes combination of two independent probabilities.
///
/// The `0·1` case has a zero denominator; certainty wins there.
pub fn fuse(p1: f64, p2: f64) -> f64 {
    let num = p1 * p2;
    let denom = num + (1.0 - p1) * (1.0 - p2);
    if denom == 0.0 {
        return 1.0;
    }
    num / denom
}

/// Folds all contributions. `None` when nothing contributed.
///
/// A contribution of exactly 1.0 saturates the result regardless of what
/// else was seen.
pub fn fuse_all<I>(probabilities: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut acc: Option<f64> = None;
    let mut saturated = false;
    for p in probabilities {
        if p >= 1.0 {
            saturated = true;
        }
        acc = Some(match acc {
            None => p,
            Some(prev) => fuse(prev, p),
        });
    }
    if saturated {
        return Some(1.0);
    }
    acc
}

/// Best similarity over all value pairs of one property, or `None` when the
/// property cannot contribute.
pub fn property_similarity(property: &Property, a: &Record, b: &Record) -> Option<f64> {
    if !property.is_scoring() {
        return None;
    }
    let comparator = property.comparator()?;
    let (va, vb) = (a.values(property.name()), b.values(property.name()));
    if va.is_empty() || vb.is_empty() {
        return None;
    }
    let mut best = 0.0f64;
    for x in va {
        for y in vb {
            best = best.max(comparator.compare(x, y));
            if best >= 1.0 {
                return Some(1.0);
            }
        }
    }
    Some(best)
}

/// Fused probability that `a` and `b` describe the same entity.
pub fn score(config: &Configuration, a: &Record, b: &Record) -> Option<f64> {
    fuse_all(
        config
            .properties()
            .iter()
            .filter_map(|p| property_similarity(p, a, b).map(|sim| p.probability_for(sim))),
    )
}

pub fn classify(config: &Configuration, probability: Option<f64>) -> MatchKind {
    let Some(p) = probability else {
        return MatchKind::Different;
    };
    if p >= config.threshold() {
        MatchKind::Same
    } else if config.maybe_threshold() > 0.0 && p >= config.maybe_threshold() {
        MatchKind::Possible
    } else {
        MatchKind::Different
    }
}

/// One property's share of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub property: String,
    pub similarity: f64,
    pub probability: f64,
}

/// Property-by-property account of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub contributions: Vec<Contribution>,
    pub fused: Option<f64>,
    pub kind: MatchKind,
}

pub fn explain(config: &Configuration, a: &Record, b: &Record) -> ScoreBreakdown {
    let contributions: Vec<Contribution> = config
        .properties()
        .iter()
        .filter_map(|p| {
            property_similarity(p, a, b).map(|similarity| Contribution {
                property: p.name().to_string(),
                similarity,
                probability: p.probability_for(similarity),
            })
        })
        .collect();
    let fused = fuse_all(contributions.iter().map(|c| c.probability));
    ScoreBreakdown { kind: classify(config, fused), contributions, fused }
}
