use serde::Deserialize;

use crate::link::Link;

/// What the store does when a new fact contradicts the SAME/DIFFERENT graph.
/// Every policy reports the contradiction; they differ in who wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionPolicy {
    /// Keep both sides and stop DIFFERENT from spreading through the
    /// conflicted class.
    #[default]
    Flag,
    /// The new fact wins. Conflicting direct links are retracted.
    LatestWins,
    /// The new fact wins only over links it outranks (asserted beats
    /// inferred, then higher confidence). Otherwise it is not stored.
    StrongestWins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Flagged,
    /// The conflicting links were retracted.
    Retracted,
    /// The new link was refused.
    Rejected,
}

/// A new fact that disagrees with what the store already believes.
#[derive(Debug, Clone)]
pub struct Contradiction {
    pub link: Link,
    /// For a SAME link: the DIFFERENT links between the two classes. For a
    /// DIFFERENT link inside one class: the SAME links whose removal would
    /// separate the pair.
    pub conflicting: Vec<Link>,
    pub resolution: Resolution,
}

pub type ContradictionCallback = Box<dyn FnMut(&Contradiction) + Send>;
