//! `matchbook-core`: records, configuration and score fusion.
//!
//! Pure crate: no storage, no threads. Everything here can be shared
//! across workers once built.

pub mod comparator;
pub mod config;
pub mod error;
pub mod record;
pub mod scoring;

pub use comparator::{Comparator, ComparatorRegistry, ExactComparator};
pub use config::{Configuration, ConfigurationBuilder, LookupMode, Mode, Property};
pub use error::ConfigError;
pub use record::{Record, RecordBuilder};
pub use scoring::{classify, explain, fuse, fuse_all, score, MatchKind, ScoreBreakdown};
