//! `matchbook-index`: candidate retrieval.
//!
//! Two strategies behind one contract:
//! - [`TokenIndex`]: inverted token buckets scored by rarity.
//! - [`BlockingIndex`]: ordered blocking keys scanned with a window.
//!
//! Both keep their working set in memory. A persistent backing writes
//! committed records to SQLite and rebuilds the in-memory structures on open.
//!
//! Writes take `&mut self` and reads `&self`: once committed, an index can be
//! shared read-only across any number of workers.

use std::sync::Arc;

use matchbook_core::Record;

pub mod blocking;
pub mod error;
pub mod keys;
pub mod store;
mod table;
pub mod token;

pub use blocking::{BlockingIndex, BlockingSettings};
pub use error::IndexError;
pub use keys::{BlockingKeySpec, KeyFunction, KeyFunctionRegistry, KeyPartSpec};
pub use token::{TokenIndex, TokenIndexSettings};

pub trait CandidateIndex: Send + Sync {
    /// Adds or replaces a record. Re-indexing an identity drops the old
    /// record's memberships first.
    fn index(&mut self, record: Arc<Record>) -> Result<(), IndexError>;

    /// Makes everything indexed so far durable. Must be called before reads
    /// start.
    fn commit(&mut self) -> Result<(), IndexError>;

    /// Records that may match `record`. May include `record` itself if it
    /// was indexed.
    fn find_candidates(&self, record: &Record) -> Result<Vec<Arc<Record>>, IndexError>;

    fn find_by_id(&self, id: &str) -> Result<Option<Arc<Record>>, IndexError>;

    /// Commits and releases resources. Further use is an error.
    fn close(&mut self) -> Result<(), IndexError>;

    fn is_in_memory(&self) -> bool;

    /// Number of distinct records indexed.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
