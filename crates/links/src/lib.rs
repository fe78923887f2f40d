//! `matchbook-links`: durable match decisions with equivalence-class
//! inference.
//!
//! The store is single-writer: every mutation takes `&mut self`. Callers
//! that share it across threads wrap it in one mutex.

pub mod clock;
pub mod contradiction;
pub mod error;
pub mod link;
pub mod linkfile;
mod persist;
pub mod store;
pub mod union_find;

pub use contradiction::{Contradiction, ContradictionCallback, ContradictionPolicy, Resolution};
pub use error::{LinkFileError, LinkStoreError, RowError};
pub use link::{pair_key, Link, LinkKind, LinkStatus, PairKey, Provenance};
pub use linkfile::{load_into, read_link_file, read_links, LinkFile, LinkFileWriter};
pub use store::{AssertOutcome, LinkStore};
