//! `matchbook-engine`: the batch processor and its listeners.
//!
//! A [`Processor`] owns one candidate index. Records go in batches: each
//! batch is indexed and committed, then every record is looked up, scored
//! against its candidates on a pool of workers, and the results are handed
//! to the registered [`MatchListener`]s. [`LinkStoreListener`] turns those
//! results into links.

pub mod error;
pub mod evaluation;
pub mod link_file_listener;
pub mod link_listener;
pub mod listener;
pub mod processor;
pub mod settings;

pub use error::EngineError;
pub use evaluation::{EvaluationListener, EvaluationReport};
pub use link_file_listener::LinkFileListener;
pub use link_listener::{LinkStoreListener, SharedLinkStore};
pub use listener::{EventCollector, LogListener, MatchEvent, MatchListener};
pub use processor::{CancelFlag, LinkageStrategy, Processor, ProcessorStats};
pub use settings::{EngineSettings, IndexKind, IndexSettings, LinkSettings, ProcessorSettings};
