//! Engine settings, read from TOML.
//!
//! ```toml
//! [processor]
//! threads = 4
//! batch_size = 10000
//!
//! [index]
//! kind = "blocking"          # or "token"
//! path = "index.db"          # omit for an in-memory index
//!
//! [blocking_index]
//! window_size = 5
//! [[blocking_index.keys]]
//! parts = [{ function = "prefix", property = "name", length = 3 }]
//!
//! [links]
//! contradiction_policy = "latest_wins"
//! path = "links.db"
//! ```
//!
//! Every section and field is optional.

use std::path::PathBuf;
use std::sync::Arc;

use matchbook_core::Configuration;
use matchbook_index::{
    BlockingIndex, BlockingSettings, CandidateIndex, KeyFunctionRegistry, TokenIndex, TokenIndexSettings,
};
use matchbook_links::{ContradictionPolicy, LinkStore};
use serde::Deserialize;

use crate::error::EngineError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub processor: ProcessorSettings,
    pub index: IndexSettings,
    pub token_index: TokenIndexSettings,
    pub blocking_index: BlockingSettings,
    pub links: LinkSettings,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Matching workers per batch.
    pub threads: usize,
    pub batch_size: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self { threads: 1, batch_size: 40_000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Token,
    Blocking,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub kind: IndexKind,
    /// SQLite file backing the index.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub contradiction_policy: ContradictionPolicy,
    /// SQLite file backing the link store.
    pub path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::Settings(message.into())
}

impl EngineSettings {
    pub fn from_toml(input: &str) -> Result<Self, EngineError> {
        let settings: EngineSettings = toml::from_str(input).map_err(|e| invalid(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.processor.threads == 0 {
            return Err(invalid("processor.threads must be at least 1"));
        }
        if self.processor.batch_size == 0 {
            return Err(invalid("processor.batch_size must be at least 1"));
        }

        let token = &self.token_index;
        if token.max_results == 0 {
            return Err(invalid("token_index.max_results must be at least 1"));
        }
        if !(0.0..=1.0).contains(&token.min_relevance) {
            return Err(invalid(format!("token_index.min_relevance must be within [0, 1], got {}", token.min_relevance)));
        }
        if token.cutoff_factor_1 == 0 || token.cutoff_factor_2 == 0 {
            return Err(invalid("token_index cutoff factors must be at least 1"));
        }

        if self.index.kind == IndexKind::Blocking && self.blocking_index.keys.is_empty() {
            return Err(invalid("blocking index needs at least one key in [[blocking_index.keys]]"));
        }
        for (i, key) in self.blocking_index.keys.iter().enumerate() {
            if key.parts.is_empty() {
                return Err(invalid(format!("blocking_index.keys[{i}] has no parts")));
            }
        }
        Ok(())
    }

    /// Builds the configured candidate index, reopening it if it is
    /// persistent.
    pub fn open_index(
        &self,
        config: Arc<Configuration>,
        functions: &KeyFunctionRegistry,
    ) -> Result<Box<dyn CandidateIndex>, EngineError> {
        let index: Box<dyn CandidateIndex> = match (self.index.kind, &self.index.path) {
            (IndexKind::Token, None) => Box::new(TokenIndex::in_memory(config, self.token_index.clone())),
            (IndexKind::Token, Some(path)) => Box::new(TokenIndex::open(path, config, self.token_index.clone())?),
            (IndexKind::Blocking, None) => {
                Box::new(BlockingIndex::from_settings(config, &self.blocking_index, functions)?)
            }
            (IndexKind::Blocking, Some(path)) => {
                let keys = self
                    .blocking_index
                    .keys
                    .iter()
                    .map(|k| functions.resolve(k))
                    .collect::<Result<Vec<_>, _>>()?;
                Box::new(BlockingIndex::open(path, config, self.blocking_index.window_size, keys)?)
            }
        };
        log::info!("opened {:?} index ({} records)", self.index.kind, index.len());
        Ok(index)
    }

    pub fn open_link_store(&self) -> Result<LinkStore, EngineError> {
        let policy = self.links.contradiction_policy;
        let store = match &self.links.path {
            Some(path) => LinkStore::open(path, policy)?,
            None => LinkStore::with_policy(policy),
        };
        Ok(store)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
