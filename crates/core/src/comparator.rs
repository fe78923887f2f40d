use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::ConfigError;

/// A string similarity function. Implementations must be pure: the engine
/// calls them from many workers at once.
pub trait Comparator: Send + Sync {
    /// Similarity in [0, 1]. 1.0 means the values are equivalent.
    fn compare(&self, a: &str, b: &str) -> f64;

    /// Whether the comparator looks at individual tokens rather than the
    /// whole value.
    fn is_tokenized(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// 1.0 for equal strings, 0.0 otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactComparator;

impl Comparator for ExactComparator {
    fn compare(&self, a: &str, b: &str) -> f64 {
        if a == b {
            1.0
        } else {
            0.0
        }
    }

    fn name(&self) -> &str {
        "exact"
    }
}

type Constructor = Box<dyn Fn() -> Arc<dyn Comparator> + Send + Sync>;

/// Named comparator constructors, resolved when a configuration is loaded.
pub struct ComparatorRegistry {
    constructors: FxHashMap<String, Constructor>,
}

impl ComparatorRegistry {
    pub fn empty() -> Self {
        Self { constructors: FxHashMap::default() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("exact", || Arc::new(ExactComparator));
        registry
    }

    /// Registers `name`, replacing any earlier constructor of that name.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn Comparator> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn Comparator>, ConfigError> {
        self.constructors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| ConfigError::UnknownComparator(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ComparatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparatorRegistry").field("names", &self.names()).finish()
    }
}
