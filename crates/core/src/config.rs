use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::comparator::{Comparator, ComparatorRegistry};
use crate::error::ConfigError;
use crate::record::Record;
use crate::scoring::fuse_all;

// ---------------------------------------------------------------------------
// Property
// ---------------------------------------------------------------------------

/// Whether a property feeds candidate retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMode {
    /// Used for lookup when the property is discriminating (`high > 0.5`).
    #[default]
    Default,
    True,
    /// Used for lookup, and a candidate must share a token on this property.
    Required,
    False,
}

#[derive(Clone)]
pub struct Property {
    name: String,
    comparator: Option<Arc<dyn Comparator>>,
    low: f64,
    high: f64,
    is_identity: bool,
    lookup: LookupMode,
}

impl Property {
    pub fn new(name: impl Into<String>, comparator: Arc<dyn Comparator>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            comparator: Some(comparator),
            low,
            high,
            is_identity: false,
            lookup: LookupMode::Default,
        }
    }

    /// The identity property: never compared, never looked up.
    pub fn identity(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comparator: None,
            low: 0.0,
            high: 0.0,
            is_identity: true,
            lookup: LookupMode::False,
        }
    }

    /// A property carried on records but ignored by scoring.
    pub fn ignored(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comparator: None,
            low: 0.0,
            high: 0.0,
            is_identity: false,
            lookup: LookupMode::False,
        }
    }

    pub fn with_lookup(mut self, lookup: LookupMode) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comparator(&self) -> Option<&Arc<dyn Comparator>> {
        self.comparator.as_ref()
    }

    pub fn low_probability(&self) -> f64 {
        self.low
    }

    pub fn high_probability(&self) -> f64 {
        self.high
    }

    pub fn is_identity(&self) -> bool {
        self.is_identity
    }

    pub fn lookup(&self) -> LookupMode {
        self.lookup
    }

    /// Maps a comparator similarity onto this property's probability range.
    pub fn probability_for(&self, similarity: f64) -> f64 {
        let similarity = similarity.clamp(0.0, 1.0);
        self.low + (self.high - self.low) * similarity
    }

    /// Whether the property takes part in scoring at all.
    pub fn is_scoring(&self) -> bool {
        !self.is_identity && self.comparator.is_some()
    }

    pub fn is_lookup(&self) -> bool {
        if self.is_identity {
            return false;
        }
        match self.lookup {
            LookupMode::False => false,
            LookupMode::True | LookupMode::Required => true,
            LookupMode::Default => self.high > 0.5,
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("comparator", &self.comparator.as_ref().map(|c| c.name().to_string()))
            .field("low", &self.low)
            .field("high", &self.high)
            .field("is_identity", &self.is_identity)
            .field("lookup", &self.lookup)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Deduplication compares a dataset with itself; linkage compares one group
/// against another and never links two records of the same group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Deduplication,
    Linkage,
}

/// Validated, immutable matching configuration. Shared as
/// `Arc<Configuration>` by the index, the workers and the listeners.
#[derive(Debug, Clone)]
pub struct Configuration {
    properties: Vec<Property>,
    threshold: f64,
    maybe_threshold: f64,
    mode: Mode,
    identity: usize,
    lookup: Vec<usize>,
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn from_toml(input: &str, registry: &ComparatorRegistry) -> Result<Self, ConfigError> {
        let spec: ConfigurationSpec =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        spec.resolve(registry)
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn identity_property(&self) -> &Property {
        &self.properties[self.identity]
    }

    /// Properties eligible for candidate retrieval, in declaration order.
    pub fn lookup_properties(&self) -> impl Iterator<Item = &Property> + '_ {
        self.lookup.iter().map(move |&ix| &self.properties[ix])
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn maybe_threshold(&self) -> f64 {
        self.maybe_threshold
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Identity values of `record`.
    pub fn identities<'r>(&self, record: &'r Record) -> &'r [String] {
        record.values(&self.identity_property().name)
    }

    /// Primary identity of `record`, if it has one.
    pub fn identity_of<'r>(&self, record: &'r Record) -> Option<&'r str> {
        self.identities(record).first().map(String::as_str)
    }

    /// Highest fused probability any pair of records can reach.
    ///
    /// A property with `high <= 0.5` can only pull the score down, and a
    /// pair that lacks its value never consults it, so only the strong
    /// highs are fused. With no strong property, the best a pair can do is
    /// the single largest high.
    pub fn max_probability(&self) -> f64 {
        let highs = || self.properties.iter().filter(|p| p.is_scoring()).map(|p| p.high);
        fuse_all(highs().filter(|&h| h > 0.5))
            .unwrap_or_else(|| highs().fold(0.0, f64::max))
    }
}

#[derive(Debug)]
pub struct ConfigurationBuilder {
    properties: Vec<Property>,
    threshold: f64,
    maybe_threshold: f64,
    mode: Mode,
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self {
            properties: Vec::new(),
            threshold: 0.9,
            maybe_threshold: 0.0,
            mode: Mode::Deduplication,
        }
    }
}

impl ConfigurationBuilder {
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn maybe_threshold(mut self, maybe_threshold: f64) -> Self {
        self.maybe_threshold = maybe_threshold;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> Result<Configuration, ConfigError> {
        let mut seen = FxHashSet::default();
        let mut identity: Option<usize> = None;
        for (ix, p) in self.properties.iter().enumerate() {
            if !seen.insert(p.name.as_str()) {
                return Err(ConfigError::DuplicateProperty(p.name.clone()));
            }
            for (field, value) in [("low_probability", p.low), ("high_probability", p.high)] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigError::ProbabilityRange {
                        property: p.name.clone(),
                        field,
                        value,
                    });
                }
            }
            if p.is_identity {
                if let Some(first) = identity {
                    return Err(ConfigError::MultipleIdentities {
                        first: self.properties[first].name.clone(),
                        second: p.name.clone(),
                    });
                }
                identity = Some(ix);
            }
        }
        let identity = identity.ok_or(ConfigError::MissingIdentity)?;

        if !self.properties.iter().any(|p| p.is_scoring() && p.high > p.low) {
            return Err(ConfigError::NoEvidence);
        }

        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::Threshold(self.threshold));
        }
        if !(0.0..=self.threshold).contains(&self.maybe_threshold) {
            return Err(ConfigError::MaybeThreshold(self.maybe_threshold));
        }

        let lookup: Vec<usize> = self
            .properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_lookup())
            .map(|(ix, _)| ix)
            .collect();
        if lookup.is_empty() {
            return Err(ConfigError::NoLookupProperties);
        }

        let config = Configuration {
            properties: self.properties,
            threshold: self.threshold,
            maybe_threshold: self.maybe_threshold,
            mode: self.mode,
            identity,
            lookup,
        };

        // The SAME band may be out of reach as long as POSSIBLE is not.
        let max = config.max_probability();
        if max < config.threshold {
            let maybe = config.maybe_threshold;
            if maybe == 0.0 || max < maybe {
                return Err(ConfigError::UnreachableThreshold {
                    max,
                    threshold: config.threshold,
                    maybe_threshold: maybe,
                });
            }
            log::warn!(
                "highest achievable probability {max} is below threshold {}; pairs can only classify as possible matches",
                config.threshold
            );
        }

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Declarative form
// ---------------------------------------------------------------------------

/// TOML shape of a configuration. Comparators are referenced by registry
/// name.
///
/// ```toml
/// threshold = 0.85
/// maybe_threshold = 0.7
///
/// [[properties]]
/// name = "ID"
/// identity = true
///
/// [[properties]]
/// name = "NAME"
/// comparator = "exact"
/// low = 0.3
/// high = 0.8
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigurationSpec {
    pub threshold: f64,
    #[serde(default)]
    pub maybe_threshold: f64,
    #[serde(default)]
    pub mode: Mode,
    pub properties: Vec<PropertySpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    #[serde(default)]
    pub identity: bool,
    #[serde(default)]
    pub ignore: bool,
    #[serde(default)]
    pub comparator: Option<String>,
    #[serde(default)]
    pub low: f64,
    #[serde(default)]
    pub high: f64,
    #[serde(default)]
    pub lookup: LookupMode,
}

impl ConfigurationSpec {
    pub fn resolve(&self, registry: &ComparatorRegistry) -> Result<Configuration, ConfigError> {
        let mut builder = Configuration::builder()
            .threshold(self.threshold)
            .maybe_threshold(self.maybe_threshold)
            .mode(self.mode);
        for p in &self.properties {
            let property = if p.identity {
                Property::identity(&p.name)
            } else if p.ignore {
                Property::ignored(&p.name)
            } else {
                let name = p
                    .comparator
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingComparator(p.name.clone()))?;
                Property::new(&p.name, registry.create(name)?, p.low, p.high).with_lookup(p.lookup)
            };
            builder = builder.property(property);
        }
        builder.build()
    }
}
