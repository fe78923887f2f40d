use thiserror::Error;

/// Raised while building or loading a [`Configuration`](crate::Configuration).
/// Always fatal: an engine is never constructed from an invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("configuration has no identity property")]
    MissingIdentity,
    #[error("configuration has more than one identity property: '{first}' and '{second}'")]
    MultipleIdentities { first: String, second: String },
    #[error("duplicate property '{0}'")]
    DuplicateProperty(String),
    /// No non-identity property can contribute evidence.
    #[error("no property can contribute match evidence")]
    NoEvidence,
    #[error("no property is eligible for candidate lookup")]
    NoLookupProperties,
    #[error("property '{property}': {field} must be within [0, 1], got {value}")]
    ProbabilityRange { property: String, field: &'static str, value: f64 },
    #[error("threshold must be within (0, 1], got {0}")]
    Threshold(f64),
    #[error("maybe_threshold must be within [0, threshold], got {0}")]
    MaybeThreshold(f64),
    /// Neither the SAME nor the POSSIBLE band can ever be reached.
    #[error("highest achievable probability {max} reaches neither threshold {threshold} nor maybe_threshold {maybe_threshold}")]
    UnreachableThreshold { max: f64, threshold: f64, maybe_threshold: f64 },
    #[error("unknown comparator '{0}'")]
    UnknownComparator(String),
    #[error("property '{0}' needs a comparator")]
    MissingComparator(String),
}
