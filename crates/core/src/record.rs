use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An immutable bag of property values.
///
/// Values keep insertion order per property; duplicates and empty strings are
/// dropped when the record is built. Records are shared as `Arc<Record>` and
/// never mutated after construction. Records have no `PartialEq`: two
/// records are the same record only if they share an identity value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, Vec<String>>,
}

impl Record {
    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    /// All values of `property`, empty if the record has none.
    pub fn values(&self, property: &str) -> &[String] {
        self.values.get(property).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value of `property`.
    pub fn value(&self, property: &str) -> Option<&str> {
        self.values(property).first().map(String::as_str)
    }

    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Per-property union of both records, values of `self` first.
    pub fn merge(&self, other: &Record) -> Record {
        let mut builder = RecordBuilder { values: self.values.clone() };
        for (property, values) in &other.values {
            for value in values {
                builder.push(property, value);
            }
        }
        builder.build()
    }
}

#[derive(Debug, Default)]
pub struct RecordBuilder {
    values: BTreeMap<String, Vec<String>>,
}

impl RecordBuilder {
    pub fn value(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        self.push(&property.into(), &value);
        self
    }

    pub fn values<I, S>(mut self, property: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let property = property.into();
        for value in values {
            self.push(&property, &value.into());
        }
        self
    }

    fn push(&mut self, property: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let slot = self.values.entry(property.to_string()).or_default();
        if !slot.iter().any(|v| v == value) {
            slot.push(value.to_string());
        }
    }

    pub fn build(self) -> Record {
        Record { values: self.values }
    }
}
