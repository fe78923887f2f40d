//! Blocking key functions.
//!
//! A key function reduces a record to a single sortable string. Records with
//! equal or neighbouring keys end up as candidates for each other.

use std::fmt;
use std::sync::Arc;

use matchbook_core::Record;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::IndexError;

pub trait KeyFunction: Send + Sync {
    fn name(&self) -> &str;
    fn make_key(&self, record: &Record) -> String;
}

fn tokens(record: &Record, property: &str) -> Vec<String> {
    record
        .value(property)
        .map(|v| v.split_whitespace().map(str::to_lowercase).collect())
        .unwrap_or_default()
}

/// First token longer than `length` characters, else the first token.
pub struct FirstLongerThan {
    name: String,
    property: String,
    length: usize,
}

impl FirstLongerThan {
    pub fn new(property: impl Into<String>, length: usize) -> Self {
        let property = property.into();
        Self { name: format!("first_longer_than({property},{length})"), property, length }
    }
}

impl KeyFunction for FirstLongerThan {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_key(&self, record: &Record) -> String {
        let tokens = tokens(record, &self.property);
        tokens
            .iter()
            .find(|t| t.chars().count() > self.length)
            .or_else(|| tokens.first())
            .cloned()
            .unwrap_or_default()
    }
}

/// Last token longer than `length` characters, else the last token.
pub struct LastLongerThan {
    name: String,
    property: String,
    length: usize,
}

impl LastLongerThan {
    pub fn new(property: impl Into<String>, length: usize) -> Self {
        let property = property.into();
        Self { name: format!("last_longer_than({property},{length})"), property, length }
    }
}

impl KeyFunction for LastLongerThan {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_key(&self, record: &Record) -> String {
        let tokens = tokens(record, &self.property);
        tokens
            .iter()
            .rev()
            .find(|t| t.chars().count() > self.length)
            .or_else(|| tokens.last())
            .cloned()
            .unwrap_or_default()
    }
}

/// Longest token; the earliest wins ties.
pub struct LongestToken {
    name: String,
    property: String,
}

impl LongestToken {
    pub fn new(property: impl Into<String>) -> Self {
        let property = property.into();
        Self { name: format!("longest_token({property})"), property }
    }
}

impl KeyFunction for LongestToken {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_key(&self, record: &Record) -> String {
        let mut best = String::new();
        for token in tokens(record, &self.property) {
            if token.chars().count() > best.chars().count() {
                best = token;
            }
        }
        best
    }
}

/// The digits of the value, in order.
pub struct AllDigits {
    name: String,
    property: String,
}

impl AllDigits {
    pub fn new(property: impl Into<String>) -> Self {
        let property = property.into();
        Self { name: format!("all_digits({property})"), property }
    }
}

impl KeyFunction for AllDigits {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_key(&self, record: &Record) -> String {
        record
            .value(&self.property)
            .map(|v| v.chars().filter(char::is_ascii_digit).collect())
            .unwrap_or_default()
    }
}

/// First `length` characters of the lowercased value.
pub struct Prefix {
    name: String,
    property: String,
    length: usize,
}

impl Prefix {
    pub fn new(property: impl Into<String>, length: usize) -> Self {
        let property = property.into();
        Self { name: format!("prefix({property},{length})"), property, length }
    }
}

impl KeyFunction for Prefix {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_key(&self, record: &Record) -> String {
        record
            .value(&self.property)
            .map(|v| v.to_lowercase().chars().take(self.length).collect())
            .unwrap_or_default()
    }
}

/// Concatenation of several key functions.
pub struct CompositeKey {
    name: String,
    parts: Vec<Arc<dyn KeyFunction>>,
}

impl CompositeKey {
    pub fn new(parts: Vec<Arc<dyn KeyFunction>>) -> Self {
        let name = parts.iter().map(|p| p.name()).collect::<Vec<_>>().join("+");
        Self { name, parts }
    }
}

impl KeyFunction for CompositeKey {
    fn name(&self) -> &str {
        &self.name
    }

    fn make_key(&self, record: &Record) -> String {
        self.parts.iter().map(|p| p.make_key(record)).collect::<Vec<_>>().join("|")
    }
}

// ---------------------------------------------------------------------------
// Declarative form + registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct KeyPartSpec {
    pub function: String,
    pub property: String,
    #[serde(default)]
    pub length: usize,
}

/// One blocking key: a single part, or several parts concatenated.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockingKeySpec {
    pub parts: Vec<KeyPartSpec>,
}

type Constructor = Box<dyn Fn(&KeyPartSpec) -> Arc<dyn KeyFunction> + Send + Sync>;

/// Named key-function constructors.
pub struct KeyFunctionRegistry {
    constructors: FxHashMap<String, Constructor>,
}

impl KeyFunctionRegistry {
    pub fn empty() -> Self {
        Self { constructors: FxHashMap::default() }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("first_longer_than", |s| Arc::new(FirstLongerThan::new(&s.property, s.length)));
        registry.register("last_longer_than", |s| Arc::new(LastLongerThan::new(&s.property, s.length)));
        registry.register("longest_token", |s| Arc::new(LongestToken::new(&s.property)));
        registry.register("all_digits", |s| Arc::new(AllDigits::new(&s.property)));
        registry.register("prefix", |s| Arc::new(Prefix::new(&s.property, s.length)));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&KeyPartSpec) -> Arc<dyn KeyFunction> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn create(&self, spec: &KeyPartSpec) -> Result<Arc<dyn KeyFunction>, IndexError> {
        self.constructors
            .get(&spec.function)
            .map(|ctor| ctor(spec))
            .ok_or_else(|| IndexError::UnknownKeyFunction(spec.function.clone()))
    }

    pub fn resolve(&self, spec: &BlockingKeySpec) -> Result<Arc<dyn KeyFunction>, IndexError> {
        let mut parts = spec.parts.iter().map(|p| self.create(p)).collect::<Result<Vec<_>, _>>()?;
        match parts.len() {
            0 => Err(IndexError::EmptyKey),
            1 => Ok(parts.remove(0)),
            _ => Ok(Arc::new(CompositeKey::new(parts))),
        }
    }
}

impl Default for KeyFunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for KeyFunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("KeyFunctionRegistry").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(name: &str) -> Record {
        Record::builder().value("ID", "1").value("NAME", name).value("PHONE", "+47 22-33 44").build()
    }

    #[test]
    fn first_and_last_longer_than() {
        let r = org("AS Acme Holding ab");
        assert_eq!(FirstLongerThan::new("NAME", 2).make_key(&r), "acme");
        assert_eq!(LastLongerThan::new("NAME", 2).make_key(&r), "holding");
        // nothing long enough: fall back to the edge tokens
        assert_eq!(FirstLongerThan::new("NAME", 10).make_key(&r), "as");
        assert_eq!(LastLongerThan::new("NAME", 10).make_key(&r), "ab");
    }

    #[test]
    fn longest_token_and_digits() {
        let r = org("AS Acme Holding");
        assert_eq!(LongestToken::new("NAME").make_key(&r), "holding");
        assert_eq!(AllDigits::new("PHONE").make_key(&r), "47223344");
        assert_eq!(AllDigits::new("MISSING").make_key(&r), "");
    }

    #[test]
    fn composite_key_joins_parts() {
        let key = CompositeKey::new(vec![
            Arc::new(Prefix::new("NAME", 3)),
            Arc::new(AllDigits::new("PHONE")),
        ]);
        assert_eq!(key.make_key(&org("Acme")), "acm|47223344");
        assert_eq!(key.name(), "prefix(NAME,3)+all_digits(PHONE)");
    }

    #[test]
    fn registry_resolves_specs() {
        let registry = KeyFunctionRegistry::with_builtins();
        let spec = BlockingKeySpec {
            parts: vec![KeyPartSpec { function: "longest_token".into(), property: "NAME".into(), length: 0 }],
        };
        let key = registry.resolve(&spec).unwrap();
        assert_eq!(key.make_key(&org("a bb ccc")), "ccc");

        let bad = BlockingKeySpec {
            parts: vec![KeyPartSpec { function: "metaphone".into(), property: "NAME".into(), length: 0 }],
        };
        assert!(matches!(registry.resolve(&bad), Err(IndexError::UnknownKeyFunction(_))));
        assert!(matches!(registry.resolve(&BlockingKeySpec { parts: vec![] }), Err(IndexError::EmptyKey)));
    }
}
