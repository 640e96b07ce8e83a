//! String-keyed application configuration.
//!
//! Every setting is a string. Defaults are merged in by whoever consumes a
//! key, so a minimal config is an empty one. Typed reads go through
//! [`Config::parse`], which reports the offending key and value instead of
//! silently falling back to zero.
//!
//! A config can also be loaded from TOML. Nested tables are flattened into
//! dotted keys, so
//!
//! ```toml
//! session_store = "redis"
//!
//! [session.redis]
//! address = "10.0.0.5:6379"
//! database = 2
//! ```
//!
//! yields `session_store`, `session.redis.address`, and
//! `session.redis.database` (`"2"`).

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::Error;

/// Ordered string→string configuration map.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key. Returns `self` for chaining.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parses a key into `T`, falling back to `default` when the key is
    /// absent. A present value that fails to parse is an error.
    pub fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, Error> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| Error::InvalidConfig {
                key: key.to_owned(),
                value: raw.to_owned(),
            }),
        }
    }

    /// Copies every entry of `supplied` over `self`; supplied values win.
    pub fn merge(mut self, supplied: &Config) -> Self {
        for (k, v) in &supplied.values {
            self.values.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn from_toml_str(src: &str) -> Result<Self, Error> {
        let table: toml::Table = toml::from_str(src)?;
        let mut config = Self::new();
        flatten("", &table, &mut config);
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Config {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut Config) {
    for (key, value) in table {
        let full = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        match value {
            toml::Value::Table(inner) => flatten(&full, inner, out),
            toml::Value::String(s) => out.set(&full, s.clone()),
            other => out.set(&full, other.to_string()),
        }
    }
}
