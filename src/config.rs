//! Client configuration: TOML files, then environment, then explicit
//! overrides. A field keeps the first value found.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::DbError;
use crate::types::ConnectionConfig;

pub const DEFAULT_URI: &str = "mongodb://localhost:27017/";
pub const DEFAULT_DATABASE: &str = "test";
pub const DEFAULT_COLLECTION: &str = "documents";
const FILE_NAME: &str = "docbridge.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub uri: Option<String>,
    pub database: Option<String>,
    pub collection: Option<String>,
    pub batch_size: Option<u32>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_retention: Option<u32>,
}

impl ClientConfig {
    /// Load from `explicit` (if given) and the standard locations, then fill
    /// the gaps from `DOCBRIDGE_*` variables.
    ///
    /// # Errors
    /// `DbError::Config` when an explicitly named file is missing, or when
    /// any file found is not valid TOML for this shape.
    pub fn load(explicit: Option<&Path>) -> Result<Self, DbError> {
        let mut cfg = Self::default();
        if let Some(path) = explicit {
            cfg.merge(Self::from_file(path)?);
        }
        for path in search_paths() {
            if path.is_file() {
                log::debug!("reading config from {}", path.display());
                cfg.merge(Self::from_file(&path)?);
            }
        }
        cfg.apply_env_with(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// # Errors
    /// `DbError::Config` when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| DbError::Config(format!("{}: {e}", path.display())))?;
        Ok(toml::from_str(&text)?)
    }

    /// Take every field of `other` that is still unset here.
    pub fn merge(&mut self, other: Self) {
        if self.uri.is_none() { self.uri = other.uri; }
        if self.database.is_none() { self.database = other.database; }
        if self.collection.is_none() { self.collection = other.collection; }
        if self.batch_size.is_none() { self.batch_size = other.batch_size; }
        if self.log_dir.is_none() { self.log_dir = other.log_dir; }
        if self.log_level.is_none() { self.log_level = other.log_level; }
        if self.log_retention.is_none() { self.log_retention = other.log_retention; }
    }

    /// Fill unset fields from `DOCBRIDGE_*` variables looked up through `get`.
    /// Numeric variables that do not parse are ignored with a warning.
    pub fn apply_env_with(&mut self, get: impl Fn(&str) -> Option<String>) {
        if self.uri.is_none() { self.uri = get("DOCBRIDGE_URI"); }
        if self.database.is_none() { self.database = get("DOCBRIDGE_DATABASE"); }
        if self.collection.is_none() { self.collection = get("DOCBRIDGE_COLLECTION"); }
        if self.batch_size.is_none() { self.batch_size = parse_env(&get, "DOCBRIDGE_BATCH_SIZE"); }
        if self.log_dir.is_none() { self.log_dir = get("DOCBRIDGE_LOG_DIR").map(PathBuf::from); }
        if self.log_level.is_none() { self.log_level = get("DOCBRIDGE_LOG_LEVEL"); }
        if self.log_retention.is_none() { self.log_retention = parse_env(&get, "DOCBRIDGE_LOG_RETENTION"); }
    }

    /// The connection triple, defaults filled in.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(
            self.uri.as_deref().unwrap_or(DEFAULT_URI),
            self.database.as_deref().unwrap_or(DEFAULT_DATABASE),
            self.collection.as_deref().unwrap_or(DEFAULT_COLLECTION),
        )
    }
}

fn parse_env<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {key}={raw:?}: not a number");
            None
        }
    }
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(p) = std::env::var("DOCBRIDGE_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Some(home) = dirs_next::home_dir() {
        paths.push(home.join(".config").join(FILE_NAME));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join(FILE_NAME));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_fill_the_connection_triple() {
        let c = ClientConfig::default().connection_config();
        assert_eq!(c, ConnectionConfig::new(DEFAULT_URI, DEFAULT_DATABASE, DEFAULT_COLLECTION));
    }

    #[test]
    fn env_only_fills_gaps() {
        let vars: HashMap<&str, &str> = [
            ("DOCBRIDGE_URI", "mongodb://env:1/"),
            ("DOCBRIDGE_DATABASE", "envdb"),
            ("DOCBRIDGE_BATCH_SIZE", "many"),
            ("DOCBRIDGE_LOG_RETENTION", "3"),
        ]
        .into_iter()
        .collect();
        let mut cfg = ClientConfig { database: Some("filedb".into()), ..ClientConfig::default() };
        cfg.apply_env_with(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(cfg.uri.as_deref(), Some("mongodb://env:1/"));
        assert_eq!(cfg.database.as_deref(), Some("filedb"));
        assert_eq!(cfg.batch_size, None);
        assert_eq!(cfg.log_retention, Some(3));
    }

    #[test]
    fn first_value_wins_on_merge() {
        let mut a = ClientConfig { uri: Some("a".into()), ..ClientConfig::default() };
        a.merge(ClientConfig { uri: Some("b".into()), batch_size: Some(7), ..ClientConfig::default() });
        assert_eq!(a.uri.as_deref(), Some("a"));
        assert_eq!(a.batch_size, Some(7));
    }
}
