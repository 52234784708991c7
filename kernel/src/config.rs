// Engine Configuration
//
// Tunables for the engine and the per-call option sets handed to the
// table handle. Loaded from JSON; every field has a built-in default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DeltaError, DeltaResult};
use crate::log::TableVersion;

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Vacuum refuses shorter retention periods while enforcement is on.
    pub min_retention_hours: u64,
    /// Commit files fetched concurrently during replay.
    pub log_buffer_size: usize,
    /// Checkpoint every N versions unless the table configures
    /// `delta.checkpointInterval`.
    pub checkpoint_interval: i64,
}

impl EngineConfig {
    /// Built-in configuration used when none is provided.
    pub fn default_config() -> Self {
        Self {
            min_retention_hours: 168,
            log_buffer_size: 4,
            checkpoint_interval: 100,
        }
    }

    pub fn from_json(raw: &str) -> DeltaResult<Self> {
        serde_json::from_str(raw).map_err(|err| DeltaError::Generic(format!("invalid engine config: {err}")))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Backend options passed through to the object store, e.g. credentials
/// or region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions(BTreeMap<String, String>);

impl StorageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Build from raw key/value byte strings. Both must be valid UTF-8.
    pub fn from_byte_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> DeltaResult<Self>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut options = BTreeMap::new();
        for (key, value) in pairs {
            let key = std::str::from_utf8(key.as_ref())?.to_string();
            let value = std::str::from_utf8(value.as_ref())?.to_string();
            options.insert(key, value);
        }
        Ok(Self(options))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StorageOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// How a table handle is opened.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    pub version: TableVersion,
    pub storage_options: StorageOptions,
    /// Skip materializing the active file set until it is first needed.
    pub without_files: bool,
    /// Overrides `EngineConfig::log_buffer_size` for this handle.
    pub log_buffer_size: Option<usize>,
}

impl TableOptions {
    pub fn at_version(mut self, version: TableVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_storage_options(mut self, storage_options: StorageOptions) -> Self {
        self.storage_options = storage_options;
        self
    }

    pub fn without_files(mut self) -> Self {
        self.without_files = true;
        self
    }
}

/// Options for a vacuum run.
#[derive(Debug, Clone, PartialEq)]
pub struct VacuumOptions {
    pub dry_run: bool,
    /// Defaults to `EngineConfig::min_retention_hours`.
    pub retention_hours: Option<u64>,
    pub enforce_retention_duration: bool,
    /// Merged into the commit info recorded for the run.
    pub custom_metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl Default for VacuumOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            retention_hours: None,
            enforce_retention_duration: true,
            custom_metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = EngineConfig::from_json(r#"{"log_buffer_size": 16}"#).unwrap();
        assert_eq!(config.log_buffer_size, 16);
        assert_eq!(config.min_retention_hours, 168);
        assert_eq!(config.checkpoint_interval, 100);
    }

    #[test]
    fn malformed_config_is_rejected() {
        assert!(EngineConfig::from_json("{").is_err());
    }

    #[test]
    fn storage_options_reject_invalid_utf8() {
        let ok = StorageOptions::from_byte_pairs([(b"region".as_slice(), b"eu-west-1".as_slice())])
            .unwrap();
        assert_eq!(ok.get("region"), Some("eu-west-1"));

        let err = StorageOptions::from_byte_pairs([(b"key".as_slice(), [0xffu8, 0xfe].as_slice())])
            .unwrap_err();
        assert!(matches!(err, DeltaError::Utf8(_)));
    }

    #[test]
    fn vacuum_enforces_retention_by_default() {
        let options = VacuumOptions::default();
        assert!(options.enforce_retention_duration);
        assert!(!options.dry_run);
    }
}
