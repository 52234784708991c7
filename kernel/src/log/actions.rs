// Action Codec
//
// Decodes log records into a closed set of action variants and encodes
// them back. Record kinds this engine does not model are carried as
// `Action::Unknown` so rewriting a log never drops them.

use std::collections::HashMap;

use bytes::Bytes;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::schema::StructType;
use crate::error::{DeltaError, DeltaResult};

const ADD_KEY: &str = "add";
const REMOVE_KEY: &str = "remove";
const METADATA_KEY: &str = "metaData";
const PROTOCOL_KEY: &str = "protocol";
const COMMIT_INFO_KEY: &str = "commitInfo";
const TXN_KEY: &str = "txn";

const ACTION_KEYS: [&str; 6] = [
    ADD_KEY,
    REMOVE_KEY,
    METADATA_KEY,
    PROTOCOL_KEY,
    COMMIT_INFO_KEY,
    TXN_KEY,
];

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A data file becoming part of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFile {
    /// Path relative to the table root.
    pub path: String,
    pub size: i64,
    #[serde(default)]
    pub partition_values: HashMap<String, Option<String>>,
    pub modification_time: i64,
    pub data_change: bool,
    /// Raw statistics JSON. Parsed on demand, see [`AddFile::get_stats`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, Option<String>>>,
}

impl AddFile {
    pub fn new(path: impl Into<String>, size: i64) -> Self {
        Self {
            path: path.into(),
            size,
            partition_values: HashMap::new(),
            modification_time: now_millis(),
            data_change: true,
            stats: None,
            tags: None,
        }
    }

    pub fn with_partition_value(mut self, column: impl Into<String>, value: Option<String>) -> Self {
        self.partition_values.insert(column.into(), value);
        self
    }

    pub fn with_stats(mut self, stats: impl Into<String>) -> Self {
        self.stats = Some(stats.into());
        self
    }

    /// Parse the statistics attached to this file.
    ///
    /// Fails with `InvalidStatsJson` when stats are present but malformed.
    pub fn get_stats(&self) -> DeltaResult<Option<Stats>> {
        self.stats
            .as_deref()
            .map(|raw| {
                serde_json::from_str(raw).map_err(|json_err| DeltaError::InvalidStatsJson { json_err })
            })
            .transpose()
    }

    /// Statistics if they parse, `None` otherwise.
    pub fn stats_lenient(&self) -> Option<Stats> {
        self.get_stats().ok().flatten()
    }

    /// Tombstone for this file, carrying its partition values and size.
    pub fn to_remove(&self, deletion_timestamp: i64) -> RemoveFile {
        RemoveFile {
            path: self.path.clone(),
            deletion_timestamp: Some(deletion_timestamp),
            data_change: true,
            extended_file_metadata: Some(true),
            partition_values: Some(self.partition_values.clone()),
            size: Some(self.size),
        }
    }
}

/// Per-file column statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub num_records: i64,
    #[serde(default)]
    pub min_values: HashMap<String, Value>,
    #[serde(default)]
    pub max_values: HashMap<String, Value>,
    #[serde(default)]
    pub null_count: HashMap<String, Value>,
}

/// A data file leaving the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,
    pub data_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_file_metadata: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<HashMap<String, Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

impl RemoveFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            deletion_timestamp: Some(now_millis()),
            data_change: true,
            extended_file_metadata: None,
            partition_values: None,
            size: None,
        }
    }
}

/// Storage format of the data files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub provider: String,
    #[serde(default)]
    pub options: HashMap<String, Option<String>>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: "parquet".into(),
            options: HashMap::new(),
        }
    }
}

/// Table identity, schema, partitioning and configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub format: Format,
    /// Schema as a JSON string. Empty means the table has no schema yet.
    #[serde(default)]
    pub schema_string: String,
    #[serde(default)]
    pub partition_columns: Vec<String>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}

impl Metadata {
    /// Metadata for a new table with a freshly generated id.
    pub fn try_new(
        schema: &StructType,
        partition_columns: Vec<String>,
        configuration: HashMap<String, String>,
    ) -> DeltaResult<Self> {
        let schema_string = serde_json::to_string(schema)
            .map_err(|json_err| DeltaError::SerializeSchemaJson { json_err })?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: None,
            description: None,
            format: Format::default(),
            schema_string,
            partition_columns,
            configuration,
            created_time: Some(now_millis()),
        })
    }

    /// Parsed table schema.
    pub fn schema(&self) -> DeltaResult<StructType> {
        if self.schema_string.trim().is_empty() {
            return Err(DeltaError::NoSchema);
        }
        serde_json::from_str(&self.schema_string)
            .map_err(|json_err| DeltaError::InvalidSchema { json_err })
    }
}

/// Reader and writer requirements of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub min_reader_version: i32,
    pub min_writer_version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_features: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer_features: Option<Vec<String>>,
}

impl Protocol {
    pub fn new(min_reader_version: i32, min_writer_version: i32) -> Self {
        Self {
            min_reader_version,
            min_writer_version,
            reader_features: None,
            writer_features: None,
        }
    }
}

/// Provenance of a commit. Keys this engine does not model are kept in
/// `extra` so they survive a rewrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_parameters: Option<HashMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_metrics: Option<HashMap<String, Value>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl CommitInfo {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            timestamp: Some(now_millis()),
            operation: Some(operation.into()),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operation_parameters
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operation_metrics
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Last committed version of an application's idempotent writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub app_id: String,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

/// One record of the transaction log.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Add(AddFile),
    Remove(RemoveFile),
    Metadata(Metadata),
    Protocol(Protocol),
    CommitInfo(CommitInfo),
    Transaction(Transaction),
    /// A record kind this engine does not interpret, kept verbatim.
    Unknown(Value),
}

impl Action {
    /// Decode one record from its JSON value.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let record = match value {
            Value::Object(record) => record,
            other => {
                return Err(serde_json::Error::custom(format!(
                    "expected a json object, found `{other}`"
                )))
            }
        };

        let known = record
            .keys()
            .filter(|key| ACTION_KEYS.contains(&key.as_str()))
            .count();
        if known == 0 {
            return Ok(Action::Unknown(Value::Object(record)));
        }
        if record.len() != 1 {
            return Err(serde_json::Error::custom(
                "a log record must hold exactly one action",
            ));
        }

        let (key, body) = record
            .into_iter()
            .next()
            .ok_or_else(|| serde_json::Error::custom("empty log record"))?;

        match key.as_str() {
            ADD_KEY => serde_json::from_value(body).map(Action::Add),
            REMOVE_KEY => serde_json::from_value(body).map(Action::Remove),
            METADATA_KEY => serde_json::from_value(body).map(Action::Metadata),
            PROTOCOL_KEY => serde_json::from_value(body).map(Action::Protocol),
            COMMIT_INFO_KEY => serde_json::from_value(body).map(Action::CommitInfo),
            TXN_KEY => serde_json::from_value(body).map(Action::Transaction),
            other => Err(serde_json::Error::custom(format!(
                "unhandled action kind `{other}`"
            ))),
        }
    }

    /// Encode this record as a JSON value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let (key, body) = match self {
            Action::Unknown(value) => return Ok(value.clone()),
            Action::Add(add) => (ADD_KEY, serde_json::to_value(add)?),
            Action::Remove(remove) => (REMOVE_KEY, serde_json::to_value(remove)?),
            Action::Metadata(metadata) => (METADATA_KEY, serde_json::to_value(metadata)?),
            Action::Protocol(protocol) => (PROTOCOL_KEY, serde_json::to_value(protocol)?),
            Action::CommitInfo(info) => (COMMIT_INFO_KEY, serde_json::to_value(info)?),
            Action::Transaction(txn) => (TXN_KEY, serde_json::to_value(txn)?),
        };

        let mut record = serde_json::Map::with_capacity(1);
        record.insert(key.to_string(), body);
        Ok(Value::Object(record))
    }

    /// Key under which this action is recorded, `None` for unknown records.
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            Action::Add(_) => Some(ADD_KEY),
            Action::Remove(_) => Some(REMOVE_KEY),
            Action::Metadata(_) => Some(METADATA_KEY),
            Action::Protocol(_) => Some(PROTOCOL_KEY),
            Action::CommitInfo(_) => Some(COMMIT_INFO_KEY),
            Action::Transaction(_) => Some(TXN_KEY),
            Action::Unknown(_) => None,
        }
    }
}

/// Decode a commit file: one action per non-blank line.
pub fn decode_actions(bytes: &[u8]) -> DeltaResult<Vec<Action>> {
    let text = std::str::from_utf8(bytes)?;
    let mut actions = Vec::new();

    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let action = serde_json::from_str::<Value>(line)
            .and_then(Action::from_value)
            .map_err(|json_err| DeltaError::InvalidJsonLog {
                line: index + 1,
                json_err,
            })?;
        actions.push(action);
    }

    Ok(actions)
}

/// Encode actions as newline-delimited JSON.
pub fn encode_actions(actions: &[Action]) -> DeltaResult<Bytes> {
    let mut out = Vec::new();
    for action in actions {
        let value = action
            .to_value()
            .map_err(|json_err| DeltaError::SerializeLogJson { json_err })?;
        serde_json::to_writer(&mut out, &value)
            .map_err(|json_err| DeltaError::SerializeLogJson { json_err })?;
        out.push(b'\n');
    }
    Ok(Bytes::from(out))
}
