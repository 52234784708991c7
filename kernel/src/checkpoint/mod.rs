// Checkpoints
//
// A checkpoint stores the full reconstructed state at one version as a
// single Parquet file, so readers can start from it instead of replaying
// every commit. Each row holds one action as JSON in the column named
// after its kind; the other columns of the row are null. The
// `_last_checkpoint` hint points readers at the newest checkpoint.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use object_store::path::Path;
use object_store::PutPayload;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{DeltaError, DeltaResult};
use crate::log::{checkpoint_file_name, Action, LogFile, LogStore, Version};
use crate::state::Snapshot;

/// Name of the hint file inside the log directory.
pub const LAST_CHECKPOINT_FILE: &str = "_last_checkpoint";

const COLUMNS: [&str; 5] = ["txn", "add", "remove", "metaData", "protocol"];

/// Contents of `_last_checkpoint`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastCheckpoint {
    pub version: Version,
    /// Number of actions in the checkpoint.
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<i64>,
}

fn last_checkpoint_path(store: &dyn LogStore) -> Path {
    store.log_path().child(LAST_CHECKPOINT_FILE)
}

/// Read the checkpoint hint. Returns `None` when the table has never
/// been checkpointed.
pub async fn read_last_checkpoint(store: &dyn LogStore) -> DeltaResult<Option<LastCheckpoint>> {
    let path = last_checkpoint_path(store);
    let bytes = match store.object_store().get(&path).await {
        Ok(result) => result.bytes().await?,
        Err(object_store::Error::NotFound { .. }) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|json_err| DeltaError::InvalidJsonLog { line: 1, json_err })
}

/// Write a checkpoint for `snapshot` and point the hint at it, unless the
/// hint already names a newer checkpoint.
///
/// The snapshot must have its file set loaded.
pub async fn write_checkpoint(store: &dyn LogStore, snapshot: &Snapshot) -> DeltaResult<LastCheckpoint> {
    let actions = snapshot
        .checkpoint_actions()
        .map_err(|err| DeltaError::Checkpoint(err.to_string()))?;
    let body = encode_checkpoint(&actions)?;

    let object_store = store.object_store();
    let path = store.log_path().child(checkpoint_file_name(snapshot.version()));
    object_store.put(&path, PutPayload::from(body)).await?;

    let hint = LastCheckpoint {
        version: snapshot.version(),
        size: actions.len() as i64,
        parts: None,
    };

    // An unreadable hint is replaced
    let newer = read_last_checkpoint(store)
        .await
        .ok()
        .flatten()
        .filter(|existing| existing.version > hint.version);
    if let Some(existing) = newer {
        debug!(version = hint.version, hint = existing.version, "kept newer checkpoint hint");
    } else {
        let raw = serde_json::to_vec(&hint).map_err(|json_err| DeltaError::SerializeLogJson { json_err })?;
        object_store
            .put(&last_checkpoint_path(store), PutPayload::from(raw))
            .await?;
    }

    info!(version = hint.version, actions = hint.size, "checkpoint written");
    Ok(hint)
}

/// Load the actions stored in a checkpoint file.
pub async fn read_checkpoint(store: &dyn LogStore, file: &LogFile) -> DeltaResult<Vec<Action>> {
    let bytes = store.object_store().get(&file.location).await?.bytes().await?;
    decode_checkpoint(bytes)
}

fn checkpoint_schema() -> SchemaRef {
    Arc::new(Schema::new(
        COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ))
}

/// Column and JSON body for an action, `None` for actions checkpoints do
/// not carry.
fn action_body(action: &Action) -> DeltaResult<Option<(usize, String)>> {
    let body = match action {
        Action::Transaction(txn) => serde_json::to_string(txn),
        Action::Add(add) => serde_json::to_string(add),
        Action::Remove(remove) => serde_json::to_string(remove),
        Action::Metadata(metadata) => serde_json::to_string(metadata),
        Action::Protocol(protocol) => serde_json::to_string(protocol),
        Action::CommitInfo(_) | Action::Unknown(_) => return Ok(None),
    }
    .map_err(|json_err| DeltaError::SerializeLogJson { json_err })?;

    let column = action
        .kind()
        .and_then(|kind| COLUMNS.iter().position(|name| *name == kind))
        .ok_or_else(|| DeltaError::Checkpoint(format!("no checkpoint column for {action:?}")))?;
    Ok(Some((column, body)))
}

pub(crate) fn encode_checkpoint(actions: &[Action]) -> DeltaResult<Bytes> {
    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(actions.len()); COLUMNS.len()];
    for action in actions {
        let Some((column, body)) = action_body(action)? else {
            continue;
        };
        for (index, values) in columns.iter_mut().enumerate() {
            values.push((index == column).then(|| body.clone()));
        }
    }

    let arrays: Vec<ArrayRef> = columns
        .into_iter()
        .map(|values| Arc::new(StringArray::from(values)) as ArrayRef)
        .collect();
    let schema = checkpoint_schema();
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let mut writer = ArrowWriter::try_new(Vec::new(), schema, None)?;
    writer.write(&batch)?;
    Ok(Bytes::from(writer.into_inner()?))
}

pub(crate) fn decode_checkpoint(bytes: Bytes) -> DeltaResult<Vec<Action>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
    let mut actions = Vec::new();
    let mut row_offset = 0;

    for batch in reader {
        let batch = batch?;
        let columns = COLUMNS
            .iter()
            .map(|name| {
                batch
                    .column_by_name(name)
                    .and_then(|column| column.as_any().downcast_ref::<StringArray>())
                    .ok_or_else(|| DeltaError::Checkpoint(format!("missing column `{name}`")))
            })
            .collect::<DeltaResult<Vec<_>>>()?;

        for row in 0..batch.num_rows() {
            for (column, name) in columns.iter().zip(COLUMNS) {
                if !column.is_valid(row) {
                    continue;
                }
                let line = row_offset + row + 1;
                let body: Value = serde_json::from_str(column.value(row))
                    .map_err(|json_err| DeltaError::InvalidJsonLog { line, json_err })?;
                let mut record = serde_json::Map::with_capacity(1);
                record.insert(name.to_string(), body);
                let action = Action::from_value(Value::Object(record))
                    .map_err(|json_err| DeltaError::InvalidJsonLog { line, json_err })?;
                actions.push(action);
            }
        }
        row_offset += batch.num_rows();
    }

    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{AddFile, CommitInfo, Metadata, Protocol, RemoveFile, StructType, Transaction};
    use std::collections::HashMap;

    fn actions() -> Vec<Action> {
        let metadata = Metadata::try_new(&StructType::new(vec![]), vec!["day".into()], HashMap::new()).unwrap();
        vec![
            Action::Protocol(Protocol::new(1, 2)),
            Action::Metadata(metadata),
            Action::Transaction(Transaction {
                app_id: "ingest".into(),
                version: 7,
                last_updated: None,
            }),
            Action::Add(
                AddFile::new("day=1/a.parquet", 100)
                    .with_partition_value("day", Some("1".into()))
                    .with_stats(r#"{"numRecords":3}"#),
            ),
            Action::Remove(RemoveFile::new("day=1/old.parquet")),
        ]
    }

    #[test]
    fn encodes_and_decodes_every_checkpoint_action() {
        let actions = actions();
        let decoded = decode_checkpoint(encode_checkpoint(&actions).unwrap()).unwrap();
        assert_eq!(decoded, actions);
    }

    #[test]
    fn commit_info_is_not_checkpointed() {
        let mut actions = actions();
        actions.push(Action::CommitInfo(CommitInfo::new("WRITE")));

        let decoded = decode_checkpoint(encode_checkpoint(&actions).unwrap()).unwrap();
        assert_eq!(decoded.len(), 5);
        assert!(decoded.iter().all(|a| !matches!(a, Action::CommitInfo(_))));
    }

    #[test]
    fn hint_omits_absent_parts() {
        let hint = LastCheckpoint {
            version: 10,
            size: 4,
            parts: None,
        };
        assert_eq!(serde_json::to_string(&hint).unwrap(), r#"{"version":10,"size":4}"#);
    }
}
