// Merge
//
// Commits a batch of file-level changes prepared by a caller against a
// known read version. The batch is validated against the table's
// partitioning before anything is written.

use std::collections::HashMap;

use tracing::info;

use super::DeltaTable;
use crate::error::{DeltaError, DeltaResult};
use crate::log::{Action, CommitInfo, Version};
use crate::state::Snapshot;

/// Counts reported by a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MergeMetrics {
    pub version: Version,
    pub num_added_files: usize,
    pub num_removed_files: usize,
}

impl DeltaTable {
    /// Commit `actions` on top of `read_version`, which must be the held
    /// version. Commit info is generated; callers may not supply their own.
    pub async fn merge(&self, read_version: Version, actions: Vec<Action>) -> DeltaResult<MergeMetrics> {
        let _writer = self.writer.lock().await;
        let current = self.ensure_files_locked().await?;
        if read_version != current.version() {
            return Err(DeltaError::VersionMismatch {
                expected: read_version,
                actual: current.version(),
            });
        }

        validate_merge(&current, &actions)?;

        let num_added_files = actions.iter().filter(|a| matches!(a, Action::Add(_))).count();
        let num_removed_files = actions.iter().filter(|a| matches!(a, Action::Remove(_))).count();
        let commit_info = CommitInfo::new("MERGE")
            .with_metric("numAddedFiles", num_added_files)
            .with_metric("numRemovedFiles", num_removed_files);

        let version = self.commit_locked(&current, actions, commit_info).await?;
        info!(version, num_added_files, num_removed_files, "merged");
        Ok(MergeMetrics {
            version,
            num_added_files,
            num_removed_files,
        })
    }
}

fn validate_merge(snapshot: &Snapshot, actions: &[Action]) -> DeltaResult<()> {
    if actions.is_empty() {
        return Err(DeltaError::InvalidData("merge requires at least one action".into()));
    }

    let partition_columns = snapshot.partition_columns();
    for action in actions {
        match action {
            Action::Add(add) => check_partition_values(&add.path, &add.partition_values, partition_columns)?,
            Action::Remove(remove) => {
                if let Some(values) = &remove.partition_values {
                    check_partition_values(&remove.path, values, partition_columns)?;
                }
            }
            Action::Metadata(metadata) => {
                if metadata.partition_columns != partition_columns {
                    return Err(DeltaError::SchemaMismatch(format!(
                        "partition columns cannot change from {:?} to {:?}",
                        partition_columns, metadata.partition_columns
                    )));
                }
                metadata.schema()?;
            }
            Action::Transaction(txn) => {
                if let Some(previous) = snapshot.app_transaction_version(&txn.app_id) {
                    if txn.version <= previous {
                        return Err(DeltaError::InvalidData(format!(
                            "transaction {} for `{}` already committed (latest {previous})",
                            txn.version, txn.app_id
                        )));
                    }
                }
            }
            Action::Protocol(_) => {}
            Action::CommitInfo(_) | Action::Unknown(_) => {
                return Err(DeltaError::InvalidData(format!(
                    "merge does not accept {} records",
                    action.kind().unwrap_or("unknown")
                )));
            }
        }
    }
    Ok(())
}

fn check_partition_values(
    path: &str,
    values: &HashMap<String, Option<String>>,
    partition_columns: &[String],
) -> DeltaResult<()> {
    let mut unknown: Vec<String> = values
        .keys()
        .filter(|key| !partition_columns.contains(key))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(DeltaError::ColumnsNotPartitioned { columns: unknown });
    }

    if let Some(missing) = partition_columns.iter().find(|column| !values.contains_key(*column)) {
        return Err(DeltaError::PartitionError {
            path: path.to_string(),
            reason: format!("missing value for partition column `{missing}`"),
        });
    }
    Ok(())
}
