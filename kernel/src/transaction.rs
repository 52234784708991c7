// Commit Path
//
// Turns a set of actions prepared against a read snapshot into the next
// version of the table. Commits use optimistic concurrency: the log store
// creates a version at most once, and a writer whose read snapshot is no
// longer the newest version is rejected instead of silently rebased.

use tracing::{info, warn};

use crate::checkpoint::write_checkpoint;
use crate::error::{DeltaError, DeltaResult};
use crate::invariants::InvariantEngine;
use crate::log::segment::commits_after;
use crate::log::{Action, CommitInfo, LogStore, Version};
use crate::replay::SnapshotBuilder;
use crate::state::Snapshot;

/// Result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub version: Version,
    pub snapshot: Snapshot,
    /// Set when the post-commit hook wrote a checkpoint.
    pub checkpointed: bool,
}

/// Settings the commit path takes from the engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct CommitSettings {
    /// Checkpoint interval used when the table does not configure one.
    pub checkpoint_interval: i64,
}

/// Commit `actions` as the version after `read_snapshot`.
///
/// `info` is written first in the commit with its read version filled in.
/// Fails with `VersionMismatch` when another writer already committed
/// after the read snapshot, and with `VersionAlreadyExists` when one wins
/// the race for the same version.
pub async fn commit(
    store: &dyn LogStore,
    read_snapshot: &Snapshot,
    actions: Vec<Action>,
    mut info: CommitInfo,
    invariants: &InvariantEngine,
    settings: CommitSettings,
) -> DeltaResult<CommitOutcome> {
    let read_version = read_snapshot.version();
    let version = read_version + 1;

    if let Some(newer) = commits_after(store, read_version).await?.last() {
        return Err(DeltaError::VersionMismatch {
            expected: read_version,
            actual: newer.version,
        });
    }

    if read_snapshot.is_append_only() {
        let removes_data = actions
            .iter()
            .any(|action| matches!(action, Action::Remove(remove) if remove.data_change));
        if removes_data {
            return Err(DeltaError::InvalidData(
                "table is append-only and cannot remove data files".into(),
            ));
        }
    }

    info.read_version = Some(read_version);
    let operation = info.operation.clone().unwrap_or_default();
    let mut entry = Vec::with_capacity(actions.len() + 1);
    entry.push(Action::CommitInfo(info));
    entry.extend(actions);

    // Validate before writing so a commit never publishes an invalid table
    let mut builder = SnapshotBuilder::from_snapshot(read_snapshot.clone());
    builder.apply_commit(version, entry.clone());
    let snapshot = builder.finish(invariants)?;

    store.write_commit_entry(version, &entry).await?;
    info!(version, operation = %operation, "committed");

    let interval = snapshot
        .checkpoint_interval()
        .unwrap_or(settings.checkpoint_interval);
    let mut checkpointed = false;
    if interval > 0 && version % interval == 0 && snapshot.files_loaded() {
        match write_checkpoint(store, &snapshot).await {
            Ok(_) => checkpointed = true,
            Err(err) => warn!(version, error = %err, "post-commit checkpoint failed"),
        }
    }

    Ok(CommitOutcome {
        version,
        snapshot,
        checkpointed,
    })
}
