// Deterministic Replay Engine
//
// Folds log actions, in version order, into a snapshot and enforces the
// invariants before the result is handed out. Replay is the only way a
// snapshot is produced, whether starting from nothing, from a checkpoint,
// or incrementally from an already published snapshot.

use std::collections::HashMap;

use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::checkpoint::read_checkpoint;
use crate::error::{DeltaError, DeltaResult};
use crate::invariants::InvariantEngine;
use crate::log::segment::LogSegment;
use crate::log::{Action, AddFile, LogStore, Metadata, Protocol, RemoveFile, Transaction, Version};
use crate::state::Snapshot;

/// Knobs for a single replay.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Track the active file set. When false, add and remove actions are
    /// skipped and the snapshot reports its files as not loaded.
    pub load_files: bool,
    /// Commit files fetched concurrently.
    pub log_buffer_size: usize,
    pub cancel: CancellationToken,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            load_files: true,
            log_buffer_size: 4,
            cancel: CancellationToken::new(),
        }
    }
}

/// Incremental reducer for log actions.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    version: Version,
    protocol: Option<Protocol>,
    metadata: Option<Metadata>,
    files: Option<HashMap<String, AddFile>>,
    tombstones: HashMap<String, RemoveFile>,
    app_transactions: HashMap<String, Transaction>,
}

impl SnapshotBuilder {
    /// Builder for an empty table.
    pub fn new(load_files: bool) -> Self {
        Self {
            version: -1,
            protocol: None,
            metadata: None,
            files: load_files.then(HashMap::new),
            tombstones: HashMap::new(),
            app_transactions: HashMap::new(),
        }
    }

    /// Continue from a published snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            version: snapshot.version,
            protocol: Some(snapshot.protocol),
            metadata: Some(snapshot.metadata),
            files: snapshot.files,
            tombstones: snapshot.tombstones,
            app_transactions: snapshot.app_transactions,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Apply a single action.
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::Add(add) => {
                if let Some(files) = self.files.as_mut() {
                    self.tombstones.remove(&add.path);
                    files.insert(add.path.clone(), add);
                }
            }
            Action::Remove(remove) => {
                if let Some(files) = self.files.as_mut() {
                    files.remove(&remove.path);
                    self.tombstones.insert(remove.path.clone(), remove);
                }
            }
            Action::Metadata(metadata) => self.metadata = Some(metadata),
            Action::Protocol(protocol) => self.protocol = Some(protocol),
            Action::Transaction(txn) => {
                self.app_transactions.insert(txn.app_id.clone(), txn);
            }
            Action::CommitInfo(_) | Action::Unknown(_) => {}
        }
    }

    /// Apply every action of the commit at `version`.
    pub fn apply_commit(&mut self, version: Version, actions: Vec<Action>) {
        for action in actions {
            self.apply(action);
        }
        self.version = version;
    }

    /// Produce the snapshot and check it against `invariants`.
    pub fn finish(self, invariants: &InvariantEngine) -> DeltaResult<Snapshot> {
        let (protocol, metadata) = match (self.protocol, self.metadata) {
            (None, None) => {
                return Err(DeltaError::NotATable(format!(
                    "no protocol or metadata found up to version {}",
                    self.version
                )))
            }
            (_, None) => return Err(DeltaError::NoMetadata),
            (None, Some(_)) => {
                return Err(DeltaError::NotATable(format!(
                    "no protocol found up to version {}",
                    self.version
                )))
            }
            (Some(protocol), Some(metadata)) => (protocol, metadata),
        };

        let snapshot = Snapshot {
            version: self.version,
            protocol,
            metadata,
            files: self.files,
            tombstones: self.tombstones,
            app_transactions: self.app_transactions,
        };
        invariants.evaluate(&snapshot)?;
        Ok(snapshot)
    }
}

/// Reconstruct the snapshot described by `segment`.
pub async fn replay_segment(
    store: &dyn LogStore,
    segment: &LogSegment,
    invariants: &InvariantEngine,
    options: &ReplayOptions,
) -> DeltaResult<Snapshot> {
    let mut builder = SnapshotBuilder::new(options.load_files);

    if let Some(checkpoint) = &segment.checkpoint {
        debug!(version = checkpoint.version, "starting replay from checkpoint");
        let actions = read_checkpoint(store, checkpoint).await?;
        builder.apply_commit(checkpoint.version, actions);
    }

    let versions: Vec<Version> = segment.commit_versions().collect();
    fold_commits(store, &mut builder, versions, options).await?;

    if builder.version() != segment.version {
        return Err(DeltaError::MissingDataFile {
            version: segment.version,
        });
    }
    builder.finish(invariants)
}

/// Apply the commits `versions` on top of `base`.
pub async fn replay_commits(
    store: &dyn LogStore,
    base: Snapshot,
    versions: Vec<Version>,
    invariants: &InvariantEngine,
    options: &ReplayOptions,
) -> DeltaResult<Snapshot> {
    let mut builder = SnapshotBuilder::from_snapshot(base);
    fold_commits(store, &mut builder, versions, options).await?;
    builder.finish(invariants)
}

async fn fold_commits(
    store: &dyn LogStore,
    builder: &mut SnapshotBuilder,
    versions: Vec<Version>,
    options: &ReplayOptions,
) -> DeltaResult<()> {
    let mut commits = futures::stream::iter(versions)
        .map(|version| async move {
            let actions = store.read_commit_entry(version).await?;
            Ok::<_, DeltaError>((version, actions))
        })
        .buffered(options.log_buffer_size.max(1));

    while let Some((version, actions)) = commits.try_next().await? {
        if options.cancel.is_cancelled() {
            return Err(DeltaError::Cancelled);
        }
        builder.apply_commit(version, actions);
    }
    Ok(())
}
