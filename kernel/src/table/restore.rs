// Restore
//
// Brings the table back to the state of an earlier version by committing
// the difference as a new version. History is never rewritten.

use serde::Serialize;
use tracing::info;

use super::DeltaTable;
use crate::error::{DeltaError, DeltaResult};
use crate::log::segment::{LogSegment, TableVersion};
use crate::log::{Action, CommitInfo, Version};
use crate::replay::replay_segment;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreMetrics {
    /// Version written by the restore.
    pub version: Version,
    pub restored_version: Version,
    pub num_restored_files: usize,
    pub num_removed_files: usize,
}

impl DeltaTable {
    /// Commit a new version whose state equals `version`.
    ///
    /// `version` must be older than the held version.
    pub async fn restore(&self, version: Version) -> DeltaResult<RestoreMetrics> {
        let _writer = self.writer.lock().await;
        let current = self.ensure_files_locked().await?;
        if version < 0 || version >= current.version() {
            return Err(DeltaError::InvalidVersion(version));
        }

        let segment = LogSegment::resolve(self.store.as_ref(), TableVersion::Version(version)).await?;
        let target = replay_segment(
            self.store.as_ref(),
            &segment,
            &self.invariants,
            &self.replay_options(true),
        )
        .await?;

        let deletion_timestamp = chrono::Utc::now().timestamp_millis();
        let mut actions = Vec::new();

        if target.metadata() != current.metadata() {
            actions.push(Action::Metadata(target.metadata().clone()));
        }

        let removed: Vec<Action> = current
            .files()?
            .into_iter()
            .filter(|file| target.file(&file.path).is_none())
            .map(|file| Action::Remove(file.to_remove(deletion_timestamp)))
            .collect();
        let restored: Vec<Action> = target
            .files()?
            .into_iter()
            .filter(|file| current.file(&file.path).is_none())
            .map(|file| {
                let mut add = file.clone();
                add.data_change = true;
                Action::Add(add)
            })
            .collect();

        let num_removed_files = removed.len();
        let num_restored_files = restored.len();
        actions.extend(removed);
        actions.extend(restored);

        let commit_info = CommitInfo::new("RESTORE")
            .with_parameter("version", version)
            .with_metric("numRestoredFiles", num_restored_files)
            .with_metric("numRemovedFiles", num_removed_files);
        let new_version = self.commit_locked(&current, actions, commit_info).await?;

        info!(
            restored_version = version,
            version = new_version,
            num_restored_files,
            num_removed_files,
            "restored table"
        );
        Ok(RestoreMetrics {
            version: new_version,
            restored_version: version,
            num_restored_files,
            num_removed_files,
        })
    }
}
