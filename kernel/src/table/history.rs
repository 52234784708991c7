// Commit History
//
// Provenance of recent commits, newest first, read from the commit-info
// records of the log.

use futures::{StreamExt, TryStreamExt};
use serde::Serialize;

use super::DeltaTable;
use crate::error::{DeltaError, DeltaResult};
use crate::log::{Action, CommitInfo, Version};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub version: Version,
    /// Empty when the writer recorded no commit info.
    pub info: CommitInfo,
}

impl DeltaTable {
    /// Up to `limit` commits (all when `None`) ending at the held version,
    /// newest first. Stops early where older commits have been cleaned up.
    pub async fn history(&self, limit: Option<usize>) -> DeltaResult<Vec<HistoryEntry>> {
        let current = self.snapshot()?.version();
        let store = self.store.clone();
        let cancel = self.cancellation_token();
        let buffer = self
            .options
            .log_buffer_size
            .unwrap_or(self.config.log_buffer_size)
            .max(1);

        let count = limit.map_or(current + 1, |limit| {
            Version::try_from(limit).unwrap_or(Version::MAX).min(current + 1)
        });
        let versions = (0..count).map(|offset| current - offset);

        let mut commits = futures::stream::iter(versions)
            .map(|version| {
                let store = store.clone();
                async move {
                    match store.read_commit_entry(version).await {
                        Ok(actions) => Ok((version, Some(actions))),
                        Err(DeltaError::MissingDataFile { .. }) => Ok((version, None)),
                        Err(err) => Err(err),
                    }
                }
            })
            .buffered(buffer);

        let mut entries = Vec::new();
        while let Some((version, actions)) = commits.try_next().await? {
            if cancel.is_cancelled() {
                return Err(DeltaError::Cancelled);
            }
            let Some(actions) = actions else {
                break;
            };
            let info = actions
                .into_iter()
                .find_map(|action| match action {
                    Action::CommitInfo(info) => Some(info),
                    _ => None,
                })
                .unwrap_or_default();
            entries.push(HistoryEntry { version, info });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TableOptions;
    use crate::table::tests::seeded_table;

    #[tokio::test]
    async fn newest_first() {
        let table = seeded_table(TableOptions::default()).await;
        table.load().await.unwrap();

        let history = table.history(None).await.unwrap();
        assert_eq!(history.iter().map(|h| h.version).collect::<Vec<_>>(), vec![2, 1, 0]);
        assert_eq!(history[0].info.operation.as_deref(), Some("DELETE"));
        assert_eq!(history[2].info.operation, None);
    }

    #[tokio::test]
    async fn limit_caps_entries() {
        let table = seeded_table(TableOptions::default()).await;
        table.load().await.unwrap();

        let history = table.history(Some(1)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 2);
        assert!(table.history(Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_limit_returns_everything() {
        let table = seeded_table(TableOptions::default()).await;
        table.load().await.unwrap();

        for limit in [3, 4, i64::MAX as usize, usize::MAX] {
            let history = table.history(Some(limit)).await.unwrap();
            assert_eq!(history.len(), 3, "limit {limit}");
        }
    }

    #[tokio::test]
    async fn history_follows_the_held_version() {
        let table = seeded_table(TableOptions::default()).await;
        table.load_version(1).await.unwrap();

        let history = table.history(None).await.unwrap();
        assert_eq!(history.iter().map(|h| h.version).collect::<Vec<_>>(), vec![1, 0]);
    }
}
