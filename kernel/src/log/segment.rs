// Log Segment Resolution
//
// Maps a version target (latest, exact, or point in time) onto the
// minimal set of log files needed to reconstruct that version: the
// newest usable checkpoint plus the contiguous commits after it.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::store::LogStore;
use super::{LogFile, Version};
use crate::checkpoint::read_last_checkpoint;
use crate::error::{DeltaError, DeltaResult};

/// Which version of a table to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TableVersion {
    #[default]
    Latest,
    Version(Version),
    /// Newest version committed at or before this many milliseconds since
    /// the Unix epoch.
    Timestamp(i64),
}

/// Files to replay for one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSegment {
    pub version: Version,
    pub checkpoint: Option<LogFile>,
    /// Commits after the checkpoint, ascending and gap free, ending at
    /// `version`.
    pub commits: Vec<LogFile>,
}

impl LogSegment {
    /// Locate the files for `target` in `store`.
    pub async fn resolve(store: &dyn LogStore, target: TableVersion) -> DeltaResult<Self> {
        match target {
            TableVersion::Latest => Self::latest(store).await,
            TableVersion::Version(version) => {
                if version < 0 {
                    return Err(DeltaError::InvalidVersion(version));
                }
                let listing = LogListing::load(store, None).await?;
                listing.ensure_table(store)?;
                listing.segment_at(version)
            }
            TableVersion::Timestamp(timestamp) => {
                let listing = LogListing::load(store, None).await?;
                listing.ensure_table(store)?;
                let version = listing.version_at_timestamp(timestamp)?;
                debug!(timestamp, version, "resolved timestamp to version");
                listing.segment_at(version)
            }
        }
    }

    async fn latest(store: &dyn LogStore) -> DeltaResult<Self> {
        let hint = match read_last_checkpoint(store).await {
            Ok(hint) => hint,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable checkpoint hint");
                None
            }
        };

        let mut listing = LogListing::load(store, hint.as_ref().map(|h| h.version)).await?;
        if let Some(hint) = hint {
            if !listing.checkpoints.contains_key(&hint.version) {
                warn!(version = hint.version, "hinted checkpoint not found, listing full log");
                listing = LogListing::load(store, None).await?;
            }
        }
        listing.ensure_table(store)?;

        let checkpoint = listing.checkpoints.values().next_back().cloned();
        let floor = match &checkpoint {
            Some(cp) => cp.version,
            None => {
                if !listing.commits.contains_key(&0) {
                    return Err(DeltaError::MissingDataFile { version: 0 });
                }
                0
            }
        };

        let mut version = floor;
        let mut commits = Vec::new();
        if checkpoint.is_none() {
            commits.extend(listing.commits.get(&0).cloned());
        }
        while let Some(file) = listing.commits.get(&(version + 1)) {
            commits.push(file.clone());
            version += 1;
        }

        if let Some((&highest, _)) = listing.commits.iter().next_back() {
            if highest > version {
                warn!(
                    version,
                    highest, "gap in the log, ignoring commits after the last contiguous version"
                );
            }
        }

        Ok(Self {
            version,
            checkpoint,
            commits,
        })
    }

    pub fn commit_versions(&self) -> impl Iterator<Item = Version> + '_ {
        self.commits.iter().map(|file| file.version)
    }
}

/// Commits strictly after `version` that continue the log without a gap.
pub async fn commits_after(store: &dyn LogStore, version: Version) -> DeltaResult<Vec<LogFile>> {
    let files = store.list_log(Some(version + 1)).await?;
    let mut next = version + 1;
    let mut commits = Vec::new();
    for file in files.into_iter().filter(LogFile::is_commit) {
        if file.version != next {
            break;
        }
        commits.push(file);
        next += 1;
    }
    Ok(commits)
}

#[derive(Debug, Default)]
struct LogListing {
    commits: BTreeMap<Version, LogFile>,
    checkpoints: BTreeMap<Version, LogFile>,
}

impl LogListing {
    async fn load(store: &dyn LogStore, offset: Option<Version>) -> DeltaResult<Self> {
        let mut listing = Self::default();
        for file in store.list_log(offset).await? {
            let entries = if file.is_commit() {
                &mut listing.commits
            } else {
                &mut listing.checkpoints
            };
            entries.insert(file.version, file);
        }
        Ok(listing)
    }

    fn ensure_table(&self, store: &dyn LogStore) -> DeltaResult<()> {
        if self.commits.is_empty() && self.checkpoints.is_empty() {
            return Err(DeltaError::NotATable(format!(
                "no transaction log found at {}",
                store.table_uri()
            )));
        }
        Ok(())
    }

    fn segment_at(&self, version: Version) -> DeltaResult<LogSegment> {
        if !self.commits.contains_key(&version) && !self.checkpoints.contains_key(&version) {
            return Err(DeltaError::InvalidVersion(version));
        }

        let checkpoint = self.checkpoints.range(..=version).next_back().map(|(_, f)| f.clone());
        let start = checkpoint.as_ref().map_or(0, |cp| cp.version + 1);

        let commits = (start..=version)
            .map(|v| {
                self.commits
                    .get(&v)
                    .cloned()
                    .ok_or(DeltaError::MissingDataFile { version: v })
            })
            .collect::<DeltaResult<Vec<_>>>()?;

        Ok(LogSegment {
            version,
            checkpoint,
            commits,
        })
    }

    fn version_at_timestamp(&self, timestamp: i64) -> DeltaResult<Version> {
        self.commits
            .values()
            .filter(|file| file.last_modified.timestamp_millis() <= timestamp)
            .map(|file| file.version)
            .max()
            .ok_or_else(|| {
                DeltaError::InvalidDateTime(format!("no version committed at or before {timestamp}"))
            })
    }
}
