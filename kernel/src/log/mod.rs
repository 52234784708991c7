// Transaction Log
//
// Layout of the `_delta_log` directory and the commit unit that lives in
// it. Each commit is one newline-delimited JSON file named after its
// zero-padded version.

pub mod actions;
pub mod schema;
pub mod segment;
pub mod store;

use chrono::{DateTime, Utc};
use object_store::path::Path;
use object_store::ObjectMeta;

pub use actions::{Action, AddFile, CommitInfo, Format, Metadata, Protocol, RemoveFile, Stats, Transaction};
pub use schema::{ColumnInvariant, DataType, StructField, StructType};
pub use segment::{LogSegment, TableVersion};
pub use store::{LogStore, ObjectLogStore};

/// Logical version of a table.
pub type Version = i64;

/// Directory under the table root that holds the log.
pub const LOG_DIR_NAME: &str = "_delta_log";

const COMMIT_SUFFIX: &str = ".json";
const CHECKPOINT_SUFFIX: &str = ".checkpoint.parquet";

/// File name of the commit for `version`.
pub fn commit_file_name(version: Version) -> String {
    format!("{version:020}{COMMIT_SUFFIX}")
}

/// File name of the single-part checkpoint for `version`.
pub fn checkpoint_file_name(version: Version) -> String {
    format!("{version:020}{CHECKPOINT_SUFFIX}")
}

/// Kind of entry found when listing the log directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFileKind {
    Commit,
    Checkpoint,
}

/// One versioned file in the log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub version: Version,
    pub kind: LogFileKind,
    pub location: Path,
    pub last_modified: DateTime<Utc>,
    pub size: usize,
}

impl LogFile {
    /// Classify a listed object. Returns `None` for anything that is not a
    /// commit or a single-part checkpoint (hint files, crc files, temp files).
    pub fn from_meta(meta: ObjectMeta) -> Option<Self> {
        let (version, kind) = parse_log_file_name(meta.location.filename()?)?;
        Some(Self {
            version,
            kind,
            location: meta.location,
            last_modified: meta.last_modified,
            size: meta.size,
        })
    }

    pub fn is_commit(&self) -> bool {
        self.kind == LogFileKind::Commit
    }

    pub fn is_checkpoint(&self) -> bool {
        self.kind == LogFileKind::Checkpoint
    }
}

fn parse_log_file_name(name: &str) -> Option<(Version, LogFileKind)> {
    let (digits, kind) = if let Some(stem) = name.strip_suffix(CHECKPOINT_SUFFIX) {
        (stem, LogFileKind::Checkpoint)
    } else if let Some(stem) = name.strip_suffix(COMMIT_SUFFIX) {
        (stem, LogFileKind::Commit)
    } else {
        return None;
    };

    if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|version| (version, kind))
}

/// A commit: the ordered actions recorded atomically for one version.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub version: Version,
    pub actions: Vec<Action>,
}

impl Commit {
    pub fn new(version: Version, actions: Vec<Action>) -> Self {
        Self { version, actions }
    }

    /// The commit-info record, if the writer recorded one.
    pub fn commit_info(&self) -> Option<&CommitInfo> {
        self.actions.iter().find_map(|action| match action {
            Action::CommitInfo(info) => Some(info),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            location: Path::from(format!("table/_delta_log/{name}")),
            last_modified: Utc::now(),
            size: 10,
            e_tag: None,
            version: None,
        }
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(commit_file_name(7), "00000000000000000007.json");
        assert_eq!(
            checkpoint_file_name(10),
            "00000000000000000010.checkpoint.parquet"
        );
    }

    #[test]
    fn classifies_log_entries() {
        let commit = LogFile::from_meta(meta("00000000000000000003.json")).unwrap();
        assert_eq!(commit.version, 3);
        assert!(commit.is_commit());

        let checkpoint =
            LogFile::from_meta(meta("00000000000000000010.checkpoint.parquet")).unwrap();
        assert_eq!(checkpoint.version, 10);
        assert!(checkpoint.is_checkpoint());
    }

    #[test]
    fn ignores_unrelated_entries() {
        assert!(LogFile::from_meta(meta("_last_checkpoint")).is_none());
        assert!(LogFile::from_meta(meta("00000000000000000003.crc")).is_none());
        assert!(LogFile::from_meta(meta("3.json")).is_none());
        assert!(LogFile::from_meta(meta(
            "00000000000000000010.checkpoint.0000000001.0000000002.parquet"
        ))
        .is_none());
    }

    #[test]
    fn commit_exposes_its_info() {
        let commit = Commit::new(
            1,
            vec![
                Action::Add(AddFile::new("a.parquet", 10)),
                Action::CommitInfo(CommitInfo::new("WRITE")),
            ],
        );
        assert_eq!(
            commit.commit_info().and_then(|i| i.operation.as_deref()),
            Some("WRITE")
        );
    }
}
