// Table State
//
// The reconstructed state of a table at one version. A snapshot is an
// immutable value: readers share it behind an `Arc` and a newer version
// is published by replacing it, never by mutating it.

pub mod lifecycle;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::error::{DeltaError, DeltaResult};
use crate::log::{Action, AddFile, Metadata, Protocol, RemoveFile, StructType, Transaction, Version};

/// Table configuration key overriding the engine checkpoint interval.
pub const CHECKPOINT_INTERVAL_KEY: &str = "delta.checkpointInterval";

/// Table configuration key marking a table append-only.
pub const APPEND_ONLY_KEY: &str = "delta.appendOnly";

/// Table configuration key for how long removed files stay recorded in
/// checkpoints, as an interval such as `interval 1 week`.
pub const DELETED_FILE_RETENTION_KEY: &str = "delta.deletedFileRetentionDuration";

const DEFAULT_DELETED_FILE_RETENTION_HOURS: i64 = 168;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub(crate) version: Version,
    pub(crate) protocol: Protocol,
    pub(crate) metadata: Metadata,
    /// Active files keyed by path. `None` until the file set is loaded.
    pub(crate) files: Option<HashMap<String, AddFile>>,
    pub(crate) tombstones: HashMap<String, RemoveFile>,
    pub(crate) app_transactions: HashMap<String, Transaction>,
}

impl Snapshot {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Parse the schema carried by the current metadata.
    pub fn schema(&self) -> DeltaResult<StructType> {
        self.metadata.schema()
    }

    pub fn configuration(&self) -> &HashMap<String, String> {
        &self.metadata.configuration
    }

    pub fn partition_columns(&self) -> &[String] {
        &self.metadata.partition_columns
    }

    pub fn files_loaded(&self) -> bool {
        self.files.is_some()
    }

    /// Active files, ordered by path.
    pub fn files(&self) -> DeltaResult<Vec<&AddFile>> {
        let files = self.files.as_ref().ok_or_else(files_not_loaded)?;
        let mut files: Vec<&AddFile> = files.values().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    pub fn file(&self, path: &str) -> Option<&AddFile> {
        self.files.as_ref().and_then(|files| files.get(path))
    }

    pub fn tombstones(&self) -> impl Iterator<Item = &RemoveFile> {
        self.tombstones.values()
    }

    pub fn app_transaction_version(&self, app_id: &str) -> Option<i64> {
        self.app_transactions.get(app_id).map(|txn| txn.version)
    }

    pub fn is_append_only(&self) -> bool {
        self.configuration()
            .get(APPEND_ONLY_KEY)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    /// Table-level checkpoint interval, if the table configures a valid one.
    pub fn checkpoint_interval(&self) -> Option<i64> {
        self.configuration()
            .get(CHECKPOINT_INTERVAL_KEY)
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|interval| *interval > 0)
    }

    /// Retention of tombstones, one week unless the table configures a
    /// valid interval.
    pub fn deleted_file_retention(&self) -> Duration {
        self.configuration()
            .get(DELETED_FILE_RETENTION_KEY)
            .and_then(|raw| parse_interval(raw))
            .unwrap_or_else(|| Duration::hours(DEFAULT_DELETED_FILE_RETENTION_HOURS))
    }

    /// The minimal action set that reproduces this snapshot when replayed
    /// on its own: protocol, metadata, app transactions, active files and
    /// unexpired tombstones. Requires the file set to be loaded.
    pub fn checkpoint_actions(&self) -> DeltaResult<Vec<Action>> {
        self.checkpoint_actions_at(Utc::now())
    }

    /// [`Snapshot::checkpoint_actions`] as of `now`. Tombstones deleted
    /// before `now` minus the retention are dropped; a tombstone without a
    /// deletion time counts as expired.
    pub fn checkpoint_actions_at(&self, now: DateTime<Utc>) -> DeltaResult<Vec<Action>> {
        let files = self.files()?;
        let horizon = now
            .checked_sub_signed(self.deleted_file_retention())
            .map_or(i64::MIN, |t| t.timestamp_millis());

        let mut tombstones: Vec<&RemoveFile> = self
            .tombstones
            .values()
            .filter(|remove| remove.deletion_timestamp.unwrap_or(0) > horizon)
            .collect();
        tombstones.sort_by(|a, b| a.path.cmp(&b.path));

        let mut actions = Vec::with_capacity(2 + self.app_transactions.len() + files.len() + tombstones.len());
        actions.push(Action::Protocol(self.protocol.clone()));
        actions.push(Action::Metadata(self.metadata.clone()));

        let mut txns: Vec<&Transaction> = self.app_transactions.values().collect();
        txns.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        actions.extend(txns.into_iter().cloned().map(Action::Transaction));

        actions.extend(files.into_iter().cloned().map(Action::Add));
        actions.extend(tombstones.into_iter().cloned().map(Action::Remove));

        Ok(actions)
    }
}

/// Parse `interval <n> <unit>` (the `interval` prefix is optional). Units
/// run from milliseconds to weeks, singular or plural.
fn parse_interval(raw: &str) -> Option<Duration> {
    let mut words = raw.split_whitespace();
    let mut count = words.next()?;
    if count.eq_ignore_ascii_case("interval") {
        count = words.next()?;
    }
    let count: i64 = count.parse().ok().filter(|n| *n >= 0)?;
    let unit = words.next()?.to_ascii_lowercase();
    if words.next().is_some() {
        return None;
    }
    let unit_millis: i64 = match unit.trim_end_matches('s') {
        "millisecond" => 1,
        "second" => 1_000,
        "minute" => 60_000,
        "hour" => 3_600_000,
        "day" => 86_400_000,
        "week" => 604_800_000,
        _ => return None,
    };
    count.checked_mul(unit_millis).map(Duration::milliseconds)
}

fn files_not_loaded() -> DeltaError {
    DeltaError::Generic("the active file set has not been loaded".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{DataType, StructField};

    fn snapshot() -> Snapshot {
        let schema = StructType::new(vec![StructField::new("id", DataType::primitive("long"), false)]);
        let metadata = Metadata::try_new(&schema, vec![], HashMap::new()).unwrap();
        let mut files = HashMap::new();
        for path in ["b.parquet", "a.parquet"] {
            files.insert(path.to_string(), AddFile::new(path, 10));
        }
        Snapshot {
            version: 3,
            protocol: Protocol::new(1, 2),
            metadata,
            files: Some(files),
            tombstones: HashMap::from([("old.parquet".to_string(), RemoveFile::new("old.parquet"))]),
            app_transactions: HashMap::new(),
        }
    }

    #[test]
    fn files_are_sorted_by_path() {
        let snapshot = snapshot();
        let paths: Vec<_> = snapshot.files().unwrap().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.parquet", "b.parquet"]);
    }

    #[test]
    fn deferred_files_are_reported() {
        let mut snapshot = snapshot();
        snapshot.files = None;
        assert!(!snapshot.files_loaded());
        assert!(snapshot.files().is_err());
        assert!(snapshot.checkpoint_actions().is_err());
    }

    #[test]
    fn checkpoint_interval_reads_table_configuration() {
        let mut snapshot = snapshot();
        assert_eq!(snapshot.checkpoint_interval(), None);

        snapshot
            .metadata
            .configuration
            .insert(CHECKPOINT_INTERVAL_KEY.into(), "10".into());
        assert_eq!(snapshot.checkpoint_interval(), Some(10));

        snapshot
            .metadata
            .configuration
            .insert(CHECKPOINT_INTERVAL_KEY.into(), "zero".into());
        assert_eq!(snapshot.checkpoint_interval(), None);
    }

    #[test]
    fn checkpoint_actions_start_with_protocol_and_metadata() {
        let actions = snapshot().checkpoint_actions().unwrap();
        assert!(matches!(actions[0], Action::Protocol(_)));
        assert!(matches!(actions[1], Action::Metadata(_)));
        assert_eq!(actions.len(), 5);
        assert!(matches!(actions.last(), Some(Action::Remove(r)) if r.path == "old.parquet"));
    }

    #[test]
    fn expired_tombstones_leave_checkpoints() {
        let mut snapshot = snapshot();
        let now = Utc::now();
        let mut stale = RemoveFile::new("stale.parquet");
        stale.deletion_timestamp = Some((now - Duration::days(8)).timestamp_millis());
        let mut undated = RemoveFile::new("undated.parquet");
        undated.deletion_timestamp = None;
        snapshot.tombstones.insert(stale.path.clone(), stale);
        snapshot.tombstones.insert(undated.path.clone(), undated);

        let removed: Vec<String> = snapshot
            .checkpoint_actions_at(now)
            .unwrap()
            .into_iter()
            .filter_map(|action| match action {
                Action::Remove(remove) => Some(remove.path),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec!["old.parquet"]);
        assert_eq!(snapshot.tombstones().count(), 3);
    }

    #[test]
    fn table_configures_tombstone_retention() {
        let mut snapshot = snapshot();
        let now = Utc::now();
        snapshot
            .metadata
            .configuration
            .insert(DELETED_FILE_RETENTION_KEY.into(), "interval 2 hours".into());
        assert_eq!(snapshot.deleted_file_retention(), Duration::hours(2));

        let later = now + Duration::hours(3);
        let actions = snapshot.checkpoint_actions_at(later).unwrap();
        assert!(actions.iter().all(|action| !matches!(action, Action::Remove(_))));

        snapshot
            .metadata
            .configuration
            .insert(DELETED_FILE_RETENTION_KEY.into(), "forever".into());
        assert_eq!(snapshot.deleted_file_retention(), Duration::hours(168));
    }

    #[test]
    fn intervals_parse() {
        assert_eq!(parse_interval("interval 1 week"), Some(Duration::weeks(1)));
        assert_eq!(parse_interval("30 days"), Some(Duration::days(30)));
        assert_eq!(parse_interval("INTERVAL 90 Seconds"), Some(Duration::seconds(90)));
        assert_eq!(parse_interval("interval -1 day"), None);
        assert_eq!(parse_interval("interval 1 fortnight"), None);
        assert_eq!(parse_interval("interval 1 day extra"), None);
    }
}
