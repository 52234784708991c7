// Log Storage
//
// Defines the durability contract for the transaction log and the
// default implementation on top of an object store.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};
use tracing::debug;
use url::Url;

use super::actions::{decode_actions, encode_actions, Action};
use super::{commit_file_name, LogFile, Version, LOG_DIR_NAME};
use crate::config::StorageOptions;
use crate::error::{DeltaError, DeltaResult};

/// Storage backend for the transaction log.
///
/// Properties required from implementations:
/// - Append-only: a commit, once written, is never rewritten
/// - Atomic visibility: a commit becomes visible all at once
/// - Mutual exclusion: at most one writer creates a given version
///
/// Losing the race for a version surfaces as `VersionAlreadyExists`; the
/// caller decides whether to rebase and retry.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Location of the table root, without a trailing slash.
    fn table_uri(&self) -> String;

    /// Root of the table inside the object store.
    fn root(&self) -> &Path;

    /// Object store holding both the log and the data files.
    fn object_store(&self) -> Arc<dyn ObjectStore>;

    /// Read and decode the commit for `version`.
    ///
    /// Fails with `MissingDataFile` when the commit does not exist.
    async fn read_commit_entry(&self, version: Version) -> DeltaResult<Vec<Action>>;

    /// Create the commit for `version` if, and only if, it does not exist.
    async fn write_commit_entry(&self, version: Version, actions: &[Action]) -> DeltaResult<()>;

    /// List commits and checkpoints, ascending by name. With `offset`, only
    /// entries sorting after version `offset - 1` are returned.
    async fn list_log(&self, offset: Option<Version>) -> DeltaResult<Vec<LogFile>>;

    fn log_path(&self) -> Path {
        self.root().child(LOG_DIR_NAME)
    }
}

/// [`LogStore`] backed by any `object_store` implementation.
#[derive(Debug, Clone)]
pub struct ObjectLogStore {
    store: Arc<dyn ObjectStore>,
    root: Path,
    table_uri: Url,
}

impl ObjectLogStore {
    /// Resolve `location` (a URL or a local path) through the object store
    /// registry, passing `storage_options` to the backend.
    pub fn try_new(location: &str, storage_options: &StorageOptions) -> DeltaResult<Self> {
        let table_uri = parse_table_uri(location)?;
        let (store, root) = object_store::parse_url_opts(&table_uri, storage_options.iter())
            .map_err(|err| DeltaError::InvalidTableLocation {
                location: location.to_string(),
                reason: err.to_string(),
            })?;

        Ok(Self {
            store: Arc::from(store),
            root,
            table_uri,
        })
    }

    /// Use an already constructed object store. The table lives at the
    /// path component of `location`.
    pub fn with_store(location: &str, store: Arc<dyn ObjectStore>) -> DeltaResult<Self> {
        let table_uri = parse_table_uri(location)?;
        let root = Path::from_url_path(table_uri.path()).map_err(|err| {
            DeltaError::InvalidTableLocation {
                location: location.to_string(),
                reason: err.to_string(),
            }
        })?;

        Ok(Self {
            store,
            root,
            table_uri,
        })
    }

    fn commit_path(&self, version: Version) -> Path {
        self.log_path().child(commit_file_name(version))
    }
}

#[async_trait]
impl LogStore for ObjectLogStore {
    fn table_uri(&self) -> String {
        self.table_uri.as_str().trim_end_matches('/').to_string()
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    async fn read_commit_entry(&self, version: Version) -> DeltaResult<Vec<Action>> {
        let path = self.commit_path(version);
        let bytes = match self.store.get(&path).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(DeltaError::MissingDataFile { version })
            }
            Err(err) => return Err(err.into()),
        };
        decode_actions(&bytes)
    }

    async fn write_commit_entry(&self, version: Version, actions: &[Action]) -> DeltaResult<()> {
        let path = self.commit_path(version);
        let payload = PutPayload::from(encode_actions(actions)?);

        match self
            .store
            .put_opts(&path, payload, PutOptions::from(PutMode::Create))
            .await
        {
            Ok(_) => {
                debug!(version, path = %path, "commit written");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(DeltaError::VersionAlreadyExists(version))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_log(&self, offset: Option<Version>) -> DeltaResult<Vec<LogFile>> {
        let prefix = self.log_path();
        let listing = match offset {
            Some(version) => {
                let start = prefix.child(format!("{version:020}"));
                self.store.list_with_offset(Some(&prefix), &start)
            }
            None => self.store.list(Some(&prefix)),
        };

        let mut files: Vec<LogFile> = listing
            .try_filter_map(|meta| futures::future::ready(Ok(LogFile::from_meta(meta))))
            .try_collect()
            .await?;
        files.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(files)
    }
}

/// Turn a URL or a filesystem path into a table URL without a trailing
/// slash.
pub fn parse_table_uri(location: &str) -> DeltaResult<Url> {
    let invalid = |reason: String| DeltaError::InvalidTableLocation {
        location: location.to_string(),
        reason,
    };

    if location.trim().is_empty() {
        return Err(invalid("empty location".into()));
    }

    let mut url = if location.contains("://") {
        Url::parse(location).map_err(|err| invalid(err.to_string()))?
    } else {
        let path = PathBuf::from(location);
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()
                .map_err(|err| invalid(err.to_string()))?
                .join(path)
        };
        Url::from_directory_path(&absolute)
            .map_err(|_| invalid("not an absolute path".into()))?
    };

    let trimmed = url.path().trim_end_matches('/').to_string();
    if !trimmed.is_empty() {
        url.set_path(&trimmed);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::actions::{AddFile, CommitInfo, Protocol};
    use object_store::memory::InMemory;

    fn memory_store() -> ObjectLogStore {
        ObjectLogStore::with_store("memory:///tables/events", Arc::new(InMemory::new())).unwrap()
    }

    #[test]
    fn parses_locations() {
        let url = parse_table_uri("file:///tmp/table/").unwrap();
        assert_eq!(url.as_str(), "file:///tmp/table");

        let url = parse_table_uri("/tmp/other").unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/tmp/other"));

        assert!(matches!(
            parse_table_uri(""),
            Err(DeltaError::InvalidTableLocation { .. })
        ));
        assert!(matches!(
            parse_table_uri("not a url://x"),
            Err(DeltaError::InvalidTableLocation { .. })
        ));
    }

    #[test]
    fn unknown_scheme_is_invalid_location() {
        let err = ObjectLogStore::try_new("unknown-scheme://bucket/table", &StorageOptions::default())
            .unwrap_err();
        assert!(matches!(err, DeltaError::InvalidTableLocation { .. }));
    }

    #[tokio::test]
    async fn write_then_read_commit() {
        let store = memory_store();
        let actions = vec![
            Action::Protocol(Protocol::new(1, 2)),
            Action::Add(AddFile::new("a.parquet", 10)),
        ];

        store.write_commit_entry(0, &actions).await.unwrap();
        assert_eq!(store.read_commit_entry(0).await.unwrap(), actions);
    }

    #[tokio::test]
    async fn second_writer_for_a_version_loses() {
        let store = memory_store();
        let actions = vec![Action::CommitInfo(CommitInfo::new("WRITE"))];

        store.write_commit_entry(0, &actions).await.unwrap();
        let err = store.write_commit_entry(0, &actions).await.unwrap_err();
        assert!(matches!(err, DeltaError::VersionAlreadyExists(0)));
    }

    #[tokio::test]
    async fn missing_commit_is_missing_data_file() {
        let store = memory_store();
        let err = store.read_commit_entry(4).await.unwrap_err();
        assert!(matches!(err, DeltaError::MissingDataFile { version: 4 }));
    }

    #[tokio::test]
    async fn lists_from_offset() {
        let store = memory_store();
        let actions = vec![Action::CommitInfo(CommitInfo::new("WRITE"))];
        for version in 0..4 {
            store.write_commit_entry(version, &actions).await.unwrap();
        }

        let all = store.list_log(None).await.unwrap();
        assert_eq!(all.iter().map(|f| f.version).collect::<Vec<_>>(), vec![0, 1, 2, 3]);

        let tail = store.list_log(Some(2)).await.unwrap();
        assert_eq!(tail.iter().map(|f| f.version).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn table_uri_has_no_trailing_slash() {
        let store = memory_store();
        assert_eq!(store.table_uri(), "memory:///tables/events");
        assert_eq!(store.log_path().as_ref(), "tables/events/_delta_log");
    }
}
