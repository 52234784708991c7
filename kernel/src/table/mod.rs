// Table Handle
//
// A long-lived handle on one table. It publishes the current snapshot
// for lock-free reads and serializes everything that replaces it (loads,
// incremental updates, commits) behind a single async writer lock.

pub mod history;
pub mod merge;
pub mod partitions;
pub mod restore;

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::checkpoint::{write_checkpoint, LastCheckpoint};
use crate::config::{EngineConfig, TableOptions};
use crate::error::{DeltaError, DeltaResult};
use crate::invariants::InvariantEngine;
use crate::log::segment::{commits_after, LogSegment, TableVersion};
use crate::log::{Action, CommitInfo, LogStore, Metadata, ObjectLogStore, Protocol, StructType, Version};
use crate::replay::{replay_commits, replay_segment, ReplayOptions};
use crate::state::lifecycle::{HandleEvent, HandleState, HandleStateMachine, StateError};
use crate::state::Snapshot;
use crate::transaction::{self, CommitSettings};

use self::partitions::{filter_files, validate_filters, PartitionFilter};

pub struct DeltaTable {
    store: Arc<dyn LogStore>,
    config: EngineConfig,
    options: TableOptions,
    invariants: Arc<InvariantEngine>,
    snapshot: ArcSwapOption<Snapshot>,
    lifecycle: Mutex<HandleStateMachine>,
    writer: tokio::sync::Mutex<()>,
    cancellation: Mutex<CancellationToken>,
}

impl std::fmt::Debug for DeltaTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaTable")
            .field("table_uri", &self.store.table_uri())
            .field("version", &self.snapshot.load_full().map(|s| s.version()))
            .field("state", &self.lifecycle.lock().current_state())
            .finish()
    }
}

impl DeltaTable {
    /// Handle on the table at `location`. Nothing is read until
    /// [`DeltaTable::load`].
    pub fn new(location: &str, options: TableOptions) -> DeltaResult<Self> {
        let store = ObjectLogStore::try_new(location, &options.storage_options)?;
        Ok(Self::with_log_store(Arc::new(store), options))
    }

    pub fn with_log_store(store: Arc<dyn LogStore>, options: TableOptions) -> Self {
        Self {
            store,
            config: EngineConfig::default_config(),
            options,
            invariants: Arc::new(InvariantEngine::with_defaults()),
            snapshot: ArcSwapOption::empty(),
            lifecycle: Mutex::new(HandleStateMachine::new()),
            writer: tokio::sync::Mutex::new(()),
            cancellation: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_invariants(mut self, invariants: InvariantEngine) -> Self {
        self.invariants = Arc::new(invariants);
        self
    }

    /// Create a handle and load the version named in `options`.
    pub async fn open(location: &str, options: TableOptions) -> DeltaResult<Self> {
        let table = Self::new(location, options)?;
        table.load().await?;
        Ok(table)
    }

    pub fn table_uri(&self) -> String {
        self.store.table_uri()
    }

    pub fn log_store(&self) -> Arc<dyn LogStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> HandleState {
        self.lifecycle.lock().current_state()
    }

    /// Replace the token observed by long-running operations on this
    /// handle. Cancelling it aborts them with `Cancelled`.
    pub fn set_cancellation_token(&self, token: CancellationToken) {
        *self.cancellation.lock() = token;
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.lock().clone()
    }

    /// Load the version named in the handle's options.
    pub async fn load(&self) -> DeltaResult<()> {
        self.load_target(self.options.version).await
    }

    pub async fn load_version(&self, version: Version) -> DeltaResult<()> {
        self.load_target(TableVersion::Version(version)).await
    }

    /// Load the newest version committed at or before `timestamp_millis`.
    pub async fn load_with_datetime(&self, timestamp_millis: i64) -> DeltaResult<()> {
        self.load_target(TableVersion::Timestamp(timestamp_millis)).await
    }

    /// Like [`DeltaTable::load_with_datetime`], from an RFC 3339 string.
    pub async fn load_with_datetime_str(&self, datetime: &str) -> DeltaResult<()> {
        let parsed = chrono::DateTime::parse_from_rfc3339(datetime)
            .map_err(|err| DeltaError::InvalidDateTime(format!("{datetime}: {err}")))?;
        self.load_with_datetime(parsed.timestamp_millis()).await
    }

    async fn load_target(&self, target: TableVersion) -> DeltaResult<()> {
        let _writer = self.writer.lock().await;
        self.transition(HandleEvent::BeginOpen)?;

        let result = async {
            let segment = LogSegment::resolve(self.store.as_ref(), target).await?;
            let options = self.replay_options(!self.options.without_files);
            replay_segment(self.store.as_ref(), &segment, &self.invariants, &options).await
        }
        .await;

        match result {
            Ok(snapshot) => {
                info!(
                    table_uri = %self.table_uri(),
                    version = snapshot.version(),
                    files_loaded = snapshot.files_loaded(),
                    "loaded table"
                );
                self.publish(snapshot);
                self.transition(HandleEvent::OpenSucceeded)
            }
            Err(err) => {
                self.transition(HandleEvent::OpenFailed)?;
                Err(err)
            }
        }
    }

    /// Apply commits written after the held version. Returns the new
    /// version; a no-op when the handle is already at the latest version.
    pub async fn update_incremental(&self) -> DeltaResult<Version> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot()?;

        let versions: Vec<Version> = commits_after(self.store.as_ref(), current.version())
            .await?
            .into_iter()
            .map(|file| file.version)
            .collect();
        if versions.is_empty() {
            return Ok(current.version());
        }

        let options = self.replay_options(current.files_loaded());
        let snapshot = replay_commits(
            self.store.as_ref(),
            current.as_ref().clone(),
            versions,
            &self.invariants,
            &options,
        )
        .await?;
        let version = snapshot.version();
        debug!(from = current.version(), to = version, "applied incremental update");
        self.publish(snapshot);
        Ok(version)
    }

    /// The published snapshot.
    pub fn snapshot(&self) -> DeltaResult<Arc<Snapshot>> {
        self.lifecycle.lock().ensure_ready()?;
        self.snapshot
            .load_full()
            .ok_or(DeltaError::Lifecycle(StateError::NotInitialized))
    }

    pub fn version(&self) -> DeltaResult<Version> {
        Ok(self.snapshot()?.version())
    }

    pub fn metadata(&self) -> DeltaResult<Metadata> {
        Ok(self.snapshot()?.metadata().clone())
    }

    pub fn schema(&self) -> DeltaResult<StructType> {
        self.snapshot()?.schema()
    }

    /// Protocol of the held version, or of `version` without changing
    /// what the handle serves. The lookup skips the invariant checks, so a
    /// version needing unsupported features still reports its protocol.
    pub async fn protocol(&self, version: Option<Version>) -> DeltaResult<Protocol> {
        let current = self.snapshot()?;
        match version {
            None => Ok(current.protocol().clone()),
            Some(version) if version == current.version() => Ok(current.protocol().clone()),
            Some(version) => {
                let segment = LogSegment::resolve(self.store.as_ref(), TableVersion::Version(version)).await?;
                let options = self.replay_options(false);
                let snapshot =
                    replay_segment(self.store.as_ref(), &segment, &InvariantEngine::new(), &options).await?;
                Ok(snapshot.protocol().clone())
            }
        }
    }

    /// Relative paths of the active files, sorted.
    pub async fn files(&self) -> DeltaResult<Vec<String>> {
        let snapshot = self.ensure_files().await?;
        Ok(snapshot.files()?.into_iter().map(|f| f.path.clone()).collect())
    }

    /// Absolute URIs of the active files, sorted.
    pub async fn file_uris(&self) -> DeltaResult<Vec<String>> {
        let root = self.table_uri();
        Ok(self
            .files()
            .await?
            .into_iter()
            .map(|path| format!("{root}/{path}"))
            .collect())
    }

    /// Relative paths of the active files matching every filter.
    pub async fn files_by_partitions(&self, filters: &[PartitionFilter]) -> DeltaResult<Vec<String>> {
        let snapshot = self.ensure_files().await?;
        validate_filters(filters, snapshot.partition_columns())?;
        Ok(filter_files(snapshot.files()?, filters)
            .into_iter()
            .map(|f| f.path.clone())
            .collect())
    }

    /// Write a checkpoint for the held version.
    pub async fn checkpoint(&self) -> DeltaResult<LastCheckpoint> {
        let _writer = self.writer.lock().await;
        let snapshot = self.ensure_files_locked().await?;
        write_checkpoint(self.store.as_ref(), &snapshot).await
    }

    /// Commit `actions` on top of the held version and publish the result.
    pub async fn commit(&self, actions: Vec<Action>, info: CommitInfo) -> DeltaResult<Version> {
        let _writer = self.writer.lock().await;
        let snapshot = self.ensure_files_locked().await?;
        self.commit_locked(&snapshot, actions, info).await
    }

    /// Release the snapshot. Every later call fails.
    pub fn close(&self) -> DeltaResult<()> {
        self.transition(HandleEvent::Close)?;
        self.snapshot.store(None);
        self.cancellation.lock().cancel();
        debug!(table_uri = %self.table_uri(), "closed table");
        Ok(())
    }

    /// Commit with the writer lock already held.
    pub(crate) async fn commit_locked(
        &self,
        snapshot: &Snapshot,
        actions: Vec<Action>,
        info: CommitInfo,
    ) -> DeltaResult<Version> {
        let settings = CommitSettings {
            checkpoint_interval: self.config.checkpoint_interval,
        };
        let outcome =
            transaction::commit(self.store.as_ref(), snapshot, actions, info, &self.invariants, settings).await?;
        self.publish(outcome.snapshot);
        Ok(outcome.version)
    }

    /// Published snapshot with its file set loaded, replaying once if the
    /// handle was opened without files.
    pub(crate) async fn ensure_files(&self) -> DeltaResult<Arc<Snapshot>> {
        let current = self.snapshot()?;
        if current.files_loaded() {
            return Ok(current);
        }
        let _writer = self.writer.lock().await;
        self.ensure_files_locked().await
    }

    pub(crate) async fn ensure_files_locked(&self) -> DeltaResult<Arc<Snapshot>> {
        let current = self.snapshot()?;
        if current.files_loaded() {
            return Ok(current);
        }

        let segment = LogSegment::resolve(self.store.as_ref(), TableVersion::Version(current.version())).await?;
        let options = self.replay_options(true);
        let snapshot = replay_segment(self.store.as_ref(), &segment, &self.invariants, &options).await?;
        debug!(version = snapshot.version(), "materialized file set");
        let snapshot = Arc::new(snapshot);
        self.snapshot.store(Some(snapshot.clone()));
        Ok(snapshot)
    }

    pub(crate) fn writer_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.writer
    }

    pub(crate) fn replay_options(&self, load_files: bool) -> ReplayOptions {
        ReplayOptions {
            load_files,
            log_buffer_size: self.options.log_buffer_size.unwrap_or(self.config.log_buffer_size),
            cancel: self.cancellation_token(),
        }
    }

    pub(crate) fn publish(&self, snapshot: Snapshot) {
        self.snapshot.store(Some(Arc::new(snapshot)));
    }

    fn transition(&self, event: HandleEvent) -> DeltaResult<()> {
        self.lifecycle.lock().apply(event)?;
        Ok(())
    }
}
