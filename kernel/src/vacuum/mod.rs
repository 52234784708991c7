// Vacuum
//
// Deletes data files under the table root that are no longer referenced
// by the current version and are older than the retention period. The
// log directory and other hidden entries are never touched.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use object_store::path::Path;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::VacuumOptions;
use crate::error::{DeltaError, DeltaResult};
use crate::log::segment::commits_after;
use crate::log::CommitInfo;
use crate::state::Snapshot;
use crate::table::DeltaTable;

/// Files eligible for deletion at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacuumPlan {
    pub cutoff: DateTime<Utc>,
    /// (path relative to the table root, object location), sorted by path.
    pub candidates: Vec<(String, Path)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VacuumMetrics {
    pub dry_run: bool,
    /// Absolute URIs of the files deleted, or that would be deleted.
    pub files_deleted: Vec<String>,
}

impl DeltaTable {
    pub async fn vacuum(&self, options: VacuumOptions) -> DeltaResult<VacuumMetrics> {
        let minimum_hours = self.config().min_retention_hours;
        let retention_hours = options.retention_hours.unwrap_or(minimum_hours);
        if options.enforce_retention_duration && retention_hours < minimum_hours {
            return Err(DeltaError::RetentionViolation {
                requested_hours: retention_hours,
                minimum_hours,
            });
        }

        let _writer = self.writer_lock().lock().await;
        let snapshot = self.ensure_files_locked().await?;
        let store = self.log_store();
        let object_store = store.object_store();
        let cancel = self.cancellation_token();

        // Only the latest version may be vacuumed
        if let Some(newer) = commits_after(store.as_ref(), snapshot.version()).await?.last() {
            return Err(DeltaError::VersionMismatch {
                expected: snapshot.version(),
                actual: newer.version,
            });
        }

        let hours = i64::try_from(retention_hours)
            .map_err(|_| DeltaError::InvalidData(format!("retention of {retention_hours}h is out of range")))?;
        let cutoff = Utc::now() - Duration::hours(hours);
        let plan = plan_vacuum(object_store.as_ref(), store.root(), &snapshot, cutoff).await?;
        debug!(cutoff = %plan.cutoff, candidates = plan.candidates.len(), "vacuum planned");

        let table_uri = self.table_uri();
        let to_uri = |relative: &str| format!("{table_uri}/{relative}");

        if options.dry_run {
            return Ok(VacuumMetrics {
                dry_run: true,
                files_deleted: plan.candidates.iter().map(|(relative, _)| to_uri(relative)).collect(),
            });
        }

        let mut files_deleted = Vec::with_capacity(plan.candidates.len());
        for (relative, location) in &plan.candidates {
            if cancel.is_cancelled() {
                return Err(DeltaError::Cancelled);
            }
            match object_store.delete(location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => files_deleted.push(to_uri(relative)),
                Err(err) => return Err(err.into()),
            }
        }

        if !files_deleted.is_empty() {
            let mut commit_info = CommitInfo::new("VACUUM END")
                .with_parameter("status", "COMPLETED")
                .with_metric("numDeletedFiles", files_deleted.len());
            for (key, value) in options.custom_metadata.unwrap_or_default() {
                commit_info.extra.insert(key, value);
            }
            self.commit_locked(&snapshot, Vec::new(), commit_info).await?;
        }

        info!(
            deleted = files_deleted.len(),
            retention_hours, "vacuum finished"
        );
        Ok(VacuumMetrics {
            dry_run: false,
            files_deleted,
        })
    }
}

/// Unreferenced files under `root` last modified at or before `cutoff`.
///
/// The snapshot must have its file set loaded.
pub async fn plan_vacuum(
    object_store: &dyn object_store::ObjectStore,
    root: &Path,
    snapshot: &Snapshot,
    cutoff: DateTime<Utc>,
) -> DeltaResult<VacuumPlan> {
    let active = active_paths(snapshot)?;
    let listing = object_store.list(Some(root));
    let metas: Vec<object_store::ObjectMeta> = listing.try_collect().await?;

    let mut candidates = Vec::new();
    for meta in metas {
        let Some(parts) = meta.location.prefix_match(root) else {
            continue;
        };
        let parts: Vec<String> = parts.map(|part| part.as_ref().to_string()).collect();
        if parts.iter().any(|part| is_hidden(part)) {
            continue;
        }
        let relative = parts.join("/");
        if active.contains(&relative) || meta.last_modified > cutoff {
            continue;
        }
        candidates.push((relative, meta.location));
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(VacuumPlan { cutoff, candidates })
}

/// Active paths in every form a listing may report them: as logged
/// (percent-encoded), decoded, and re-encoded as an object key.
fn active_paths(snapshot: &Snapshot) -> DeltaResult<HashSet<String>> {
    let mut active = HashSet::new();
    for file in snapshot.files()? {
        if let Ok(decoded) = Path::from_url_path(&file.path) {
            let decoded: &str = decoded.as_ref();
            active.insert(Path::from(decoded).as_ref().to_string());
            active.insert(decoded.to_string());
        }
        active.insert(file.path.clone());
    }
    Ok(active)
}

fn is_hidden(component: &str) -> bool {
    component.starts_with('_') || component.starts_with('.')
}

/// Custom metadata as accepted by [`VacuumOptions`].
pub fn custom_metadata<K: Into<String>, V: Into<Value>>(
    entries: impl IntoIterator<Item = (K, V)>,
) -> BTreeMap<String, Value> {
    entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}
