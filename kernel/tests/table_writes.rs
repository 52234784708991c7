mod common;

use std::sync::Arc;
use std::time::Duration;

use object_store::memory::InMemory;
use tidelog_kernel::log::{Action, AddFile, CommitInfo, DataType, LogStore, Metadata, ObjectLogStore, Protocol, StructField, StructType};
use tidelog_kernel::{DeltaError, DeltaTable, EngineConfig, TableOptions, VacuumOptions};

use common::{add, metadata, protocol, set_age, Fixture};
use tidelog_kernel::TableVersion;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::test]
async fn vacuum_removes_only_old_unreferenced_files() {
    let fixture = Fixture::new();
    fixture.write_commit(0, &[protocol(), metadata(&[]), add("live.parquet", &[])]);

    let live = fixture.write_data_file("live.parquet");
    let stale = fixture.write_data_file("stale.parquet");
    let fresh = fixture.write_data_file("fresh.parquet");
    let hidden = fixture.write_data_file("_staging/tmp.parquet");
    for path in [&live, &stale, &hidden] {
        set_age(path, 30 * DAY);
    }
    set_age(&fixture.commit_path(0), 30 * DAY);

    let table = DeltaTable::open(&fixture.location(), TableOptions::default())
        .await
        .unwrap();

    let dry = table
        .vacuum(VacuumOptions {
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(dry.files_deleted.len(), 1);
    assert!(dry.files_deleted[0].ends_with("/events/stale.parquet"));
    assert!(stale.exists());

    let metrics = table.vacuum(VacuumOptions::default()).await.unwrap();
    assert_eq!(metrics.files_deleted, dry.files_deleted);
    assert!(!stale.exists());
    assert!(live.exists());
    assert!(fresh.exists());
    assert!(hidden.exists());
    assert!(fixture.commit_path(0).exists());

    assert_eq!(table.version().unwrap(), 1);
    let history = table.history(Some(1)).await.unwrap();
    assert_eq!(history[0].info.operation.as_deref(), Some("VACUUM END"));
}

#[tokio::test]
async fn vacuum_retention_floor_follows_config() {
    let fixture = Fixture::new();
    fixture.standard_table();

    let table = DeltaTable::new(&fixture.location(), TableOptions::default())
        .unwrap()
        .with_config(EngineConfig {
            min_retention_hours: 24,
            ..EngineConfig::default_config()
        });
    table.load().await.unwrap();

    let err = table
        .vacuum(VacuumOptions {
            retention_hours: Some(12),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeltaError::RetentionViolation {
            requested_hours: 12,
            minimum_hours: 24
        }
    ));

    table
        .vacuum(VacuumOptions {
            retention_hours: Some(12),
            enforce_retention_duration: false,
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_retention_leaves_files_in_place() {
    let fixture = Fixture::new();
    fixture.standard_table();
    let removed = fixture.write_data_file("a.parquet");
    let orphan = fixture.write_data_file("orphan.parquet");
    for path in [&removed, &orphan] {
        set_age(path, 30 * DAY);
    }

    let table = DeltaTable::open(&fixture.location(), TableOptions::default())
        .await
        .unwrap();
    for retention_hours in [0, 1, 167] {
        let err = table
            .vacuum(VacuumOptions {
                retention_hours: Some(retention_hours),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeltaError::RetentionViolation { .. }));
    }

    assert!(removed.exists());
    assert!(orphan.exists());
    assert_eq!(table.version().unwrap(), 2);
    assert!(!fixture.commit_path(3).exists());
}

#[tokio::test]
async fn vacuum_from_an_old_version_deletes_nothing() {
    let fixture = Fixture::new();
    fixture.standard_table();
    let current = fixture.write_data_file("b.parquet");
    let orphan = fixture.write_data_file("orphan.parquet");
    for path in [&current, &orphan] {
        set_age(path, 30 * DAY);
    }

    let table = DeltaTable::open(
        &fixture.location(),
        TableOptions::default().at_version(TableVersion::Version(0)),
    )
    .await
    .unwrap();
    let err = table
        .vacuum(VacuumOptions {
            retention_hours: Some(0),
            enforce_retention_duration: false,
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DeltaError::VersionMismatch { expected: 0, actual: 2 }));
    assert!(current.exists());
    assert!(orphan.exists());
    assert!(!fixture.commit_path(3).exists());
}

#[tokio::test]
async fn concurrent_restores_from_one_base_have_one_winner() {
    let fixture = Fixture::new();
    fixture.standard_table();

    let first = DeltaTable::open(&fixture.location(), TableOptions::default())
        .await
        .unwrap();
    let second = DeltaTable::open(&fixture.location(), TableOptions::default())
        .await
        .unwrap();

    let (a, b) = tokio::join!(first.restore(0), second.restore(0));
    let (winner, loser) = match (a, b) {
        (Ok(metrics), Err(err)) | (Err(err), Ok(metrics)) => (metrics, err),
        other => panic!("expected exactly one restore to win, got {other:?}"),
    };
    assert_eq!(winner.version, 3);
    assert!(matches!(
        loser,
        DeltaError::VersionMismatch { expected: 2, actual: 3 } | DeltaError::VersionAlreadyExists(3)
    ));
    assert!(!fixture.commit_path(4).exists());

    let reopened = DeltaTable::open(&fixture.location(), TableOptions::default())
        .await
        .unwrap();
    assert_eq!(reopened.version().unwrap(), 3);
    assert_eq!(reopened.files().await.unwrap(), vec!["a.parquet"]);
}

async fn shared_table() -> Arc<InMemory> {
    let memory = Arc::new(InMemory::new());
    let store = ObjectLogStore::with_store("memory:///shared", memory.clone()).unwrap();
    let schema = StructType::new(vec![StructField::new("id", DataType::primitive("long"), false)]);
    store
        .write_commit_entry(
            0,
            &[
                Action::Protocol(Protocol::new(1, 2)),
                Action::Metadata(Metadata::try_new(&schema, vec![], Default::default()).unwrap()),
            ],
        )
        .await
        .unwrap();
    memory
}

fn handle(memory: &Arc<InMemory>) -> DeltaTable {
    let store = ObjectLogStore::with_store("memory:///shared", memory.clone()).unwrap();
    DeltaTable::with_log_store(Arc::new(store), TableOptions::default())
}

#[tokio::test]
async fn concurrent_writers_cannot_both_win() {
    let memory = shared_table().await;
    let first = handle(&memory);
    let second = handle(&memory);
    first.load().await.unwrap();
    second.load().await.unwrap();

    let version = first
        .commit(vec![Action::Add(AddFile::new("one.parquet", 1))], CommitInfo::new("WRITE"))
        .await
        .unwrap();
    assert_eq!(version, 1);

    let err = second
        .commit(vec![Action::Add(AddFile::new("two.parquet", 1))], CommitInfo::new("WRITE"))
        .await
        .unwrap_err();
    assert!(matches!(err, DeltaError::VersionMismatch { expected: 0, actual: 1 }));
    assert_eq!(second.version().unwrap(), 0);

    assert_eq!(second.update_incremental().await.unwrap(), 1);
    let version = second
        .commit(vec![Action::Add(AddFile::new("two.parquet", 1))], CommitInfo::new("WRITE"))
        .await
        .unwrap();
    assert_eq!(version, 2);

    first.update_incremental().await.unwrap();
    assert_eq!(first.files().await.unwrap(), vec!["one.parquet", "two.parquet"]);
}

#[tokio::test]
async fn racing_commits_produce_exactly_one_version() {
    let memory = shared_table().await;
    let store = ObjectLogStore::with_store("memory:///shared", memory.clone()).unwrap();
    let store = Arc::new(store);

    let attempts = (0..8).map(|writer| {
        let store = store.clone();
        tokio::spawn(async move {
            let info = CommitInfo::new("WRITE").with_parameter("writer", writer);
            store.write_commit_entry(1, &[Action::CommitInfo(info)]).await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let winners = results.iter().filter(|r| matches!(r, Ok(Ok(())))).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Ok(Err(DeltaError::VersionAlreadyExists(1)))))
        .count();
    assert_eq!((winners, losers), (1, 7));
}

#[tokio::test]
async fn merge_against_a_stale_read_version_is_rejected() {
    let memory = shared_table().await;
    let table = handle(&memory);
    table.load().await.unwrap();

    table
        .merge(0, vec![Action::Add(AddFile::new("a.parquet", 1))])
        .await
        .unwrap();
    let err = table
        .merge(0, vec![Action::Add(AddFile::new("b.parquet", 1))])
        .await
        .unwrap_err();
    assert!(matches!(err, DeltaError::VersionMismatch { .. }));
    assert_eq!(table.files().await.unwrap(), vec!["a.parquet"]);
}
