// Test fixtures: tables written straight to a temporary directory as raw
// log files, so the reader is exercised against bytes it did not produce.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tempfile::TempDir;

pub struct Fixture {
    _temp_dir: TempDir,
    pub root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp_dir = tempfile::Builder::new()
            .prefix("tidelog")
            .tempdir()
            .expect("create temp dir");
        let root = temp_dir.path().join("events");
        fs::create_dir_all(root.join("_delta_log")).expect("create log dir");
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    pub fn location(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }

    pub fn commit_path(&self, version: i64) -> PathBuf {
        self.root.join("_delta_log").join(format!("{version:020}.json"))
    }

    pub fn write_commit(&self, version: i64, actions: &[Value]) {
        let body: String = actions.iter().map(|action| format!("{action}\n")).collect();
        fs::write(self.commit_path(version), body).expect("write commit");
    }

    pub fn write_data_file(&self, relative: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create data dir");
        }
        fs::write(&path, b"PAR1").expect("write data file");
        path
    }

    /// Three commits: v0 adds `a`, v1 adds `b`, v2 removes `a`.
    pub fn standard_table(&self) {
        self.write_commit(0, &[protocol(), metadata(&[]), add("a.parquet", &[])]);
        self.write_commit(1, &[commit_info("WRITE"), add("b.parquet", &[])]);
        self.write_commit(2, &[commit_info("DELETE"), remove("a.parquet")]);
    }
}

pub fn set_mtime(path: &Path, seconds_since_epoch: u64) {
    let file = fs::File::options().write(true).open(path).expect("open for mtime");
    file.set_modified(UNIX_EPOCH + Duration::from_secs(seconds_since_epoch))
        .expect("set mtime");
}

pub fn set_age(path: &Path, age: Duration) {
    let file = fs::File::options().write(true).open(path).expect("open for mtime");
    file.set_modified(SystemTime::now() - age).expect("set mtime");
}

pub fn protocol() -> Value {
    json!({"protocol": {"minReaderVersion": 1, "minWriterVersion": 2}})
}

pub fn metadata(partition_columns: &[&str]) -> Value {
    let schema = json!({
        "type": "struct",
        "fields": [
            {"name": "id", "type": "long", "nullable": false, "metadata": {}},
            {"name": "day", "type": "string", "nullable": true, "metadata": {}}
        ]
    });
    json!({"metaData": {
        "id": "5fba94ed-9794-4965-ba6e-6ee3c0d22af9",
        "format": {"provider": "parquet", "options": {}},
        "schemaString": schema.to_string(),
        "partitionColumns": partition_columns,
        "configuration": {},
        "createdTime": 1_700_000_000_000i64
    }})
}

pub fn add(path: &str, partition_values: &[(&str, &str)]) -> Value {
    let values: serde_json::Map<String, Value> = partition_values
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect();
    json!({"add": {
        "path": path,
        "size": 4,
        "partitionValues": values,
        "modificationTime": 1_700_000_000_000i64,
        "dataChange": true,
        "stats": "{\"numRecords\":1}"
    }})
}

pub fn remove(path: &str) -> Value {
    json!({"remove": {"path": path, "deletionTimestamp": now_millis(), "dataChange": true}})
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_millis() as i64
}

pub fn commit_info(operation: &str) -> Value {
    json!({"commitInfo": {"timestamp": 1_700_000_000_000i64, "operation": operation}})
}
