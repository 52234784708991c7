// Partition Filters
//
// Predicates over partition values used to select active files without
// reading them.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{DeltaError, DeltaResult};
use crate::log::AddFile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionValue {
    Equal(String),
    NotEqual(String),
    In(Vec<String>),
    NotIn(Vec<String>),
}

/// `key <op> value` over one partition column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFilter {
    pub key: String,
    pub value: PartitionValue,
}

impl PartitionFilter {
    pub fn try_new(key: impl Into<String>, value: PartitionValue) -> DeltaResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DeltaError::InvalidPartitionFilter(format!("{value:?}")));
        }
        Ok(Self { key, value })
    }

    /// Whether a file with these partition values passes. A null value
    /// never equals anything and is never a member of a set.
    pub fn matches(&self, partition_values: &HashMap<String, Option<String>>) -> bool {
        let actual = partition_values.get(&self.key).and_then(|v| v.as_deref());
        match (&self.value, actual) {
            (PartitionValue::Equal(expected), Some(actual)) => actual == expected,
            (PartitionValue::Equal(_), None) => false,
            (PartitionValue::NotEqual(expected), Some(actual)) => actual != expected,
            (PartitionValue::NotEqual(_), None) => true,
            (PartitionValue::In(set), Some(actual)) => set.iter().any(|v| v == actual),
            (PartitionValue::In(_), None) => false,
            (PartitionValue::NotIn(set), Some(actual)) => !set.iter().any(|v| v == actual),
            (PartitionValue::NotIn(_), None) => true,
        }
    }
}

impl FromStr for PartitionFilter {
    type Err = DeltaError;

    /// Parse `k=v`, `k!=v`, `k in a,b` or `k not in a,b`.
    fn from_str(raw: &str) -> DeltaResult<Self> {
        let invalid = || DeltaError::InvalidPartitionFilter(raw.to_string());
        let list = |values: &str| -> DeltaResult<Vec<String>> {
            let items: Vec<String> = values
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if items.is_empty() {
                return Err(invalid());
            }
            Ok(items)
        };

        let (key, value) = if let Some((key, rest)) = raw.split_once("!=") {
            (key, PartitionValue::NotEqual(rest.trim().to_string()))
        } else if let Some((key, rest)) = raw.split_once('=') {
            (key, PartitionValue::Equal(rest.trim().to_string()))
        } else if let Some((key, rest)) = raw.split_once(" not in ") {
            (key, PartitionValue::NotIn(list(rest)?))
        } else if let Some((key, rest)) = raw.split_once(" in ") {
            (key, PartitionValue::In(list(rest)?))
        } else {
            return Err(invalid());
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            key: key.to_string(),
            value,
        })
    }
}

/// Check that every filter names a partition column.
pub fn validate_filters(filters: &[PartitionFilter], partition_columns: &[String]) -> DeltaResult<()> {
    let columns: Vec<String> = filters
        .iter()
        .filter(|filter| !partition_columns.contains(&filter.key))
        .map(|filter| filter.key.clone())
        .collect();
    if !columns.is_empty() {
        return Err(DeltaError::ColumnsNotPartitioned { columns });
    }
    Ok(())
}

/// Files whose partition values satisfy every filter.
pub fn filter_files<'a>(
    files: impl IntoIterator<Item = &'a AddFile>,
    filters: &[PartitionFilter],
) -> Vec<&'a AddFile> {
    files
        .into_iter()
        .filter(|file| filters.iter().all(|filter| filter.matches(&file.partition_values)))
        .collect()
}
