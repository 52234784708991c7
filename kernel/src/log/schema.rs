// Table Schema
//
// The schema carried in metadata's `schemaString`, plus the column
// invariants writers attach through field metadata.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DeltaError, DeltaResult};

/// Field metadata key holding a column invariant.
pub const INVARIANTS_KEY: &str = "delta.invariants";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    #[serde(rename = "type", default = "struct_type_name")]
    pub type_name: String,
    pub fields: Vec<StructField>,
}

fn struct_type_name() -> String {
    "struct".into()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayType {
    #[serde(rename = "type")]
    pub type_name: String,
    pub element_type: DataType,
    #[serde(default = "default_true")]
    pub contains_null: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapType {
    #[serde(rename = "type")]
    pub type_name: String,
    pub key_type: DataType,
    pub value_type: DataType,
    #[serde(default = "default_true")]
    pub value_contains_null: bool,
}

/// Column type: a primitive name such as `"long"` or a nested type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataType {
    Primitive(String),
    Struct(Box<StructType>),
    Array(Box<ArrayType>),
    Map(Box<MapType>),
}

impl DataType {
    pub fn primitive(name: impl Into<String>) -> Self {
        DataType::Primitive(name.into())
    }
}

impl StructField {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A SQL predicate every row must satisfy for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInvariant {
    /// Dotted path of the column, e.g. `payload.count`.
    pub field_name: String,
    pub invariant_sql: String,
}

#[derive(Deserialize)]
struct InvariantJson {
    expression: InvariantExpression,
}

#[derive(Deserialize)]
struct InvariantExpression {
    expression: String,
}

impl StructType {
    pub fn new(fields: Vec<StructField>) -> Self {
        Self {
            type_name: struct_type_name(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    /// Column invariants declared anywhere in the schema, nested structs
    /// included. Fails with `InvalidInvariantJson` on a malformed entry.
    pub fn get_invariants(&self) -> DeltaResult<Vec<ColumnInvariant>> {
        let mut invariants = Vec::new();
        collect_invariants(self, None, &mut invariants)?;
        Ok(invariants)
    }
}

fn collect_invariants(
    schema: &StructType,
    parent: Option<&str>,
    out: &mut Vec<ColumnInvariant>,
) -> DeltaResult<()> {
    for field in &schema.fields {
        let path = match parent {
            Some(parent) => format!("{parent}.{}", field.name),
            None => field.name.clone(),
        };

        if let Some(value) = field.metadata.get(INVARIANTS_KEY) {
            let raw = match value {
                Value::String(raw) => raw.clone(),
                other => other.to_string(),
            };
            let parsed: InvariantJson = serde_json::from_str(&raw)
                .map_err(|json_err| DeltaError::InvalidInvariantJson { raw, json_err })?;
            out.push(ColumnInvariant {
                field_name: path.clone(),
                invariant_sql: parsed.expression.expression,
            });
        }

        if let DataType::Struct(nested) = &field.data_type {
            collect_invariants(nested, Some(&path), out)?;
        }
    }
    Ok(())
}
