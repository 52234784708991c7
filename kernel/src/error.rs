// Error Taxonomy
//
// Every failure the kernel can surface, and the fixed numeric code each
// one carries across the runtime boundary.

use crate::log::Version;
use crate::state::lifecycle::StateError;

/// Result alias used throughout the kernel.
pub type DeltaResult<T> = Result<T, DeltaError>;

/// Numeric error codes handed to callers on the other side of the
/// runtime boundary. The numbering is part of the external contract.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Utf8 = 0,
    Protocol = 1,
    ObjectStore = 2,
    Parquet = 3,
    Arrow = 4,
    InvalidJsonLog = 5,
    InvalidStatsJson = 6,
    InvalidInvariantJson = 7,
    InvalidVersion = 8,
    MissingDataFile = 9,
    InvalidDateTimeString = 10,
    InvalidData = 11,
    NotATable = 12,
    NoMetadata = 13,
    NoSchema = 14,
    LoadPartitions = 15,
    SchemaMismatch = 16,
    PartitionError = 17,
    InvalidPartitionFilter = 18,
    ColumnsNotPartitioned = 19,
    Io = 20,
    Transaction = 21,
    VersionAlreadyExists = 22,
    VersionMismatch = 23,
    MissingFeature = 24,
    InvalidTableLocation = 25,
    SerializeLogJson = 26,
    SerializeSchemaJson = 27,
    Generic = 28,
    GenericError = 29,
    Kernel = 30,
    MetaDataError = 31,
    NotInitialized = 32,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    #[error("invalid utf-8: {0}")]
    Utf8(String),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid json in log record at line {line}: {json_err}")]
    InvalidJsonLog {
        line: usize,
        json_err: serde_json::Error,
    },

    #[error("invalid json in file stats: {json_err}")]
    InvalidStatsJson { json_err: serde_json::Error },

    #[error("invalid column invariant `{raw}`: {json_err}")]
    InvalidInvariantJson {
        raw: String,
        json_err: serde_json::Error,
    },

    #[error("failed to serialize log record: {json_err}")]
    SerializeLogJson { json_err: serde_json::Error },

    #[error("failed to serialize schema: {json_err}")]
    SerializeSchemaJson { json_err: serde_json::Error },

    #[error("invalid schema: {json_err}")]
    InvalidSchema { json_err: serde_json::Error },

    #[error("invalid table version: {0}")]
    InvalidVersion(Version),

    #[error("commit for version {version} is missing from the log")]
    MissingDataFile { version: Version },

    #[error("invalid datetime: {0}")]
    InvalidDateTime(String),

    #[error("retention period of {requested_hours}h is below the minimum of {minimum_hours}h; disable enforcement to override")]
    RetentionViolation {
        requested_hours: u64,
        minimum_hours: u64,
    },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("not a table: {0}")]
    NotATable(String),

    #[error("table metadata is missing")]
    NoMetadata,

    #[error("table schema is missing")]
    NoSchema,

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("invalid partition values for `{path}`: {reason}")]
    PartitionError { path: String, reason: String },

    #[error("invalid partition filter `{0}`")]
    InvalidPartitionFilter(String),

    #[error("columns are not partition columns: {}", columns.join(", "))]
    ColumnsNotPartitioned { columns: Vec<String> },

    #[error("version {0} already exists")]
    VersionAlreadyExists(Version),

    #[error("version mismatch: expected {expected}, found {actual}")]
    VersionMismatch { expected: Version, actual: Version },

    #[error("table requires unsupported feature: {0}")]
    MissingFeature(String),

    #[error("invalid table location `{location}`: {reason}")]
    InvalidTableLocation { location: String, reason: String },

    #[error("checkpoint failed: {0}")]
    Checkpoint(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("table handle: {0}")]
    Lifecycle(#[from] StateError),

    #[error("{0}")]
    Generic(String),
}

impl DeltaError {
    /// Code reported across the runtime boundary.
    pub fn code(&self) -> ErrorCode {
        use DeltaError::*;

        match self {
            Utf8(_) => ErrorCode::Utf8,
            ObjectStore(_) => ErrorCode::ObjectStore,
            Parquet(_) => ErrorCode::Parquet,
            Arrow(_) => ErrorCode::Arrow,
            Io(_) => ErrorCode::Io,
            InvalidJsonLog { .. } => ErrorCode::InvalidJsonLog,
            InvalidStatsJson { .. } => ErrorCode::InvalidStatsJson,
            InvalidInvariantJson { .. } => ErrorCode::InvalidInvariantJson,
            SerializeLogJson { .. } => ErrorCode::SerializeLogJson,
            SerializeSchemaJson { .. } => ErrorCode::SerializeSchemaJson,
            InvalidSchema { .. } => ErrorCode::MetaDataError,
            InvalidVersion(_) => ErrorCode::InvalidVersion,
            MissingDataFile { .. } => ErrorCode::MissingDataFile,
            InvalidDateTime(_) => ErrorCode::InvalidDateTimeString,
            RetentionViolation { .. } | InvalidData(_) => ErrorCode::InvalidData,
            NotATable(_) => ErrorCode::NotATable,
            NoMetadata => ErrorCode::NoMetadata,
            NoSchema => ErrorCode::NoSchema,
            SchemaMismatch(_) => ErrorCode::SchemaMismatch,
            PartitionError { .. } => ErrorCode::PartitionError,
            InvalidPartitionFilter(_) => ErrorCode::InvalidPartitionFilter,
            ColumnsNotPartitioned { .. } => ErrorCode::ColumnsNotPartitioned,
            VersionAlreadyExists(_) => ErrorCode::VersionAlreadyExists,
            VersionMismatch { .. } => ErrorCode::VersionMismatch,
            MissingFeature(_) => ErrorCode::MissingFeature,
            InvalidTableLocation { .. } => ErrorCode::InvalidTableLocation,
            Checkpoint(_) => ErrorCode::Protocol,
            Cancelled => ErrorCode::Transaction,
            Lifecycle(_) => ErrorCode::NotInitialized,
            Generic(_) => ErrorCode::Generic,
        }
    }
}

impl From<std::str::Utf8Error> for DeltaError {
    fn from(err: std::str::Utf8Error) -> Self {
        DeltaError::Utf8(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for DeltaError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        DeltaError::Utf8(err.to_string())
    }
}
