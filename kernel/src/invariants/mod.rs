// Invariant Framework
//
// Invariants are pure rules a reconstructed snapshot must satisfy before
// it is published to readers. A violation rejects the snapshot and the
// previously published one stays in place.

use crate::error::{DeltaError, DeltaResult};
use crate::state::Snapshot;

/// Highest reader protocol version this engine understands.
pub const MAX_READER_VERSION: i32 = 3;

/// Highest writer protocol version this engine understands.
pub const MAX_WRITER_VERSION: i32 = 7;

const SUPPORTED_READER_FEATURES: &[&str] = &["columnMapping", "timestampNtz", "vacuumProtocolCheck"];

const SUPPORTED_WRITER_FEATURES: &[&str] = &[
    "appendOnly",
    "invariants",
    "checkConstraints",
    "changeDataFeed",
    "columnMapping",
    "timestampNtz",
    "vacuumProtocolCheck",
];

/// Trait implemented by all invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, snapshot: &Snapshot) -> DeltaResult<()>;
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl std::fmt::Debug for InvariantEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.invariants.iter().map(|invariant| invariant.name()))
            .finish()
    }
}

impl InvariantEngine {
    /// Create an engine with no invariants.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Engine with the built-in invariants every loaded table must meet.
    pub fn with_defaults() -> Self {
        let mut engine = Self::new();
        engine.register(SupportedProtocol);
        engine.register(SchemaPresent);
        engine.register(ColumnInvariantsParse);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.invariants.iter().map(|invariant| invariant.name()).collect()
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(&self, snapshot: &Snapshot) -> DeltaResult<()> {
        for invariant in &self.invariants {
            if let Err(err) = invariant.validate(snapshot) {
                tracing::debug!(invariant = invariant.name(), error = %err, "invariant violated");
                return Err(err);
            }
        }
        Ok(())
    }
}

/// The protocol must not require a newer reader or writer, or any feature
/// this engine does not implement.
pub struct SupportedProtocol;

impl Invariant for SupportedProtocol {
    fn name(&self) -> &'static str {
        "supported-protocol"
    }

    fn validate(&self, snapshot: &Snapshot) -> DeltaResult<()> {
        let protocol = snapshot.protocol();

        if protocol.min_reader_version > MAX_READER_VERSION {
            return Err(DeltaError::MissingFeature(format!(
                "reader version {}",
                protocol.min_reader_version
            )));
        }
        if protocol.min_writer_version > MAX_WRITER_VERSION {
            return Err(DeltaError::MissingFeature(format!(
                "writer version {}",
                protocol.min_writer_version
            )));
        }

        let unsupported = |features: &Option<Vec<String>>, supported: &[&str]| {
            features
                .iter()
                .flatten()
                .find(|feature| !supported.contains(&feature.as_str()))
                .cloned()
        };
        if let Some(feature) = unsupported(&protocol.reader_features, SUPPORTED_READER_FEATURES) {
            return Err(DeltaError::MissingFeature(format!("reader feature `{feature}`")));
        }
        if let Some(feature) = unsupported(&protocol.writer_features, SUPPORTED_WRITER_FEATURES) {
            return Err(DeltaError::MissingFeature(format!("writer feature `{feature}`")));
        }
        Ok(())
    }
}

/// Metadata must carry a parseable schema.
pub struct SchemaPresent;

impl Invariant for SchemaPresent {
    fn name(&self) -> &'static str {
        "schema-present"
    }

    fn validate(&self, snapshot: &Snapshot) -> DeltaResult<()> {
        snapshot.schema().map(|_| ())
    }
}

/// Column invariants declared in the schema must be well formed.
pub struct ColumnInvariantsParse;

impl Invariant for ColumnInvariantsParse {
    fn name(&self) -> &'static str {
        "column-invariants-parse"
    }

    fn validate(&self, snapshot: &Snapshot) -> DeltaResult<()> {
        snapshot.schema()?.get_invariants().map(|_| ())
    }
}
