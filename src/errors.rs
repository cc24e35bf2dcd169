//! Replica Storage Error Hierarchy
//!
//! Defines the error types for the replica storage layer, categorized by
//! the consumer that has to react to them: the consensus library (log
//! reads), the snapshot pipeline, the replica directory and the
//! infrastructure underneath.

use std::path::PathBuf;

use config::ConfigError;

use crate::RangeId;
use crate::ReplicaId;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (storage, serialization, io)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Configuration loading and validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Errors surfaced to the consensus library through the storage interface
    #[error(transparent)]
    RaftStorage(#[from] RaftStorageError),

    /// Replica directory and lifecycle failures
    #[error(transparent)]
    Replica(#[from] ReplicaError),

    /// Snapshot generation and staging failures (recoverable)
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(#[from] FatalError),
}

impl Error {
    /// True for the unrecoverable category. Callers must never retry or
    /// swallow these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    pub fn is_compacted(&self) -> bool {
        matches!(self, Error::RaftStorage(RaftStorageError::Compacted))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::RaftStorage(RaftStorageError::Unavailable))
    }
}

/// The fixed error vocabulary understood by the consensus library, plus the
/// consistency failures that must never be papered over.
#[derive(Debug, thiserror::Error)]
pub enum RaftStorageError {
    /// Requested index has been removed by log truncation
    #[error("requested index is unavailable due to compaction")]
    Compacted,

    /// Requested index does not exist yet
    #[error("requested entry at index is unavailable")]
    Unavailable,

    /// A hole in the stored log indices
    #[error("there is a gap in the index record between lo:{lo} and hi:{hi} at index:{index}")]
    LogGap { lo: u64, hi: u64, index: u64 },

    #[error("lo:{lo} is greater than hi:{hi}")]
    InvalidRange { lo: u64, hi: u64 },

    #[error("sideloaded storage is uninitialized")]
    SideloadedStorageUninitialized,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during log/snapshot operations
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// I/O failure tied to a concrete path
    #[error("Error occurred at path: {path}")]
    PathError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Bulk-load file construction or decoding failures
    #[error("SST error: {0}")]
    Sst(String),

    /// Sideloaded payload missing from side storage
    #[error("sideloaded payload for index {index} term {term} not found")]
    SideloadedFileNotFound { index: u64, term: u64 },

    /// Checksum or structural validation failures
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },

    /// Error type for value conversion operations
    #[error("Value convert failed")]
    Convert(#[from] ConvertError),
}

/// Error type for value conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// Invalid input length error
    ///
    /// This occurs when the input byte slice length doesn't match the required 8 bytes.
    #[error("invalid byte length: expected 8 bytes, received {0} bytes")]
    InvalidLength(usize),

    /// Key does not carry the expected prefix
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    //Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    // Metrics registration
    #[error("Metrics error: {0}")]
    Metrics(String),
}

// Serialization is classified separately (across protocol layers and system layers)
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("r{0} was not found on this store")]
    RangeNotFound(RangeId),

    #[error("r{0} is already present on this store")]
    RangeExists(RangeId),

    /// Replica has been destroyed (e.g. subsumed by a merge)
    #[error("r{range_id} was removed: {reason}")]
    Destroyed { range_id: RangeId, reason: String },

    /// Key span already covered by another replica or placeholder
    #[error("r{range_id} [{start:?}, {end:?}) overlaps existing {existing}")]
    Overlap {
        range_id: RangeId,
        start: Vec<u8>,
        end: Vec<u8>,
        existing: String,
    },

    #[error("placeholder for r{0} not found")]
    PlaceholderNotFound(RangeId),

    #[error("replica {replica_id} not found in descriptor of r{range_id}")]
    ReplicaDescriptorNotFound {
        range_id: RangeId,
        replica_id: ReplicaId,
    },

    #[error(transparent)]
    SpanConfig(#[from] SpanConfigError),
}

#[derive(Debug, thiserror::Error)]
pub enum SpanConfigError {
    /// No configuration data has been received yet
    #[error("system config not available")]
    Unavailable,

    #[error("failed to lookup span config for key {key:?}: {reason}")]
    Lookup { key: Vec<u8>, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("couldn't find range descriptor for r{0}")]
    DescriptorNotFound(RangeId),

    #[error("snapshot for r{got} delivered to r{expected}")]
    RangeMismatch { expected: RangeId, got: RangeId },

    /// Rejected by a testing knob or the staging pipeline before ingestion
    #[error("snapshot rejected: {0}")]
    Rejected(String),
}

/// Unrecoverable conditions. Once observed, the in-memory and durable state
/// of a replica can no longer be reconciled by the process.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("found empty HardState for non-empty snapshot at index {index} term {term}")]
    EmptyHardState { index: u64, term: u64 },

    #[error("unexpected range ID {got} while applying snapshot to r{expected}")]
    RangeIdMismatch { expected: RangeId, got: RangeId },

    #[error("snapshot RaftAppliedIndex {state} doesn't match its metadata index {metadata}")]
    AppliedIndexMismatch { state: u64, metadata: u64 },

    #[error("snapshot RaftAppliedIndexTerm {state} doesn't match its metadata term {metadata}")]
    AppliedTermMismatch { state: u64, metadata: u64 },

    #[error("subsuming replica to our left; key span: {span}; total key span {total}")]
    SubsumedToLeft { span: String, total: String },

    #[error("keyspace hole at {at} within [{from}, {to})")]
    KeyspaceHole { from: String, to: String, at: String },

    #[error("on-disk and in-memory state diverged: {0}")]
    StateDivergence(String),

    #[error("lease sequence jumped from {prev} to {new}")]
    LeaseSequenceJump { prev: u64, new: u64 },

    #[error("{stage}: {source}")]
    AfterIngestion {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },
}

// ============== Conversion Implementations ============== //
impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Error::System(SystemError::Storage(StorageError::Convert(e)))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::System(SystemError::Serialization(SerializationError::Bincode(e)))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        StorageError::IoError(e).into()
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        StorageError::DbError(err.to_string()).into()
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::System(SystemError::Metrics(err.to_string()))
    }
}

impl From<SpanConfigError> for Error {
    fn from(e: SpanConfigError) -> Self {
        Error::Replica(ReplicaError::SpanConfig(e))
    }
}
