//! Error types for document metadata, platform providers and hardware slots.

use thiserror::Error;

use crate::direct_access::SlotId;

/// Boxed error used to carry failures reported by host-provided callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for metadata operations.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Errors raised by the document metadata core.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum MetadataError {
    /// Persisted metadata bytes are non-empty but do not decode as a record.
    #[error("malformed metadata: {0}")]
    MalformedData(String),

    /// A record could not be serialized. Nothing was published or saved.
    #[error("failed to encode record: {0}")]
    Encoding(String),

    /// The persistence sink rejected a save. The in-memory record is already
    /// published and is not rolled back.
    #[error("failed to persist metadata for document {document_id}: {source}")]
    PersistenceFailure {
        /// Document whose metadata could not be saved.
        document_id: String,
        /// Error reported by the sink.
        source: BoxError,
    },

    /// Every slot in the hardware pool is assigned.
    #[error("all {capacity} hardware slots are in use")]
    SlotsExhausted {
        /// Size of the pool.
        capacity: u32,
    },

    /// The slot id does not exist in the pool.
    #[error("invalid hardware slot {slot} (pool size {capacity})")]
    InvalidSlot {
        /// Requested slot.
        slot: SlotId,
        /// Size of the pool.
        capacity: u32,
    },

    /// Ownership was recorded for a slot that was never allocated.
    #[error("hardware slot {0} is not allocated")]
    SlotNotAllocated(SlotId),

    /// The slot was allocated but its owner is not recorded yet, so nothing
    /// may claim it.
    #[error("hardware slot {0} is allocated but not yet assigned")]
    SlotPending(SlotId),

    /// The slot belongs to another document.
    #[error("hardware slot {slot} is owned by document {owner}")]
    SlotInUse {
        /// Requested slot.
        slot: SlotId,
        /// Current owner.
        owner: String,
    },

    /// The document already owns a hardware slot.
    #[error("document {document_id} already owns hardware slot {slot}")]
    SlotAlreadyAssigned {
        /// Document requesting a second slot.
        document_id: String,
        /// Slot it already owns.
        slot: SlotId,
    },

    /// A platform capability was requested on a platform that lacks it.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The platform provider failed to initialize. Not retried.
    #[error("platform initialization failed: {0}")]
    PlatformInit(String),

    /// Errors coming from a storage backend.
    #[error("storage error: {0}")]
    Storage(String),

    /// Errors coming from a hardware slot device.
    #[error("slot device error: {0}")]
    SlotDevice(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    Config(String),
}

impl MetadataError {
    /// Creates a malformed data error.
    #[must_use]
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedData(reason.into())
    }

    /// Creates a capability unavailable error.
    #[must_use]
    pub fn unavailable<S: Into<String>>(capability: S) -> Self {
        Self::CapabilityUnavailable(capability.into())
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MetadataError::SlotsExhausted { capacity: 4 };
        assert_eq!(err.to_string(), "all 4 hardware slots are in use");

        let err = MetadataError::PersistenceFailure {
            document_id: "doc-1".to_string(),
            source: "disk full".into(),
        };
        assert!(err.to_string().contains("doc-1"));
        assert!(err.to_string().contains("disk full"));

        let err = MetadataError::malformed("expected map");
        assert!(format!("{err}").contains("malformed metadata"));
    }

    #[test]
    fn test_persistence_failure_keeps_source() {
        use std::error::Error as _;

        let err = MetadataError::PersistenceFailure {
            document_id: "doc-1".to_string(),
            source: "disk full".into(),
        };
        assert_eq!(err.source().map(ToString::to_string).as_deref(), Some("disk full"));
    }
}
