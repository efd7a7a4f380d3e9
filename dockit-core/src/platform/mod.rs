//! Platform abstraction for document storage.
//!
//! The document store is platform-agnostic. Everything it needs from the
//! host is reached through a [`Platform`]:
//!
//! - [`Storage`] for documents that are included in device backups;
//! - [`Storage`] for documents that must stay on this device;
//! - a [`SecureArea`] factory bound to a chosen storage;
//! - optionally, the [`SlotManager`] for hardware credential slots.
//!
//! # Platform Implementations
//!
//! - [`MemoryPlatform`]: in-memory storages and an optional in-memory slot
//!   device, for tests and development.
//! - [`FsPlatform`]: storages in `<root>/backed_up` and `<root>/local`, with
//!   atomic write-to-temp-then-rename semantics.
//!
//! The process-wide instance is set up once through a [`PlatformProvider`].

mod fs;
pub mod memory;
mod provider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::direct_access::SlotManager;
use crate::error::MetadataResult;

pub use fs::{FsPlatform, FsStorage};
pub use memory::{MemoryPlatform, MemoryStorage};
pub use provider::{init_fn, install_platform, platform, PlatformInitializer, PlatformProvider};

/// Atomic storage for small named blobs.
///
/// Writes MUST be atomic: a reader sees either the complete old content or
/// the complete new content, never a partial write.
pub trait Storage: Send + Sync {
    /// Short name identifying the storage, e.g. `backed_up`.
    fn name(&self) -> &str;

    /// Reads a blob by name.
    ///
    /// Returns `Ok(None)` if the blob does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    fn read(&self, key: &str) -> MetadataResult<Option<Vec<u8>>>;

    /// Atomically writes a blob, replacing any existing content.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_atomic(&self, key: &str, bytes: &[u8]) -> MetadataResult<()>;

    /// Deletes a blob. Deleting a missing blob is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error only for actual I/O failures.
    fn delete(&self, key: &str) -> MetadataResult<()>;
}

/// Key-holding area bound to one [`Storage`].
pub trait SecureArea: Send + Sync {
    /// Identifier of the secure area implementation.
    fn identifier(&self) -> &str;

    /// The storage the secure area keeps its state in.
    fn storage(&self) -> Arc<dyn Storage>;
}

/// Host services the document store runs on.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Platform name used in logs and errors.
    fn name(&self) -> &str;

    /// Storage included in device backups.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be opened.
    async fn backed_up_storage(&self) -> MetadataResult<Arc<dyn Storage>>;

    /// Storage excluded from device backups.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be opened.
    async fn non_backed_up_storage(&self) -> MetadataResult<Arc<dyn Storage>>;

    /// Creates the platform's secure area bound to `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secure area cannot be created.
    async fn secure_area(&self, storage: Arc<dyn Storage>) -> MetadataResult<Arc<dyn SecureArea>>;

    /// Hardware credential slots, on platforms that have them.
    fn hardware_slots(&self) -> Option<Arc<SlotManager>> {
        None
    }
}

/// Secure area backed by software keys, shared by the reference platforms.
#[derive(Clone)]
pub struct SoftwareSecureArea {
    storage: Arc<dyn Storage>,
}

impl SoftwareSecureArea {
    /// Identifier reported by [`SecureArea::identifier`].
    pub const IDENTIFIER: &'static str = "software";

    /// Binds a software secure area to `storage`.
    #[must_use]
    pub const fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

impl SecureArea for SoftwareSecureArea {
    fn identifier(&self) -> &str {
        Self::IDENTIFIER
    }

    fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }
}

impl std::fmt::Debug for SoftwareSecureArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareSecureArea")
            .field("storage", &self.storage.name())
            .finish()
    }
}
