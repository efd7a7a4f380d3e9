//! In-memory implementations of platform traits for testing.
//!
//! Nothing here survives the process. These implementations exist to test
//! the metadata core and the document store without touching the disk or
//! secure hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use super::{Platform, SecureArea, SoftwareSecureArea, Storage};
use crate::direct_access::{SlotDevice, SlotId, SlotManager};
use crate::error::{BoxError, MetadataError, MetadataResult};

fn poisoned<T>(_: PoisonError<T>) -> MetadataError {
    MetadataError::storage("memory storage lock poisoned")
}

// =============================================================================
// Memory Storage
// =============================================================================

/// In-memory atomic storage backed by a `HashMap`.
pub struct MemoryStorage {
    name: String,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if no blobs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, key: &str) -> MetadataResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().map_err(poisoned)?.get(key).cloned())
    }

    fn write_atomic(&self, key: &str, bytes: &[u8]) -> MetadataResult<()> {
        self.blobs
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> MetadataResult<()> {
        self.blobs.write().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

// =============================================================================
// Memory Slot Device
// =============================================================================

/// Slot device that records wipes instead of touching hardware.
#[derive(Debug)]
pub struct MemorySlotDevice {
    capacity: u32,
    wipes: Mutex<Vec<SlotId>>,
    fail_wipes: Mutex<bool>,
}

impl MemorySlotDevice {
    /// Creates a device with `capacity` slots.
    #[must_use]
    pub const fn new(capacity: u32) -> Self {
        Self {
            capacity,
            wipes: Mutex::new(Vec::new()),
            fail_wipes: Mutex::new(false),
        }
    }

    /// Slots wiped so far, in order.
    #[must_use]
    pub fn wipes(&self) -> Vec<SlotId> {
        self.wipes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes subsequent wipes fail until reset.
    pub fn fail_wipes(&self, fail: bool) {
        *self.fail_wipes.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }
}

#[async_trait]
impl SlotDevice for MemorySlotDevice {
    fn capacity(&self) -> u32 {
        self.capacity
    }

    async fn wipe(&self, slot: SlotId) -> Result<(), BoxError> {
        if *self.fail_wipes.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(format!("simulated wipe failure on slot {slot}").into());
        }
        self.wipes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(slot);
        Ok(())
    }
}

// =============================================================================
// Memory Platform
// =============================================================================

/// Platform keeping everything in memory.
#[derive(Debug)]
pub struct MemoryPlatform {
    name: String,
    backed_up: Arc<MemoryStorage>,
    local: Arc<MemoryStorage>,
    slots: Option<Arc<SlotManager>>,
}

impl MemoryPlatform {
    /// Name used when none is configured.
    pub const DEFAULT_NAME: &'static str = "memory";

    /// Creates a platform without hardware slots.
    #[must_use]
    pub fn new() -> Self {
        Self::named(Self::DEFAULT_NAME)
    }

    /// Creates a named platform without hardware slots.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backed_up: Arc::new(MemoryStorage::new("backed_up")),
            local: Arc::new(MemoryStorage::new("local")),
            slots: None,
        }
    }

    /// Creates a platform with a pool of `capacity` hardware slots.
    #[must_use]
    pub fn with_hardware_slots(capacity: u32) -> Self {
        let device = Arc::new(MemorySlotDevice::new(capacity));
        Self::new().slot_manager(Arc::new(SlotManager::new(device)))
    }

    /// Attaches a hardware slot pool.
    #[must_use]
    pub fn slot_manager(mut self, slots: Arc<SlotManager>) -> Self {
        self.slots = Some(slots);
        self
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn backed_up_storage(&self) -> MetadataResult<Arc<dyn Storage>> {
        Ok(Arc::clone(&self.backed_up) as Arc<dyn Storage>)
    }

    async fn non_backed_up_storage(&self) -> MetadataResult<Arc<dyn Storage>> {
        Ok(Arc::clone(&self.local) as Arc<dyn Storage>)
    }

    async fn secure_area(&self, storage: Arc<dyn Storage>) -> MetadataResult<Arc<dyn SecureArea>> {
        Ok(Arc::new(SoftwareSecureArea::new(storage)))
    }

    fn hardware_slots(&self) -> Option<Arc<SlotManager>> {
        self.slots.clone()
    }
}
