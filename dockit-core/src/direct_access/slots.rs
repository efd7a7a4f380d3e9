//! Bounded pool of hardware credential slots.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ciborium::value::Value;
use tokio::sync::{Mutex, MutexGuard, OnceCell};

use crate::error::{BoxError, MetadataError, MetadataResult};
use crate::metadata::{decode_value, encode_value};
use crate::platform::Storage;

/// Handle to one hardware credential slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

impl SlotId {
    /// Wraps a raw slot index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw slot index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform access to the secure hardware holding the slots.
///
/// Only platforms exposing the hardware feature provide one; see
/// [`Platform::hardware_slots`](crate::platform::Platform::hardware_slots).
#[async_trait]
pub trait SlotDevice: Send + Sync {
    /// Number of slots the hardware offers.
    fn capacity(&self) -> u32;

    /// Erases any credential held in `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hardware rejects the request.
    async fn wipe(&self, slot: SlotId) -> Result<(), BoxError>;
}

/// State of one slot in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// Available for allocation.
    Free,
    /// Allocated. `owner` is set once [`SlotManager::assign`] records the
    /// document holding it.
    Assigned {
        /// Owning document, if already recorded.
        owner: Option<String>,
    },
}

impl SlotState {
    fn is_owned_by(&self, document_id: &str) -> bool {
        matches!(self, Self::Assigned { owner: Some(owner) } if owner == document_id)
    }
}

/// Allocates and releases hardware slots.
///
/// Every operation takes the pool lock, so concurrent allocations and clears
/// never hand out the same slot twice. Clearing holds the lock across the
/// hardware wipe, so a slot is only reused after it has been erased.
///
/// # Ownership table
///
/// A manager built with [`SlotManager::persistent`] keeps the pool state in
/// a [`Storage`] blob under [`SlotManager::TABLE_KEY`]. The table is loaded
/// before the first operation and rewritten on every change, so a manager
/// created after a restart knows which slots documents still hold even
/// before those documents are loaded. A manager built with
/// [`SlotManager::new`] starts with every slot free and forgets everything
/// when dropped.
///
/// The table is a CBOR array with one entry per slot: `null` for a free
/// slot, the owner's document id as text, or `true` for a slot allocated
/// without a recorded owner. A corrupt table makes every operation fail with
/// [`MetadataError::MalformedData`].
pub struct SlotManager {
    device: Arc<dyn SlotDevice>,
    table: Option<Arc<dyn Storage>>,
    pool: OnceCell<Mutex<Vec<SlotState>>>,
}

impl SlotManager {
    /// Storage key of the ownership table.
    pub const TABLE_KEY: &'static str = "direct_access_slots";

    /// Creates a manager with every slot of `device` free, kept in memory
    /// only.
    #[must_use]
    pub fn new(device: Arc<dyn SlotDevice>) -> Self {
        Self {
            device,
            table: None,
            pool: OnceCell::new(),
        }
    }

    /// Creates a manager whose ownership table lives in `table`.
    #[must_use]
    pub fn persistent(device: Arc<dyn SlotDevice>, table: Arc<dyn Storage>) -> Self {
        Self {
            device,
            table: Some(table),
            pool: OnceCell::new(),
        }
    }

    /// Size of the pool.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.device.capacity()
    }

    /// Reserves the lowest free slot without recording an owner.
    ///
    /// The slot stays pending until [`Self::assign`] names its owner.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::SlotsExhausted`] if no slot is free.
    /// - [`MetadataError::Storage`] if the ownership table cannot be read or
    ///   written.
    pub async fn allocate(&self) -> MetadataResult<SlotId> {
        let mut pool = self.pool().await?;
        let index = self.first_free(&pool)?;
        self.commit(&mut pool, index, SlotState::Assigned { owner: None })?;
        let slot = slot_at(index);
        log::debug!("allocated hardware slot {slot}");
        Ok(slot)
    }

    /// Reserves the lowest free slot for `document_id` in one step.
    ///
    /// If the document already owns a slot, that slot is returned instead.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::SlotsExhausted`] if no slot is free.
    /// - [`MetadataError::Storage`] if the ownership table cannot be read or
    ///   written.
    pub async fn allocate_for(&self, document_id: &str) -> MetadataResult<SlotId> {
        let mut pool = self.pool().await?;
        if let Some(index) = pool.iter().position(|state| state.is_owned_by(document_id)) {
            let slot = slot_at(index);
            log::debug!("document {document_id} already holds hardware slot {slot}");
            return Ok(slot);
        }
        let index = self.first_free(&pool)?;
        self.commit(
            &mut pool,
            index,
            SlotState::Assigned {
                owner: Some(document_id.to_string()),
            },
        )?;
        let slot = slot_at(index);
        log::debug!("allocated hardware slot {slot} to document {document_id}");
        Ok(slot)
    }

    /// Records `document_id` as the owner of an allocated slot.
    ///
    /// Recording the same owner again is a no-op.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::InvalidSlot`] if the slot is outside the pool.
    /// - [`MetadataError::SlotNotAllocated`] if the slot is free.
    /// - [`MetadataError::SlotInUse`] if another document owns the slot.
    /// - [`MetadataError::Storage`] if the ownership table cannot be read or
    ///   written.
    pub async fn assign(&self, document_id: &str, slot: SlotId) -> MetadataResult<()> {
        let mut pool = self.pool().await?;
        let index = self.index_of(slot)?;
        match pool[index].clone() {
            SlotState::Free => Err(MetadataError::SlotNotAllocated(slot)),
            SlotState::Assigned { owner: Some(owner) } if owner == document_id => Ok(()),
            SlotState::Assigned { owner: Some(owner) } => Err(MetadataError::SlotInUse { slot, owner }),
            SlotState::Assigned { owner: None } => {
                self.commit(
                    &mut pool,
                    index,
                    SlotState::Assigned {
                        owner: Some(document_id.to_string()),
                    },
                )?;
                log::debug!("hardware slot {slot} assigned to document {document_id}");
                Ok(())
            }
        }
    }

    /// Marks `slot` as owned by `document_id` without allocating, for
    /// documents whose persisted metadata already records the slot.
    ///
    /// Restoring a slot the document already owns is a no-op.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::InvalidSlot`] if the slot is outside the pool.
    /// - [`MetadataError::SlotInUse`] if another document owns the slot.
    /// - [`MetadataError::SlotPending`] if the slot was allocated for a
    ///   caller that has not recorded itself as owner yet.
    /// - [`MetadataError::Storage`] if the ownership table cannot be read or
    ///   written.
    pub async fn restore(&self, document_id: &str, slot: SlotId) -> MetadataResult<()> {
        let mut pool = self.pool().await?;
        let index = self.index_of(slot)?;
        match pool[index].clone() {
            SlotState::Assigned { owner: Some(owner) } if owner == document_id => Ok(()),
            SlotState::Assigned { owner: Some(owner) } => Err(MetadataError::SlotInUse { slot, owner }),
            SlotState::Assigned { owner: None } => Err(MetadataError::SlotPending(slot)),
            SlotState::Free => {
                self.commit(
                    &mut pool,
                    index,
                    SlotState::Assigned {
                        owner: Some(document_id.to_string()),
                    },
                )?;
                log::debug!("hardware slot {slot} restored to document {document_id}");
                Ok(())
            }
        }
    }

    /// Wipes `slot` and returns it to the pool.
    ///
    /// Clearing a free slot is a no-op, so repeated deletion events are safe.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::InvalidSlot`] if the slot is outside the pool.
    /// - [`MetadataError::SlotDevice`] if the hardware wipe fails; the slot
    ///   then stays assigned.
    /// - [`MetadataError::Storage`] if the ownership table cannot be read or
    ///   written; the slot then stays assigned.
    pub async fn clear(&self, slot: SlotId) -> MetadataResult<()> {
        let mut pool = self.pool().await?;
        let index = self.index_of(slot)?;
        if pool[index] == SlotState::Free {
            log::debug!("hardware slot {slot} already free");
            return Ok(());
        }
        self.device
            .wipe(slot)
            .await
            .map_err(|err| MetadataError::SlotDevice(format!("wiping slot {slot}: {err}")))?;
        self.commit(&mut pool, index, SlotState::Free)?;
        log::debug!("hardware slot {slot} cleared");
        Ok(())
    }

    /// Current state of `slot`.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::InvalidSlot`] if the slot is outside the pool.
    /// - [`MetadataError::Storage`] if the ownership table cannot be read.
    pub async fn state(&self, slot: SlotId) -> MetadataResult<SlotState> {
        let pool = self.pool().await?;
        let index = self.index_of(slot)?;
        Ok(pool[index].clone())
    }

    /// Number of free slots.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Storage`] if the ownership table cannot be
    /// read.
    pub async fn free_slots(&self) -> MetadataResult<usize> {
        let pool = self.pool().await?;
        Ok(pool.iter().filter(|state| **state == SlotState::Free).count())
    }

    async fn pool(&self) -> MetadataResult<MutexGuard<'_, Vec<SlotState>>> {
        let pool = self
            .pool
            .get_or_try_init(|| async { self.load().map(Mutex::new) })
            .await?;
        Ok(pool.lock().await)
    }

    fn load(&self) -> MetadataResult<Vec<SlotState>> {
        let capacity = self.capacity() as usize;
        let mut pool = vec![SlotState::Free; capacity];
        let Some(table) = &self.table else {
            return Ok(pool);
        };
        let Some(bytes) = table.read(Self::TABLE_KEY)? else {
            log::debug!("no hardware slot table in '{}', all slots free", table.name());
            return Ok(pool);
        };
        for (index, state) in decode_table(&bytes)?.into_iter().enumerate() {
            match pool.get_mut(index) {
                Some(entry) => *entry = state,
                None if state != SlotState::Free => {
                    log::warn!("ignoring slot table entry {index} beyond pool size {capacity}");
                }
                None => {}
            }
        }
        log::debug!(
            "loaded hardware slot table from '{}', {} of {capacity} slots in use",
            table.name(),
            pool.iter().filter(|state| **state != SlotState::Free).count()
        );
        Ok(pool)
    }

    /// Sets one entry and writes the table. The entry is left unchanged if
    /// the write fails.
    fn commit(&self, pool: &mut [SlotState], index: usize, state: SlotState) -> MetadataResult<()> {
        let previous = std::mem::replace(&mut pool[index], state);
        if let Some(table) = &self.table {
            let written = encode_table(pool)
                .and_then(|bytes| table.write_atomic(Self::TABLE_KEY, &bytes));
            if let Err(err) = written {
                log::warn!("failed to write hardware slot table: {err}");
                pool[index] = previous;
                return Err(err);
            }
        }
        Ok(())
    }

    fn first_free(&self, pool: &[SlotState]) -> MetadataResult<usize> {
        pool.iter()
            .position(|state| *state == SlotState::Free)
            .ok_or_else(|| MetadataError::SlotsExhausted {
                capacity: self.capacity(),
            })
    }

    fn index_of(&self, slot: SlotId) -> MetadataResult<usize> {
        if slot.index() < self.capacity() {
            Ok(slot.index() as usize)
        } else {
            Err(MetadataError::InvalidSlot {
                slot,
                capacity: self.capacity(),
            })
        }
    }
}

impl fmt::Debug for SlotManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotManager")
            .field("capacity", &self.capacity())
            .field("table", &self.table.as_ref().map(|table| table.name().to_string()))
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn slot_at(index: usize) -> SlotId {
    // The pool is sized from a u32 capacity.
    SlotId(index as u32)
}

fn encode_table(pool: &[SlotState]) -> MetadataResult<Vec<u8>> {
    let entries = pool
        .iter()
        .map(|state| match state {
            SlotState::Free => Value::Null,
            SlotState::Assigned { owner: None } => Value::Bool(true),
            SlotState::Assigned { owner: Some(owner) } => Value::Text(owner.clone()),
        })
        .collect();
    encode_value(&Value::Array(entries))
}

fn decode_table(bytes: &[u8]) -> MetadataResult<Vec<SlotState>> {
    let Value::Array(entries) = decode_value(bytes)? else {
        return Err(MetadataError::malformed("slot table is not an array"));
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::Null => Ok(SlotState::Free),
            Value::Bool(true) => Ok(SlotState::Assigned { owner: None }),
            Value::Text(owner) => Ok(SlotState::Assigned { owner: Some(owner) }),
            _ => Err(MetadataError::malformed(format!(
                "slot table entry {index} has an unexpected type"
            ))),
        })
        .collect()
}
