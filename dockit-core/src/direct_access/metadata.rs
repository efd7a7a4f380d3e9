//! Metadata for documents that can hold a hardware slot.

use std::sync::Arc;

use async_trait::async_trait;
use ciborium::value::Value;

use super::slots::{SlotId, SlotManager};
use crate::error::{MetadataError, MetadataResult};
use crate::metadata::{
    cbor_get, decode_map, encode_map, wrong_type, DocumentMetadata, MetadataController,
    MetadataFactory, MetadataRecord, MetadataSink, Origin, Snapshot,
};
use crate::platform::Platform;

const KEY_SLOT: &str = "directAccessSlot";

/// Snapshot extended with the hardware slot owned by the document.
///
/// Encoded as the snapshot's map plus a `directAccessSlot` entry, omitted
/// when no slot is owned, so base readers can still decode it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectAccessRecord {
    /// User-facing metadata.
    pub snapshot: Snapshot,
    /// Hardware slot owned by the document.
    pub slot: Option<SlotId>,
}

impl MetadataRecord for DirectAccessRecord {
    fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn with_snapshot(&self, snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            slot: self.slot,
        }
    }

    fn encode(&self) -> MetadataResult<Vec<u8>> {
        let mut entries = self.snapshot.to_cbor_entries();
        if let Some(slot) = self.slot {
            entries.push((
                Value::Text(KEY_SLOT.to_string()),
                Value::Integer(slot.index().into()),
            ));
        }
        encode_map(entries)
    }

    fn decode(bytes: &[u8]) -> MetadataResult<Self> {
        let map = decode_map(bytes)?;
        let slot = match cbor_get(&map, KEY_SLOT)? {
            None => None,
            Some(Value::Integer(index)) => {
                let index = u32::try_from(*index).map_err(|_| {
                    MetadataError::malformed(format!("field '{KEY_SLOT}' out of range"))
                })?;
                Some(SlotId::new(index))
            }
            Some(_) => return Err(wrong_type(KEY_SLOT, "unsigned int")),
        };
        Ok(Self {
            snapshot: Snapshot::from_cbor_entries(&map)?,
            slot,
        })
    }
}

/// Metadata of a document that may own one hardware slot.
///
/// The slot is released through [`SlotManager::clear`] when the store reports
/// the document deleted.
#[derive(Debug)]
pub struct DirectAccessMetadata {
    controller: MetadataController<DirectAccessRecord>,
    slots: Arc<SlotManager>,
}

impl DirectAccessMetadata {
    /// Creates the metadata for `document_id`.
    ///
    /// If the persisted record names a slot, ownership is restored in
    /// `slots` so it is not handed to another document.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is malformed or the recorded slot cannot be
    /// restored.
    pub async fn create(
        document_id: &str,
        data: Option<Vec<u8>>,
        sink: Arc<dyn MetadataSink>,
        slots: Arc<SlotManager>,
    ) -> MetadataResult<Self> {
        let controller = MetadataController::<DirectAccessRecord>::create(document_id, data, sink)?;
        if let Some(slot) = controller.record().slot {
            slots.restore(document_id, slot).await?;
        }
        Ok(Self { controller, slots })
    }

    /// Identifier of the document.
    #[must_use]
    pub fn document_id(&self) -> &str {
        self.controller.document_id()
    }

    /// How the initial record was obtained.
    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.controller.origin()
    }

    /// Slot owned by the document, if any.
    #[must_use]
    pub fn slot(&self) -> Option<SlotId> {
        self.controller.record().slot
    }

    /// The currently visible record.
    #[must_use]
    pub fn record(&self) -> Arc<DirectAccessRecord> {
        self.controller.record()
    }

    /// Allocates a slot for the document, records it and persists the record.
    ///
    /// The pool records the document as owner in the same step as the
    /// allocation. A slot the pool already attributes to this document, for
    /// example after an earlier save failed, is reused.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::SlotAlreadyAssigned`] if the document owns a slot.
    /// - [`MetadataError::SlotsExhausted`] if the pool is full.
    /// - [`MetadataError::PersistenceFailure`] if the record cannot be saved;
    ///   the slot stays assigned to the document.
    pub async fn allocate_slot(&self) -> MetadataResult<SlotId> {
        if let Some(slot) = self.slot() {
            return Err(MetadataError::SlotAlreadyAssigned {
                document_id: self.document_id().to_string(),
                slot,
            });
        }
        let slot = self.slots.allocate_for(self.document_id()).await?;
        self.controller
            .update(|record| DirectAccessRecord {
                snapshot: record.snapshot.clone(),
                slot: Some(slot),
            })
            .await?;
        Ok(slot)
    }
}

#[async_trait]
impl DocumentMetadata for DirectAccessMetadata {
    fn provisioned(&self) -> bool {
        self.controller.provisioned()
    }

    fn display_name(&self) -> Option<String> {
        self.controller.display_name()
    }

    fn type_display_name(&self) -> Option<String> {
        self.controller.type_display_name()
    }

    fn card_art(&self) -> Option<Vec<u8>> {
        self.controller.card_art()
    }

    fn issuer_logo(&self) -> Option<Vec<u8>> {
        self.controller.issuer_logo()
    }

    fn other(&self) -> Option<Vec<u8>> {
        self.controller.other()
    }

    async fn mark_as_provisioned(&self) -> MetadataResult<()> {
        self.controller.mark_as_provisioned().await
    }

    async fn set_metadata(
        &self,
        display_name: Option<String>,
        type_display_name: Option<String>,
        card_art: Option<Vec<u8>>,
        issuer_logo: Option<Vec<u8>>,
        other: Option<Vec<u8>>,
    ) -> MetadataResult<()> {
        self.controller
            .set_metadata(display_name, type_display_name, card_art, issuer_logo, other)
            .await
    }

    async fn document_deleted(&self) -> MetadataResult<()> {
        match self.slot() {
            Some(slot) => {
                log::debug!(
                    "document {} deleted, releasing hardware slot {slot}",
                    self.document_id()
                );
                self.slots.clear(slot).await
            }
            None => Ok(()),
        }
    }
}

/// Factory producing [`DirectAccessMetadata`] bound to one slot pool.
#[derive(Debug, Clone)]
pub struct DirectAccessMetadataFactory {
    slots: Arc<SlotManager>,
}

impl DirectAccessMetadataFactory {
    /// Creates a factory over an explicit slot pool.
    #[must_use]
    pub const fn new(slots: Arc<SlotManager>) -> Self {
        Self { slots }
    }

    /// Creates a factory over the platform's hardware slots.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::CapabilityUnavailable`] if the platform has no
    /// hardware slots.
    pub fn for_platform(platform: &dyn Platform) -> MetadataResult<Self> {
        platform.hardware_slots().map(Self::new).ok_or_else(|| {
            MetadataError::unavailable(format!(
                "hardware slots are not supported on platform '{}'",
                platform.name()
            ))
        })
    }

    /// The slot pool documents are allocated from.
    #[must_use]
    pub const fn slots(&self) -> &Arc<SlotManager> {
        &self.slots
    }
}

#[async_trait]
impl MetadataFactory for DirectAccessMetadataFactory {
    async fn create(
        &self,
        document_id: &str,
        data: Option<Vec<u8>>,
        sink: Arc<dyn MetadataSink>,
    ) -> MetadataResult<Arc<dyn DocumentMetadata>> {
        let metadata =
            DirectAccessMetadata::create(document_id, data, sink, Arc::clone(&self.slots)).await?;
        Ok(Arc::new(metadata))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::direct_access::SlotState;
    use crate::error::BoxError;
    use crate::metadata::sink_fn;
    use crate::platform::memory::{MemoryPlatform, MemorySlotDevice};

    fn recording_sink() -> (Arc<dyn MetadataSink>, Arc<Mutex<Vec<Vec<u8>>>>) {
        let saves = Arc::new(Mutex::new(Vec::new()));
        let saves_in_sink = Arc::clone(&saves);
        let sink = sink_fn(move |data| {
            let saves = Arc::clone(&saves_in_sink);
            async move {
                saves.lock().expect("lock").push(data);
                Ok::<(), BoxError>(())
            }
        });
        (sink, saves)
    }

    fn slot_manager(capacity: u32) -> Arc<SlotManager> {
        Arc::new(SlotManager::new(Arc::new(MemorySlotDevice::new(capacity))))
    }

    #[test]
    fn test_record_round_trip() {
        let record = DirectAccessRecord {
            snapshot: Snapshot {
                display_name: Some("Jane's mDL".to_string()),
                ..Snapshot::default()
            },
            slot: Some(SlotId::new(3)),
        };
        let bytes = record.encode().expect("encode");
        let decoded = DirectAccessRecord::decode(&bytes).expect("decode");
        assert_eq!(decoded, record);

        // Base readers ignore the slot entry.
        let base = Snapshot::decode(Some(bytes.as_slice())).expect("decode");
        assert_eq!(base, record.snapshot);
    }

    #[test]
    fn test_record_without_slot_matches_snapshot_encoding() {
        let record = DirectAccessRecord::default();
        assert_eq!(
            record.encode().expect("encode"),
            Snapshot::default().encode().expect("encode")
        );
    }

    #[test]
    fn test_record_rejects_negative_slot() {
        let mut entries = Snapshot::default().to_cbor_entries();
        entries.push((Value::Text(KEY_SLOT.to_string()), Value::Integer((-1_i64).into())));
        assert!(matches!(
            DirectAccessRecord::decode(&encode_map(entries).expect("encode")),
            Err(MetadataError::MalformedData(_))
        ));
    }

    #[tokio::test]
    async fn test_allocate_slot_persists_assignment() {
        let (sink, saves) = recording_sink();
        let slots = slot_manager(2);
        let metadata = DirectAccessMetadata::create("doc-1", None, sink, Arc::clone(&slots))
            .await
            .expect("create");

        let slot = metadata.allocate_slot().await.expect("allocate");
        assert_eq!(metadata.slot(), Some(slot));
        assert_eq!(
            slots.state(slot).await.expect("state"),
            SlotState::Assigned {
                owner: Some("doc-1".to_string())
            }
        );

        let saves = saves.lock().expect("lock").clone();
        assert_eq!(saves.len(), 1);
        let persisted = DirectAccessRecord::decode(&saves[0]).expect("decode");
        assert_eq!(persisted.slot, Some(slot));

        assert!(matches!(
            metadata.allocate_slot().await,
            Err(MetadataError::SlotAlreadyAssigned { .. })
        ));
    }

    #[tokio::test]
    async fn test_mutations_keep_slot() {
        let (sink, _) = recording_sink();
        let metadata = DirectAccessMetadata::create("doc-1", None, sink, slot_manager(1))
            .await
            .expect("create");
        let slot = metadata.allocate_slot().await.expect("allocate");

        metadata
            .set_metadata(Some("Jane's mDL".to_string()), None, None, None, None)
            .await
            .expect("set");
        metadata.mark_as_provisioned().await.expect("provision");

        assert_eq!(metadata.slot(), Some(slot));
        assert!(metadata.provisioned());
        assert_eq!(metadata.display_name().as_deref(), Some("Jane's mDL"));
    }

    #[tokio::test]
    async fn test_document_deleted_clears_owned_slot() {
        let (sink, _) = recording_sink();
        let device = Arc::new(MemorySlotDevice::new(1));
        let slots = Arc::new(SlotManager::new(Arc::clone(&device) as _));
        let metadata = DirectAccessMetadata::create("doc-1", None, sink, Arc::clone(&slots))
            .await
            .expect("create");
        let slot = metadata.allocate_slot().await.expect("allocate");

        metadata.document_deleted().await.expect("deleted");
        assert_eq!(slots.state(slot).await.expect("state"), SlotState::Free);

        // A redelivered deletion event is harmless.
        metadata.document_deleted().await.expect("deleted again");
        assert_eq!(device.wipes(), vec![slot]);
    }

    #[tokio::test]
    async fn test_document_deleted_without_slot_is_noop() {
        let (sink, _) = recording_sink();
        let device = Arc::new(MemorySlotDevice::new(1));
        let slots = Arc::new(SlotManager::new(Arc::clone(&device) as _));
        let metadata = DirectAccessMetadata::create("doc-1", None, sink, slots)
            .await
            .expect("create");

        metadata.document_deleted().await.expect("deleted");
        assert!(device.wipes().is_empty());
    }

    #[tokio::test]
    async fn test_loading_restores_slot_ownership() {
        let (sink, _) = recording_sink();
        let slots = slot_manager(2);
        let stored = DirectAccessRecord {
            snapshot: Snapshot::default().provisioned(),
            slot: Some(SlotId::new(0)),
        };

        let metadata = DirectAccessMetadata::create(
            "doc-1",
            Some(stored.encode().expect("encode")),
            sink,
            Arc::clone(&slots),
        )
        .await
        .expect("load");
        assert_eq!(metadata.origin(), Origin::Persisted);
        assert_eq!(metadata.slot(), Some(SlotId::new(0)));
        assert!(metadata.provisioned());

        // Slot 0 is taken, the next document gets slot 1.
        assert_eq!(slots.allocate().await.expect("allocate"), SlotId::new(1));
    }

    #[tokio::test]
    async fn test_loading_onto_pending_slot_leaves_it_alone() {
        let device = Arc::new(MemorySlotDevice::new(1));
        let slots = Arc::new(SlotManager::new(Arc::clone(&device) as _));
        let pending = slots.allocate().await.expect("allocate");

        let stored = DirectAccessRecord {
            snapshot: Snapshot::default(),
            slot: Some(pending),
        };
        let (sink, _) = recording_sink();
        let result = DirectAccessMetadata::create(
            "doc-2",
            Some(stored.encode().expect("encode")),
            sink,
            Arc::clone(&slots),
        )
        .await;
        assert!(matches!(result, Err(MetadataError::SlotPending(_))));

        // The slot is neither freed nor wiped.
        assert_eq!(
            slots.state(pending).await.expect("state"),
            SlotState::Assigned { owner: None }
        );
        assert!(device.wipes().is_empty());
    }

    #[tokio::test]
    async fn test_restored_owner_keeps_slot_when_another_document_allocates() {
        let device = Arc::new(MemorySlotDevice::new(1));
        let slots = Arc::new(SlotManager::new(Arc::clone(&device) as _));

        let stored = DirectAccessRecord {
            snapshot: Snapshot::default(),
            slot: Some(SlotId::new(0)),
        };
        let (sink, _) = recording_sink();
        let owner = DirectAccessMetadata::create(
            "doc-1",
            Some(stored.encode().expect("encode")),
            sink,
            Arc::clone(&slots),
        )
        .await
        .expect("load");

        let (sink, saves) = recording_sink();
        let other = DirectAccessMetadata::create("doc-2", None, sink, Arc::clone(&slots))
            .await
            .expect("create");
        assert!(matches!(
            other.allocate_slot().await,
            Err(MetadataError::SlotsExhausted { capacity: 1 })
        ));

        assert_eq!(owner.slot(), Some(SlotId::new(0)));
        assert_eq!(
            slots.state(SlotId::new(0)).await.expect("state"),
            SlotState::Assigned {
                owner: Some("doc-1".to_string())
            }
        );
        assert!(device.wipes().is_empty());
        assert!(saves.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_allocate_slot_reuses_slot_left_by_failed_save() {
        let slots = slot_manager(2);
        let failing = sink_fn(|_| async { Err::<(), BoxError>("storage offline".into()) });
        let metadata = DirectAccessMetadata::create("doc-1", None, failing, Arc::clone(&slots))
            .await
            .expect("create");
        assert!(matches!(
            metadata.allocate_slot().await,
            Err(MetadataError::PersistenceFailure { .. })
        ));
        let slot = metadata.slot().expect("slot published");

        // Reloading from storage that never got the slot reclaims the same one.
        let (sink, saves) = recording_sink();
        let reloaded = DirectAccessMetadata::create("doc-1", None, sink, Arc::clone(&slots))
            .await
            .expect("reload");
        assert_eq!(reloaded.allocate_slot().await.expect("allocate"), slot);
        assert_eq!(slots.free_slots().await.expect("free"), 1);
        assert_eq!(saves.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn test_factory_requires_hardware_slots() {
        let without = MemoryPlatform::new();
        assert!(matches!(
            DirectAccessMetadataFactory::for_platform(&without),
            Err(MetadataError::CapabilityUnavailable(_))
        ));

        let with = MemoryPlatform::with_hardware_slots(2);
        let factory = DirectAccessMetadataFactory::for_platform(&with).expect("factory");
        assert_eq!(factory.slots().capacity(), 2);

        let (sink, _) = recording_sink();
        let metadata = factory.create("doc-1", None, sink).await.expect("create");
        assert!(!metadata.provisioned());
    }
}
