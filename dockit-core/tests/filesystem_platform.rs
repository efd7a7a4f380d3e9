//! Documents and hardware slot ownership persisted by the filesystem
//! platform across restarts.

mod common;

use std::sync::Arc;

use common::DocumentStore;
use dockit_core::config::PlatformConfig;
use dockit_core::direct_access::{
    DirectAccessMetadata, DirectAccessMetadataFactory, SlotDevice, SlotId, SlotManager, SlotState,
};
use dockit_core::metadata::{sink_fn, DefaultMetadataFactory, MetadataSink};
use dockit_core::platform::memory::MemorySlotDevice;
use dockit_core::platform::{FsPlatform, FsStorage, Platform, Storage};
use dockit_core::BoxError;

#[tokio::test]
async fn test_metadata_survives_platform_restart() {
    common::init_logging();
    let root = tempfile::tempdir().expect("tempdir");
    let config = PlatformConfig::filesystem(root.path());

    let document_id = {
        let platform = config.build().expect("platform");
        let store = DocumentStore::open(platform.as_ref(), Arc::new(DefaultMetadataFactory)).await;
        let (document_id, metadata) = store.create_document().await.expect("create");
        metadata
            .set_metadata(
                Some("Jane's ID".to_string()),
                Some("Utopia ID".to_string()),
                None,
                Some(vec![1, 2, 3]),
                Some(b"app state".to_vec()),
            )
            .await
            .expect("set metadata");
        metadata.mark_as_provisioned().await.expect("provision");
        document_id
    };

    assert!(root.path().join("local").join(&document_id).is_file());

    let platform = config.build().expect("platform");
    let store = DocumentStore::open(platform.as_ref(), Arc::new(DefaultMetadataFactory)).await;
    let metadata = store.load_document(&document_id).await.expect("load");
    assert!(metadata.provisioned());
    assert_eq!(metadata.display_name().as_deref(), Some("Jane's ID"));
    assert_eq!(metadata.type_display_name().as_deref(), Some("Utopia ID"));
    assert_eq!(metadata.card_art(), None);
    assert_eq!(metadata.issuer_logo(), Some(vec![1, 2, 3]));
    assert_eq!(metadata.other(), Some(b"app state".to_vec()));

    store.delete_document(&document_id).await.expect("delete");
    assert!(!root.path().join("local").join(&document_id).exists());
}

/// Filesystem platform whose slot table lives next to the documents.
fn platform_with_slots(root: &std::path::Path, device: &Arc<MemorySlotDevice>) -> FsPlatform {
    let table = FsStorage::open("local", root.join("local")).expect("slot table storage");
    let slots = SlotManager::persistent(
        Arc::clone(device) as Arc<dyn SlotDevice>,
        Arc::new(table) as Arc<dyn Storage>,
    );
    FsPlatform::new(root).slot_manager(Arc::new(slots))
}

fn storage_sink(storage: &Arc<dyn Storage>, document_id: &str) -> Arc<dyn MetadataSink> {
    let storage = Arc::clone(storage);
    let document_id = document_id.to_string();
    sink_fn(move |bytes| {
        let storage = Arc::clone(&storage);
        let document_id = document_id.clone();
        async move {
            storage.write_atomic(&document_id, &bytes)?;
            Ok::<(), BoxError>(())
        }
    })
}

/// Opens a document as direct-access metadata and gives it a slot.
async fn allocate_for(platform: &FsPlatform, document_id: &str) -> SlotId {
    let local = platform.non_backed_up_storage().await.expect("local");
    let metadata = DirectAccessMetadata::create(
        document_id,
        local.read(document_id).expect("read"),
        storage_sink(&local, document_id),
        platform.hardware_slots().expect("slots"),
    )
    .await
    .expect("direct access metadata");
    metadata.allocate_slot().await.expect("allocate")
}

#[tokio::test]
async fn test_slot_ownership_survives_restart() {
    common::init_logging();
    let root = tempfile::tempdir().expect("tempdir");
    // The secure hardware outlives the process.
    let device = Arc::new(MemorySlotDevice::new(2));

    let first = {
        let platform = platform_with_slots(root.path(), &device);
        let factory = DirectAccessMetadataFactory::for_platform(&platform).expect("factory");
        let store = DocumentStore::open(&platform, Arc::new(factory)).await;
        let (document_id, _) = store.create_document().await.expect("create");
        assert_eq!(allocate_for(&platform, &document_id).await, SlotId::new(0));
        document_id
    };

    let platform = platform_with_slots(root.path(), &device);
    let slots = platform.hardware_slots().expect("slots");
    let factory = DirectAccessMetadataFactory::for_platform(&platform).expect("factory");
    let store = DocumentStore::open(&platform, Arc::new(factory)).await;

    // A new document allocates before the first one is loaded again.
    let (second, _) = store.create_document().await.expect("create");
    assert_eq!(allocate_for(&platform, &second).await, SlotId::new(1));

    store.load_document(&first).await.expect("reload first");
    assert_eq!(
        slots.state(SlotId::new(0)).await.expect("state"),
        SlotState::Assigned {
            owner: Some(first.clone())
        }
    );

    store.delete_document(&first).await.expect("delete");
    assert_eq!(device.wipes(), vec![SlotId::new(0)]);
    assert_eq!(slots.free_slots().await.expect("free"), 1);
}
