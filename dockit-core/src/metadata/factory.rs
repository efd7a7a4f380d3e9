//! Factories the document store uses to create metadata objects.

use std::sync::Arc;

use async_trait::async_trait;

use super::{DocumentMetadata, MetadataController, MetadataSink, Snapshot};
use crate::error::MetadataResult;

/// Creates the metadata object for a document.
///
/// The document store calls this in two situations:
///
/// - a new document is created: `data` is `None`, and the store initializes
///   the returned object right away;
/// - an existing document is loaded: `data` holds the bytes last passed to
///   the sink, or an empty vector if nothing was ever saved.
///
/// Every call to the sink is followed by a "document updated" notification
/// from the store.
#[async_trait]
pub trait MetadataFactory: Send + Sync {
    /// Creates the metadata object for `document_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted bytes are malformed or a capability
    /// the metadata needs is unavailable.
    async fn create(
        &self,
        document_id: &str,
        data: Option<Vec<u8>>,
        sink: Arc<dyn MetadataSink>,
    ) -> MetadataResult<Arc<dyn DocumentMetadata>>;
}

/// Factory producing plain [`MetadataController`]s over [`Snapshot`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMetadataFactory;

#[async_trait]
impl MetadataFactory for DefaultMetadataFactory {
    async fn create(
        &self,
        document_id: &str,
        data: Option<Vec<u8>>,
        sink: Arc<dyn MetadataSink>,
    ) -> MetadataResult<Arc<dyn DocumentMetadata>> {
        let controller = MetadataController::<Snapshot>::create(document_id, data, sink)?;
        Ok(Arc::new(controller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BoxError, MetadataError};
    use crate::metadata::sink_fn;

    #[tokio::test]
    async fn test_default_factory_builds_controllers() {
        let sink = sink_fn(|_| async { Ok::<(), BoxError>(()) });
        let stored = Snapshot {
            display_name: Some("Jane's ID".to_string()),
            ..Snapshot::default()
        };

        let metadata = DefaultMetadataFactory
            .create("doc-1", Some(stored.encode().expect("encode")), Arc::clone(&sink))
            .await
            .expect("create");
        assert_eq!(metadata.display_name().as_deref(), Some("Jane's ID"));
        assert!(!metadata.provisioned());

        metadata.mark_as_provisioned().await.expect("provision");
        assert!(metadata.provisioned());

        // Plain documents own nothing that needs releasing.
        metadata.document_deleted().await.expect("deleted");
    }

    #[tokio::test]
    async fn test_default_factory_rejects_malformed_bytes() {
        let sink = sink_fn(|_| async { Ok::<(), BoxError>(()) });
        let result = DefaultMetadataFactory
            .create("doc-1", Some(vec![0x01, 0x02]), sink)
            .await;
        assert!(matches!(result, Err(MetadataError::MalformedData(_))));
    }
}
