//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dockit_core::metadata::{sink_fn, DocumentMetadata, MetadataFactory};
use dockit_core::platform::{Platform, Storage};
use dockit_core::{BoxError, MetadataError, MetadataResult};
use uuid::Uuid;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    Added(String),
    Updated(String),
    Deleted(String),
}

/// Minimal document store: one blob per document in the platform's local
/// storage, metadata created through the injected factory.
pub struct DocumentStore {
    storage: Arc<dyn Storage>,
    factory: Arc<dyn MetadataFactory>,
    events: Arc<Mutex<Vec<DocumentEvent>>>,
    documents: Mutex<HashMap<String, Arc<dyn DocumentMetadata>>>,
}

impl DocumentStore {
    pub async fn open(platform: &dyn Platform, factory: Arc<dyn MetadataFactory>) -> Self {
        let storage = platform
            .non_backed_up_storage()
            .await
            .expect("local storage");
        Self {
            storage,
            factory,
            events: Arc::new(Mutex::new(Vec::new())),
            documents: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    pub fn events(&self) -> Vec<DocumentEvent> {
        self.events.lock().unwrap().clone()
    }

    fn sink(&self, document_id: &str) -> Arc<dyn dockit_core::metadata::MetadataSink> {
        let storage = Arc::clone(&self.storage);
        let events = Arc::clone(&self.events);
        let document_id = document_id.to_string();
        sink_fn(move |bytes| {
            let storage = Arc::clone(&storage);
            let events = Arc::clone(&events);
            let document_id = document_id.clone();
            async move {
                storage.write_atomic(&document_id, &bytes)?;
                events
                    .lock()
                    .unwrap()
                    .push(DocumentEvent::Updated(document_id));
                Ok::<(), BoxError>(())
            }
        })
    }

    /// Creates a document with no metadata written yet.
    pub async fn create_document(&self) -> MetadataResult<(String, Arc<dyn DocumentMetadata>)> {
        let document_id = format!("doc-{}", Uuid::new_v4());
        self.storage.write_atomic(&document_id, &[])?;
        let metadata = self
            .factory
            .create(&document_id, None, self.sink(&document_id))
            .await?;
        self.documents
            .lock()
            .unwrap()
            .insert(document_id.clone(), Arc::clone(&metadata));
        self.events
            .lock()
            .unwrap()
            .push(DocumentEvent::Added(document_id.clone()));
        Ok((document_id, metadata))
    }

    /// Loads a document from storage, bypassing the in-memory cache.
    pub async fn load_document(&self, document_id: &str) -> MetadataResult<Arc<dyn DocumentMetadata>> {
        let data = self
            .storage
            .read(document_id)?
            .ok_or_else(|| MetadataError::storage(format!("no document {document_id}")))?;
        let metadata = self
            .factory
            .create(document_id, Some(data), self.sink(document_id))
            .await?;
        self.documents
            .lock()
            .unwrap()
            .insert(document_id.to_string(), Arc::clone(&metadata));
        Ok(metadata)
    }

    pub async fn delete_document(&self, document_id: &str) -> MetadataResult<()> {
        let metadata = self.documents.lock().unwrap().remove(document_id);
        if let Some(metadata) = metadata {
            metadata.document_deleted().await?;
        }
        self.storage.delete(document_id)?;
        self.events
            .lock()
            .unwrap()
            .push(DocumentEvent::Deleted(document_id.to_string()));
        Ok(())
    }
}
