//! Per-document metadata.
//!
//! Every document held by the document store carries a small metadata object:
//! display names, artwork, provisioning state and opaque application data.
//! The store never interprets it. It creates the object through a
//! [`MetadataFactory`], hands it a [`MetadataSink`] to persist into, and calls
//! [`DocumentMetadata::document_deleted`] when the document goes away.
//!
//! # Lifecycle
//!
//! ```text
//! store.create_document()  ──► factory.create(id, None,        sink)
//! store.load_document()    ──► factory.create(id, Some(bytes), sink)
//! metadata.set_metadata()  ──► sink.save(bytes) ──► store persists + notifies
//! store.delete_document()  ──► metadata.document_deleted()
//! ```

mod controller;
mod factory;
mod sink;
mod snapshot;

use async_trait::async_trait;

pub use controller::{MetadataController, MetadataRecord, Origin};
pub use factory::{DefaultMetadataFactory, MetadataFactory};
pub use sink::{sink_fn, FnSink, MetadataSink};
pub use snapshot::Snapshot;

pub(crate) use snapshot::{cbor_get, decode_map, decode_value, encode_map, encode_value, wrong_type};

use crate::error::MetadataResult;

/// Interface implemented by every per-document metadata object.
///
/// [`MetadataController`] is the standard implementation. Applications that
/// need extra per-document state implement this trait themselves, as
/// [`DirectAccessMetadata`](crate::direct_access::DirectAccessMetadata) does
/// for documents holding a hardware slot.
#[async_trait]
pub trait DocumentMetadata: Send + Sync {
    /// Whether the issuer has completed provisioning of the document.
    fn provisioned(&self) -> bool;

    /// User-facing name of this document, e.g. "John's Passport".
    fn display_name(&self) -> Option<String>;

    /// User-facing name of the document type, e.g. "Utopia Passport".
    fn type_display_name(&self) -> Option<String>;

    /// Card artwork (PNG, aspect ratio 1.586).
    fn card_art(&self) -> Option<Vec<u8>>;

    /// Issuer logo (PNG, preferably square).
    fn issuer_logo(&self) -> Option<Vec<u8>>;

    /// Opaque application data.
    fn other(&self) -> Option<Vec<u8>>;

    /// Marks the document as provisioned.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated record cannot be persisted.
    async fn mark_as_provisioned(&self) -> MetadataResult<()>;

    /// Replaces the user-facing metadata. `None` clears a field.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated record cannot be persisted.
    async fn set_metadata(
        &self,
        display_name: Option<String>,
        type_display_name: Option<String>,
        card_art: Option<Vec<u8>>,
        issuer_logo: Option<Vec<u8>>,
        other: Option<Vec<u8>>,
    ) -> MetadataResult<()>;

    /// Called by the document store when the document is deleted, before the
    /// deletion is considered complete. May be delivered more than once.
    ///
    /// # Errors
    ///
    /// Returns an error if resources owned by the document cannot be released.
    async fn document_deleted(&self) -> MetadataResult<()> {
        Ok(())
    }
}
