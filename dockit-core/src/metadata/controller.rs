//! In-memory owner of one document's metadata record.
//!
//! The controller keeps the visible record behind an [`ArcSwap`]. Readers load
//! the current pointer without locking and always see a complete record.
//! Mutations read the current record, build a new one, swap it in and then
//! hand the encoded bytes to the document store's [`MetadataSink`].
//!
//! # Lost updates
//!
//! The read/build/publish sequence is not guarded. Two mutations racing on
//! the same controller both start from the record they observed and the one
//! that publishes last wins; the other's changes are dropped. Callers must
//! serialize mutations per document.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use super::sink::MetadataSink;
use super::snapshot::Snapshot;
use super::DocumentMetadata;
use crate::error::{MetadataError, MetadataResult};

/// A persisted metadata record that embeds a [`Snapshot`].
///
/// [`Snapshot`] is the base record. Extended records (for example the
/// direct-access record carrying a hardware slot) add fields of their own and
/// reuse the controller's publish and persist path.
pub trait MetadataRecord: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// The user-facing part of the record.
    fn snapshot(&self) -> &Snapshot;

    /// Returns a copy of this record with the user-facing part replaced.
    #[must_use]
    fn with_snapshot(&self, snapshot: Snapshot) -> Self;

    /// Deterministic encoding of the record.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Encoding`] if the record cannot be
    /// serialized.
    fn encode(&self) -> MetadataResult<Vec<u8>>;

    /// Decodes a non-empty persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::MalformedData`] if the bytes are not a valid
    /// record.
    fn decode(bytes: &[u8]) -> MetadataResult<Self>;
}

impl MetadataRecord for Snapshot {
    fn snapshot(&self) -> &Snapshot {
        self
    }

    fn with_snapshot(&self, snapshot: Snapshot) -> Self {
        snapshot
    }

    fn encode(&self) -> MetadataResult<Vec<u8>> {
        Self::encode(self)
    }

    fn decode(bytes: &[u8]) -> MetadataResult<Self> {
        Self::decode(Some(bytes))
    }
}

/// Where the controller's initial record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// No bytes were supplied: the document is being created.
    New,
    /// Empty bytes were supplied: the store knows the document but its
    /// metadata was never written.
    Unwritten,
    /// A persisted record was decoded.
    Persisted,
}

/// Owns the visible metadata record of one document and drives persistence.
pub struct MetadataController<R: MetadataRecord = Snapshot> {
    document_id: String,
    origin: Origin,
    current: ArcSwap<R>,
    sink: Arc<dyn MetadataSink>,
}

impl<R: MetadataRecord> MetadataController<R> {
    /// Creates a controller for `document_id`.
    ///
    /// - `data == None`: brand-new document, default record. The caller is
    ///   expected to initialize it with [`Self::set_metadata`] or
    ///   [`Self::mark_as_provisioned`].
    /// - `data == Some([])`: existing document whose metadata was never
    ///   written, default record.
    /// - otherwise the bytes are decoded and become the visible record.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::MalformedData`] if non-empty bytes cannot be
    /// decoded.
    pub fn create(
        document_id: impl Into<String>,
        data: Option<Vec<u8>>,
        sink: Arc<dyn MetadataSink>,
    ) -> MetadataResult<Self> {
        let document_id = document_id.into();
        let (origin, record) = match data.as_deref() {
            None => (Origin::New, R::default()),
            Some([]) => (Origin::Unwritten, R::default()),
            Some(bytes) => (Origin::Persisted, R::decode(bytes)?),
        };
        log::debug!("metadata for document {document_id} loaded ({origin:?})");
        Ok(Self {
            document_id,
            origin,
            current: ArcSwap::from_pointee(record),
            sink,
        })
    }

    /// Identifier of the document this controller belongs to.
    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// How the initial record was obtained.
    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.origin
    }

    /// The currently visible record.
    #[must_use]
    pub fn record(&self) -> Arc<R> {
        self.current.load_full()
    }

    /// The currently visible snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.current.load().snapshot().clone()
    }

    /// Whether the document is provisioned.
    #[must_use]
    pub fn provisioned(&self) -> bool {
        self.current.load().snapshot().provisioned
    }

    /// User-facing name of this document.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.current.load().snapshot().display_name.clone()
    }

    /// User-facing name of the document type.
    #[must_use]
    pub fn type_display_name(&self) -> Option<String> {
        self.current.load().snapshot().type_display_name.clone()
    }

    /// Card artwork.
    #[must_use]
    pub fn card_art(&self) -> Option<Vec<u8>> {
        self.current.load().snapshot().card_art.clone()
    }

    /// Issuer logo.
    #[must_use]
    pub fn issuer_logo(&self) -> Option<Vec<u8>> {
        self.current.load().snapshot().issuer_logo.clone()
    }

    /// Application data.
    #[must_use]
    pub fn other(&self) -> Option<Vec<u8>> {
        self.current.load().snapshot().other.clone()
    }

    /// Marks the document as provisioned and persists the record.
    ///
    /// Calling this on an already provisioned document republishes and
    /// re-persists the same record.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::Encoding`] if the new record cannot be encoded;
    ///   nothing is published.
    /// - [`MetadataError::PersistenceFailure`] if the sink fails. The new
    ///   record stays visible.
    pub async fn mark_as_provisioned(&self) -> MetadataResult<()> {
        self.update(|record| record.with_snapshot(record.snapshot().provisioned()))
            .await
    }

    /// Replaces all five user-facing fields and persists the record.
    ///
    /// This is a total overwrite: `None` clears a field. The provisioning
    /// state is preserved.
    ///
    /// # Errors
    ///
    /// - [`MetadataError::Encoding`] if the new record cannot be encoded;
    ///   nothing is published.
    /// - [`MetadataError::PersistenceFailure`] if the sink fails. The new
    ///   record stays visible.
    pub async fn set_metadata(
        &self,
        display_name: Option<String>,
        type_display_name: Option<String>,
        card_art: Option<Vec<u8>>,
        issuer_logo: Option<Vec<u8>>,
        other: Option<Vec<u8>>,
    ) -> MetadataResult<()> {
        self.update(move |record| {
            record.with_snapshot(record.snapshot().with_fields(
                display_name,
                type_display_name,
                card_art,
                issuer_logo,
                other,
            ))
        })
        .await
    }

    /// Builds a new record from the visible one, publishes it and persists it.
    ///
    /// The record is encoded first; if that fails nothing is published. The
    /// new record is visible to readers before the sink is awaited. If the
    /// returned future is dropped or the sink fails, the in-memory record and
    /// durable storage diverge until the next successful save or reload.
    pub(crate) async fn update<F>(&self, build: F) -> MetadataResult<()>
    where
        F: FnOnce(&R) -> R + Send,
    {
        let next = {
            let current = self.current.load();
            Arc::new(build(&**current))
        };
        let bytes = next.encode().inspect_err(|err| {
            log::error!("failed to encode metadata for document {}: {err}", self.document_id);
        })?;
        self.current.store(next);
        self.persist(bytes).await
    }

    async fn persist(&self, bytes: Vec<u8>) -> MetadataResult<()> {
        let len = bytes.len();
        match self.sink.save(bytes).await {
            Ok(()) => {
                log::debug!("persisted {len} bytes of metadata for document {}", self.document_id);
                Ok(())
            }
            Err(source) => {
                log::warn!(
                    "failed to persist metadata for document {}: {source}",
                    self.document_id
                );
                Err(MetadataError::PersistenceFailure {
                    document_id: self.document_id.clone(),
                    source,
                })
            }
        }
    }
}

impl<R: MetadataRecord> fmt::Debug for MetadataController<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataController")
            .field("document_id", &self.document_id)
            .field("origin", &self.origin)
            .field("record", &self.current.load_full())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentMetadata for MetadataController<Snapshot> {
    fn provisioned(&self) -> bool {
        Self::provisioned(self)
    }

    fn display_name(&self) -> Option<String> {
        Self::display_name(self)
    }

    fn type_display_name(&self) -> Option<String> {
        Self::type_display_name(self)
    }

    fn card_art(&self) -> Option<Vec<u8>> {
        Self::card_art(self)
    }

    fn issuer_logo(&self) -> Option<Vec<u8>> {
        Self::issuer_logo(self)
    }

    fn other(&self) -> Option<Vec<u8>> {
        Self::other(self)
    }

    async fn mark_as_provisioned(&self) -> MetadataResult<()> {
        Self::mark_as_provisioned(self).await
    }

    async fn set_metadata(
        &self,
        display_name: Option<String>,
        type_display_name: Option<String>,
        card_art: Option<Vec<u8>>,
        issuer_logo: Option<Vec<u8>>,
        other: Option<Vec<u8>>,
    ) -> MetadataResult<()> {
        Self::set_metadata(
            self,
            display_name,
            type_display_name,
            card_art,
            issuer_logo,
            other,
        )
        .await
    }
}
