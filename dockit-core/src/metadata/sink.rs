//! Persistence sink supplied by the document store.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxError;

/// Durable save for a document's encoded metadata record.
///
/// The document store supplies one sink per document when the metadata is
/// created. Every mutation calls [`MetadataSink::save`] exactly once with the
/// full encoded record, never a diff. The store is expected to:
///
/// - write the bytes to durable storage (immediately, batched or deferred, at
///   its discretion), and
/// - emit one "document updated" notification per call.
///
/// The Nth call always carries the record published by the Nth mutation.
/// Failures are handed back to the caller of the mutation and are not
/// retried.
#[async_trait]
pub trait MetadataSink: Send + Sync {
    /// Persists the encoded record.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the record could not be written.
    async fn save(&self, data: Vec<u8>) -> Result<(), BoxError>;
}

/// Adapts an async closure into a [`MetadataSink`].
pub struct FnSink<F> {
    save: F,
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> MetadataSink for FnSink<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn save(&self, data: Vec<u8>) -> Result<(), BoxError> {
        (self.save)(data).await
    }
}

/// Builds a shared sink from an async closure.
///
/// ```
/// use dockit_core::metadata::sink_fn;
/// use dockit_core::BoxError;
///
/// let sink = sink_fn(|data: Vec<u8>| async move {
///     println!("saving {} bytes", data.len());
///     Ok::<(), BoxError>(())
/// });
/// # drop(sink);
/// ```
pub fn sink_fn<F, Fut>(save: F) -> Arc<dyn MetadataSink>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(FnSink { save })
}
