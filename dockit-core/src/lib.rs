#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
//! Document metadata core for a credential wallet.
//!
//! - [`metadata`]: the per-document metadata record, its controller and the
//!   persistence sink the document store provides.
//! - [`platform`]: the host abstraction supplying storages and secure areas,
//!   and the process-wide provider.
//! - [`direct_access`]: metadata for documents that hold a hardware slot.
//! - [`config`]: building a reference platform from configuration.
//! - [`logger`]: forwarding crate logs to a host logger.
//!
//! # Example
//!
//! ```rust
//! use dockit_core::metadata::{sink_fn, DefaultMetadataFactory, DocumentMetadata, MetadataFactory};
//! use dockit_core::BoxError;
//!
//! # tokio_test_block(async {
//! let sink = sink_fn(|bytes| async move {
//!     // Persist `bytes` and notify observers.
//!     let _ = bytes;
//!     Ok::<(), BoxError>(())
//! });
//! let metadata = DefaultMetadataFactory.create("doc-1", None, sink).await?;
//! metadata
//!     .set_metadata(Some("Jane's ID".into()), Some("Utopia ID".into()), None, None, None)
//!     .await?;
//! metadata.mark_as_provisioned().await?;
//! assert!(metadata.provisioned());
//! # Ok::<(), dockit_core::MetadataError>(())
//! # }).unwrap();
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod config;
pub mod direct_access;
/// Bridge from the `log` facade to a host-provided logger.
pub mod logger;
pub mod metadata;
pub mod platform;

mod error;
pub use error::{BoxError, MetadataError, MetadataResult};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("dockit_core");
