//! Process-wide, lazily initialized platform.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::Platform;
use crate::error::{MetadataError, MetadataResult};

/// Builds the platform on first use.
#[async_trait]
pub trait PlatformInitializer: Send + Sync {
    /// Creates the platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform cannot be set up. The provider caches
    /// the failure.
    async fn initialize(&self) -> MetadataResult<Arc<dyn Platform>>;
}

struct FnInitializer<F>(F);

#[async_trait]
impl<F, Fut> PlatformInitializer for FnInitializer<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MetadataResult<Arc<dyn Platform>>> + Send + 'static,
{
    async fn initialize(&self) -> MetadataResult<Arc<dyn Platform>> {
        (self.0)().await
    }
}

/// Wraps an async closure as a [`PlatformInitializer`].
pub fn init_fn<F, Fut>(init: F) -> Box<dyn PlatformInitializer>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MetadataResult<Arc<dyn Platform>>> + Send + 'static,
{
    Box::new(FnInitializer(init))
}

/// Runs an injected initializer once and hands out the resulting platform.
///
/// Concurrent first callers wait for the same initialization. If it fails,
/// every later call reports [`MetadataError::PlatformInit`] carrying that
/// failure's message; the initializer is never run again.
pub struct PlatformProvider {
    initializer: Box<dyn PlatformInitializer>,
    platform: OnceCell<Result<Arc<dyn Platform>, String>>,
}

impl PlatformProvider {
    /// Creates a provider. The initializer runs on the first [`get`](Self::get).
    #[must_use]
    pub fn new(initializer: Box<dyn PlatformInitializer>) -> Self {
        Self {
            initializer,
            platform: OnceCell::new(),
        }
    }

    /// Returns the platform, initializing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::PlatformInit`] if initialization failed, now
    /// or on an earlier call.
    pub async fn get(&self) -> MetadataResult<Arc<dyn Platform>> {
        let result = self
            .platform
            .get_or_init(|| async {
                match self.initializer.initialize().await {
                    Ok(platform) => {
                        log::info!("platform '{}' initialized", platform.name());
                        Ok(platform)
                    }
                    Err(err) => {
                        log::error!("platform initialization failed: {err}");
                        Err(err.to_string())
                    }
                }
            })
            .await;
        result.clone().map_err(MetadataError::PlatformInit)
    }

    /// Whether initialization has already run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.platform.initialized()
    }
}

impl fmt::Debug for PlatformProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformProvider")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

static PROVIDER: OnceLock<PlatformProvider> = OnceLock::new();

/// Installs the process-wide platform initializer.
///
/// Must be called once at process start, before [`platform`].
///
/// # Errors
///
/// Returns [`MetadataError::Config`] if a platform was already installed.
pub fn install_platform(initializer: Box<dyn PlatformInitializer>) -> MetadataResult<()> {
    PROVIDER
        .set(PlatformProvider::new(initializer))
        .map_err(|_| MetadataError::config("a platform is already installed"))
}

/// Returns the process-wide platform, initializing it on first use.
///
/// # Errors
///
/// - [`MetadataError::CapabilityUnavailable`] if no platform was installed.
/// - [`MetadataError::PlatformInit`] if initialization failed.
pub async fn platform() -> MetadataResult<Arc<dyn Platform>> {
    PROVIDER
        .get()
        .ok_or_else(|| MetadataError::unavailable("no platform installed"))?
        .get()
        .await
}
