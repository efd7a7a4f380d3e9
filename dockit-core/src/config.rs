//! Platform selection from configuration.
//!
//! ```json
//! { "kind": "memory", "hardware_slots": 4 }
//! { "kind": "filesystem", "root": "/data/dockit" }
//! ```
//!
//! `hardware_slots` builds a simulated in-memory slot device and is only
//! accepted for the memory platform. Hosts with real secure hardware attach
//! their own [`SlotManager`] through [`FsPlatform::slot_manager`].

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::direct_access::SlotManager;
use crate::error::{MetadataError, MetadataResult};
use crate::platform::memory::MemorySlotDevice;
use crate::platform::{FsPlatform, MemoryPlatform, Platform};

/// Reference platform to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PlatformKind {
    /// [`MemoryPlatform`].
    Memory,
    /// [`FsPlatform`].
    Filesystem,
}

impl Serialize for PlatformKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PlatformKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kind = String::deserialize(deserializer)?;
        Self::from_str(&kind.to_lowercase())
            .map_err(|_| serde::de::Error::custom(format!("unknown platform kind '{kind}'")))
    }
}

/// Platform configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConfig {
    /// Which platform to build.
    pub kind: PlatformKind,
    /// Platform name; defaults to the kind's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Root directory, required for [`PlatformKind::Filesystem`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Size of the simulated hardware slot pool, memory platform only. No
    /// slots when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_slots: Option<u32>,
}

impl PlatformConfig {
    /// Configuration for an in-memory platform without hardware slots.
    #[must_use]
    pub const fn memory() -> Self {
        Self {
            kind: PlatformKind::Memory,
            name: None,
            root: None,
            hardware_slots: None,
        }
    }

    /// Configuration for a filesystem platform rooted at `root`.
    #[must_use]
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            kind: PlatformKind::Filesystem,
            root: Some(root.into()),
            ..Self::memory()
        }
    }

    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Config`] if the JSON is invalid.
    pub fn from_json(json: &str) -> MetadataResult<Self> {
        serde_json::from_str(json).map_err(|e| MetadataError::config(e.to_string()))
    }

    /// Builds the configured platform.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Config`] for a filesystem platform without a
    /// root or with simulated hardware slots, a memory platform with a root,
    /// or an empty slot pool.
    pub fn build(&self) -> MetadataResult<Arc<dyn Platform>> {
        let slots = match self.hardware_slots {
            Some(0) => return Err(MetadataError::config("hardware_slots must be at least 1")),
            Some(capacity) => Some(Arc::new(SlotManager::new(Arc::new(
                MemorySlotDevice::new(capacity),
            )))),
            None => None,
        };
        let name = self.name.clone().unwrap_or_else(|| self.kind.to_string());
        log::debug!("building {} platform '{name}'", self.kind);

        let platform: Arc<dyn Platform> = match (self.kind, &self.root) {
            (PlatformKind::Memory, None) => {
                let mut platform = MemoryPlatform::named(name);
                if let Some(slots) = slots {
                    platform = platform.slot_manager(slots);
                }
                Arc::new(platform)
            }
            (PlatformKind::Memory, Some(_)) => {
                return Err(MetadataError::config("memory platform takes no root"));
            }
            (PlatformKind::Filesystem, Some(_)) if slots.is_some() => {
                return Err(MetadataError::config(
                    "filesystem platform takes no simulated hardware_slots",
                ));
            }
            (PlatformKind::Filesystem, Some(root)) => Arc::new(FsPlatform::new(root).named(name)),
            (PlatformKind::Filesystem, None) => {
                return Err(MetadataError::config("filesystem platform requires a root"));
            }
        };
        Ok(platform)
    }
}
