//! File system platform with atomic blob writes.
//!
//! Writes follow the write-to-temp-then-rename sequence:
//!
//! 1. Write data to a temporary file in the same directory
//! 2. `fsync` the temporary file
//! 3. Rename the temporary file over the target
//! 4. `fsync` the parent directory
//!
//! Readers therefore see either the old content or the new content, never a
//! partial write.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use super::{Platform, SecureArea, SoftwareSecureArea, Storage};
use crate::direct_access::SlotManager;
use crate::error::{MetadataError, MetadataResult};

const BACKED_UP_DIR: &str = "backed_up";
const LOCAL_DIR: &str = "local";

fn io_error(context: impl std::fmt::Display, err: &io::Error) -> MetadataError {
    MetadataError::storage(format!("{context}: {err}"))
}

/// Directory-backed [`Storage`]. Each key is one file.
#[derive(Debug, Clone)]
pub struct FsStorage {
    name: String,
    directory: PathBuf,
}

impl FsStorage {
    /// Opens the storage in `directory`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(name: impl Into<String>, directory: impl AsRef<Path>) -> MetadataResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            io_error(
                format_args!("creating storage directory '{}'", directory.display()),
                &e,
            )
        })?;
        Ok(Self {
            name: name.into(),
            directory,
        })
    }

    /// Directory holding the blobs.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn blob_path(&self, key: &str) -> MetadataResult<PathBuf> {
        // Keys become file names; nothing may escape the directory or collide
        // with temporary files.
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
            || key.contains('\0')
        {
            return Err(MetadataError::storage(format!("invalid storage key '{key}'")));
        }
        Ok(self.directory.join(key))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!(".{key}.tmp"))
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> MetadataResult<()> {
        File::open(&self.directory)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| {
                io_error(
                    format_args!("syncing directory '{}'", self.directory.display()),
                    &e,
                )
            })
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    fn sync_directory(&self) -> MetadataResult<()> {
        Ok(())
    }
}

impl Storage for FsStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, key: &str) -> MetadataResult<Option<Vec<u8>>> {
        let path = self.blob_path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(format_args!("reading '{}'", path.display()), &e)),
        }
    }

    fn write_atomic(&self, key: &str, bytes: &[u8]) -> MetadataResult<()> {
        let final_path = self.blob_path(key)?;
        let temp_path = self.temp_path(key);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| io_error(format_args!("creating '{}'", temp_path.display()), &e))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| io_error(format_args!("writing '{}'", temp_path.display()), &e))?;
        drop(file);

        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            io_error(
                format_args!(
                    "renaming '{}' to '{}'",
                    temp_path.display(),
                    final_path.display()
                ),
                &e,
            )
        })?;

        self.sync_directory()
    }

    fn delete(&self, key: &str) -> MetadataResult<()> {
        let path = self.blob_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => self.sync_directory(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(format_args!("deleting '{}'", path.display()), &e)),
        }
    }
}

/// Platform storing blobs under a root directory.
///
/// `<root>/backed_up` and `<root>/local` are created on first request.
pub struct FsPlatform {
    name: String,
    root: PathBuf,
    backed_up: OnceCell<Arc<FsStorage>>,
    local: OnceCell<Arc<FsStorage>>,
    slots: Option<Arc<SlotManager>>,
}

impl FsPlatform {
    /// Name used when none is configured.
    pub const DEFAULT_NAME: &'static str = "filesystem";

    /// Creates a platform rooted at `root`. Nothing is touched on disk yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            root: root.into(),
            backed_up: OnceCell::new(),
            local: OnceCell::new(),
            slots: None,
        }
    }

    /// Sets the platform name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attaches a hardware slot pool.
    #[must_use]
    pub fn slot_manager(mut self, slots: Arc<SlotManager>) -> Self {
        self.slots = Some(slots);
        self
    }

    /// Root directory of the platform.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn storage(
        &self,
        cell: &OnceCell<Arc<FsStorage>>,
        dir: &str,
    ) -> MetadataResult<Arc<dyn Storage>> {
        let storage = cell
            .get_or_try_init(|| async {
                log::debug!("opening {dir} storage under {}", self.root.display());
                FsStorage::open(dir, self.root.join(dir)).map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(storage) as Arc<dyn Storage>)
    }
}

impl std::fmt::Debug for FsPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsPlatform")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("hardware_slots", &self.slots.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Platform for FsPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn backed_up_storage(&self) -> MetadataResult<Arc<dyn Storage>> {
        self.storage(&self.backed_up, BACKED_UP_DIR).await
    }

    async fn non_backed_up_storage(&self) -> MetadataResult<Arc<dyn Storage>> {
        self.storage(&self.local, LOCAL_DIR).await
    }

    async fn secure_area(&self, storage: Arc<dyn Storage>) -> MetadataResult<Arc<dyn SecureArea>> {
        Ok(Arc::new(SoftwareSecureArea::new(storage)))
    }

    fn hardware_slots(&self) -> Option<Arc<SlotManager>> {
        self.slots.clone()
    }
}
