//! Repository root lifecycle: writing and reading the root namaste file and `ocfl_layout.json`,
//! and assembling the collaborators an [`crate::repo::OcflRepository`] is built from. Grounded
//! in the teacher's `FsOcflStore::new`/`FsOcflStore::init` split and its `check_extensions`
//! advisory warning for unsupported storage-root extensions.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::cache::{InventoryCache, MemoryInventoryCache};
use crate::consts::{
    DEFAULT_CONTENT_DIR, EXTENSIONS_CONFIG_FILE, EXTENSIONS_DIR, OCFL_LAYOUT_FILE, OCFL_VERSION,
    REPO_NAMASTE_FILE, SUPPORTED_EXTENSIONS,
};
use crate::digest::DigestAlgorithm;
use crate::error::{OcflError, Result};
use crate::layout::{self, LayoutExtensionName, StorageLayout};
use crate::lock::{InMemoryLockManager, ObjectLockManager};
use crate::storage::Storage;
use crate::types::{Clock, SystemClock};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct OcflLayoutDeclaration {
    extension: String,
    description: String,
}

/// The collaborators an `OcflRepository` is assembled from: the storage backend, the layout
/// that maps object IDs to object roots, and the defaulted capability set (digest algorithm,
/// cache, lock manager, clock) a repository falls back on unless overridden.
pub struct RepositoryConfig {
    pub storage: Arc<dyn Storage>,
    pub storage_layout: Arc<dyn StorageLayout>,
    pub digest_algorithm: DigestAlgorithm,
    pub content_directory: String,
    pub cache: Arc<dyn InventoryCache>,
    pub lock_manager: Arc<dyn ObjectLockManager>,
    pub lock_timeout: Duration,
    pub verify_staging: bool,
    pub clock: Arc<dyn Clock>,
}

impl RepositoryConfig {
    /// Creates a brand-new repository root: writes `0=ocfl_1.1`, `ocfl_layout.json` declaring
    /// `storage_layout`, and the layout extension's own `config.json`. Fails with
    /// `IllegalState` if the storage root is not empty, and with `AlreadyExists` if the
    /// namaste file is somehow already present.
    pub fn init(storage: Arc<dyn Storage>, storage_layout: Arc<dyn StorageLayout>) -> Result<Self> {
        if let Ok(listing) = storage.list_directory("") {
            if !listing.is_empty() {
                return Err(OcflError::IllegalState(
                    "cannot initialize a repository into a non-empty directory".to_string(),
                ));
            }
        }

        storage.write(REPO_NAMASTE_FILE, format!("{}\n", OCFL_VERSION).as_bytes(), None)?;

        let extension_name = storage_layout.extension_name();
        let declaration = OcflLayoutDeclaration {
            extension: extension_name.to_string(),
            description: format!("See specification document {}.md", extension_name),
        };
        storage.write(
            OCFL_LAYOUT_FILE,
            &serde_json::to_vec_pretty(&declaration)?,
            None,
        )?;

        let config_path = format!("{}/{}/{}", EXTENSIONS_DIR, extension_name, EXTENSIONS_CONFIG_FILE);
        storage.write(&config_path, &storage_layout.config_bytes()?, None)?;

        Ok(Self::with_defaults(storage, storage_layout))
    }

    /// Opens an existing repository root: reads and validates the root namaste and
    /// `ocfl_layout.json`, refusing to operate against a root whose declared OCFL version or
    /// layout extension it does not recognize.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let namaste = storage.read_to_string(REPO_NAMASTE_FILE)?;
        if namaste.trim() != OCFL_VERSION {
            return Err(OcflError::CorruptObject {
                object_id: "<repository root>".to_string(),
                message: format!("unsupported OCFL version declaration: {}", namaste.trim()),
            });
        }

        let layout_bytes = storage.read(OCFL_LAYOUT_FILE)?;
        let declaration: OcflLayoutDeclaration = serde_json::from_slice(&layout_bytes)?;

        let extension_name: LayoutExtensionName =
            declaration.extension.parse().map_err(|_| OcflError::CorruptObject {
                object_id: "<repository root>".to_string(),
                message: format!("unrecognized storage layout extension {}", declaration.extension),
            })?;

        let config_path = format!(
            "{}/{}/{}",
            EXTENSIONS_DIR, declaration.extension, EXTENSIONS_CONFIG_FILE
        );
        let config_bytes = storage.read(&config_path).ok();
        let storage_layout: Arc<dyn StorageLayout> =
            Arc::from(layout::from_extension(extension_name, config_bytes.as_deref())?);

        check_extensions(storage.as_ref());

        Ok(Self::with_defaults(storage, storage_layout))
    }

    fn with_defaults(storage: Arc<dyn Storage>, storage_layout: Arc<dyn StorageLayout>) -> Self {
        Self {
            storage,
            storage_layout,
            digest_algorithm: DigestAlgorithm::Sha512,
            content_directory: DEFAULT_CONTENT_DIR.to_string(),
            cache: Arc::new(MemoryInventoryCache::new()),
            lock_manager: Arc::new(InMemoryLockManager::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            verify_staging: true,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Result<Self> {
        if !digest_algorithm.is_valid_primary() {
            return Err(OcflError::IllegalArgument(format!(
                "{} is not a valid primary digest algorithm; use sha512 or sha256",
                digest_algorithm
            )));
        }
        self.digest_algorithm = digest_algorithm;
        Ok(self)
    }

    pub fn with_content_directory(mut self, content_directory: impl Into<String>) -> Self {
        self.content_directory = content_directory.into();
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn InventoryCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_lock_manager(mut self, lock_manager: Arc<dyn ObjectLockManager>) -> Self {
        self.lock_manager = lock_manager;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_verify_staging(mut self, verify_staging: bool) -> Self {
        self.verify_staging = verify_staging;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Warns, but does not fail, when the repository root declares an extension this crate does
/// not implement -- the same advisory the teacher's `check_extensions` logs.
fn check_extensions(storage: &dyn Storage) {
    match storage.list_directory(EXTENSIONS_DIR) {
        Ok(listing) => {
            for entry in listing {
                if entry.is_directory() && !SUPPORTED_EXTENSIONS.contains(&entry.path()) {
                    warn!(
                        "Storage root extension {} is not supported at this time",
                        entry.path()
                    );
                }
            }
        }
        Err(OcflError::NotFound(_)) => {}
        Err(e) => warn!("Failed to list storage root extensions: {}", e),
    }
}
