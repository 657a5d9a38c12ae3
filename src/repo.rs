//! The repository façade: composes the storage layout, staging manager, add-file processor,
//! inventory updater, version writer, and mutable-HEAD engine into the `put / update / read /
//! purge` surface callers see. Grounded in the teacher's `OcflRepo` (`ocfl/repo.rs`): the same
//! `ensure_open`/`AtomicBool`-backed `close()`, the same per-object lock acquired before any
//! mutation, and the same staging-directory-nested-under-the-repo-root convention the teacher's
//! `paths::staging_extension_path` uses for its own staging root.

use std::collections::HashMap;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::add_file::AddFileProcessor;
use crate::cache::InventoryCache;
use crate::config::RepositoryConfig;
use crate::consts::{EXTENSIONS_DIR, INVENTORY_FILE, MUTABLE_HEAD_INVENTORY_FILE, OBJECT_NAMASTE_FILE, STAGING_EXTENSION};
use crate::digest::HexDigest;
use crate::error::{not_found, OcflError, Result};
use crate::inventory::Inventory;
use crate::inventory_mapper::{parse_sidecar, InventoryMapper, JsonInventoryMapper};
use crate::layout::StorageLayout;
use crate::mutable_head::MutableHeadEngine;
use crate::paths::{DefaultContentPathConstraintProcessor, InventoryPath, LogicalPath, WindowsSafeLogicalPathMapper};
use crate::staging::StagingManager;
use crate::storage::fs::FsStorage;
use crate::storage::Storage;
use crate::types::{CommitInfo, User, VersionNum};
use crate::updater::{InventoryUpdater, UpdaterMode};
use crate::version_writer::VersionWriter;

/// A read-only view of one version of an object, returned by [`OcflRepository::get_object`].
#[derive(Debug, Clone)]
pub struct ObjectVersion {
    pub object_id: String,
    pub version_num: VersionNum,
    pub created: DateTime<Local>,
    pub message: Option<String>,
    pub user: Option<User>,
    pub state: HashMap<LogicalPath, HexDigest>,
}

/// Composes the whole core: every public method follows `ensureOpen -> validate args -> acquire
/// object lock -> load inventory -> stage -> write new version -> release lock -> cleanup
/// staging`, except reads, which skip the lock entirely.
pub struct OcflRepository {
    config: RepositoryConfig,
    staging: StagingManager,
    closed: AtomicBool,
}

impl OcflRepository {
    /// Assembles a repository from an already-built [`RepositoryConfig`] plus a local filesystem
    /// directory to stage updates under. `staging_root` is unrelated to the abstract `Storage`
    /// capability -- staged content is always written to local disk first, then handed to
    /// storage via `copy_file_into`/`move_directory_into`, the same two-step the teacher's
    /// `store/fs.rs` uses to install a version.
    pub fn new(config: RepositoryConfig, staging_root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            config,
            staging: StagingManager::new(staging_root)?,
            closed: AtomicBool::new(false),
        })
    }

    /// Opens an existing filesystem-backed repository root at `storage_root`. The staging area is
    /// nested under the repository root's own `extensions/` directory, mirroring the teacher's
    /// `paths::staging_extension_path(storage_root)`.
    pub fn open_fs(storage_root: impl AsRef<Path>) -> Result<Self> {
        let storage_root = storage_root.as_ref();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(storage_root));
        let config = RepositoryConfig::open(storage)?;
        Self::new(config, storage_root.join(EXTENSIONS_DIR).join(STAGING_EXTENSION))
    }

    /// Initializes a brand-new filesystem-backed repository root at `storage_root`.
    pub fn init_fs(storage_root: impl AsRef<Path>, storage_layout: Arc<dyn StorageLayout>) -> Result<Self> {
        let storage_root = storage_root.as_ref();
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(storage_root));
        let config = RepositoryConfig::init(storage, storage_layout)?;
        Self::new(config, storage_root.join(EXTENSIONS_DIR).join(STAGING_EXTENSION))
    }

    /// Idempotent. After closing, every other method returns `OcflError::Closed` instead of
    /// touching storage; a write already past its last checkpoint still finishes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(OcflError::Closed);
        }
        Ok(())
    }

    /// Replaces an object's entire state in one version: every logical path not present in
    /// `files` is removed, every path present is (re)written. Creates the object if it does not
    /// already exist.
    pub fn put_object<R: io::Read>(
        &self,
        object_id: &str,
        files: Vec<(LogicalPath, R)>,
        commit_info: CommitInfo,
    ) -> Result<VersionNum> {
        let digest_algorithm = self.config.digest_algorithm;

        self.update_object(object_id, commit_info, move |updater, staging_dir| {
            let incoming: Vec<&LogicalPath> = files.iter().map(|(path, _)| path).collect();
            for existing in updater.head_logical_paths() {
                if !incoming.contains(&&existing) {
                    updater.remove_file(&existing)?;
                }
            }

            let processor = AddFileProcessor::new(
                Box::new(WindowsSafeLogicalPathMapper),
                Box::new(DefaultContentPathConstraintProcessor),
                digest_algorithm,
            );

            for (path, source) in files {
                processor.add_file(updater, staging_dir, source, path, true)?;
            }

            Ok(())
        })
    }

    /// `updateObject`: applies an arbitrary sequence of add/remove/rename/reinstate operations
    /// against the object's current HEAD, producing and installing its successor version.
    /// `apply` runs with the object lock held and the successor state already seeded as a copy of
    /// HEAD; `staging_dir` is where any new content it writes via [`AddFileProcessor`] belongs.
    pub fn update_object(
        &self,
        object_id: &str,
        commit_info: CommitInfo,
        apply: impl FnOnce(&mut InventoryUpdater, &Path) -> Result<()>,
    ) -> Result<VersionNum> {
        self.ensure_open()?;
        let object_id = require_object_id(object_id)?;
        validate_commit_info(&commit_info)?;

        let _lock = self
            .config
            .lock_manager
            .acquire_object(object_id, self.config.lock_timeout)?;

        let object_root = self.config.storage_layout.map_object_id(object_id);
        let mut inventory = match self.load_inventory(object_id) {
            Ok(inventory) => inventory,
            Err(OcflError::NotFound(_)) => Inventory::builder(object_id)
                .with_digest_algorithm(self.config.digest_algorithm)?
                .with_content_directory(self.config.content_directory.clone())
                .with_object_root(object_root.clone())
                .build()?,
            Err(e) => return Err(e),
        };

        if inventory.mutable_head {
            return Err(OcflError::IllegalState(format!(
                "object {} has an active mutable HEAD; commit or purge it before updating",
                object_id
            )));
        }

        if !inventory.is_new() {
            inventory.create_staging_head()?;
        }

        let staging_dir = self.staging.create_object_temp_dir(object_id)?;
        let mut updater = InventoryUpdater::new(&mut inventory, UpdaterMode::CopyState);
        apply(&mut updater, staging_dir.path())?;

        inventory.dedup_head();
        inventory
            .head_version_mut()
            .update_meta(commit_info, self.config.clock.now());

        let mapper = JsonInventoryMapper;
        let writer = VersionWriter::new(self.config.storage.as_ref(), &mapper, self.config.verify_staging);
        writer.commit(&inventory, staging_dir.path(), &object_root)?;

        self.config.cache.put(object_id, &inventory);
        Ok(inventory.head)
    }

    /// `stageChanges`: applies `apply` against a fresh mutable-HEAD revision, bootstrapping an
    /// empty v1 first if the object does not yet exist on storage.
    pub fn stage_changes(
        &self,
        object_id: &str,
        apply: impl FnOnce(&mut InventoryUpdater, &Path) -> Result<()>,
    ) -> Result<()> {
        self.ensure_open()?;
        let object_id = require_object_id(object_id)?;

        let _lock = self
            .config
            .lock_manager
            .acquire_object(object_id, self.config.lock_timeout)?;

        let object_root = self.config.storage_layout.map_object_id(object_id);
        let mut inventory = match self.load_inventory(object_id) {
            Ok(inventory) => inventory,
            Err(OcflError::NotFound(_)) => Inventory::builder(object_id)
                .with_digest_algorithm(self.config.digest_algorithm)?
                .with_content_directory(self.config.content_directory.clone())
                .with_object_root(object_root.clone())
                .build()?,
            Err(e) => return Err(e),
        };

        let mapper = JsonInventoryMapper;
        let engine = MutableHeadEngine::new(self.config.storage.as_ref(), &mapper, self.config.verify_staging);

        let bootstrap_dir = self.staging.create_object_temp_dir(object_id)?;
        let revision_dir = self.staging.create_object_temp_dir(object_id)?;

        engine.stage_changes(&mut inventory, &object_root, bootstrap_dir.path(), revision_dir.path(), apply)?;

        self.config.cache.put(object_id, &inventory);
        Ok(())
    }

    /// `commitStagedChanges`: folds the mutable HEAD into a normal successor version.
    pub fn commit_staged_changes(&self, object_id: &str, commit_info: CommitInfo) -> Result<VersionNum> {
        self.ensure_open()?;
        let object_id = require_object_id(object_id)?;
        validate_commit_info(&commit_info)?;

        let _lock = self
            .config
            .lock_manager
            .acquire_object(object_id, self.config.lock_timeout)?;

        let mut inventory = self.load_inventory(object_id)?;
        let object_root = inventory.object_root.clone();

        let mapper = JsonInventoryMapper;
        let engine = MutableHeadEngine::new(self.config.storage.as_ref(), &mapper, self.config.verify_staging);
        let staging_dir = self.staging.create_object_temp_dir(object_id)?;

        engine.commit_staged_changes(
            &mut inventory,
            &object_root,
            commit_info,
            self.config.clock.now(),
            staging_dir.path(),
        )?;

        self.config.cache.put(object_id, &inventory);
        Ok(inventory.head)
    }

    /// `purgeStagedChanges`: deletes the mutable-HEAD overlay without installing a version.
    pub fn purge_staged_changes(&self, object_id: &str) -> Result<()> {
        self.ensure_open()?;
        let object_id = require_object_id(object_id)?;

        let _lock = self
            .config
            .lock_manager
            .acquire_object(object_id, self.config.lock_timeout)?;

        let mut inventory = self.load_inventory(object_id)?;
        let object_root = inventory.object_root.clone();

        let mapper = JsonInventoryMapper;
        let engine = MutableHeadEngine::new(self.config.storage.as_ref(), &mapper, self.config.verify_staging);
        engine.purge_staged_changes(&mut inventory, &object_root)?;

        self.config.cache.put(object_id, &inventory);
        Ok(())
    }

    /// `getObject(version)`: a snapshot of one version's metadata and logical state. Defaults to
    /// HEAD when `version_num` is absent.
    pub fn get_object(&self, object_id: &str, version_num: Option<VersionNum>) -> Result<ObjectVersion> {
        self.ensure_open()?;
        let inventory = self.load_inventory(object_id)?;
        let version_num = version_num.unwrap_or(inventory.head);
        let version = inventory.get_version(version_num)?;

        let state = version
            .state_iter()
            .map(|(path, digest)| (path.as_ref().clone(), digest.as_ref().clone()))
            .collect();

        Ok(ObjectVersion {
            object_id: inventory.id.clone(),
            version_num,
            created: version.created,
            message: version.message.clone(),
            user: version.user.clone(),
            state,
        })
    }

    /// `listFiles(version)`: the logical paths present in a version. Defaults to HEAD.
    pub fn list_files(&self, object_id: &str, version_num: Option<VersionNum>) -> Result<Vec<LogicalPath>> {
        self.ensure_open()?;
        let inventory = self.load_inventory(object_id)?;
        let version_num = version_num.unwrap_or(inventory.head);
        let version = inventory.get_version(version_num)?;
        Ok(version.state_iter().map(|(path, _)| path.as_ref().clone()).collect())
    }

    /// `readObject`: streams one logical path's bytes, as of `version_num` (default HEAD), to
    /// `sink`.
    pub fn read_object_file(
        &self,
        object_id: &str,
        logical_path: &LogicalPath,
        version_num: Option<VersionNum>,
        sink: &mut dyn Write,
    ) -> Result<()> {
        self.ensure_open()?;
        let inventory = self.load_inventory(object_id)?;
        let content_path = inventory.content_path_for_logical_path(logical_path, version_num)?;
        let full_path = format!("{}/{}", inventory.object_root, content_path.as_ref().as_str());
        let bytes = self.config.storage.read(&full_path)?;
        sink.write_all(&bytes)?;
        Ok(())
    }

    /// `purgeObject`: unconditionally erases the object root. A no-op if the object does not
    /// exist.
    pub fn purge_object(&self, object_id: &str) -> Result<()> {
        self.ensure_open()?;
        let object_id = require_object_id(object_id)?;

        let _lock = self
            .config
            .lock_manager
            .acquire_object(object_id, self.config.lock_timeout)?;

        let object_root = self.config.storage_layout.map_object_id(object_id);
        self.config.cache.invalidate(object_id);

        match self.config.storage.list_directory(&object_root) {
            Ok(_) => self.config.storage.delete_directory(&object_root),
            Err(OcflError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Loads an object's current inventory: the mutable-HEAD overlay's inventory if one is
    /// staged, else the sealed root inventory. Consults the cache first, and populates it (and
    /// `Inventory::object_root`, which is never serialized) on a cache miss.
    fn load_inventory(&self, object_id: &str) -> Result<Inventory> {
        if let Some(cached) = self.config.cache.get(object_id) {
            return Ok(cached);
        }

        let object_root = self.config.storage_layout.map_object_id(object_id);
        let mapper = JsonInventoryMapper;
        let storage = self.config.storage.as_ref();

        if !storage.file_exists(&format!("{}/{}", object_root, OBJECT_NAMASTE_FILE))? {
            return Err(not_found(object_id, None));
        }

        let overlay_path = format!("{}/{}", object_root, MUTABLE_HEAD_INVENTORY_FILE);
        let mut inventory = if storage.file_exists(&overlay_path)? {
            let mut inventory = load_verified_inventory(storage, &mapper, &overlay_path, object_id)?;
            inventory.mutable_head = true;
            inventory
        } else {
            load_verified_inventory(
                storage,
                &mapper,
                &format!("{}/{}", object_root, INVENTORY_FILE),
                object_id,
            )?
        };

        inventory.object_root = object_root;
        self.config.cache.put(object_id, &inventory);
        Ok(inventory)
    }
}

/// Reads an inventory document and checks it against its digest sidecar, the way every read path
/// in this crate must before trusting an inventory's contents.
fn load_verified_inventory(
    storage: &dyn Storage,
    mapper: &dyn InventoryMapper,
    inventory_path: &str,
    object_id: &str,
) -> Result<Inventory> {
    let bytes = storage.read(inventory_path)?;
    let inventory = mapper.read(&bytes)?;

    let sidecar_path = format!("{}.{}", inventory_path, inventory.digest_algorithm);
    if let Ok(sidecar_bytes) = storage.read(&sidecar_path) {
        let expected = parse_sidecar(&sidecar_bytes)?;
        let actual = inventory.digest_algorithm.hash_hex(&mut &bytes[..])?;

        if expected != actual {
            return Err(OcflError::CorruptObject {
                object_id: object_id.to_string(),
                message: format!(
                    "inventory digest mismatch: sidecar records {} but computed {}",
                    expected, actual
                ),
            });
        }
    }

    Ok(inventory)
}

/// A user address without a user name is meaningless per the OCFL inventory's `user` block,
/// which requires `name` whenever `address` is present. Mirrors the teacher's `commit` validation.
fn validate_commit_info(commit_info: &CommitInfo) -> Result<()> {
    if commit_info.user_address.is_some() && commit_info.user_name.is_none() {
        return Err(OcflError::IllegalArgument(
            "user_address requires user_name to also be set".to_string(),
        ));
    }
    Ok(())
}

fn require_object_id(object_id: &str) -> Result<&str> {
    let trimmed = object_id.trim();
    if trimmed.is_empty() {
        return Err(OcflError::IllegalArgument("object id must not be blank".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::HashedNTupleLayout;
    use assert_fs::TempDir;
    use std::io::Cursor;

    fn repo(root: &Path) -> OcflRepository {
        OcflRepository::init_fs(root, Arc::new(HashedNTupleLayout::default())).unwrap()
    }

    fn logical(p: &str) -> LogicalPath {
        p.try_into().unwrap()
    }

    #[test]
    fn put_object_creates_and_reads_back_a_file() {
        let root = TempDir::new().unwrap();
        let repo = repo(root.path());

        repo.put_object(
            "o1",
            vec![(logical("f.txt"), Cursor::new(b"hello".to_vec()))],
            CommitInfo::new(),
        )
        .unwrap();

        let mut sink = Vec::new();
        repo.read_object_file("o1", &logical("f.txt"), None, &mut sink).unwrap();
        assert_eq!(b"hello".to_vec(), sink);
    }

    #[test]
    fn put_object_twice_replaces_state_and_dedups_unchanged_content() {
        let root = TempDir::new().unwrap();
        let repo = repo(root.path());

        repo.put_object(
            "o1",
            vec![(logical("a.txt"), Cursor::new(b"same".to_vec()))],
            CommitInfo::new(),
        )
        .unwrap();

        let head = repo
            .put_object(
                "o1",
                vec![
                    (logical("a.txt"), Cursor::new(b"same".to_vec())),
                    (logical("b.txt"), Cursor::new(b"new".to_vec())),
                ],
                CommitInfo::new(),
            )
            .unwrap();

        assert_eq!(VersionNum::new(2), head);
        assert!(!root.path().join("o1/v2/content/a.txt").exists());
        assert!(root.path().join("o1/v2/content/b.txt").exists());

        let files = repo.list_files("o1", None).unwrap();
        assert!(files.contains(&logical("a.txt")));
        assert!(files.contains(&logical("b.txt")));
    }

    #[test]
    fn update_object_on_unknown_id_creates_it() {
        let root = TempDir::new().unwrap();
        let repo = repo(root.path());

        let head = repo
            .update_object("o1", CommitInfo::new(), |updater, staging_dir| {
                let proc = AddFileProcessor::new(
                    Box::new(WindowsSafeLogicalPathMapper),
                    Box::new(DefaultContentPathConstraintProcessor),
                    crate::digest::DigestAlgorithm::Sha512,
                );
                proc.add_file(updater, staging_dir, Cursor::new(b"x".to_vec()), logical("f.txt"), false)
            })
            .unwrap();

        assert_eq!(VersionNum::v1(), head);
    }

    #[test]
    fn purge_object_removes_the_object_root() {
        let root = TempDir::new().unwrap();
        let repo = repo(root.path());

        repo.put_object(
            "o1",
            vec![(logical("a.txt"), Cursor::new(b"x".to_vec()))],
            CommitInfo::new(),
        )
        .unwrap();

        repo.purge_object("o1").unwrap();

        assert!(repo.get_object("o1", None).is_err());
    }

    #[test]
    fn closed_repository_rejects_further_operations() {
        let root = TempDir::new().unwrap();
        let repo = repo(root.path());
        repo.close();

        let result = repo.put_object(
            "o1",
            vec![(logical("a.txt"), Cursor::new(b"x".to_vec()))],
            CommitInfo::new(),
        );
        assert!(matches!(result, Err(OcflError::Closed)));
    }

    #[test]
    fn mutable_head_stage_and_commit_produces_one_version() {
        let root = TempDir::new().unwrap();
        let repo = repo(root.path());

        for name in ["a.txt", "b.txt", "c.txt"] {
            let bytes = name.as_bytes().to_vec();
            repo.stage_changes("o1", move |updater, staging_dir| {
                let proc = AddFileProcessor::new(
                    Box::new(WindowsSafeLogicalPathMapper),
                    Box::new(DefaultContentPathConstraintProcessor),
                    crate::digest::DigestAlgorithm::Sha512,
                );
                proc.add_file(updater, staging_dir, Cursor::new(bytes), logical(name), false)
            })
            .unwrap();
        }

        let head = repo.commit_staged_changes("o1", CommitInfo::new().with_message("fold")).unwrap();

        assert_eq!(VersionNum::new(2), head);
        let files = repo.list_files("o1", None).unwrap();
        assert_eq!(3, files.len());
        assert!(!root.path().join("o1/extensions/0005-mutable-head").exists());
    }
}
