//! The mutable-HEAD extension (`0005-mutable-head`): lets a caller stage an unbounded number
//! of revisions against an object without minting a new immutable version for each one, then
//! fold the accumulated state into a single successor version on commit.
//!
//! The teacher has no equivalent -- its inventories are read-mostly and it never writes a
//! mutable-HEAD overlay -- so this module is grounded directly in the extension's own on-disk
//! layout (`extensions/0005-mutable-head/head/`, `extensions/0005-mutable-head/revisions/`)
//! rather than in teacher code, while reusing [`InventoryUpdater`], [`crate::add_file`] and
//! [`VersionWriter`] exactly as a normal version write would.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use log::{info, warn};
use walkdir::WalkDir;

use crate::consts::{INVENTORY_FILE, MUTABLE_HEAD_EXT_DIR};
use crate::error::{OcflError, Result};
use crate::inventory::Inventory;
use crate::inventory_mapper::InventoryMapper;
use crate::paths::InventoryPath;
use crate::storage::Storage;
use crate::types::{CommitInfo, RevisionNum};
use crate::updater::{InventoryUpdater, UpdaterMode};
use crate::version_writer::VersionWriter;

const REVISIONS_DIR_NAME: &str = "revisions";

/// Stages, commits, and purges an object's mutable HEAD.
pub struct MutableHeadEngine<'a> {
    storage: &'a dyn Storage,
    version_writer: VersionWriter<'a>,
}

impl<'a> MutableHeadEngine<'a> {
    pub fn new(storage: &'a dyn Storage, inventory_mapper: &'a dyn InventoryMapper, verify_staging: bool) -> Self {
        Self {
            storage,
            version_writer: VersionWriter::new(storage, inventory_mapper, verify_staging),
        }
    }

    fn head_dir(&self, object_root: &str) -> String {
        format!("{}/{}/head", object_root, MUTABLE_HEAD_EXT_DIR)
    }

    fn revisions_dir(&self, object_root: &str) -> String {
        format!("{}/{}/{}", object_root, MUTABLE_HEAD_EXT_DIR, REVISIONS_DIR_NAME)
    }

    /// The next revision number to allocate. Derived by scanning the revision marker directory
    /// rather than any persisted counter, the same way version numbers elsewhere in this crate
    /// are derived from what's actually on storage instead of trusted in-memory state.
    fn next_revision(&self, object_root: &str) -> Result<RevisionNum> {
        let listing = match self.storage.list_directory(&self.revisions_dir(object_root)) {
            Ok(listing) => listing,
            Err(OcflError::NotFound(_)) => return Ok(RevisionNum::r1()),
            Err(e) => return Err(e),
        };

        let max = listing
            .iter()
            .filter_map(|entry| RevisionNum::try_from(entry.path()).ok())
            .max();

        match max {
            Some(revision) => Ok(revision.next()),
            None => Ok(RevisionNum::r1()),
        }
    }

    /// `stageChanges`: applies `apply` against a fresh revision under the mutable-HEAD overlay.
    /// If the object does not exist on storage yet, an empty v1 is committed first via
    /// `bootstrap_staging_dir` -- the only way this engine produces a version with no user
    /// content. `revision_staging_dir` is where `apply` (typically driving
    /// `crate::add_file::AddFileProcessor`) writes the revision's new content.
    pub fn stage_changes(
        &self,
        inventory: &mut Inventory,
        object_root: &str,
        bootstrap_staging_dir: &Path,
        revision_staging_dir: &Path,
        apply: impl FnOnce(&mut InventoryUpdater, &Path) -> Result<()>,
    ) -> Result<()> {
        if inventory.is_new() && !self.storage.file_exists(&format!("{}/{}", object_root, INVENTORY_FILE))? {
            info!("Creating object {} with an empty v1 before staging changes", inventory.id);
            self.version_writer.commit(inventory, bootstrap_staging_dir, object_root)?;
        }

        let revision = self.next_revision(object_root)?;

        if !inventory.mutable_head {
            inventory.create_staging_head()?;
            inventory.mutable_head = true;
        }

        let mut updater = InventoryUpdater::new(inventory, UpdaterMode::CopyStateMutable(revision));
        apply(&mut updater, revision_staging_dir)?;

        self.version_writer
            .write_inventory_and_sidecar(inventory, revision_staging_dir)?;

        let revision_content_local = revision_staging_dir
            .join(inventory.defaulted_content_dir())
            .join(revision.to_string());
        if revision_content_local.is_dir() {
            let content_dest = format!("{}/content/{}", self.head_dir(object_root), revision);
            self.push_directory_tree(&revision_content_local, &content_dest)?;
        }

        let sidecar_name = format!("{}.{}", INVENTORY_FILE, inventory.digest_algorithm);
        self.storage.copy_file_into(
            &revision_staging_dir.join(INVENTORY_FILE),
            &format!("{}/{}", self.head_dir(object_root), INVENTORY_FILE),
        )?;
        self.storage.copy_file_into(
            &revision_staging_dir.join(&sidecar_name),
            &format!("{}/{}", self.head_dir(object_root), sidecar_name),
        )?;

        self.storage
            .write(&format!("{}/{}", self.revisions_dir(object_root), revision), &[], None)?;

        Ok(())
    }

    /// `commitStagedChanges`: under write lock (held by the caller), folds the mutable HEAD into
    /// a normal successor version, installed exactly as a regular version commit would be, then
    /// deletes the mutable-HEAD overlay. `commit_info`/`now` describe the resulting version;
    /// they are not taken from any earlier `stageChanges` call.
    pub fn commit_staged_changes(
        &self,
        inventory: &mut Inventory,
        object_root: &str,
        commit_info: CommitInfo,
        now: DateTime<Local>,
        staging_dir: &Path,
    ) -> Result<()> {
        if !inventory.mutable_head {
            return Err(OcflError::IllegalState(format!(
                "object {} has no mutable HEAD to commit",
                inventory.id
            )));
        }

        inventory.head_version_mut().update_meta(commit_info, now);

        let moves = inventory.promote_mutable_head_content()?;

        let overlay_local = staging_dir.join(".mh-overlay");
        let content_root = format!("{}/content", self.head_dir(object_root));
        if self.storage.list_directory(&content_root).is_ok() {
            self.storage.copy_directory_out_of(&content_root, &overlay_local)?;
        }

        for (overlay_relative, new_path) in &moves {
            let new_path_str = new_path.as_str();
            let local_rel = match new_path_str.find('/') {
                Some(slash) => &new_path_str[slash + 1..],
                None => new_path_str,
            };

            let dst = staging_dir.join(local_rel);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(overlay_local.join(overlay_relative), dst)?;
        }

        if overlay_local.is_dir() {
            fs::remove_dir_all(&overlay_local)?;
        }

        info!(
            "Promoting mutable HEAD of object {} to version {}",
            inventory.id, inventory.head
        );
        self.version_writer.commit(inventory, staging_dir, object_root)?;

        let overlay_root = format!("{}/{}", object_root, MUTABLE_HEAD_EXT_DIR);
        if let Err(e) = self.storage.delete_directory(&overlay_root) {
            warn!(
                "Failed to remove mutable-HEAD overlay for object {} at {}: {}. \
                 It will be ignored on next read.",
                inventory.id, overlay_root, e
            );
        }

        inventory.mutable_head = false;
        Ok(())
    }

    /// `purgeStagedChanges`: under write lock, deletes the mutable-HEAD overlay; no other state
    /// changes. A no-op if there is no mutable HEAD staged.
    pub fn purge_staged_changes(&self, inventory: &mut Inventory, object_root: &str) -> Result<()> {
        if !inventory.mutable_head {
            return Ok(());
        }

        let overlay_root = format!("{}/{}", object_root, MUTABLE_HEAD_EXT_DIR);
        self.storage.delete_directory(&overlay_root)?;

        inventory.discard_mutable_head()
    }

    fn push_directory_tree(&self, local_root: &Path, dest_prefix: &str) -> Result<()> {
        for entry in WalkDir::new(local_root) {
            let entry = entry?;
            if entry.file_type().is_file() {
                let relative = entry
                    .path()
                    .strip_prefix(local_root)
                    .expect("walkdir entry under root")
                    .to_string_lossy()
                    .replace('\\', "/");
                self.storage
                    .copy_file_into(entry.path(), &format!("{}/{}", dest_prefix, relative))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::add_file::AddFileProcessor;
    use crate::digest::DigestAlgorithm;
    use crate::inventory::Inventory;
    use crate::inventory_mapper::JsonInventoryMapper;
    use crate::paths::{DefaultContentPathConstraintProcessor, LogicalPath, WindowsSafeLogicalPathMapper};
    use crate::storage::fs::FsStorage;
    use assert_fs::TempDir;

    fn logical(p: &str) -> LogicalPath {
        p.try_into().unwrap()
    }

    fn processor() -> AddFileProcessor {
        AddFileProcessor::new(
            Box::new(WindowsSafeLogicalPathMapper),
            Box::new(DefaultContentPathConstraintProcessor),
            DigestAlgorithm::Sha256,
        )
    }

    #[test]
    fn stage_changes_bootstraps_an_empty_v1_then_stages_a_revision() {
        let root = TempDir::new().unwrap();
        let storage = FsStorage::new(root.path());
        let mapper = JsonInventoryMapper;
        let engine = MutableHeadEngine::new(&storage, &mapper, false);
        let proc = processor();

        let mut inv = Inventory::builder("urn:test:1").build().unwrap();
        let bootstrap = TempDir::new().unwrap();
        let revision_dir = TempDir::new().unwrap();

        engine
            .stage_changes(&mut inv, "obj1", bootstrap.path(), revision_dir.path(), |updater, dir| {
                proc.add_file(updater, dir, "hello".as_bytes(), logical("a.txt"), false)
            })
            .unwrap();

        assert!(inv.mutable_head);
        assert!(root.path().join("obj1/v1/inventory.json").is_file());
        assert!(root
            .path()
            .join("obj1/extensions/0005-mutable-head/head/content/r1/a.txt")
            .is_file());
        assert!(root
            .path()
            .join("obj1/extensions/0005-mutable-head/revisions/r1")
            .is_file());
    }

    #[test]
    fn second_stage_call_allocates_r2_and_preserves_r1_content() {
        let root = TempDir::new().unwrap();
        let storage = FsStorage::new(root.path());
        let mapper = JsonInventoryMapper;
        let engine = MutableHeadEngine::new(&storage, &mapper, false);
        let proc = processor();

        let mut inv = Inventory::builder("urn:test:1").build().unwrap();

        {
            let bootstrap = TempDir::new().unwrap();
            let revision_dir = TempDir::new().unwrap();
            engine
                .stage_changes(&mut inv, "obj1", bootstrap.path(), revision_dir.path(), |updater, dir| {
                    proc.add_file(updater, dir, "first".as_bytes(), logical("a.txt"), false)
                })
                .unwrap();
        }

        {
            let bootstrap = TempDir::new().unwrap();
            let revision_dir = TempDir::new().unwrap();
            engine
                .stage_changes(&mut inv, "obj1", bootstrap.path(), revision_dir.path(), |updater, dir| {
                    proc.add_file(updater, dir, "second".as_bytes(), logical("b.txt"), false)
                })
                .unwrap();
        }

        assert!(root
            .path()
            .join("obj1/extensions/0005-mutable-head/head/content/r1/a.txt")
            .is_file());
        assert!(root
            .path()
            .join("obj1/extensions/0005-mutable-head/head/content/r2/b.txt")
            .is_file());
        assert!(inv.head_version().lookup_digest(&logical("a.txt")).is_some());
        assert!(inv.head_version().lookup_digest(&logical("b.txt")).is_some());
    }

    #[test]
    fn commit_staged_changes_promotes_overlay_into_a_normal_version() {
        let root = TempDir::new().unwrap();
        let storage = FsStorage::new(root.path());
        let mapper = JsonInventoryMapper;
        let engine = MutableHeadEngine::new(&storage, &mapper, false);
        let proc = processor();

        let mut inv = Inventory::builder("urn:test:1").build().unwrap();
        let bootstrap = TempDir::new().unwrap();
        let revision_dir = TempDir::new().unwrap();
        engine
            .stage_changes(&mut inv, "obj1", bootstrap.path(), revision_dir.path(), |updater, dir| {
                proc.add_file(updater, dir, "hello".as_bytes(), logical("a.txt"), false)
            })
            .unwrap();

        let commit_dir = TempDir::new().unwrap();
        engine
            .commit_staged_changes(
                &mut inv,
                "obj1",
                CommitInfo::new().with_message("promote"),
                Local::now(),
                commit_dir.path(),
            )
            .unwrap();

        assert!(!inv.mutable_head);
        assert!(root.path().join("obj1/v2/content/a.txt").is_file());
        assert!(root.path().join("obj1/inventory.json").is_file());
        assert!(!root.path().join("obj1/extensions/0005-mutable-head").exists());
    }

    #[test]
    fn purge_staged_changes_deletes_overlay_without_creating_a_version() {
        let root = TempDir::new().unwrap();
        let storage = FsStorage::new(root.path());
        let mapper = JsonInventoryMapper;
        let engine = MutableHeadEngine::new(&storage, &mapper, false);
        let proc = processor();

        let mut inv = Inventory::builder("urn:test:1").build().unwrap();
        let bootstrap = TempDir::new().unwrap();
        let revision_dir = TempDir::new().unwrap();
        engine
            .stage_changes(&mut inv, "obj1", bootstrap.path(), revision_dir.path(), |updater, dir| {
                proc.add_file(updater, dir, "hello".as_bytes(), logical("a.txt"), false)
            })
            .unwrap();

        engine.purge_staged_changes(&mut inv, "obj1").unwrap();

        assert!(!inv.mutable_head);
        assert!(!root.path().join("obj1/extensions/0005-mutable-head").exists());
        assert!(!root.path().join("obj1/v2").exists());
    }
}
