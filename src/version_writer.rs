//! Serializes a staged successor version and installs it, grounded in the teacher's
//! `store/fs.rs` `write_new_version`/`write_new_object` rename-then-copy-inventory pattern,
//! generalized over the `Storage` capability instead of calling `std::fs` directly.

use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::consts::{INVENTORY_FILE, OBJECT_NAMASTE_FILE, OCFL_OBJECT_VERSION};
use crate::error::{OcflError, Result};
use crate::inventory::Inventory;
use crate::inventory_mapper::{sidecar_contents, InventoryMapper};
use crate::paths::InventoryPath;
use crate::storage::Storage;

/// Installs one staged version directory into an object's storage location.
pub struct VersionWriter<'a> {
    storage: &'a dyn Storage,
    inventory_mapper: &'a dyn InventoryMapper,
    verify_staging: bool,
}

impl<'a> VersionWriter<'a> {
    pub fn new(storage: &'a dyn Storage, inventory_mapper: &'a dyn InventoryMapper, verify_staging: bool) -> Self {
        Self {
            storage,
            inventory_mapper,
            verify_staging,
        }
    }

    /// Commits one staged version. `staging_dir` must already be a fully formed `v{head}`
    /// directory -- its `content/` subtree populated by the add-file pipeline -- needing only
    /// its inventory and sidecar written before installation. `object_root` is the object's
    /// path relative the storage root. Whether this creates a brand-new object root or
    /// installs a successor version is decided by `inventory.is_new()`, the same check the
    /// teacher's `write_new_version` uses to refuse writing a version onto an object that was
    /// never created.
    pub fn commit(&self, inventory: &Inventory, staging_dir: &Path, object_root: &str) -> Result<()> {
        self.write_inventory_and_sidecar(inventory, staging_dir)?;

        if self.verify_staging {
            self.verify_content(inventory, staging_dir)?;
        }

        self.prune_empty_content_dir(inventory, staging_dir)?;

        if inventory.is_new() {
            self.install_new_object(inventory, staging_dir, object_root)
        } else {
            self.install_new_version(inventory, staging_dir, object_root)
        }
    }

    /// Serializes `inventory` and its sidecar into `dir`. Exposed to [`crate::mutable_head`],
    /// which writes the mutable-HEAD overlay's own inventory the same way a normal version's is
    /// written here.
    pub(crate) fn write_inventory_and_sidecar(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        let bytes = self.inventory_mapper.write(inventory)?;
        let (_, sidecar) = sidecar_contents(inventory.digest_algorithm, &bytes)?;

        fs::write(staging_dir.join(INVENTORY_FILE), &bytes)?;
        fs::write(
            staging_dir.join(format!("{}.{}", INVENTORY_FILE, inventory.digest_algorithm)),
            &sidecar,
        )?;

        Ok(())
    }

    /// Recomputes the digest of every content file staged for HEAD and compares it with the
    /// manifest. A mismatch fails the whole commit before anything touches storage.
    fn verify_content(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        let prefix = format!("{}/", inventory.head);

        for (content_path, digest) in inventory.manifest_entries_under(&prefix) {
            let relative = &content_path.as_ref().as_str()[prefix.len()..];
            let local_path = staging_dir.join(relative);

            let mut file = fs::File::open(&local_path)?;
            let actual = inventory.digest_algorithm.hash_hex(&mut file)?;

            if &actual != digest.as_ref() {
                return Err(OcflError::FixityMismatch {
                    path: content_path.as_ref().as_str().to_string(),
                    expected: digest.as_ref().to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        Ok(())
    }

    fn prune_empty_content_dir(&self, inventory: &Inventory, staging_dir: &Path) -> Result<()> {
        let content_dir = staging_dir.join(inventory.defaulted_content_dir());
        if content_dir.is_dir() && fs::read_dir(&content_dir)?.next().is_none() {
            fs::remove_dir(&content_dir)?;
        }
        Ok(())
    }

    fn install_new_object(&self, inventory: &Inventory, staging_dir: &Path, object_root: &str) -> Result<()> {
        info!("Creating object {} at {}", inventory.id, object_root);

        self.storage.create_directories(object_root)?;
        self.storage.write(
            &format!("{}/{}", object_root, OBJECT_NAMASTE_FILE),
            format!("{}\n", OCFL_OBJECT_VERSION).as_bytes(),
            None,
        )?;

        self.storage
            .move_directory_into(staging_dir, &format!("{}/{}", object_root, inventory.head))?;

        if let Err(e) = self.copy_root_inventory(inventory, staging_dir, object_root) {
            warn!(
                "Failed to finish creating object {} at {}: {}. Removing partially created object.",
                inventory.id, object_root, e
            );
            let _ = self.storage.delete_directory(object_root);
            return Err(e);
        }

        Ok(())
    }

    fn install_new_version(&self, inventory: &Inventory, staging_dir: &Path, object_root: &str) -> Result<()> {
        let version_str = inventory.head.to_string();
        let expected_predecessor = inventory.head.previous()?;

        let root_bytes = self.storage.read(&format!("{}/{}", object_root, INVENTORY_FILE))?;
        let on_storage = self.inventory_mapper.read(&root_bytes)?;

        if on_storage.head != expected_predecessor {
            return Err(OcflError::ObjectOutOfSync {
                object_id: inventory.id.clone(),
                expected: expected_predecessor,
                actual: on_storage.head,
            });
        }

        let destination = format!("{}/{}", object_root, version_str);

        info!("Creating version {} of object {}", version_str, inventory.id);

        self.storage.move_directory_into(staging_dir, &destination)?;

        if let Err(e) = self.copy_root_inventory(inventory, staging_dir, object_root) {
            warn!(
                "Failed to install root inventory for version {} of object {}: {}. Rolling back.",
                version_str, inventory.id, e
            );
            if let Err(rollback_err) = self.storage.delete_directory(&destination) {
                warn!(
                    "Failed to roll back version {} of object {} at {}: {}. Manual intervention may be required.",
                    version_str, inventory.id, destination, rollback_err
                );
                return Err(OcflError::CorruptObject {
                    object_id: inventory.id.clone(),
                    message: format!(
                        "failed to install root inventory for version {} ({}), and the rollback \
                         of {} also failed ({}); the object is left with an uninstalled version \
                         directory and requires manual repair",
                        version_str, e, destination, rollback_err
                    ),
                });
            }
            return Err(e);
        }

        Ok(())
    }

    /// Copies the just-installed version's inventory + sidecar up to become the object root's
    /// inventory, mirroring the teacher's `copy_inventory_files`.
    fn copy_root_inventory(&self, inventory: &Inventory, staging_dir: &Path, object_root: &str) -> Result<()> {
        let sidecar_name = format!("{}.{}", INVENTORY_FILE, inventory.digest_algorithm);

        self.storage.copy_file_internal(
            &format!("{}/{}/{}", object_root, inventory.head, INVENTORY_FILE),
            &format!("{}/{}", object_root, INVENTORY_FILE),
        )?;
        self.storage.copy_file_internal(
            &format!("{}/{}/{}", object_root, inventory.head, sidecar_name),
            &format!("{}/{}", object_root, sidecar_name),
        )?;

        let _ = staging_dir;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use crate::inventory_mapper::JsonInventoryMapper;
    use crate::storage::fs::FsStorage;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    fn staged_inventory() -> Inventory {
        let mut inv = Inventory::builder("urn:test:1").build().unwrap();
        inv.create_staging_head().unwrap();
        inv
    }

    #[test]
    fn commits_first_version_as_new_object() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        staging.child("content/a.txt").write_str("hello").unwrap();

        let inv = staged_inventory();
        let storage = FsStorage::new(root.path());
        let mapper = JsonInventoryMapper;
        let writer = VersionWriter::new(&storage, &mapper, false);

        writer.commit(&inv, staging.path(), "obj1").unwrap();

        assert!(root.path().join("obj1/0=ocfl_object_1.1").is_file());
        assert!(root.path().join("obj1/inventory.json").is_file());
        assert!(root.path().join("obj1/v1/inventory.json").is_file());
        assert!(root.path().join("obj1/v1/content/a.txt").is_file());
    }

    #[test]
    fn second_writer_starting_from_a_stale_head_is_rejected() {
        let root = TempDir::new().unwrap();
        let storage = FsStorage::new(root.path());
        let mapper = JsonInventoryMapper;
        let writer = VersionWriter::new(&storage, &mapper, false);

        let mut inv = staged_inventory();
        let staging_v1 = TempDir::new().unwrap();
        writer.commit(&inv, staging_v1.path(), "obj1").unwrap();

        inv.create_staging_head().unwrap();
        let staging_v2 = TempDir::new().unwrap();
        writer.commit(&inv, staging_v2.path(), "obj1").unwrap();

        // A second writer that also started from v1 and independently staged its own v2.
        let mut stale = staged_inventory();
        stale.create_staging_head().unwrap();
        let staging_stale = TempDir::new().unwrap();
        let result = writer.commit(&stale, staging_stale.path(), "obj1");
        assert!(matches!(result, Err(OcflError::ObjectOutOfSync { .. })));
    }

    #[test]
    fn empty_content_directory_is_pruned() {
        let root = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        staging.child("content").create_dir_all().unwrap();

        let inv = staged_inventory();
        let storage = FsStorage::new(root.path());
        let mapper = JsonInventoryMapper;
        let writer = VersionWriter::new(&storage, &mapper, false);

        writer.commit(&inv, staging.path(), "obj1").unwrap();

        assert!(!root.path().join("obj1/v1/content").exists());
    }
}
