//! Streams a single file into a staged update: digest while writing, skip the write entirely
//! when the bytes are already known, otherwise promote the provisional write to its final
//! content path. Grounded in the teacher's `digest.rs` streaming reader plus the atomic
//! write-then-rename pattern `store/fs.rs` uses when installing a version.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::digest::DigestAlgorithm;
use crate::error::Result;
use crate::paths::{ContentPathConstraintProcessor, LogicalPath, LogicalPathMapper};
use crate::updater::InventoryUpdater;

/// Adds one file's bytes to a staged update, from sanitizing the destination through digesting
/// and, when the content is new, writing it under the staging directory's content tree.
pub struct AddFileProcessor {
    logical_mapper: Box<dyn LogicalPathMapper>,
    constraint_processor: Box<dyn ContentPathConstraintProcessor>,
    digest_algorithm: DigestAlgorithm,
    provisional_counter: AtomicU64,
}

impl AddFileProcessor {
    pub fn new(
        logical_mapper: Box<dyn LogicalPathMapper>,
        constraint_processor: Box<dyn ContentPathConstraintProcessor>,
        digest_algorithm: DigestAlgorithm,
    ) -> Self {
        Self {
            logical_mapper,
            constraint_processor,
            digest_algorithm,
            provisional_counter: AtomicU64::new(0),
        }
    }

    /// `addFile`: streams `source` into `staging_dir`'s content tree at a provisional name,
    /// computes its digest, and either discards it (the digest already has a content path in
    /// the manifest) or renames it into its final, sanitized content path. Either way, informs
    /// `updater` so the successor state binds `logical_path` to the resulting digest.
    ///
    /// Path checks run before anything is written: a rejected add never leaves a provisional
    /// file behind.
    pub fn add_file<R: io::Read>(
        &self,
        updater: &mut InventoryUpdater,
        staging_dir: &Path,
        source: R,
        logical_path: LogicalPath,
        overwrite: bool,
    ) -> Result<()> {
        updater.check_can_bind(&logical_path, overwrite)?;

        let content_segment = self.logical_mapper.to_content_segment(&logical_path);
        self.constraint_processor.validate(&content_segment)?;

        let content_dir = staging_dir.join(updater.content_dir());
        fs::create_dir_all(&content_dir)?;

        let provisional_path = self.provisional_path(&content_dir);
        let digest = self.stream_to_file(source, &provisional_path)?;

        if let Some(digest_rc) = updater.existing_digest(&digest) {
            fs::remove_file(&provisional_path)?;
            return updater.bind_existing_digest(digest_rc, logical_path);
        }

        let content_path = updater.content_path_for_segment(&content_segment)?;
        let final_local = staging_dir.join(updater.content_local_relative(&content_segment));
        if let Some(parent) = final_local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&provisional_path, &final_local)?;

        updater.bind_new_content(digest, content_path, logical_path)
    }

    fn provisional_path(&self, content_dir: &Path) -> PathBuf {
        let sequence = self.provisional_counter.fetch_add(1, Ordering::SeqCst);
        content_dir.join(format!(".provisional-{}", sequence))
    }

    fn stream_to_file<R: io::Read>(&self, source: R, destination: &Path) -> Result<crate::digest::HexDigest> {
        let mut digest_reader = self.digest_algorithm.reader(source);
        let mut file = File::create(destination)?;
        io::copy(&mut digest_reader, &mut file)?;
        Ok(digest_reader.finalize_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcflError;
    use crate::inventory::Inventory;
    use crate::paths::{DefaultContentPathConstraintProcessor, WindowsSafeLogicalPathMapper};
    use crate::updater::UpdaterMode;
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

    fn staged() -> Inventory {
        let mut inv = Inventory::builder("urn:test:1").build().unwrap();
        inv.create_staging_head().unwrap();
        inv
    }

    #[test]
    fn new_content_is_written_and_bound() {
        let staging = TempDir::new().unwrap();
        let proc = processor();
        let mut inv = staged();
        let mut updater = InventoryUpdater::new(&mut inv, UpdaterMode::CopyState);

        proc.add_file(
            &mut updater,
            staging.path(),
            "hello".as_bytes(),
            logical("a.txt"),
            false,
        )
        .unwrap();

        let content = fs::read(staging.path().join("content/a.txt")).unwrap();
        assert_eq!(b"hello".to_vec(), content);
    }

    #[test]
    fn duplicate_content_is_deduped_without_writing_bytes() {
        let staging_a = TempDir::new().unwrap();
        let staging_b = TempDir::new().unwrap();
        let proc = processor();
        let mut inv = staged();

        {
            let mut updater = InventoryUpdater::new(&mut inv, UpdaterMode::CopyState);
            proc.add_file(
                &mut updater,
                staging_a.path(),
                "same bytes".as_bytes(),
                logical("a.txt"),
                false,
            )
            .unwrap();
        }

        {
            let mut updater = InventoryUpdater::new(&mut inv, UpdaterMode::CopyState);
            proc.add_file(
                &mut updater,
                staging_b.path(),
                "same bytes".as_bytes(),
                logical("b.txt"),
                false,
            )
            .unwrap();
        }

        assert!(!staging_b.path().join("content/b.txt").exists());
        assert_eq!(
            inv.head_version().lookup_digest(&logical("a.txt")),
            inv.head_version().lookup_digest(&logical("b.txt"))
        );
    }

    #[test]
    fn rejects_conflicting_path_before_writing_anything() {
        let staging = TempDir::new().unwrap();
        let proc = processor();
        let mut inv = staged();
        let mut updater = InventoryUpdater::new(&mut inv, UpdaterMode::CopyState);

        proc.add_file(
            &mut updater,
            staging.path(),
            "hello".as_bytes(),
            logical("a.txt"),
            false,
        )
        .unwrap();

        let result = proc.add_file(
            &mut updater,
            staging.path(),
            "world".as_bytes(),
            logical("a.txt"),
            false,
        );
        assert!(matches!(result, Err(OcflError::PathAlreadyExists(_))));
    }
}
