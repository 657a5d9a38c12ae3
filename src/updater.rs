//! The inventory updater: the four logical operations (`addFile`, `removeFile`, `renameFile`,
//! `reinstateFile`) over a staged successor version.

use std::rc::Rc;

use crate::digest::HexDigest;
use crate::error::{OcflError, Result};
use crate::inventory::Inventory;
use crate::paths::{ContentPath, LogicalPath};
use crate::types::{RevisionNum, VersionNum};

/// How a new successor version's starting state is seeded.
pub enum UpdaterMode {
    /// A normal version: state starts as a copy of HEAD, content paths are minted under the
    /// new version number.
    CopyState,
    /// A mutable-HEAD revision: state starts as a copy of HEAD, but content paths are minted
    /// under a freshly reserved revision directory instead of a version directory.
    CopyStateMutable(RevisionNum),
}

/// Accumulates a set of changes against an inventory's successor version, then leaves that
/// version installed in the inventory's `versions` map for the caller to write out.
///
/// One updater is used per `updateObject`/`stageChanges` call; it borrows the inventory for the
/// duration of the closure that the repository façade runs under the object lock.
pub struct InventoryUpdater<'inv> {
    inventory: &'inv mut Inventory,
    mode: UpdaterMode,
}

impl<'inv> InventoryUpdater<'inv> {
    /// Begins an update. The inventory must already have its successor HEAD version created
    /// (via `Inventory::create_staging_head`) before the updater is constructed.
    pub fn new(inventory: &'inv mut Inventory, mode: UpdaterMode) -> Self {
        Self { inventory, mode }
    }

    pub fn head(&self) -> VersionNum {
        self.inventory.head
    }

    /// The logical paths currently bound in the successor state, before any operation from this
    /// update runs. Lets a caller that replaces an object's entire state in one call (rather than
    /// applying incremental add/remove/rename operations) diff against what's already there.
    pub fn head_logical_paths(&self) -> Vec<LogicalPath> {
        self.inventory
            .head_version()
            .state_iter()
            .map(|(path, _)| path.as_ref().clone())
            .collect()
    }

    /// The content directory name (`content` unless the inventory overrides it), for callers
    /// that need to locate the staging directory's content tree.
    pub(crate) fn content_dir(&self) -> &str {
        self.inventory.defaulted_content_dir()
    }

    fn new_content_path(&self, logical_path: &LogicalPath) -> Result<ContentPath> {
        match &self.mode {
            UpdaterMode::CopyState => self.inventory.new_content_path_head(logical_path),
            UpdaterMode::CopyStateMutable(revision) => {
                self.inventory.new_content_path_revision(*revision, logical_path)
            }
        }
    }

    /// `addFile`: binds `logical_path` to `digest` in the successor state, minting a fresh
    /// content path when `digest` is new. Fails with `PathAlreadyExists` if `logical_path` is
    /// already bound in the successor state, unless `overwrite` is set.
    pub fn add_file(
        &mut self,
        digest: HexDigest,
        logical_path: LogicalPath,
        overwrite: bool,
    ) -> Result<()> {
        self.check_can_bind(&logical_path, overwrite)?;

        let content_path = self.new_content_path(&logical_path)?;
        let digest_rc = self.inventory.bind_digest(digest, content_path);

        self.inventory.head_version_mut().add_file(digest_rc, logical_path)
    }

    /// Fails with `PathAlreadyExists` if `logical_path` is already bound in the successor state
    /// and `overwrite` is not set, or if it conflicts with an existing file/directory path.
    /// Exposed to `add_file::AddFileProcessor`, which must run this check before streaming any
    /// bytes so a rejected add never leaves a provisional file behind.
    pub(crate) fn check_can_bind(&self, logical_path: &LogicalPath, overwrite: bool) -> Result<()> {
        if !overwrite && self.inventory.head_version().is_file(logical_path) {
            return Err(OcflError::PathAlreadyExists(logical_path.to_string()));
        }

        self.inventory.head_version().validate_non_conflicting(logical_path)
    }

    /// Mints a content path from an already-sanitized content segment rather than a raw
    /// logical path. The add-file pipeline uses this once it has run the destination through a
    /// `LogicalPathMapper`, so the minted content path reflects the sanitized form.
    pub(crate) fn content_path_for_segment(&self, segment: &str) -> Result<ContentPath> {
        match &self.mode {
            UpdaterMode::CopyState => self.inventory.new_content_path_for_segment(self.head(), segment),
            UpdaterMode::CopyStateMutable(revision) => {
                self.inventory.new_content_path_for_segment_revision(*revision, segment)
            }
        }
    }

    /// The staging-directory-relative path newly written content for `segment` belongs at,
    /// mirroring the structure of the content path minted for the same segment: directly under
    /// the content directory for a normal version, or nested under the revision directory for a
    /// mutable-HEAD stage.
    pub(crate) fn content_local_relative(&self, segment: &str) -> String {
        match &self.mode {
            UpdaterMode::CopyState => format!("{}/{}", self.content_dir(), segment),
            UpdaterMode::CopyStateMutable(revision) => {
                format!("{}/{}/{}", self.content_dir(), revision, segment)
            }
        }
    }

    /// The digest's existing manifest entry, if any, without minting or binding anything.
    pub(crate) fn existing_digest(&self, digest: &HexDigest) -> Option<Rc<HexDigest>> {
        self.inventory.existing_digest_rc(digest)
    }

    /// Binds `logical_path` to newly-written content at `content_path`.
    pub(crate) fn bind_new_content(
        &mut self,
        digest: HexDigest,
        content_path: ContentPath,
        logical_path: LogicalPath,
    ) -> Result<()> {
        let digest_rc = self.inventory.bind_digest(digest, content_path);
        self.inventory.head_version_mut().add_file(digest_rc, logical_path)
    }

    /// Binds `logical_path` to an already-known digest without minting a new content path,
    /// i.e. the duplicate-content case: the bytes already live on disk under another path.
    pub(crate) fn bind_existing_digest(
        &mut self,
        digest_rc: Rc<HexDigest>,
        logical_path: LogicalPath,
    ) -> Result<()> {
        self.inventory.head_version_mut().add_file(digest_rc, logical_path)
    }

    /// `removeFile`: deletes `logical_path` from the successor state, garbage-collecting its
    /// content path from the manifest if this version was the only one pointing at it.
    pub fn remove_file(&mut self, logical_path: &LogicalPath) -> Result<()> {
        if !self.inventory.head_version().is_file(logical_path) {
            return Err(OcflError::NotFound(format!(
                "path {} not found in successor state",
                logical_path
            )));
        }

        self.inventory.remove_logical_path_from_head(logical_path);
        Ok(())
    }

    /// `renameFile`: equivalent to `removeFile(src)` followed by binding `src`'s digest to
    /// `dst`, without minting a new content path.
    pub fn rename_file(
        &mut self,
        src: &LogicalPath,
        dst: LogicalPath,
        overwrite: bool,
    ) -> Result<()> {
        if !overwrite && self.inventory.head_version().is_file(&dst) {
            return Err(OcflError::PathAlreadyExists(dst.to_string()));
        }

        self.inventory.rename_in_head(src, dst)
    }

    /// `reinstateFile`: looks up the digest bound to `src_path` as of `src_version`, and binds
    /// it to `dst_path` in the successor state, reusing the source version's content path.
    pub fn reinstate_file(
        &mut self,
        src_version: VersionNum,
        src_path: &LogicalPath,
        dst_path: LogicalPath,
        overwrite: bool,
    ) -> Result<()> {
        if !overwrite && self.inventory.head_version().is_file(&dst_path) {
            return Err(OcflError::PathAlreadyExists(dst_path.to_string()));
        }

        self.inventory.reinstate_in_head(src_version, src_path, dst_path)
    }
}
