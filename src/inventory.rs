//! The in-memory OCFL inventory: manifest, version history, and the copy-on-write builder
//! that produces a successor inventory for a staged update.

use std::collections::hash_map::Iter as HashMapIter;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryInto;
use std::mem;
use std::rc::Rc;

use chrono::{DateTime, Local};
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::bimap::PathBiMap;
use crate::consts::{DEFAULT_CONTENT_DIR, INVENTORY_TYPE, MUTABLE_HEAD_EXT_DIR};
use crate::digest::{DigestAlgorithm, HexDigest};
use crate::error::{not_found, not_found_path, OcflError, Result};
use crate::paths::{ContentPath, InventoryPath, LogicalPath};
use crate::types::{CommitInfo, RevisionNum, User, VersionNum};

/// The OCFL inventory, as it is serialized to `inventory.json`.
#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub id: String,
    #[serde(rename = "type")]
    pub type_declaration: String,
    pub digest_algorithm: DigestAlgorithm,
    pub head: VersionNum,
    pub content_directory: Option<String>,
    manifest: PathBiMap<ContentPath>,
    pub versions: BTreeMap<VersionNum, Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixity: Option<HashMap<String, HashMap<String, Vec<String>>>>,

    /// Path to the object root relative the storage root, using `/` separators. Not part of
    /// the serialized inventory; populated after load.
    #[serde(skip)]
    pub object_root: String,
    /// True if the inventory currently reflects the mutable-HEAD overlay rather than the last
    /// sealed version.
    #[serde(skip)]
    pub mutable_head: bool,
}

/// Builds a brand-new inventory for an object's first version.
pub struct InventoryBuilder {
    id: String,
    digest_algorithm: DigestAlgorithm,
    content_directory: String,
    object_root: String,
}

/// One version's metadata and inverse-indexed logical state.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Version {
    pub created: DateTime<Local>,
    state: PathBiMap<LogicalPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    #[serde(skip)]
    logical_dirs: OnceCell<HashSet<LogicalPath>>,
}

impl Inventory {
    pub fn builder(object_id: &str) -> InventoryBuilder {
        InventoryBuilder::new(object_id)
    }

    /// Begins a new successor version by copying the HEAD version's state. The caller mutates
    /// the returned inventory's HEAD version through the updater, then commits it.
    pub fn create_staging_head(&mut self) -> Result<()> {
        let version_num = self.head.next()?;
        let version = self.head_version().clone_staged();
        self.versions.insert(version_num, version);
        self.head = version_num;
        Ok(())
    }

    pub fn is_new(&self) -> bool {
        self.head.number == 1
    }

    pub fn head_version(&self) -> &Version {
        self.versions.get(&self.head).expect("HEAD version must exist")
    }

    pub fn head_version_mut(&mut self) -> &mut Version {
        self.versions
            .get_mut(&self.head)
            .expect("HEAD version must exist")
    }

    pub fn get_version(&self, version_num: VersionNum) -> Result<&Version> {
        self.versions
            .get(&version_num)
            .ok_or_else(|| not_found(&self.id, Some(version_num)))
    }

    pub fn remove_version(&mut self, version_num: VersionNum) -> Result<Version> {
        self.versions
            .remove(&version_num)
            .ok_or_else(|| not_found(&self.id, Some(version_num)))
    }

    pub fn contains_content_path(&self, content_path: &ContentPath) -> bool {
        self.manifest.contains_path(content_path)
    }

    /// Looks up the content path a digest is stored under, preferring the one under
    /// `version_num` (default HEAD) when a digest has several.
    pub fn content_path_for_digest(
        &self,
        digest: &HexDigest,
        version_num: Option<VersionNum>,
    ) -> Result<&Rc<ContentPath>> {
        let version_num = version_num.unwrap_or(self.head);

        match self.manifest.get_paths(digest) {
            Some(paths) => {
                let mut matches = Vec::new();

                for path in paths {
                    let as_str = path.as_ref().as_ref();
                    let version = if self.mutable_head && as_str.starts_with(MUTABLE_HEAD_EXT_DIR)
                    {
                        self.head
                    } else {
                        match as_str.find('/') {
                            Some(slash) => as_str[0..slash].try_into()?,
                            None => {
                                return Err(OcflError::CorruptObject {
                                    object_id: self.id.clone(),
                                    message: format!("malformed content path {}", as_str),
                                })
                            }
                        }
                    };

                    if version <= version_num {
                        matches.push(path);
                    }
                }

                matches.sort_unstable();

                matches.into_iter().next().ok_or_else(|| OcflError::CorruptObject {
                    object_id: self.id.clone(),
                    message: format!("digest {} is not mapped to any content path", digest),
                })
            }
            None => Err(OcflError::CorruptObject {
                object_id: self.id.clone(),
                message: format!("digest {} not found in manifest", digest),
            }),
        }
    }

    pub fn content_path_for_logical_path(
        &self,
        logical_path: &LogicalPath,
        version_num: Option<VersionNum>,
    ) -> Result<&Rc<ContentPath>> {
        let version_num = version_num.unwrap_or(self.head);
        let version = self.get_version(version_num)?;

        let digest = version
            .lookup_digest(logical_path)
            .ok_or_else(|| not_found_path(&self.id, version_num, logical_path.as_str()))?;

        self.content_path_for_digest(digest, Some(version_num))
    }

    /// Removes every content path added in HEAD whose digest is also reachable from an earlier
    /// version, or that has duplicate content paths for the same digest within HEAD. Called
    /// once per commit, after the updater has finished recording all changes.
    pub fn dedup_head(&mut self) -> Vec<Rc<ContentPath>> {
        let mut removed = Vec::new();
        let prefix = format!("{}/", self.head);

        let mut candidates: HashMap<Rc<HexDigest>, HashSet<Rc<ContentPath>>> = HashMap::new();

        for (digest, paths) in self.manifest.iter_id_paths() {
            if paths.len() > 1 {
                for path in paths {
                    if path.as_ref().as_ref().starts_with(&prefix) {
                        candidates
                            .entry(digest.clone())
                            .or_insert_with(HashSet::new)
                            .insert(path.clone());
                    }
                }
            }
        }

        for (digest, paths) in candidates {
            let total = self.manifest.get_paths(&digest).unwrap().len();

            if total == paths.len() {
                // every path for this digest was added in HEAD; keep one, drop the rest
                let mut iter = paths.into_iter().peekable();
                while let Some(path) = iter.next() {
                    if iter.peek().is_some() {
                        self.manifest.remove_path(&path);
                        removed.push(path);
                    }
                }
            } else {
                // an earlier version already has this content; HEAD's copies are pure duplicates
                for path in paths {
                    self.manifest.remove_path(&path);
                    removed.push(path);
                }
            }
        }

        removed
    }

    /// Binds `logical_path` to `digest` in the HEAD version's state, minting a fresh content
    /// path under HEAD if the digest has none yet.
    pub fn add_file_to_head(&mut self, digest: HexDigest, logical_path: LogicalPath) -> Result<()> {
        let digest_rc = match self.manifest.get_id_rc(&digest) {
            Some(digest_rc) => digest_rc.clone(),
            None => Rc::new(digest),
        };

        if !self.manifest.contains_id(&digest_rc) {
            let content_path = self.new_content_path_head(&logical_path)?;
            self.manifest.insert_rc(digest_rc.clone(), Rc::new(content_path));
        }

        self.head_version_mut().add_file(digest_rc, logical_path)
    }

    /// Binds `logical_path` to `digest`, always minting HEAD's own content path for it — used
    /// when the content was physically written under HEAD's content directory (the common
    /// "new file" case), as opposed to `reinstate_in_head`, which reuses an older content path.
    pub fn add_new_file_to_head(
        &mut self,
        digest: HexDigest,
        logical_path: LogicalPath,
    ) -> Result<()> {
        let digest_rc = match self.manifest.get_id_rc(&digest) {
            Some(digest_rc) => digest_rc.clone(),
            None => Rc::new(digest),
        };

        let content_path = self.new_content_path_head(&logical_path)?;
        if !self.manifest.contains_path(&content_path) {
            self.manifest.insert_rc(digest_rc.clone(), Rc::new(content_path));
        }

        self.head_version_mut().add_file(digest_rc, logical_path)
    }

    /// `renameFile`: removes `src` from HEAD and rebinds its digest to `dst`. No new content
    /// path is created.
    pub fn rename_in_head(&mut self, src: &LogicalPath, dst: LogicalPath) -> Result<()> {
        let head = self.head_version_mut();
        let digest = head
            .lookup_digest(src)
            .cloned()
            .ok_or_else(|| not_found_path(&self.id, self.head, src.as_str()))?;

        head.add_file(digest, dst)?;
        head.remove_file(src);
        Ok(())
    }

    /// `reinstateFile`: looks up the digest bound to `src_path` in `src_version`, and binds it
    /// to `dst_path` in HEAD. Reuses the source version's content path; no new one is minted.
    pub fn reinstate_in_head(
        &mut self,
        src_version_num: VersionNum,
        src_path: &LogicalPath,
        dst_path: LogicalPath,
    ) -> Result<()> {
        let src_version = self.get_version(src_version_num)?;
        let digest = src_version
            .lookup_digest(src_path)
            .cloned()
            .ok_or_else(|| not_found_path(&self.id, src_version_num, src_path.as_str()))?;

        self.head_version_mut().add_file(digest, dst_path)
    }

    /// `removeFile`: deletes `logical_path` from HEAD's state. If the path was itself added in
    /// HEAD (not inherited from an earlier version), its content path is removed from the
    /// manifest too, provided no other path still references that content path.
    pub fn remove_logical_path_from_head(&mut self, logical_path: &LogicalPath) -> Option<Rc<ContentPath>> {
        let removed_digest = self.head_version_mut().remove_file(logical_path)?.1;

        if let Ok(content_path) = self.new_content_path_head(logical_path) {
            if self.manifest.get_id(&content_path) == Some(&removed_digest) {
                return self.manifest.remove_path(&content_path).map(|(p, _)| p);
            }
        }

        None
    }

    pub fn new_content_path_head(&self, logical_path: &LogicalPath) -> Result<ContentPath> {
        self.new_content_path(self.head, logical_path)
    }

    pub fn new_content_path(
        &self,
        version_num: VersionNum,
        logical_path: &LogicalPath,
    ) -> Result<ContentPath> {
        self.new_content_path_for_segment(version_num, logical_path.as_str())
    }

    /// Mints a content path under a mutable-HEAD revision's content directory, as opposed to a
    /// normal version's.
    pub fn new_content_path_revision(
        &self,
        revision: RevisionNum,
        logical_path: &LogicalPath,
    ) -> Result<ContentPath> {
        self.new_content_path_for_segment_revision(revision, logical_path.as_str())
    }

    /// Mints a content path from an already-sanitized content segment rather than a logical
    /// path, for callers (the add-file pipeline) that ran the content path through a
    /// `LogicalPathMapper` first.
    pub fn new_content_path_for_segment(&self, version_num: VersionNum, segment: &str) -> Result<ContentPath> {
        format!("{}/{}/{}", version_num, self.defaulted_content_dir(), segment).try_into()
    }

    pub fn new_content_path_for_segment_revision(&self, revision: RevisionNum, segment: &str) -> Result<ContentPath> {
        format!(
            "{}/head/{}/{}/{}",
            MUTABLE_HEAD_EXT_DIR, self.defaulted_content_dir(), revision, segment
        )
        .try_into()
    }

    /// Binds `digest` to `content_path` in the manifest, reusing the existing digest entry when
    /// the digest already has other content paths. If `content_path` was already bound to a
    /// different digest, that stale association is replaced: `PathBiMap::insert_rc` detaches the
    /// path from its old digest before attaching it to the new one. Returns the shared
    /// `Rc<HexDigest>` for the caller to bind into a version's state.
    pub fn bind_digest(&mut self, digest: HexDigest, content_path: ContentPath) -> Rc<HexDigest> {
        let digest_rc = match self.manifest.get_id_rc(&digest) {
            Some(digest_rc) => digest_rc.clone(),
            None => Rc::new(digest),
        };

        self.manifest
            .insert_rc(digest_rc.clone(), Rc::new(content_path));

        digest_rc
    }

    /// Returns the digest's shared `Rc` if it already has at least one content path bound in the
    /// manifest, without minting or binding anything. Used by the add-file pipeline to detect
    /// duplicate content before writing any bytes.
    pub fn existing_digest_rc(&self, digest: &HexDigest) -> Option<Rc<HexDigest>> {
        self.manifest.get_id_rc(digest).cloned()
    }

    /// Manifest entries whose content path starts with `prefix`. Used by the version writer to
    /// find the content newly staged for HEAD (or a mutable-HEAD revision) to fixity-check it
    /// before installing.
    pub fn manifest_entries_under(&self, prefix: &str) -> Vec<(Rc<ContentPath>, Rc<HexDigest>)> {
        self.manifest
            .iter()
            .filter(|(path, _)| path.as_str().starts_with(prefix))
            .map(|(path, digest)| (path.clone(), digest.clone()))
            .collect()
    }

    /// Rewrites every manifest entry currently bound under the mutable-HEAD overlay so it
    /// instead lives under HEAD's own version content directory. Returns, for each rewritten
    /// entry, its path relative the overlay's content directory (e.g. `r3/sub/file.txt`) paired
    /// with its new, version-rooted content path -- the caller uses the former to find the
    /// bytes under the copied-out overlay and the latter to know where to put them. Only the
    /// manifest changes; no version's state references content paths directly, so nothing else
    /// needs rewriting. Called once, when folding a mutable-HEAD revision into a normal
    /// immutable version.
    pub fn promote_mutable_head_content(&mut self) -> Result<Vec<(String, ContentPath)>> {
        let mh_prefix = format!("{}/head/{}/", MUTABLE_HEAD_EXT_DIR, self.defaulted_content_dir());
        let head = self.head;

        let candidates: Vec<Rc<ContentPath>> = self
            .manifest
            .iter()
            .map(|(path, _)| path.clone())
            .filter(|path| path.as_ref().as_str().starts_with(&mh_prefix))
            .collect();

        let mut moves = Vec::with_capacity(candidates.len());

        for old_path in candidates {
            let rest = &old_path.as_ref().as_str()[mh_prefix.len()..];
            let segment = match rest.find('/') {
                Some(slash) => &rest[slash + 1..],
                None => {
                    return Err(OcflError::CorruptObject {
                        object_id: self.id.clone(),
                        message: format!("malformed mutable-HEAD content path {}", old_path),
                    })
                }
            };

            let new_path = self.new_content_path_for_segment(head, segment)?;

            let (_, digest) = self.manifest.remove_path(old_path.as_ref()).ok_or_else(|| {
                OcflError::CorruptObject {
                    object_id: self.id.clone(),
                    message: format!("content path {} missing from manifest", old_path),
                }
            })?;
            self.manifest.insert_rc(digest, Rc::new(new_path.clone()));

            moves.push((rest.to_string(), new_path));
        }

        Ok(moves)
    }

    /// Discards the mutable-HEAD version from in-memory state, rolling `head` back down to the
    /// last sealed version. Used by `purgeStagedChanges`, which removes the on-storage overlay
    /// but otherwise leaves the object untouched. A no-op if there is no mutable HEAD staged.
    pub fn discard_mutable_head(&mut self) -> Result<()> {
        if !self.mutable_head {
            return Ok(());
        }

        self.versions.remove(&self.head);
        self.head = self.head.previous()?;
        self.mutable_head = false;
        Ok(())
    }

    pub fn defaulted_content_dir(&self) -> &str {
        self.content_directory.as_deref().unwrap_or(DEFAULT_CONTENT_DIR)
    }

    /// A spot-check against the invariants in the data model section; not an exhaustive
    /// validator.
    pub fn validate(&self) -> Result<()> {
        if !self.versions.contains_key(&self.head) {
            return Err(OcflError::CorruptObject {
                object_id: self.id.clone(),
                message: format!("HEAD version {} was not found", self.head),
            });
        }

        let mut expected = VersionNum::v1();
        for version_num in self.versions.keys() {
            if *version_num != expected {
                return Err(OcflError::CorruptObject {
                    object_id: self.id.clone(),
                    message: format!(
                        "versions must be contiguous starting at v1; expected {} but found {}",
                        expected, version_num
                    ),
                });
            }
            expected = expected.next().unwrap_or(expected);
        }

        Ok(())
    }
}

impl InventoryBuilder {
    pub fn new(object_id: &str) -> Self {
        Self {
            id: object_id.to_string(),
            digest_algorithm: DigestAlgorithm::Sha512,
            content_directory: DEFAULT_CONTENT_DIR.to_string(),
            object_root: String::new(),
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

    pub fn with_object_root(mut self, object_root: impl Into<String>) -> Self {
        self.object_root = object_root.into();
        self
    }

    pub fn build(self) -> Result<Inventory> {
        let mut versions = BTreeMap::new();
        versions.insert(VersionNum::v1(), Version::new_staged());

        let inventory = Inventory {
            id: self.id,
            type_declaration: INVENTORY_TYPE.to_string(),
            digest_algorithm: self.digest_algorithm,
            head: VersionNum::v1(),
            content_directory: Some(self.content_directory),
            manifest: PathBiMap::new(),
            versions,
            fixity: None,
            object_root: self.object_root,
            mutable_head: false,
        };

        inventory.validate()?;
        Ok(inventory)
    }
}

impl Version {
    pub fn new_staged() -> Self {
        Self::staged_version(PathBiMap::new())
    }

    pub fn clone_staged(&self) -> Self {
        Self::staged_version(self.state.clone())
    }

    fn staged_version(state: PathBiMap<LogicalPath>) -> Self {
        Self {
            created: Local::now(),
            message: None,
            user: None,
            state,
            logical_dirs: OnceCell::default(),
        }
    }

    pub fn update_meta(&mut self, meta: CommitInfo, now: DateTime<Local>) {
        self.message = meta.message;
        self.user = meta
            .user_name
            .map(|name| User { name: Some(name), address: meta.user_address });
        self.created = meta.created.unwrap_or(now);
    }

    pub fn state_iter(&self) -> HashMapIter<'_, Rc<LogicalPath>, Rc<HexDigest>> {
        self.state.iter()
    }

    pub fn remove_state(&mut self) -> PathBiMap<LogicalPath> {
        self.logical_dirs = OnceCell::default();
        mem::replace(&mut self.state, PathBiMap::new())
    }

    pub fn lookup_digest(&self, logical_path: &LogicalPath) -> Option<&Rc<HexDigest>> {
        self.state.get_id(logical_path)
    }

    pub fn exists(&self, path: &LogicalPath) -> bool {
        self.is_file(path) || self.is_dir(path)
    }

    pub fn is_file(&self, path: &LogicalPath) -> bool {
        self.state.contains_path(path)
    }

    pub fn is_dir(&self, path: &LogicalPath) -> bool {
        self.get_logical_dirs().contains(path)
    }

    pub fn contains_digest(&self, digest: &HexDigest) -> bool {
        self.state.contains_id(digest)
    }

    /// A logical path conflicts with existing state if it, or any of its ancestors, is already
    /// in use as the other kind of entry (file vs. directory).
    pub fn validate_non_conflicting(&self, path: &LogicalPath) -> Result<()> {
        if self.is_dir(path) {
            return Err(OcflError::PathAlreadyExists(format!(
                "{} is already in use as a directory",
                path
            )));
        }

        for dir in create_logical_dirs(path) {
            if self.is_file(&dir) {
                return Err(OcflError::PathAlreadyExists(format!(
                    "{} is already in use as a file",
                    dir
                )));
            }
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Adds a logical path to the version, failing if it conflicts with an existing file or
    /// directory path. The caller is responsible for keeping the manifest in sync.
    pub(crate) fn add_file(&mut self, digest: Rc<HexDigest>, logical_path: LogicalPath) -> Result<()> {
        self.validate_non_conflicting(&logical_path)?;
        if let Some(dirs) = self.logical_dirs.get_mut() {
            dirs.extend(create_logical_dirs(&logical_path));
        }
        self.state.insert_rc(digest, Rc::new(logical_path));
        Ok(())
    }

    fn remove_file(&mut self, path: &LogicalPath) -> Option<(Rc<LogicalPath>, Rc<HexDigest>)> {
        self.logical_dirs = OnceCell::default();
        self.state.remove_path(path)
    }

    fn get_logical_dirs(&self) -> &HashSet<LogicalPath> {
        self.logical_dirs.get_or_init(|| {
            let mut dirs: HashSet<LogicalPath> = HashSet::with_capacity(self.state.len());
            for (path, _) in self.state.iter() {
                dirs.extend(create_logical_dirs(path));
            }
            dirs
        })
    }
}

fn create_logical_dirs(path: &LogicalPath) -> HashSet<LogicalPath> {
    let mut dirs = HashSet::new();

    let mut parent = path.parent();
    while !parent.as_str().is_empty() {
        let next = parent.parent();
        dirs.insert(parent);
        parent = next;
    }

    dirs
}
