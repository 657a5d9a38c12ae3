//! Abstract byte-level storage capability the rest of the crate is built against. The
//! filesystem implementation in [`fs`] is the only concrete implementer this crate ships; an
//! object-store backend is a second implementer the trait leaves room for.

pub mod fs;

use std::borrow::Cow;

use crate::error::Result;

/// One entry returned by [`Storage::list_directory`]/[`Storage::list_recursive`].
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub enum Listing<'a> {
    File(Cow<'a, str>),
    Directory(Cow<'a, str>),
    Other(Cow<'a, str>),
}

impl<'a> Listing<'a> {
    pub fn path(&self) -> &str {
        match self {
            Listing::File(path) => path,
            Listing::Directory(path) => path,
            Listing::Other(path) => path,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Listing::File(_))
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Listing::Directory(_))
    }
}

/// Abstracts byte-level operations over a hierarchical namespace rooted at the storage root.
/// `/` must be used as the path separator regardless of the host platform; implementers are
/// responsible for translating to their native separator.
pub trait Storage: Send + Sync {
    /// Lists the immediate children of `path`, one level deep. Fails with `NotFound` if `path`
    /// does not exist.
    fn list_directory(&self, path: &str) -> Result<Vec<Listing<'static>>>;

    /// Lists every file and every *empty* directory reachable under `path`. Non-empty
    /// directories are not themselves returned; they're implied by their file contents. Returns
    /// an empty vector if `path` does not exist.
    fn list_recursive(&self, path: &str) -> Result<Vec<Listing<'static>>>;

    /// Returns the storage-root-relative path of every OCFL object root under the storage root.
    /// An object root is any directory containing a `0=ocfl_object_*` namaste file. The scan is
    /// finite and not restartable; mutating the repository while iterating is unsupported.
    fn iterate_objects(&self) -> Result<Vec<String>>;

    fn file_exists(&self, path: &str) -> Result<bool>;

    fn read(&self, path: &str) -> Result<Vec<u8>>;

    fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Writes `bytes` to `path`, failing with `AlreadyExists` if the destination is already
    /// present. Atomic with respect to readers: partial contents are never observable.
    /// `media_type` is advisory; the filesystem backend ignores it.
    fn write(&self, path: &str, bytes: &[u8], media_type: Option<&str>) -> Result<()>;

    fn create_directories(&self, path: &str) -> Result<()>;

    /// Copies a local filesystem directory tree into the storage namespace at `dst`.
    fn copy_directory_out_of(&self, src: &str, dst_local: &std::path::Path) -> Result<()>;

    fn copy_file_into(&self, src_local: &std::path::Path, dst: &str) -> Result<()>;

    fn copy_file_internal(&self, src: &str, dst: &str) -> Result<()>;

    /// Moves a local filesystem directory tree into the storage namespace at `dst`, failing
    /// with `AlreadyExists` if `dst` already exists.
    fn move_directory_into(&self, src_local: &std::path::Path, dst: &str) -> Result<()>;

    /// Moves a directory within the storage namespace, failing with `AlreadyExists` if `dst`
    /// already exists. Should be rename-equivalent when the backend allows it.
    fn move_directory_internal(&self, src: &str, dst: &str) -> Result<()>;

    fn delete_file(&self, path: &str) -> Result<()>;

    /// Deletes every path in `paths`, best-effort: failures are collected and reported together
    /// rather than aborting on the first one.
    fn delete_files(&self, paths: &[&str]) -> Result<()>;

    fn delete_directory(&self, path: &str) -> Result<()>;

    /// Deletes every empty directory at or below `path`, deepest first.
    fn delete_empty_dirs_down(&self, path: &str) -> Result<()>;

    /// Deletes `path` if empty, then walks up deleting newly-empty parents, stopping at (and
    /// never deleting) the storage root.
    fn delete_empty_dirs_up(&self, path: &str) -> Result<()>;
}
