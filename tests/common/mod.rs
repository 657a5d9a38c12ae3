#![allow(dead_code)]

use std::convert::TryFrom;
use std::io::Cursor;
use std::sync::Arc;

use assert_fs::TempDir;
use ocfl_core::layout::{HashedNTupleLayout, StorageLayout};
use ocfl_core::paths::LogicalPath;
use ocfl_core::OcflRepository;

pub fn logical(path: &str) -> LogicalPath {
    LogicalPath::try_from(path).unwrap()
}

pub fn cursor(bytes: &str) -> Cursor<Vec<u8>> {
    Cursor::new(bytes.as_bytes().to_vec())
}

/// A repository rooted in a fresh temp dir, using the default hashed-n-tuple layout. The
/// `TempDir` is returned alongside so callers can inspect the on-storage layout directly and so
/// it isn't dropped (and deleted) before the test finishes with it.
pub fn init_repo() -> (TempDir, OcflRepository) {
    let root = TempDir::new().unwrap();
    let layout: Arc<dyn StorageLayout> = Arc::new(HashedNTupleLayout::default());
    let repo = OcflRepository::init_fs(root.path(), layout).unwrap();
    (root, repo)
}
