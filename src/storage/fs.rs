//! The filesystem `Storage` implementation: the one concrete backend this crate ships.

use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use log::warn;
use walkdir::WalkDir;

use crate::error::{MultiError, OcflError, Result};
use crate::storage::{Listing, Storage};

/// True if the host's path separator is `\`, i.e. Windows.
const BACKSLASH_SEPARATOR: bool = std::path::MAIN_SEPARATOR == '\\';

fn to_forward_slash(path: &str) -> Cow<'_, str> {
    if BACKSLASH_SEPARATOR && path.contains('\\') {
        Cow::Owned(path.replace('\\', "/"))
    } else {
        Cow::Borrowed(path)
    }
}

fn dir_is_empty(dir: impl AsRef<Path>) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

fn is_object_root(path: impl AsRef<Path>) -> io::Result<bool> {
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_file()
            && entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.starts_with("0=ocfl_object_"))
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A `Storage` backed by a directory on the local filesystem. Every path the trait accepts is
/// `/`-separated and relative the storage root; this implementation joins it onto `storage_root`
/// and lets the OS translate separators.
pub struct FsStorage {
    storage_root: PathBuf,
}

impl FsStorage {
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        Self {
            storage_root: storage_root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.storage_root.join(path)
    }
}

impl Storage for FsStorage {
    fn list_directory(&self, path: &str) -> Result<Vec<Listing<'static>>> {
        let root = self.resolve(path);

        let entries = fs::read_dir(&root).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                OcflError::NotFound(format!("directory {}", path))
            } else {
                e.into()
            }
        })?;

        let mut listings = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type()?;

            listings.push(if file_type.is_file() {
                Listing::File(Cow::Owned(name))
            } else if file_type.is_dir() {
                Listing::Directory(Cow::Owned(name))
            } else {
                Listing::Other(Cow::Owned(name))
            });
        }

        Ok(listings)
    }

    fn list_recursive(&self, path: &str) -> Result<Vec<Listing<'static>>> {
        let root = self.resolve(path);

        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut listings = Vec::new();

        for entry in WalkDir::new(&root) {
            let entry = entry?;

            if entry.path() == root {
                continue;
            }

            let relative = to_forward_slash(
                entry
                    .path()
                    .strip_prefix(&root)
                    .expect("walkdir entry under root")
                    .to_string_lossy()
                    .as_ref(),
            )
            .into_owned();

            if entry.file_type().is_file() {
                listings.push(Listing::File(Cow::Owned(relative)));
            } else if entry.file_type().is_dir() {
                if dir_is_empty(entry.path())? {
                    listings.push(Listing::Directory(Cow::Owned(relative)));
                }
            } else {
                listings.push(Listing::Other(Cow::Owned(relative)));
            }
        }

        Ok(listings)
    }

    fn iterate_objects(&self) -> Result<Vec<String>> {
        let mut roots = Vec::new();

        for entry in WalkDir::new(&self.storage_root)
            .into_iter()
            .filter_entry(|e| e.file_type().is_dir())
        {
            let entry = entry?;

            if is_object_root(entry.path())? {
                let relative = to_forward_slash(
                    entry
                        .path()
                        .strip_prefix(&self.storage_root)
                        .expect("walkdir entry under root")
                        .to_string_lossy()
                        .as_ref(),
                )
                .into_owned();
                roots.push(relative);
            }
        }

        Ok(roots)
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path).is_file())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = File::open(self.resolve(path)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                OcflError::NotFound(format!("file {}", path))
            } else {
                e.into()
            }
        })?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn write(&self, path: &str, bytes: &[u8], _media_type: Option<&str>) -> Result<()> {
        let destination = self.resolve(path);

        if destination.exists() {
            return Err(OcflError::AlreadyExists(path.to_string()));
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&destination)?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn create_directories(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn copy_directory_out_of(&self, src: &str, dst_local: &Path) -> Result<()> {
        copy_dir_recursive(&self.resolve(src), dst_local)
    }

    fn copy_file_into(&self, src_local: &Path, dst: &str) -> Result<()> {
        let destination = self.resolve(dst);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src_local, destination)?;
        Ok(())
    }

    fn copy_file_internal(&self, src: &str, dst: &str) -> Result<()> {
        let destination = self.resolve(dst);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.resolve(src), destination)?;
        Ok(())
    }

    fn move_directory_into(&self, src_local: &Path, dst: &str) -> Result<()> {
        let destination = self.resolve(dst);

        if destination.exists() {
            return Err(OcflError::AlreadyExists(dst.to_string()));
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::rename(src_local, destination)?;
        Ok(())
    }

    fn move_directory_internal(&self, src: &str, dst: &str) -> Result<()> {
        let destination = self.resolve(dst);

        if destination.exists() {
            return Err(OcflError::AlreadyExists(dst.to_string()));
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::rename(self.resolve(src), destination)?;
        Ok(())
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        fs::remove_file(self.resolve(path))?;
        Ok(())
    }

    fn delete_files(&self, paths: &[&str]) -> Result<()> {
        let mut failures = Vec::new();

        for path in paths {
            if let Err(e) = fs::remove_file(self.resolve(path)) {
                warn!("Failed to delete {}: {}", path, e);
                failures.push(format!("{}: {}", path, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OcflError::Wrapped(Box::new(MultiError(failures))))
        }
    }

    fn delete_directory(&self, path: &str) -> Result<()> {
        fs::remove_dir_all(self.resolve(path))?;
        Ok(())
    }

    fn delete_empty_dirs_down(&self, path: &str) -> Result<()> {
        let root = self.resolve(path);
        if !root.exists() {
            return Ok(());
        }

        for entry in WalkDir::new(&root).contents_first(true) {
            let entry = entry?;
            if entry.file_type().is_dir() && dir_is_empty(entry.path())? {
                fs::remove_dir(entry.path())?;
            }
        }

        Ok(())
    }

    fn delete_empty_dirs_up(&self, path: &str) -> Result<()> {
        let mut current = self.resolve(path);

        while current != self.storage_root && current.is_dir() && dir_is_empty(&current)? {
            fs::remove_dir(&current)?;
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(())
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let dst_path = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path)?;
        } else {
            fs::copy(entry.path(), dst_path)?;
        }
    }

    Ok(())
}
