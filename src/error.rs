use core::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::{error, io};

use thiserror::Error;

use crate::types::VersionNum;

/// The crate-wide result alias.
pub type Result<T, E = OcflError> = core::result::Result<T, E>;

/// The error taxonomy consumed by every public operation in this crate.
///
/// Every variant corresponds to a named error in the design's error catalog. Variants that
/// the design calls "programmer error" (`IllegalArgument`, `IllegalState`, `Closed`) exist
/// alongside the taxonomy so misuse can be distinguished from legitimate repository state.
#[derive(Error)]
pub enum OcflError {
    #[error("Object {object_id} is corrupt: {message}")]
    CorruptObject { object_id: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Object {object_id} was concurrently modified; expected HEAD {expected} but found {actual}")]
    ObjectOutOfSync {
        object_id: String,
        expected: VersionNum,
        actual: VersionNum,
    },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid path {path}: {message}")]
    InvalidPath { path: String, message: String },

    #[error("Path already exists in version: {0}")]
    PathAlreadyExists(String),

    #[error("Fixity mismatch for {path}: expected {expected} but computed {actual}")]
    FixityMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Timed out after {0:?} waiting to acquire a lock on object {1}")]
    LockTimeout(std::time::Duration, String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("The repository is closed")]
    Closed,

    #[error("{0}")]
    StorageIO(String),

    #[error("{0}")]
    Wrapped(Box<dyn error::Error + Send + Sync>),
}

/// Constructs an `OcflError::NotFound` for an object, optionally scoped to a version.
pub fn not_found(object_id: &str, version_num: Option<VersionNum>) -> OcflError {
    match version_num {
        Some(version) => OcflError::NotFound(format!("object {} version {}", object_id, version)),
        None => OcflError::NotFound(format!("object {}", object_id)),
    }
}

/// Constructs an `OcflError::NotFound` for a logical path within a specific version.
pub fn not_found_path(object_id: &str, version_num: VersionNum, path: &str) -> OcflError {
    OcflError::NotFound(format!(
        "path {} in object {} version {}",
        path, object_id, version_num
    ))
}

impl Debug for OcflError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl From<io::Error> for OcflError {
    fn from(e: io::Error) -> Self {
        OcflError::StorageIO(e.to_string())
    }
}

impl From<serde_json::Error> for OcflError {
    fn from(e: serde_json::Error) -> Self {
        OcflError::Wrapped(Box::new(e))
    }
}

impl From<walkdir::Error> for OcflError {
    fn from(e: walkdir::Error) -> Self {
        OcflError::StorageIO(e.to_string())
    }
}

/// An aggregation of multiple failures encountered while executing a best-effort batch
/// operation, such as `Storage::delete_files`.
#[derive(Debug)]
pub struct MultiError(pub Vec<String>);

impl Display for MultiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}

impl error::Error for MultiError {}
