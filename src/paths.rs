//! Logical and content path types, and the collaborator contracts that sanitize them.

use core::fmt;
use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::Split;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

use crate::error::{OcflError, Result};

/// Shared behavior of [`LogicalPath`] and [`ContentPath`]: both are `/`-separated, relative,
/// `.`/`..`-free path strings, just scoped to different namespaces.
pub trait InventoryPath: Sized {
    fn parts(&self) -> Split<'_, char>;

    fn parent(&self) -> Self;

    /// The part of the path after the final `/`, or the entire path if there is none.
    fn filename(&self) -> &str;

    fn resolve(&self, other: &Self) -> Self;

    fn ends_with(&self, suffix: &str) -> bool;

    fn starts_with(&self, prefix: &str) -> bool;

    fn as_path(&self) -> &Path;

    fn as_str(&self) -> &str;

    fn is_empty(&self) -> bool;
}

#[derive(Deserialize, Serialize, Debug, Eq, Ord, PartialOrd, PartialEq, Hash, Clone)]
struct InventoryPathInner(String);

/// A path to a file as it appears in a version's logical state map. Logical paths are not
/// sanitized; the full range of Unicode is permitted, subject only to the `.`/`..`/empty-segment
/// ban shared with content paths.
#[derive(Deserialize, Serialize, Debug, Eq, Ord, PartialOrd, PartialEq, Hash, Clone)]
#[serde(transparent)]
pub struct LogicalPath {
    inner: InventoryPathInner,
}

/// A path to a file under a version (or mutable-HEAD revision) content directory, relative the
/// object root. Unlike logical paths, content paths must already be storage-safe.
#[derive(Debug, Eq, Ord, PartialOrd, PartialEq, Hash, Clone)]
pub struct ContentPath {
    inner: InventoryPathInner,
}

impl InventoryPath for InventoryPathInner {
    fn parts(&self) -> Split<'_, char> {
        self.0.split('/')
    }

    fn parent(&self) -> Self {
        match self.0.rfind('/') {
            Some(last_slash) => Self(self.0.as_str()[0..last_slash].into()),
            None => Self(String::new()),
        }
    }

    fn filename(&self) -> &str {
        match self.0.rfind('/') {
            Some(last_slash) => &self.0.as_str()[last_slash + 1..],
            None => self.0.as_str(),
        }
    }

    fn resolve(&self, other: &Self) -> Self {
        if self.0.is_empty() {
            other.clone()
        } else {
            Self(format!("{}/{}", self.0, other.0))
        }
    }

    fn ends_with(&self, suffix: &str) -> bool {
        self.0.ends_with(suffix)
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    fn as_path(&self) -> &Path {
        self.0.as_ref()
    }

    fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

macro_rules! delegate_inventory_path {
    ($ty:ty) => {
        impl InventoryPath for $ty {
            fn parts(&self) -> Split<'_, char> {
                self.inner.parts()
            }

            fn parent(&self) -> Self {
                Self {
                    inner: self.inner.parent(),
                }
            }

            fn filename(&self) -> &str {
                self.inner.filename()
            }

            fn resolve(&self, other: &Self) -> Self {
                Self {
                    inner: self.inner.resolve(&other.inner),
                }
            }

            fn ends_with(&self, suffix: &str) -> bool {
                self.inner.ends_with(suffix)
            }

            fn starts_with(&self, prefix: &str) -> bool {
                self.inner.starts_with(prefix)
            }

            fn as_path(&self) -> &Path {
                self.inner.as_path()
            }

            fn as_str(&self) -> &str {
                self.inner.as_str()
            }

            fn is_empty(&self) -> bool {
                self.inner.is_empty()
            }
        }
    };
}

delegate_inventory_path!(LogicalPath);
delegate_inventory_path!(ContentPath);

fn validate_parts(value: &str) -> Result<&str> {
    let trimmed = value.trim_start_matches('/').trim_end_matches('/');

    if !trimmed.is_empty() {
        let has_illegal_part = trimmed
            .split('/')
            .any(|part| part == "." || part == ".." || part.is_empty());

        if has_illegal_part {
            return Err(OcflError::InvalidPath {
                path: value.to_string(),
                message: "paths may not contain '.', '..', or empty segments".to_string(),
            });
        }
    }

    Ok(trimmed)
}

impl TryFrom<&str> for InventoryPathInner {
    type Error = OcflError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(Self(validate_parts(value)?.to_string()))
    }
}

macro_rules! delegate_try_from {
    ($ty:ty) => {
        impl TryFrom<&str> for $ty {
            type Error = OcflError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Ok(Self {
                    inner: InventoryPathInner::try_from(value)?,
                })
            }
        }

        impl TryFrom<String> for $ty {
            type Error = OcflError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.as_str().try_into()
            }
        }

        impl TryFrom<&String> for $ty {
            type Error = OcflError;

            fn try_from(value: &String) -> Result<Self, Self::Error> {
                value.as_str().try_into()
            }
        }

        impl TryFrom<Cow<'_, str>> for $ty {
            type Error = OcflError;

            fn try_from(value: Cow<'_, str>) -> Result<Self, Self::Error> {
                value.as_ref().try_into()
            }
        }

        impl From<$ty> for String {
            fn from(path: $ty) -> Self {
                path.inner.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                self.inner.as_ref()
            }
        }

        impl AsRef<Path> for $ty {
            fn as_ref(&self) -> &Path {
                self.inner.as_path()
            }
        }

        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.inner.0)
            }
        }
    };
}

impl AsRef<str> for InventoryPathInner {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

delegate_try_from!(LogicalPath);
delegate_try_from!(ContentPath);

impl Serialize for ContentPath {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentPath {
    fn deserialize<D>(deserializer: D) -> std::result::Result<ContentPath, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ContentPath::try_from(s).map_err(serde::de::Error::custom)
    }
}

/// Maps a logical path to a storage-safe path segment, and back. The default implementation
/// percent-encodes characters Windows file systems reject; the identity mapping is unsafe in
/// general but may be appropriate for storage backends with no filename restrictions.
pub trait LogicalPathMapper: Send + Sync {
    fn to_content_segment(&self, logical: &LogicalPath) -> String;
}

/// Percent-encodes the handful of bytes Windows forbids in file names (`<>:"|?*` and control
/// characters), leaving everything else, including `/` segment separators, untouched.
const WINDOWS_UNSAFE: &AsciiSet = &CONTROLS
    .add(b'<')
    .add(b'>')
    .add(b':')
    .add(b'"')
    .add(b'|')
    .add(b'?')
    .add(b'*');

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsSafeLogicalPathMapper;

impl LogicalPathMapper for WindowsSafeLogicalPathMapper {
    fn to_content_segment(&self, logical: &LogicalPath) -> String {
        logical
            .parts()
            .map(|part| utf8_percent_encode(part, WINDOWS_UNSAFE).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Validates that a content-relative path segment is safe to create on the target storage
/// before a content path is ever minted from it.
pub trait ContentPathConstraintProcessor: Send + Sync {
    fn validate(&self, segment: &str) -> Result<()>;
}

const MAX_SEGMENT_BYTES: usize = 255;

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContentPathConstraintProcessor;

impl ContentPathConstraintProcessor for DefaultContentPathConstraintProcessor {
    fn validate(&self, segment: &str) -> Result<()> {
        for part in segment.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(OcflError::InvalidPath {
                    path: segment.to_string(),
                    message: "path segments may not be empty, '.', or '..'".to_string(),
                });
            }

            if part.len() > MAX_SEGMENT_BYTES {
                return Err(OcflError::InvalidPath {
                    path: segment.to_string(),
                    message: format!(
                        "path segment '{}' exceeds {} bytes",
                        part, MAX_SEGMENT_BYTES
                    ),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_trims_leading_trailing_slashes() {
        let path: LogicalPath = "/foo/bar/baz/".try_into().unwrap();
        assert_eq!("foo/bar/baz", path.as_str());
    }

    #[test]
    fn root_path_is_empty() {
        let path: LogicalPath = "/".try_into().unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(LogicalPath::try_from("foo//bar").is_err());
    }

    #[test]
    fn rejects_dot_segment() {
        assert!(LogicalPath::try_from("foo/./bar").is_err());
    }

    #[test]
    fn rejects_dot_dot_segment() {
        assert!(LogicalPath::try_from("../foo").is_err());
    }

    #[test]
    fn filename_and_parent() {
        let path: LogicalPath = "foo/bar/baz.txt".try_into().unwrap();
        assert_eq!("baz.txt", path.filename());
        assert_eq!("foo/bar", path.parent().as_str());
    }

    #[test]
    fn windows_safe_mapper_encodes_forbidden_characters() {
        let mapper = WindowsSafeLogicalPathMapper;
        let path: LogicalPath = "a/b:c?.txt".try_into().unwrap();
        assert_eq!("a/b%3Ac%3F.txt", mapper.to_content_segment(&path));
    }

    #[test]
    fn windows_safe_mapper_leaves_unicode_alone() {
        let mapper = WindowsSafeLogicalPathMapper;
        let path: LogicalPath = "café/日本語.txt".try_into().unwrap();
        assert_eq!("café/日本語.txt", mapper.to_content_segment(&path));
    }

    #[test]
    fn constraint_processor_rejects_long_segment() {
        let processor = DefaultContentPathConstraintProcessor;
        let long = "a".repeat(256);
        assert!(processor.validate(&long).is_err());
    }

    #[test]
    fn constraint_processor_accepts_normal_segment() {
        let processor = DefaultContentPathConstraintProcessor;
        assert!(processor.validate("foo/bar.txt").is_ok());
    }
}
