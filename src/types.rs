//! Version numbers, revision numbers, commit metadata, and the injectable clock.

use core::fmt;
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{OcflError, Result};

static VERSION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^v\d+$"#).unwrap());
static REVISION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^r\d+$"#).unwrap());

/// An OCFL object version directory name, e.g. `v1` or `v0003`.
///
/// The zero-padding width is fixed the first time a version is minted for an object and must
/// be respected by every subsequent version.
#[derive(Deserialize, Serialize, Debug, Copy, Clone)]
#[serde(try_from = "&str")]
#[serde(into = "String")]
pub struct VersionNum {
    pub number: u32,
    pub width: u32,
}

impl VersionNum {
    pub fn new(number: u32) -> Self {
        Self { number, width: 0 }
    }

    pub fn with_width(number: u32, width: u32) -> Self {
        Self { number, width }
    }

    /// The first version of a newly created object.
    pub fn v1() -> Self {
        Self::new(1)
    }

    pub fn previous(&self) -> Result<VersionNum> {
        if self.number <= 1 {
            return Err(OcflError::IllegalState(
                "There is no version before v1".to_string(),
            ));
        }

        Ok(Self {
            number: self.number - 1,
            width: self.width,
        })
    }

    pub fn next(&self) -> Result<VersionNum> {
        let max = match self.width {
            0 => u32::MAX,
            w => (10u32.saturating_pow(w - 1)) - 1,
        };

        if self.number + 1 > max {
            return Err(OcflError::IllegalState(format!(
                "Version cannot be greater than {}",
                max
            )));
        }

        Ok(Self {
            number: self.number + 1,
            width: self.width,
        })
    }
}

impl TryFrom<&str> for VersionNum {
    type Error = OcflError;

    fn try_from(version: &str) -> Result<Self, Self::Error> {
        if !VERSION_REGEX.is_match(version) {
            return Err(OcflError::IllegalArgument(format!(
                "Invalid version {}",
                version
            )));
        }

        match version[1..].parse::<u32>() {
            Ok(num) if num >= 1 => {
                let width = match version.starts_with("v0") {
                    true => version.len() - 1,
                    false => 0,
                };

                Ok(Self {
                    number: num,
                    width: width as u32,
                })
            }
            _ => Err(OcflError::IllegalArgument(format!(
                "Invalid version {}",
                version
            ))),
        }
    }
}

impl TryFrom<u32> for VersionNum {
    type Error = OcflError;

    fn try_from(version: u32) -> Result<Self, Self::Error> {
        if version < 1 {
            return Err(OcflError::IllegalArgument(format!(
                "Invalid version number {}",
                version
            )));
        }

        Ok(Self {
            number: version,
            width: 0,
        })
    }
}

impl FromStr for VersionNum {
    type Err = OcflError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match VersionNum::try_from(s) {
            Ok(v) => Ok(v),
            Err(_) => VersionNum::try_from(u32::from_str(s).map_err(|_| {
                OcflError::IllegalArgument(format!("Invalid version number {}", s))
            })?),
        }
    }
}

impl Display for VersionNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "v{:0width$}", self.number, width = self.width as usize)
    }
}

impl From<VersionNum> for String {
    fn from(version_num: VersionNum) -> Self {
        version_num.to_string()
    }
}

impl PartialEq for VersionNum {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl Eq for VersionNum {}

impl Hash for VersionNum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.number.hash(state)
    }
}

impl PartialOrd for VersionNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionNum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

/// A mutable-HEAD revision directory name, e.g. `r1`. Revisions are never zero-padded; the
/// extension allocates them sequentially and they vanish once the mutable HEAD is committed.
#[derive(Deserialize, Serialize, Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[serde(try_from = "&str")]
#[serde(into = "String")]
pub struct RevisionNum(pub u32);

impl RevisionNum {
    pub fn r1() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl TryFrom<&str> for RevisionNum {
    type Error = OcflError;

    fn try_from(revision: &str) -> Result<Self, Self::Error> {
        if !REVISION_REGEX.is_match(revision) {
            return Err(OcflError::IllegalArgument(format!(
                "Invalid revision {}",
                revision
            )));
        }

        match revision[1..].parse::<u32>() {
            Ok(num) if num >= 1 => Ok(Self(num)),
            _ => Err(OcflError::IllegalArgument(format!(
                "Invalid revision {}",
                revision
            ))),
        }
    }
}

impl From<RevisionNum> for String {
    fn from(revision: RevisionNum) -> Self {
        revision.to_string()
    }
}

impl Display for RevisionNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl PartialOrd for RevisionNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RevisionNum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// The user attributed to a version, per the OCFL inventory `user` block.
#[derive(Deserialize, Serialize, Debug, Eq, PartialEq, Clone)]
pub struct User {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Caller-supplied metadata for a commit. All fields are optional; `created` defaults to the
/// current time via the repository's `Clock` when absent.
#[derive(Debug, Default, Eq, PartialEq, Clone)]
pub struct CommitInfo {
    pub user_name: Option<String>,
    pub user_address: Option<String>,
    pub message: Option<String>,
    pub created: Option<DateTime<Local>>,
}

impl CommitInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, name: impl Into<String>, address: Option<String>) -> Self {
        self.user_name = Some(name.into());
        self.user_address = address;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Abstracts the wall clock so tests can supply deterministic, injectable timestamps instead
/// of observing real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

/// The production `Clock`, backed by `chrono::Local::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Local>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_zero_padded_version() {
        let version: VersionNum = "v0003".try_into().unwrap();
        assert_eq!(3, version.number);
        assert_eq!(4, version.width);
        assert_eq!("v0003", version.to_string());
    }

    #[test]
    fn parses_unpadded_version() {
        let version: VersionNum = "v3".try_into().unwrap();
        assert_eq!(3, version.number);
        assert_eq!(0, version.width);
        assert_eq!("v3", version.to_string());
    }

    #[test]
    fn rejects_invalid_version() {
        assert!(VersionNum::try_from("v0").is_err());
        assert!(VersionNum::try_from("1").is_err());
        assert!(VersionNum::try_from("vx").is_err());
    }

    #[test]
    fn version_ordering_ignores_width() {
        let a: VersionNum = "v1".try_into().unwrap();
        let b: VersionNum = "v02".try_into().unwrap();
        assert!(a < b);
    }

    #[test]
    fn parses_revision() {
        let revision: RevisionNum = "r12".try_into().unwrap();
        assert_eq!(12, revision.0);
        assert_eq!("r12", revision.to_string());
    }

    #[test]
    fn revision_next_increments() {
        let revision = RevisionNum::r1();
        assert_eq!(RevisionNum(2), revision.next());
    }
}
