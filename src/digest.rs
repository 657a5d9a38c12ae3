//! Streaming digest computation and fixity verification.

use core::{cmp, fmt};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::io;
use std::io::Read;

use blake2::digest::consts::{U20, U32, U48};
use blake2::{Blake2b, Blake2b512};
use digest::{Digest, DynDigest};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512, Sha512_256};
use strum_macros::{Display as EnumDisplay, EnumString};

use crate::error::{OcflError, Result};

type Blake2b160 = Blake2b<U20>;
type Blake2b256 = Blake2b<U32>;
type Blake2b384 = Blake2b<U48>;

/// The digest algorithms OCFL 1.1 recognizes.
#[derive(
    Deserialize, Serialize, Debug, Hash, Eq, PartialEq, Copy, Clone, EnumString, EnumDisplay,
)]
pub enum DigestAlgorithm {
    #[serde(rename = "md5")]
    #[strum(serialize = "md5")]
    Md5,
    #[serde(rename = "sha1")]
    #[strum(serialize = "sha1")]
    Sha1,
    #[serde(rename = "sha256")]
    #[strum(serialize = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    #[strum(serialize = "sha512")]
    Sha512,
    #[serde(rename = "sha512/256")]
    #[strum(serialize = "sha512/256")]
    Sha512_256,
    #[serde(rename = "blake2b-512")]
    #[strum(serialize = "blake2b-512")]
    Blake2b512,
    #[serde(rename = "blake2b-160")]
    #[strum(serialize = "blake2b-160")]
    Blake2b160,
    #[serde(rename = "blake2b-256")]
    #[strum(serialize = "blake2b-256")]
    Blake2b256,
    #[serde(rename = "blake2b-384")]
    #[strum(serialize = "blake2b-384")]
    Blake2b384,
}

impl DigestAlgorithm {
    /// The repository's primary digest algorithm must be one of these two, per the OCFL spec.
    pub fn is_valid_primary(&self) -> bool {
        matches!(self, DigestAlgorithm::Sha512 | DigestAlgorithm::Sha256)
    }

    /// Hashes the entirety of `data` and returns its hex encoded digest.
    pub fn hash_hex(&self, data: &mut impl Read) -> Result<HexDigest> {
        let mut hasher = self.reader(data);
        io::copy(&mut hasher, &mut io::sink())?;
        Ok(hasher.finalize_hex())
    }

    /// Wraps `reader` in a `DigestReader` that accumulates a digest as bytes pass through.
    pub fn reader<R: Read>(&self, reader: R) -> DigestReader<R> {
        DigestReader::new(self.new_digest(), reader)
    }

    /// Wraps `reader` in a `FixityCheckReader` that fails at end-of-stream if the accumulated
    /// digest does not match `expected`.
    pub fn fixity_reader<R: Read>(&self, reader: R, expected: HexDigest) -> FixityCheckReader<R> {
        FixityCheckReader::new(self.reader(reader), expected)
    }

    fn new_digest(&self) -> Box<dyn DynDigest> {
        match self {
            DigestAlgorithm::Md5 => Box::new(Md5::new()),
            DigestAlgorithm::Sha1 => Box::new(Sha1::new()),
            DigestAlgorithm::Sha256 => Box::new(Sha256::new()),
            DigestAlgorithm::Sha512 => Box::new(Sha512::new()),
            DigestAlgorithm::Sha512_256 => Box::new(Sha512_256::new()),
            DigestAlgorithm::Blake2b512 => Box::new(Blake2b512::new()),
            DigestAlgorithm::Blake2b160 => Box::new(Blake2b160::new()),
            DigestAlgorithm::Blake2b256 => Box::new(Blake2b256::new()),
            DigestAlgorithm::Blake2b384 => Box::new(Blake2b384::new()),
        }
    }
}

/// Reader wrapper that accumulates a digest over the bytes as they are read.
pub struct DigestReader<R: Read> {
    digest: Box<dyn DynDigest>,
    inner: R,
}

impl<R: Read> DigestReader<R> {
    pub fn new(digest: Box<dyn DynDigest>, reader: R) -> Self {
        Self {
            digest,
            inner: reader,
        }
    }

    /// Consumes the reader and returns the accumulated digest. Any bytes not yet read through
    /// this reader are not reflected in the result.
    pub fn finalize_hex(self) -> HexDigest {
        self.digest.finalize().to_vec().into()
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.inner.read(buf)?;
        if result > 0 {
            self.digest.update(&buf[0..result]);
        }
        Ok(result)
    }
}

/// A pass-through reader that verifies the accumulated digest matches an expected value once
/// the wrapped stream is exhausted. Every byte the consumer reads must flow through this
/// reader before `check_fixity()` is called, or the check is meaningless.
pub struct FixityCheckReader<R: Read> {
    inner: DigestReader<R>,
    expected: HexDigest,
}

impl<R: Read> FixityCheckReader<R> {
    pub fn new(inner: DigestReader<R>, expected: HexDigest) -> Self {
        Self { inner, expected }
    }

    /// Explicitly checks the digest accumulated so far against the expected value. This is
    /// normally invoked automatically when the stream reaches EOF, but callers that read in a
    /// way that may not observe EOF (e.g. reading an exact byte count) should call it directly.
    /// `path` is used only to label the error if the check fails.
    pub fn check_fixity(self, path: &str) -> Result<()> {
        let actual = self.inner.finalize_hex();
        if actual != self.expected {
            return Err(OcflError::FixityMismatch {
                path: path.to_string(),
                expected: self.expected.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

impl<R: Read> Read for FixityCheckReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// A digest encoded as a hex string. Comparisons and hashing are case-insensitive, as required
/// by the OCFL spec's treatment of hex-encoded digests.
#[derive(Deserialize, Serialize, Debug, Eq, Clone)]
pub struct HexDigest(String);

impl HexDigest {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Vec<u8>> for HexDigest {
    fn from(bytes: Vec<u8>) -> Self {
        Self(hex::encode(bytes))
    }
}

impl From<&str> for HexDigest {
    fn from(digest: &str) -> Self {
        Self(digest.to_string())
    }
}

impl From<String> for HexDigest {
    fn from(digest: String) -> Self {
        Self(digest)
    }
}

impl From<HexDigest> for String {
    fn from(digest: HexDigest) -> Self {
        digest.0
    }
}

impl AsRef<str> for HexDigest {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl Ord for HexDigest {
    /// Case-insensitive byte comparison, avoiding an intermediate lowercased allocation.
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.0.as_bytes();
        let right = other.0.as_bytes();
        let l = cmp::min(left.len(), right.len());

        for i in 0..l {
            match left[i].to_ascii_lowercase().cmp(&right[i].to_ascii_lowercase()) {
                Ordering::Equal => (),
                non_eq => return non_eq,
            }
        }

        left.len().cmp(&right.len())
    }
}

impl PartialOrd for HexDigest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HexDigest {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for HexDigest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl Display for HexDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
