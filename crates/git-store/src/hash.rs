//! Object identifiers for sha1 and sha256 repositories.

use std::fmt;

use sha1::Digest;

use crate::errors::{GitError, Result};

/// Hash algorithm of a repository, chosen from `extensions.objectformat`
/// at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Sha1,
    Sha256,
}

impl HashKind {
    /// Raw digest width in bytes.
    pub const fn len(self) -> usize {
        match self {
            HashKind::Sha1 => 20,
            HashKind::Sha256 => 32,
        }
    }

    pub const fn hex_len(self) -> usize {
        self.len() * 2
    }

    pub fn digest(self, data: &[u8]) -> ObjectId {
        let mut hasher = Hasher::new(self);
        hasher.update(data);
        hasher.finalize()
    }
}

/// Incremental hasher producing an [`ObjectId`]; used for pack trailers where
/// the input is streamed.
pub enum Hasher {
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
}

impl Hasher {
    pub fn new(kind: HashKind) -> Self {
        match kind {
            HashKind::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            HashKind::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> ObjectId {
        match self {
            Hasher::Sha1(h) => ObjectId::from_raw(&h.finalize()),
            Hasher::Sha256(h) => ObjectId::from_raw(&h.finalize()),
        }
    }
}

/// A fixed-width object identifier: 20 bytes (sha1) or 32 bytes (sha256).
/// Compares by raw bytes; displays as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    len: u8,
    bytes: [u8; 32],
}

impl ObjectId {
    fn from_raw(digest: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..digest.len()].copy_from_slice(digest);
        ObjectId {
            len: digest.len() as u8,
            bytes,
        }
    }

    /// Builds an id from raw digest bytes; the length must be one of the two
    /// supported widths.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        match raw.len() {
            20 | 32 => Ok(Self::from_raw(raw)),
            n => Err(GitError::Unsupported(format!("hash length {n}"))),
        }
    }

    /// Parses a 40- or 64-character hex string. Any other length or a
    /// non-hex character is rejected.
    pub fn from_hex(s: &str) -> Result<Self> {
        match s.len() {
            40 | 64 => {}
            n => {
                return Err(GitError::InvalidArgument(format!(
                    "hash hex length {n}: {s:?}"
                )));
            }
        }
        let raw = hex::decode(s)
            .map_err(|_| GitError::InvalidArgument(format!("invalid hash hex: {s:?}")))?;
        Ok(Self::from_raw(&raw))
    }

    /// The all-zero id, used on the wire for "absent" in push commands.
    pub fn zero(kind: HashKind) -> Self {
        ObjectId {
            len: kind.len() as u8,
            bytes: [0u8; 32],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn kind(&self) -> HashKind {
        if self.len as usize == 32 {
            HashKind::Sha256
        } else {
            HashKind::Sha1
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}
