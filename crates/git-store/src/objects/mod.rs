//! Object model and the commit/tree/tag codecs.

use bytes::Bytes;

use crate::errors::{GitError, Result};
use crate::hash::{HashKind, Hasher, ObjectId};

pub mod commit;
pub mod tag;
pub mod tree;

pub use commit::{Commit, Signature};
pub use tag::Tag;
pub use tree::{EntryKind, Tree, TreeEntry};

/// The four storable object kinds. Pack entries additionally use codes 6
/// (OFS_DELTA) and 7 (REF_DELTA), which resolve to one of these; code 5 is
/// reserved and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
            ObjectType::Tag => "tag",
        }
    }

    pub fn from_name(name: &[u8]) -> Result<Self> {
        match name {
            b"commit" => Ok(ObjectType::Commit),
            b"tree" => Ok(ObjectType::Tree),
            b"blob" => Ok(ObjectType::Blob),
            b"tag" => Ok(ObjectType::Tag),
            other => Err(GitError::InvalidData(format!(
                "unknown object type {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    pub fn pack_code(self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
        }
    }

    pub fn from_pack_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            other => Err(GitError::Unsupported(format!("pack object kind {other}"))),
        }
    }
}

/// A decoded object: its kind plus the payload without the
/// `"<type> <len>\0"` storage header.
#[derive(Debug, Clone)]
pub struct ObjectData {
    pub kind: ObjectType,
    pub data: Bytes,
}

impl ObjectData {
    pub fn new(kind: ObjectType, data: impl Into<Bytes>) -> Self {
        ObjectData {
            kind,
            data: data.into(),
        }
    }
}

/// The `"<type> <len>\0"` header prepended for hashing and loose storage.
pub fn loose_header(kind: ObjectType, len: usize) -> Vec<u8> {
    format!("{} {len}\0", kind.as_str()).into_bytes()
}

/// Splits an inflated loose buffer into its declared type and payload.
pub fn split_loose(inflated: &[u8]) -> Result<(ObjectType, &[u8])> {
    let nul = inflated
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| GitError::InvalidData("loose object missing header terminator".into()))?;
    let header = &inflated[..nul];
    let space = header
        .iter()
        .position(|b| *b == b' ')
        .ok_or_else(|| GitError::InvalidData("malformed loose object header".into()))?;
    let kind = ObjectType::from_name(&header[..space])?;
    let declared: usize = std::str::from_utf8(&header[space + 1..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| GitError::InvalidData("malformed loose object length".into()))?;
    let payload = &inflated[nul + 1..];
    if payload.len() != declared {
        return Err(GitError::InvalidData(format!(
            "loose object length mismatch: header says {declared}, payload is {}",
            payload.len()
        )));
    }
    Ok((kind, payload))
}

/// Content address of an object: the repo hash over header + payload.
pub fn object_id(hash: HashKind, kind: ObjectType, payload: &[u8]) -> ObjectId {
    let mut hasher = Hasher::new(hash);
    hasher.update(&loose_header(kind, payload.len()));
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_round_trip() {
        let mut buf = loose_header(ObjectType::Blob, 5);
        buf.extend_from_slice(b"hello");
        let (kind, payload) = split_loose(&buf).unwrap();
        assert_eq!(kind, ObjectType::Blob);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn split_rejects_length_mismatch() {
        let mut buf = loose_header(ObjectType::Blob, 3);
        buf.extend_from_slice(b"hello");
        assert!(split_loose(&buf).is_err());
    }

    #[test]
    fn known_blob_id() {
        // `echo -n "hello world" | git hash-object --stdin`
        let id = object_id(HashKind::Sha1, ObjectType::Blob, b"hello world");
        assert_eq!(id.to_string(), "95d09f2b10159347eece71399a7e2e907ea3df4f");
    }

    #[test]
    fn reserved_pack_code_is_rejected() {
        assert!(matches!(
            ObjectType::from_pack_code(5),
            Err(GitError::Unsupported(_))
        ));
    }
}
