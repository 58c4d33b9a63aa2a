//! Tree object codec and the Git tree-ordering rule.

use crate::errors::{GitError, Result};
use crate::hash::{HashKind, ObjectId};

pub const MODE_BLOB: u32 = 0o100644;
pub const MODE_BLOB_EXECUTABLE: u32 = 0o100755;
pub const MODE_SYMLINK: u32 = 0o120000;
pub const MODE_TREE: u32 = 0o040000;
pub const MODE_SUBMODULE: u32 = 0o160000;

/// Entry kind derived from the POSIX mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Symlink,
    Tree,
    Submodule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub mode: u32,
    pub oid: ObjectId,
}

impl TreeEntry {
    pub fn kind(&self) -> EntryKind {
        match self.mode {
            MODE_TREE => EntryKind::Tree,
            MODE_SYMLINK => EntryKind::Symlink,
            MODE_SUBMODULE => EntryKind::Submodule,
            _ => EntryKind::Blob,
        }
    }

    /// Git orders tree entries by name bytes, with directory names compared
    /// as if they had a trailing `/`.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.kind() == EntryKind::Tree {
            key.push(b'/');
        }
        key
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    pub id: ObjectId,
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Parses records of the form `<octal mode> SP <name> NUL <hash bytes>`.
    pub fn parse(id: ObjectId, data: &[u8], hash: HashKind) -> Result<Self> {
        let mut entries = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|b| *b == b' ')
                .ok_or_else(|| GitError::InvalidData("tree entry missing mode".into()))?;
            let mode = std::str::from_utf8(&rest[..space])
                .ok()
                .and_then(|s| u32::from_str_radix(s, 8).ok())
                .ok_or_else(|| GitError::InvalidData("malformed tree entry mode".into()))?;
            rest = &rest[space + 1..];

            let nul = rest
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| GitError::InvalidData("tree entry missing name terminator".into()))?;
            let name = std::str::from_utf8(&rest[..nul])
                .map_err(|_| GitError::InvalidData("non-utf8 tree entry name".into()))?
                .to_string();
            if name.is_empty() {
                return Err(GitError::InvalidData("empty tree entry name".into()));
            }
            rest = &rest[nul + 1..];

            if rest.len() < hash.len() {
                return Err(GitError::InvalidData("truncated tree entry hash".into()));
            }
            let oid = ObjectId::from_bytes(&rest[..hash.len()])?;
            rest = &rest[hash.len()..];

            entries.push(TreeEntry { name, mode, oid });
        }
        Ok(Tree { id, entries })
    }

    pub fn serialize(&self) -> Vec<u8> {
        serialize_entries(self.entries.clone())
    }

    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Serializes entries in canonical tree order. The mode is written in octal
/// without a leading zero (`40000`, `100644`, ...).
pub fn serialize_entries(mut entries: Vec<TreeEntry>) -> Vec<u8> {
    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    let mut out = Vec::new();
    for entry in &entries {
        out.extend_from_slice(format!("{:o} ", entry.mode).as_bytes());
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.oid.as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, mode: u32) -> TreeEntry {
        TreeEntry {
            name: name.to_string(),
            mode,
            oid: ObjectId::from_hex("95d09f2b10159347eece71399a7e2e907ea3df4f").unwrap(),
        }
    }

    #[test]
    fn parse_serialize_round_trip() {
        let bytes = serialize_entries(vec![
            entry("README.md", MODE_BLOB),
            entry("src", MODE_TREE),
            entry("run.sh", MODE_BLOB_EXECUTABLE),
        ]);
        let tree = Tree::parse(
            ObjectId::zero(HashKind::Sha1),
            &bytes,
            HashKind::Sha1,
        )
        .unwrap();
        assert_eq!(tree.entries.len(), 3);
        assert_eq!(tree.serialize(), bytes);
    }

    #[test]
    fn directories_sort_with_trailing_slash() {
        // "foo" the directory sorts as "foo/", which places it after "foo.bar"
        // (0x2e < 0x2f).
        let bytes = serialize_entries(vec![entry("foo", MODE_TREE), entry("foo.bar", MODE_BLOB)]);
        let tree = Tree::parse(ObjectId::zero(HashKind::Sha1), &bytes, HashKind::Sha1).unwrap();
        assert_eq!(tree.entries[0].name, "foo.bar");
        assert_eq!(tree.entries[1].name, "foo");
    }

    #[test]
    fn blob_before_blob_with_longer_name() {
        // plain byte comparison for two blobs: "foo" < "foo.bar"
        let bytes = serialize_entries(vec![entry("foo.bar", MODE_BLOB), entry("foo", MODE_BLOB)]);
        let tree = Tree::parse(ObjectId::zero(HashKind::Sha1), &bytes, HashKind::Sha1).unwrap();
        assert_eq!(tree.entries[0].name, "foo");
        assert_eq!(tree.entries[1].name, "foo.bar");
    }

    #[test]
    fn kind_is_derived_from_mode() {
        assert_eq!(entry("a", MODE_BLOB).kind(), EntryKind::Blob);
        assert_eq!(entry("a", MODE_BLOB_EXECUTABLE).kind(), EntryKind::Blob);
        assert_eq!(entry("a", MODE_SYMLINK).kind(), EntryKind::Symlink);
        assert_eq!(entry("a", MODE_TREE).kind(), EntryKind::Tree);
        assert_eq!(entry("a", MODE_SUBMODULE).kind(), EntryKind::Submodule);
    }

    #[test]
    fn truncated_hash_is_invalid() {
        let mut bytes = serialize_entries(vec![entry("a", MODE_BLOB)]);
        bytes.truncate(bytes.len() - 1);
        assert!(Tree::parse(ObjectId::zero(HashKind::Sha1), &bytes, HashKind::Sha1).is_err());
    }
}
