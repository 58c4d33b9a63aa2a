//! Helpers for building fixture repositories in tests; also handy for
//! seeding throwaway repositories from embedding code.

use std::collections::BTreeMap;

use crate::errors::Result;
use crate::hash::ObjectId;
use crate::objects::{Commit, ObjectType, Signature};
use crate::refs::Expected;
use crate::repo::Repository;
use crate::repo::compose;

fn fixture_signature() -> Signature {
    Signature::utc("Test User", "test@example.com", 1_700_000_000)
}

/// Writes a commit with the given full file map and parents; does not touch
/// any ref.
pub fn commit_on(
    repo: &Repository,
    parents: &[ObjectId],
    files: &[(&str, &[u8])],
    message: &str,
) -> Result<ObjectId> {
    let mut leaves = BTreeMap::new();
    for (path, content) in files {
        let oid = repo.objects().write(ObjectType::Blob, content)?;
        leaves.insert(
            compose::normalize_path(path)?,
            (crate::objects::tree::MODE_BLOB, oid),
        );
    }
    let tree = compose::write_tree(repo.objects(), &leaves)?;
    let commit = Commit {
        id: ObjectId::zero(repo.hash_kind()),
        tree,
        parents: parents.to_vec(),
        headers: vec![
            ("author".to_string(), fixture_signature().to_string()),
            ("committer".to_string(), fixture_signature().to_string()),
        ],
        message: message.to_string(),
    };
    repo.objects().write(ObjectType::Commit, &commit.serialize())
}

/// Creates a root commit and points a fresh ref at it.
pub fn seed_commit(
    repo: &Repository,
    refname: &str,
    files: &[(&str, &[u8])],
    message: &str,
) -> Result<ObjectId> {
    let id = commit_on(repo, &[], files, message)?;
    repo.refs()
        .update(refname, Some(Expected::Absent), Some(id))?;
    Ok(id)
}
