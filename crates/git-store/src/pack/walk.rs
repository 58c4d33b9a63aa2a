//! Enumerates the objects reachable from a set of roots in a deterministic
//! order suitable for packing: each commit, then its tree closure, then its
//! parents (first parent first). Tags peel to their targets.

use std::collections::HashSet;

use crate::errors::Result;
use crate::hash::ObjectId;
use crate::objects::tree::EntryKind;
use crate::objects::{ObjectType, Tag};
use crate::repo::Repository;

pub fn reachable_objects(repo: &Repository, roots: &[ObjectId]) -> Result<Vec<ObjectId>> {
    let mut out = Vec::new();
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut stack: Vec<ObjectId> = roots.iter().rev().copied().collect();

    while let Some(id) = stack.pop() {
        if seen.contains(&id) {
            continue;
        }
        let obj = repo.objects().read(&id)?;
        match obj.kind {
            ObjectType::Commit => {
                seen.insert(id);
                out.push(id);
                let commit = repo.commit(&id)?;
                collect_tree(repo, &commit.tree, &mut seen, &mut out)?;
                for parent in commit.parents.iter().rev() {
                    if !seen.contains(parent) {
                        stack.push(*parent);
                    }
                }
            }
            ObjectType::Tag => {
                seen.insert(id);
                out.push(id);
                let tag = Tag::parse(id, &obj.data)?;
                if !seen.contains(&tag.target) {
                    stack.push(tag.target);
                }
            }
            ObjectType::Tree => collect_tree(repo, &id, &mut seen, &mut out)?,
            ObjectType::Blob => {
                seen.insert(id);
                out.push(id);
            }
        }
    }
    Ok(out)
}

/// Emits the tree, its sub-trees (depth first), then the blob entries.
/// Submodule entries point at commits of other repositories and are not
/// followed.
fn collect_tree(
    repo: &Repository,
    tree_id: &ObjectId,
    seen: &mut HashSet<ObjectId>,
    out: &mut Vec<ObjectId>,
) -> Result<()> {
    if !seen.insert(*tree_id) {
        return Ok(());
    }
    out.push(*tree_id);
    let tree = repo.tree(tree_id)?;
    for entry in &tree.entries {
        if entry.kind() == EntryKind::Tree {
            collect_tree(repo, &entry.oid, seen, out)?;
        }
    }
    for entry in &tree.entries {
        match entry.kind() {
            EntryKind::Blob | EntryKind::Symlink => {
                if seen.insert(entry.oid) {
                    out.push(entry.oid);
                }
            }
            EntryKind::Tree | EntryKind::Submodule => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::hash::HashKind;
    use crate::testing;

    use super::*;

    #[test]
    fn commit_then_tree_then_parents() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        let root =
            testing::seed_commit(&repo, "refs/heads/main", &[("a/b.txt", b"x")], "root").unwrap();
        let tip = testing::commit_on(&repo, &[root], &[("a/b.txt", b"x"), ("c", b"y")], "tip")
            .unwrap();

        let order = reachable_objects(&repo, &[tip]).unwrap();
        // tip first, then its trees and blobs, then the parent commit
        assert_eq!(order[0], tip);
        let tip_commit = repo.commit(&tip).unwrap();
        assert_eq!(order[1], tip_commit.tree);
        let root_at = order.iter().position(|id| *id == root).unwrap();
        assert!(root_at > 1);

        // dedup: the shared blob and subtree appear exactly once
        let mut sorted = order.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), order.len());

        // everything reachable is present: 2 commits, 3 distinct trees
        // (root tree changed, "a" subtree shared), 2 blobs
        assert_eq!(order.len(), 7);
    }

    #[test]
    fn tags_peel_to_their_targets() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        let commit =
            testing::seed_commit(&repo, "refs/heads/main", &[("f", b"1")], "root").unwrap();
        let tag_body = format!(
            "object {commit}\ntype commit\ntag v1\ntagger T <t@t> 1 +0000\n\nrelease\n"
        );
        let tag = repo
            .objects()
            .write(ObjectType::Tag, tag_body.as_bytes())
            .unwrap();

        let order = reachable_objects(&repo, &[tag]).unwrap();
        assert_eq!(order[0], tag);
        assert_eq!(order[1], commit);
        assert!(order.len() >= 4);
    }
}
