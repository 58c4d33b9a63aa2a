//! Commit composition: applies a sequence of file operations against a
//! branch tip, builds the new tree bottom-up, and moves the branch with a
//! CAS update under the branch lock.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::errors::{GitError, Result};
use crate::hash::ObjectId;
use crate::objects::tree::{EntryKind, MODE_BLOB, MODE_TREE, TreeEntry, serialize_entries};
use crate::objects::{Commit, ObjectType, Signature};
use crate::odb::ObjectStore;
use crate::refs::Expected;
use crate::repo::Repository;

/// One file-level mutation. Paths are forward-slash separated, with no
/// leading/trailing slashes and no `..` segments.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Fails with Conflict if the path already exists.
    AddFile { path: String, content: Bytes },
    /// Fails with NotFound if absent; with Conflict if `expected_prev` is
    /// set and does not match the current blob.
    UpdateFile {
        path: String,
        content: Bytes,
        expected_prev: Option<ObjectId>,
    },
    /// Fails with NotFound if absent.
    RemoveFile { path: String },
    /// Fails with NotFound if the source is absent, Conflict if the
    /// destination exists.
    MoveFile { from: String, to: String },
}

#[derive(Debug, Clone)]
pub struct CommitMetadata {
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

pub fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(GitError::InvalidArgument("path is empty".into()));
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." {
            return Err(GitError::InvalidArgument(format!(
                "path {path:?} contains an empty segment"
            )));
        }
        if segment == ".." {
            return Err(GitError::InvalidArgument(format!(
                "path {path:?} cannot traverse upwards"
            )));
        }
        if segment.contains('\0') {
            return Err(GitError::InvalidArgument(format!(
                "path {path:?} contains an invalid character"
            )));
        }
        segments.push(segment);
    }
    Ok(segments.join("/"))
}

/// Fully qualifies a branch name. `HEAD` is not a branch and is rejected.
pub fn normalize_branch(branch: &str) -> Result<String> {
    let branch = branch.trim();
    if branch.is_empty() {
        return Err(GitError::InvalidArgument("branch name is empty".into()));
    }
    if branch.eq_ignore_ascii_case("HEAD") {
        return Err(GitError::InvalidArgument(
            "cannot commit onto HEAD directly".into(),
        ));
    }
    let full = if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    };
    normalize_path(&full)
}

impl Repository {
    /// Applies `ops` on top of the current tip of `branch`, writes the new
    /// tree and commit, and advances the branch with CAS against the
    /// observed tip. A concurrent commit that moved the branch first makes
    /// the CAS fail with Conflict; the orphaned objects are harmless. Fails
    /// with Conflict when the operations leave the tree unchanged.
    pub async fn create_commit(
        &self,
        branch: &str,
        ops: &[Operation],
        meta: &CommitMetadata,
    ) -> Result<ObjectId> {
        let refname = normalize_branch(branch)?;

        let tip = self
            .refs()
            .current(&refname)?
            .ok_or_else(|| GitError::NotFound(format!("branch {refname}")))?;
        let parent = self.commit(&tip)?;
        let mut leaves = self.leaf_map(&parent.tree)?;

        let mut changed = false;
        for op in ops {
            changed |= self.apply_operation(&mut leaves, op)?;
        }
        if !changed {
            return Err(GitError::Conflict(
                "operations did not change the tree".into(),
            ));
        }

        let new_tree = write_tree(self.objects(), &leaves)?;
        if new_tree == parent.tree {
            return Err(GitError::Conflict(
                "operations produced an identical tree".into(),
            ));
        }

        let commit = Commit {
            id: ObjectId::zero(self.hash_kind()),
            tree: new_tree,
            parents: vec![tip],
            headers: vec![
                ("author".to_string(), meta.author.to_string()),
                ("committer".to_string(), meta.committer.to_string()),
            ],
            message: meta.message.clone(),
        };
        let id = self.objects().write(ObjectType::Commit, &commit.serialize())?;
        let _lock = self.locks().acquire(&refname).await;
        self.refs()
            .update(&refname, Some(Expected::Value(tip)), Some(id))?;
        Ok(id)
    }

    /// Flattens a commit tree into path → (mode, blob) leaves.
    pub(crate) fn leaf_map(&self, tree: &ObjectId) -> Result<BTreeMap<String, (u32, ObjectId)>> {
        let mut leaves = BTreeMap::new();
        for (path, entry) in self.enumerate_tree_from(tree)? {
            if entry.kind() != EntryKind::Tree {
                leaves.insert(path, (entry.mode, entry.oid));
            }
        }
        Ok(leaves)
    }

    fn enumerate_tree_from(&self, tree: &ObjectId) -> Result<Vec<(String, TreeEntry)>> {
        let mut out = Vec::new();
        let mut stack = vec![(String::new(), *tree)];
        while let Some((prefix, id)) = stack.pop() {
            let tree = self.tree(&id)?;
            for entry in &tree.entries {
                let full = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{prefix}/{}", entry.name)
                };
                if entry.kind() == EntryKind::Tree {
                    stack.push((full.clone(), entry.oid));
                }
                out.push((full, entry.clone()));
            }
        }
        Ok(out)
    }

    fn apply_operation(
        &self,
        leaves: &mut BTreeMap<String, (u32, ObjectId)>,
        op: &Operation,
    ) -> Result<bool> {
        match op {
            Operation::AddFile { path, content } => {
                let path = normalize_path(path)?;
                if leaves.contains_key(&path) {
                    return Err(GitError::Conflict(format!("path {path:?} already exists")));
                }
                check_directory_collision(leaves, &path)?;
                let oid = self.objects().write(ObjectType::Blob, content)?;
                leaves.insert(path, (MODE_BLOB, oid));
                Ok(true)
            }
            Operation::UpdateFile {
                path,
                content,
                expected_prev,
            } => {
                let path = normalize_path(path)?;
                let (mode, current) = *leaves
                    .get(&path)
                    .ok_or_else(|| GitError::NotFound(format!("path {path:?}")))?;
                if let Some(expected) = expected_prev
                    && *expected != current
                {
                    return Err(GitError::Conflict(format!(
                        "path {path:?} changed since it was read"
                    )));
                }
                let oid = self.objects().write(ObjectType::Blob, content)?;
                let changed = oid != current;
                leaves.insert(path, (mode, oid));
                Ok(changed)
            }
            Operation::RemoveFile { path } => {
                let path = normalize_path(path)?;
                leaves
                    .remove(&path)
                    .ok_or_else(|| GitError::NotFound(format!("path {path:?}")))?;
                Ok(true)
            }
            Operation::MoveFile { from, to } => {
                let from = normalize_path(from)?;
                let to = normalize_path(to)?;
                if from == to {
                    return Err(GitError::InvalidArgument(
                        "move source equals destination".into(),
                    ));
                }
                if leaves.contains_key(&to) {
                    return Err(GitError::Conflict(format!("path {to:?} already exists")));
                }
                let entry = leaves
                    .remove(&from)
                    .ok_or_else(|| GitError::NotFound(format!("path {from:?}")))?;
                check_directory_collision(leaves, &to)?;
                leaves.insert(to, entry);
                Ok(true)
            }
        }
    }
}

/// A file cannot shadow an existing directory, nor live under an existing
/// file.
fn check_directory_collision(
    leaves: &BTreeMap<String, (u32, ObjectId)>,
    path: &str,
) -> Result<()> {
    let dir_prefix = format!("{path}/");
    if leaves.keys().any(|existing| existing.starts_with(&dir_prefix)) {
        return Err(GitError::Conflict(format!(
            "a directory already exists at {path:?}"
        )));
    }
    let mut prefix = String::new();
    for segment in path.split('/') {
        if !prefix.is_empty() {
            if leaves.contains_key(&prefix) {
                return Err(GitError::Conflict(format!(
                    "a file already exists at {prefix:?}"
                )));
            }
            prefix.push('/');
        }
        prefix.push_str(segment);
    }
    Ok(())
}

/// Builds and writes the tree hierarchy for a flat leaf map, children before
/// parents, and returns the root tree id.
pub(crate) fn write_tree(
    store: &ObjectStore,
    leaves: &BTreeMap<String, (u32, ObjectId)>,
) -> Result<ObjectId> {
    let items: Vec<(&str, u32, ObjectId)> = leaves
        .iter()
        .map(|(path, (mode, oid))| (path.as_str(), *mode, *oid))
        .collect();
    write_node(store, &items)
}

fn write_node(store: &ObjectStore, items: &[(&str, u32, ObjectId)]) -> Result<ObjectId> {
    let mut entries: Vec<TreeEntry> = Vec::new();
    let mut dirs: BTreeMap<&str, Vec<(&str, u32, ObjectId)>> = BTreeMap::new();
    for (path, mode, oid) in items {
        match path.split_once('/') {
            Some((head, rest)) => dirs.entry(head).or_default().push((rest, *mode, *oid)),
            None => entries.push(TreeEntry {
                name: path.to_string(),
                mode: *mode,
                oid: *oid,
            }),
        }
    }
    for (name, children) in dirs {
        let child = write_node(store, &children)?;
        entries.push(TreeEntry {
            name: name.to_string(),
            mode: MODE_TREE,
            oid: child,
        });
    }
    store.write(ObjectType::Tree, &serialize_entries(entries))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::hash::HashKind;
    use crate::testing;

    use super::*;

    fn meta(message: &str) -> CommitMetadata {
        CommitMetadata {
            author: Signature::utc("Alice", "alice@example.com", 1_700_000_000),
            committer: Signature::utc("Alice", "alice@example.com", 1_700_000_000),
            message: message.to_string(),
        }
    }

    fn add(path: &str, content: &[u8]) -> Operation {
        Operation::AddFile {
            path: path.to_string(),
            content: Bytes::copy_from_slice(content),
        }
    }

    fn seeded() -> (TempDir, Arc<Repository>) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        testing::seed_commit(&repo, "refs/heads/main", &[("README.md", b"# Hi")], "init").unwrap();
        (dir, Arc::new(repo))
    }

    #[tokio::test]
    async fn add_file_creates_nested_tree() {
        let (_dir, repo) = seeded();
        let id = repo
            .create_commit("main", &[add("a/b.txt", b"x")], &meta("add"))
            .await
            .unwrap();
        assert_eq!(repo.refs().resolve("main").unwrap(), id);

        let entries: Vec<(String, EntryKind)> = repo
            .enumerate_tree(None, None)
            .unwrap()
            .into_iter()
            .map(|(p, e)| (p, e.kind()))
            .collect();
        assert!(entries.contains(&("a".to_string(), EntryKind::Tree)));
        assert!(entries.contains(&("a/b.txt".to_string(), EntryKind::Blob)));
        assert_eq!(&repo.read_file("a/b.txt", None).unwrap()[..], b"x");

        let commit = repo.get_commit(None).unwrap();
        assert_eq!(commit.parents.len(), 1);
    }

    #[tokio::test]
    async fn add_existing_conflicts() {
        let (_dir, repo) = seeded();
        let err = repo
            .create_commit("main", &[add("README.md", b"again")], &meta("dup"))
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_respects_expected_prev() {
        let (_dir, repo) = seeded();
        let wrong = ObjectId::from_hex(&"ab".repeat(20)).unwrap();
        let err = repo
            .create_commit(
                "main",
                &[Operation::UpdateFile {
                    path: "README.md".into(),
                    content: Bytes::from_static(b"# Hello"),
                    expected_prev: Some(wrong),
                }],
                &meta("update"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Conflict(_)));

        let current = crate::objects::object_id(HashKind::Sha1, ObjectType::Blob, b"# Hi");
        repo.create_commit(
            "main",
            &[Operation::UpdateFile {
                path: "README.md".into(),
                content: Bytes::from_static(b"# Hello"),
                expected_prev: Some(current),
            }],
            &meta("update2"),
        )
        .await
        .unwrap();
        assert_eq!(&repo.read_file("README.md", None).unwrap()[..], b"# Hello");
    }

    #[tokio::test]
    async fn no_change_is_a_conflict() {
        let (_dir, repo) = seeded();
        let err = repo
            .create_commit(
                "main",
                &[Operation::UpdateFile {
                    path: "README.md".into(),
                    content: Bytes::from_static(b"# Hi"),
                    expected_prev: None,
                }],
                &meta("noop"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::Conflict(_)));
    }

    #[tokio::test]
    async fn move_and_remove() {
        let (_dir, repo) = seeded();
        repo.create_commit(
            "main",
            &[Operation::MoveFile {
                from: "README.md".into(),
                to: "docs/README.md".into(),
            }],
            &meta("move"),
        )
        .await
        .unwrap();
        assert!(matches!(
            repo.read_file("README.md", None),
            Err(GitError::NotFound(_))
        ));
        assert_eq!(
            &repo.read_file("docs/README.md", None).unwrap()[..],
            b"# Hi"
        );

        repo.create_commit(
            "main",
            &[Operation::RemoveFile {
                path: "docs/README.md".into(),
            }],
            &meta("rm"),
        )
        .await
        .unwrap();
        assert!(matches!(
            repo.read_file("docs/README.md", None),
            Err(GitError::NotFound(_))
        ));

        let err = repo
            .create_commit(
                "main",
                &[Operation::RemoveFile {
                    path: "docs/README.md".into(),
                }],
                &meta("rm again"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_commits_leave_a_consistent_branch() {
        let (_dir, repo) = seeded();
        let r1 = repo.clone();
        let r2 = repo.clone();
        let t1 = tokio::spawn(async move {
            r1.create_commit("main", &[add("f1", b"1")], &meta("one")).await
        });
        let t2 = tokio::spawn(async move {
            r2.create_commit("main", &[add("f2", b"2")], &meta("two")).await
        });
        let (a, b) = (t1.await.unwrap(), t2.await.unwrap());
        // either both serialized cleanly, or the loser failed its CAS;
        // the branch always reflects exactly the winners
        let succeeded = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert!(succeeded >= 1);
        for result in [&a, &b] {
            if let Err(err) = result {
                assert!(matches!(err, GitError::Conflict(_)));
            }
        }
        let history: Vec<_> = repo.enumerate_commits(None).unwrap().collect();
        assert_eq!(history.len(), 1 + succeeded);
    }

    #[tokio::test]
    async fn concurrent_cas_has_exactly_one_winner() {
        let (_dir, repo) = seeded();
        let tip = repo.refs().resolve("main").unwrap();
        let y1 = testing::commit_on(&repo, &[tip], &[("a", b"1")], "y1").unwrap();
        let y2 = testing::commit_on(&repo, &[tip], &[("b", b"2")], "y2").unwrap();

        let r1 = repo.clone();
        let r2 = repo.clone();
        let t1 = tokio::spawn(async move {
            r1.update_ref("refs/heads/main", Some(Expected::Value(tip)), Some(y1))
                .await
        });
        let t2 = tokio::spawn(async move {
            r2.update_ref("refs/heads/main", Some(Expected::Value(tip)), Some(y2))
                .await
        });
        let results = [t1.await.unwrap(), t2.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(GitError::Conflict(_)))));
        let winner = repo.refs().resolve("main").unwrap();
        assert!(winner == y1 || winner == y2);
    }

    #[tokio::test]
    async fn stale_tip_conflicts_without_lock() {
        // simulate two writers that both observed the same tip
        let (_dir, repo) = seeded();
        let tip = repo.refs().resolve("main").unwrap();
        let winner = repo
            .create_commit("main", &[add("f1", b"1")], &meta("one"))
            .await
            .unwrap();
        // the loser still expects the old tip
        let err = repo
            .refs()
            .update(
                "refs/heads/main",
                Some(Expected::Value(tip)),
                Some(winner),
            )
            .unwrap_err();
        assert!(matches!(err, GitError::Conflict(_)));
    }

    #[tokio::test]
    async fn rejects_head_and_bad_paths() {
        let (_dir, repo) = seeded();
        assert!(matches!(
            repo.create_commit("HEAD", &[add("f", b"x")], &meta("h")).await,
            Err(GitError::InvalidArgument(_))
        ));
        assert!(matches!(
            repo.create_commit("main", &[add("../evil", b"x")], &meta("p")).await,
            Err(GitError::InvalidArgument(_))
        ));
        assert!(matches!(
            repo.create_commit("missing", &[add("f", b"x")], &meta("m")).await,
            Err(GitError::NotFound(_))
        ));
    }

    #[test]
    fn normalize_path_rules() {
        assert_eq!(normalize_path(" /a/b/ ").unwrap(), "a/b");
        assert!(normalize_path("").is_err());
        assert!(normalize_path("a//b").is_err());
        assert!(normalize_path("a/../b").is_err());
        assert!(normalize_path("a/.\u{0}b").is_err());
    }
}
