//! Repository facade: resolves references, walks the commit DAG, enumerates
//! trees, reads files, and composes new commits.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{GitError, Result};
use crate::hash::{HashKind, ObjectId};
use crate::objects::tree::{EntryKind, Tree, TreeEntry};
use crate::objects::{Commit, ObjectType, Tag};
use crate::odb::ObjectStore;
use crate::refs::{Expected, LockManager, RefStore};

pub mod compose;

pub use compose::{CommitMetadata, Operation};
pub use crate::objects::Signature;

pub struct Repository {
    git_dir: PathBuf,
    hash: HashKind,
    objects: ObjectStore,
    refs: RefStore,
    locks: LockManager,
    commits: Mutex<HashMap<ObjectId, Arc<Commit>>>,
    trees: Mutex<HashMap<ObjectId, Arc<Tree>>>,
}

impl Repository {
    /// Opens a repository from a working tree path, a `.git` directory, or a
    /// bare directory (detected by the presence of `HEAD` and `config`).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let git_dir = if path.file_name().is_some_and(|name| name == ".git") {
            path.to_path_buf()
        } else if path.join(".git").is_dir() {
            path.join(".git")
        } else if path.join("HEAD").is_file() && path.join("config").is_file() {
            path.to_path_buf()
        } else {
            return Err(GitError::NotFound(format!(
                "no git repository at {}",
                path.display()
            )));
        };

        let hash = read_object_format(&git_dir.join("config"))?;
        Ok(Repository {
            objects: ObjectStore::open(&git_dir, hash)?,
            refs: RefStore::open(&git_dir, hash)?,
            locks: LockManager::new(),
            commits: Mutex::new(HashMap::new()),
            trees: Mutex::new(HashMap::new()),
            git_dir,
            hash,
        })
    }

    /// Creates an empty bare repository with an unborn `main` branch.
    pub fn init_bare(path: impl AsRef<Path>, hash: HashKind) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path.join("objects/pack"))?;
        fs::create_dir_all(path.join("refs/heads"))?;
        fs::create_dir_all(path.join("refs/tags"))?;
        fs::write(path.join("HEAD"), "ref: refs/heads/main\n")?;
        let config = match hash {
            HashKind::Sha1 => "[core]\n\trepositoryformatversion = 0\n\tbare = true\n".to_string(),
            HashKind::Sha256 => {
                "[core]\n\trepositoryformatversion = 1\n\tbare = true\n[extensions]\n\tobjectformat = sha256\n"
                    .to_string()
            }
        };
        fs::write(path.join("config"), config)?;
        Self::open(path)
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn hash_kind(&self) -> HashKind {
        self.hash
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Drops every cache and re-enumerates packs and refs.
    pub fn invalidate(&self) -> Result<()> {
        self.objects.invalidate()?;
        self.refs.reload()?;
        self.commits.lock().clear();
        self.trees.lock().clear();
        Ok(())
    }

    /// Decoded commit by id, via the facade cache.
    pub fn commit(&self, id: &ObjectId) -> Result<Arc<Commit>> {
        if let Some(hit) = self.commits.lock().get(id).cloned() {
            return Ok(hit);
        }
        let obj = self.objects.read(id)?;
        if obj.kind != ObjectType::Commit {
            return Err(GitError::InvalidArgument(format!(
                "object {id} is a {}, not a commit",
                obj.kind.as_str()
            )));
        }
        let commit = Arc::new(Commit::parse(*id, &obj.data)?);
        self.commits.lock().insert(*id, commit.clone());
        Ok(commit)
    }

    /// Decoded tree by id, via the facade cache.
    pub fn tree(&self, id: &ObjectId) -> Result<Arc<Tree>> {
        if let Some(hit) = self.trees.lock().get(id).cloned() {
            return Ok(hit);
        }
        let obj = self.objects.read(id)?;
        if obj.kind != ObjectType::Tree {
            return Err(GitError::InvalidArgument(format!(
                "object {id} is a {}, not a tree",
                obj.kind.as_str()
            )));
        }
        let tree = Arc::new(Tree::parse(*id, &obj.data, self.hash)?);
        self.trees.lock().insert(*id, tree.clone());
        Ok(tree)
    }

    /// Resolves a reference (default HEAD) to a commit id, peeling annotated
    /// tags.
    pub fn resolve_commit_id(&self, reference: Option<&str>) -> Result<ObjectId> {
        let mut id = self.refs.resolve(reference.unwrap_or("HEAD"))?;
        for _ in 0..16 {
            let obj = self.objects.read(&id)?;
            match obj.kind {
                ObjectType::Commit => return Ok(id),
                ObjectType::Tag => id = Tag::parse(id, &obj.data)?.target,
                other => {
                    return Err(GitError::InvalidArgument(format!(
                        "reference resolves to a {}, not a commit",
                        other.as_str()
                    )));
                }
            }
        }
        Err(GitError::InvalidData("tag chain too deep".into()))
    }

    pub fn get_commit(&self, reference: Option<&str>) -> Result<Arc<Commit>> {
        let id = self.resolve_commit_id(reference)?;
        self.commit(&id)
    }

    /// Depth-first walk over the commit DAG, first parent first, newest
    /// first.
    pub fn enumerate_commits(&self, reference: Option<&str>) -> Result<CommitWalk<'_>> {
        let start = self.resolve_commit_id(reference)?;
        Ok(CommitWalk {
            repo: self,
            stack: vec![start],
            seen: HashSet::new(),
        })
    }

    /// Yields `(full_path, entry)` for every entry reachable from the commit
    /// tree, parents before children. With `path`, descends first: a missing
    /// path is NotFound, a file at the final segment yields that single
    /// entry, and a file in the middle is an InvalidArgument.
    pub fn enumerate_tree(
        &self,
        reference: Option<&str>,
        path: Option<&str>,
    ) -> Result<Vec<(String, TreeEntry)>> {
        let commit = self.get_commit(reference)?;
        let path = path.map(str::trim).filter(|p| !p.is_empty());

        let (prefix, root) = match path {
            None => (String::new(), commit.tree),
            Some(raw) => {
                let normalized = compose::normalize_path(raw)?;
                match self.lookup_path(commit.tree, &normalized)? {
                    Some(entry) if entry.kind() == EntryKind::Tree => (normalized, entry.oid),
                    Some(entry) => return Ok(vec![(normalized, entry)]),
                    None => {
                        return Err(GitError::NotFound(format!("path {normalized:?}")));
                    }
                }
            }
        };

        let mut out = Vec::new();
        self.walk_tree(&root, &prefix, &mut out)?;
        Ok(out)
    }

    fn walk_tree(
        &self,
        tree_id: &ObjectId,
        prefix: &str,
        out: &mut Vec<(String, TreeEntry)>,
    ) -> Result<()> {
        let tree = self.tree(tree_id)?;
        for entry in &tree.entries {
            let full = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            out.push((full.clone(), entry.clone()));
            if entry.kind() == EntryKind::Tree {
                self.walk_tree(&entry.oid, &full, out)?;
            }
        }
        Ok(())
    }

    /// Finds the entry at `path` under `tree_id`. `None` when absent; a
    /// non-tree interior segment is an InvalidArgument.
    fn lookup_path(&self, tree_id: ObjectId, path: &str) -> Result<Option<TreeEntry>> {
        let mut current = tree_id;
        let mut segments = path.split('/').peekable();
        while let Some(segment) = segments.next() {
            let tree = self.tree(&current)?;
            let Some(entry) = tree.entry(segment) else {
                return Ok(None);
            };
            if segments.peek().is_none() {
                return Ok(Some(entry.clone()));
            }
            if entry.kind() != EntryKind::Tree {
                return Err(GitError::InvalidArgument(format!(
                    "path segment {segment:?} is not a directory"
                )));
            }
            current = entry.oid;
        }
        Ok(None)
    }

    /// Reads a blob at `path` in the commit referenced by `reference`.
    pub fn read_file(&self, path: &str, reference: Option<&str>) -> Result<bytes::Bytes> {
        let commit = self.get_commit(reference)?;
        let normalized = compose::normalize_path(path)?;
        match self.lookup_path(commit.tree, &normalized)? {
            Some(entry) if entry.kind() == EntryKind::Tree => Err(GitError::InvalidArgument(
                format!("path {normalized:?} is a directory"),
            )),
            Some(entry) => Ok(self.objects.read(&entry.oid)?.data),
            None => Err(GitError::NotFound(format!("path {normalized:?}"))),
        }
    }

    /// Commits where the blob at `path` differs from the previously yielded
    /// one: the change points of a file, always including the commit that
    /// introduced it. While the blob matches the last yield, the newest-first
    /// walk keeps the oldest such commit as the introduction candidate and
    /// emits it when the file vanishes further back (or history ends).
    pub fn file_history(
        &self,
        path: &str,
        reference: Option<&str>,
    ) -> Result<Vec<Arc<Commit>>> {
        let normalized = compose::normalize_path(path)?;
        let mut out: Vec<Arc<Commit>> = Vec::new();
        let mut last_yield: Option<ObjectId> = None;
        let mut introduction: Option<Arc<Commit>> = None;
        for commit in self.enumerate_commits(reference)? {
            let commit = commit?;
            let current = match self.lookup_path(commit.tree, &normalized) {
                Ok(Some(entry)) if entry.kind() != EntryKind::Tree => Some(entry.oid),
                Ok(_) => None,
                Err(GitError::InvalidArgument(_)) => None,
                Err(err) => return Err(err),
            };
            match current {
                Some(blob) if last_yield != Some(blob) => {
                    out.push(commit.clone());
                    last_yield = Some(blob);
                    introduction = None;
                }
                Some(_) => {
                    // same blob as the last yield: oldest-so-far of the run
                    introduction = Some(commit.clone());
                }
                None => {
                    // the file is absent this far back, so the run's oldest
                    // member introduced it
                    if let Some(intro) = introduction.take() {
                        out.push(intro);
                    }
                    last_yield = None;
                }
            }
        }
        if let Some(intro) = introduction {
            out.push(intro);
        }
        Ok(out)
    }

    /// Fast-forward test: is `old` an ancestor of (reachable from) `new`?
    pub fn is_descendant(&self, new: &ObjectId, old: &ObjectId) -> Result<bool> {
        if new == old {
            return Ok(true);
        }
        let mut stack = vec![*new];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if id == *old {
                return Ok(true);
            }
            let commit = self.commit(&id)?;
            stack.extend(commit.parents.iter().copied());
        }
        Ok(false)
    }

    /// Locked CAS ref update; the single-ref counterpart of the multi-ref
    /// path used by receive-pack.
    pub async fn update_ref(
        &self,
        name: &str,
        expected: Option<Expected>,
        new: Option<ObjectId>,
    ) -> Result<()> {
        let _lock = self.locks.acquire(name).await;
        self.refs.update(name, expected, new)
    }
}

/// Iterator over the commit DAG. Parents are pushed in reverse so the first
/// parent is visited first.
pub struct CommitWalk<'a> {
    repo: &'a Repository,
    stack: Vec<ObjectId>,
    seen: HashSet<ObjectId>,
}

impl Iterator for CommitWalk<'_> {
    type Item = Result<Arc<Commit>>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            if !self.seen.insert(id) {
                continue;
            }
            let commit = match self.repo.commit(&id) {
                Ok(commit) => commit,
                Err(err) => return Some(Err(err)),
            };
            for parent in commit.parents.iter().rev() {
                if !self.seen.contains(parent) {
                    self.stack.push(*parent);
                }
            }
            return Some(Ok(commit));
        }
        None
    }
}

/// Reads `extensions.objectformat` out of the INI-style config. Everything
/// else in the file is tolerated and ignored.
fn read_object_format(config: &Path) -> Result<HashKind> {
    let contents = match fs::read_to_string(config) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashKind::Sha1),
        Err(err) => return Err(err.into()),
    };
    let mut in_extensions = false;
    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_extensions = line
                .trim_start_matches('[')
                .trim_end_matches(']')
                .trim()
                .eq_ignore_ascii_case("extensions");
            continue;
        }
        if !in_extensions {
            continue;
        }
        if let Some((key, value)) = line.split_once('=')
            && key.trim().eq_ignore_ascii_case("objectformat")
        {
            return match value.trim() {
                "sha1" => Ok(HashKind::Sha1),
                "sha256" => Ok(HashKind::Sha256),
                other => Err(GitError::Unsupported(format!("object format {other:?}"))),
            };
        }
    }
    Ok(HashKind::Sha1)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::testing;

    use super::*;

    #[test]
    fn open_variants() {
        let dir = TempDir::new().unwrap();
        let bare = dir.path().join("bare.git");
        Repository::init_bare(&bare, HashKind::Sha1).unwrap();

        // bare directory
        assert!(Repository::open(&bare).is_ok());
        // explicit .git suffix maps onto the same directory
        let worktree = dir.path().join("work");
        fs::create_dir_all(worktree.join(".git")).unwrap();
        fs::write(worktree.join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(worktree.join(".git/config"), "").unwrap();
        fs::create_dir_all(worktree.join(".git/objects")).unwrap();
        assert!(Repository::open(worktree.join(".git")).is_ok());
        assert!(Repository::open(&worktree).is_ok());
        // nothing at all
        assert!(matches!(
            Repository::open(dir.path().join("missing")),
            Err(GitError::NotFound(_))
        ));
    }

    #[test]
    fn object_format_detection() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path().join("s256"), HashKind::Sha256).unwrap();
        assert_eq!(repo.hash_kind(), HashKind::Sha256);

        let odd = dir.path().join("odd");
        fs::create_dir_all(odd.join("objects")).unwrap();
        fs::create_dir_all(odd.join("refs")).unwrap();
        fs::write(odd.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(
            odd.join("config"),
            "[core]\n\tbare = true\n[extensions]\n\tobjectformat = sha512\n",
        )
        .unwrap();
        assert!(matches!(
            Repository::open(&odd),
            Err(GitError::Unsupported(_))
        ));
    }

    #[test]
    fn single_commit_read_back() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        testing::seed_commit(&repo, "refs/heads/main", &[("README.md", b"# Hi")], "Hello").unwrap();

        let commit = repo.get_commit(None).unwrap();
        assert_eq!(commit.message, "Hello");
        let entries = repo.enumerate_tree(None, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "README.md");
        assert_eq!(&repo.read_file("README.md", None).unwrap()[..], b"# Hi");
    }

    #[test]
    fn enumerate_commits_is_first_parent_dfs() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        let a = testing::seed_commit(&repo, "refs/heads/main", &[("f", b"1")], "a").unwrap();
        let b = testing::commit_on(&repo, &[a], &[("f", b"2")], "b").unwrap();
        let c = testing::commit_on(&repo, &[a], &[("f", b"3")], "c").unwrap();
        let merge = testing::commit_on(&repo, &[b, c], &[("f", b"4")], "m").unwrap();

        let order: Vec<ObjectId> = repo
            .enumerate_commits(Some(&merge.to_string()))
            .unwrap()
            .map(|c| c.unwrap().id)
            .collect();
        assert_eq!(order, vec![merge, b, a, c]);
    }

    #[test]
    fn enumerate_tree_subpaths() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        testing::seed_commit(
            &repo,
            "refs/heads/main",
            &[("a/b.txt", b"x"), ("a/c/d.txt", b"y"), ("top.txt", b"z")],
            "seed",
        )
        .unwrap();

        let all: Vec<String> = repo
            .enumerate_tree(None, None)
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(all, ["a", "a/b.txt", "a/c", "a/c/d.txt", "top.txt"]);

        let sub: Vec<String> = repo
            .enumerate_tree(None, Some("a/c"))
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(sub, ["a/c/d.txt"]);

        // a blob at the final segment yields a single leaf
        let leaf = repo.enumerate_tree(None, Some("a/b.txt")).unwrap();
        assert_eq!(leaf.len(), 1);
        assert_eq!(leaf[0].0, "a/b.txt");

        assert!(matches!(
            repo.enumerate_tree(None, Some("a/missing")),
            Err(GitError::NotFound(_))
        ));
        assert!(matches!(
            repo.enumerate_tree(None, Some("top.txt/x")),
            Err(GitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn read_file_rejects_directories() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        testing::seed_commit(&repo, "refs/heads/main", &[("a/b.txt", b"x")], "seed").unwrap();
        assert!(matches!(
            repo.read_file("a", None),
            Err(GitError::InvalidArgument(_))
        ));
        assert!(matches!(
            repo.read_file("nope", None),
            Err(GitError::NotFound(_))
        ));
    }

    #[test]
    fn file_history_yields_change_points() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        let c1 = testing::seed_commit(&repo, "refs/heads/main", &[("f", b"one")], "c1").unwrap();
        let c2 = testing::commit_on(&repo, &[c1], &[("f", b"one"), ("g", b"x")], "c2").unwrap();
        let c3 = testing::commit_on(&repo, &[c2], &[("f", b"two"), ("g", b"x")], "c3").unwrap();

        let history: Vec<ObjectId> = repo
            .file_history("f", Some(&c3.to_string()))
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        // the tip, the change point where "one" was last seen, and the
        // introducing commit; the unchanged middle of the "one" run is not
        // a change point
        assert_eq!(history, vec![c3, c2, c1]);
    }

    #[test]
    fn file_history_includes_mid_history_introduction() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        let c1 = testing::seed_commit(&repo, "refs/heads/main", &[("other", b"o")], "c1").unwrap();
        let c2 =
            testing::commit_on(&repo, &[c1], &[("other", b"o"), ("f", b"x")], "c2").unwrap();
        let c3 = testing::commit_on(&repo, &[c2], &[("other", b"o2"), ("f", b"x")], "c3").unwrap();
        let c4 = testing::commit_on(&repo, &[c3], &[("other", b"o2"), ("f", b"x")], "c4").unwrap();

        let history: Vec<ObjectId> = repo
            .file_history("f", Some(&c4.to_string()))
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        // "f" never changes after c2, so the result is the tip plus the
        // commit that introduced the file
        assert_eq!(history, vec![c4, c2]);
    }

    #[test]
    fn file_history_tracks_delete_and_reintroduce() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        let c1 = testing::seed_commit(&repo, "refs/heads/main", &[("f", b"x")], "c1").unwrap();
        let c2 = testing::commit_on(&repo, &[c1], &[("g", b"g")], "c2").unwrap();
        let c3 = testing::commit_on(&repo, &[c2], &[("g", b"g"), ("f", b"x")], "c3").unwrap();

        let history: Vec<ObjectId> = repo
            .file_history("f", Some(&c3.to_string()))
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        // reintroduced at c3, absent at c2, originally introduced at c1
        assert_eq!(history, vec![c3, c1]);
    }

    #[test]
    fn is_descendant_walks_ancestry() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path(), HashKind::Sha1).unwrap();
        let a = testing::seed_commit(&repo, "refs/heads/main", &[("f", b"1")], "a").unwrap();
        let b = testing::commit_on(&repo, &[a], &[("f", b"2")], "b").unwrap();
        assert!(repo.is_descendant(&b, &a).unwrap());
        assert!(repo.is_descendant(&a, &a).unwrap());
        assert!(!repo.is_descendant(&a, &b).unwrap());
    }
}
