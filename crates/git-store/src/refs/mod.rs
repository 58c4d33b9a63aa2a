//! Reference store: loose refs, `packed-refs`, HEAD, and rename-atomic
//! compare-and-swap updates. Writes must go through the lock manager so each
//! ref's read-check-write sequence is serialized.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tempfile::NamedTempFile;

use crate::errors::{GitError, Result};
use crate::hash::{HashKind, ObjectId};

pub mod lock;

pub use lock::{LockManager, MultiRefLock, RefLock};

/// Precondition of a CAS update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    /// The ref must not exist yet.
    Absent,
    /// The ref must currently hold this value.
    Value(ObjectId),
}

/// Where HEAD points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    Symbolic(String),
    Detached(ObjectId),
}

pub struct RefStore {
    git_dir: PathBuf,
    hash: HashKind,
    index: ArcSwap<HashMap<String, ObjectId>>,
}

impl RefStore {
    pub fn open(git_dir: &Path, hash: HashKind) -> Result<Self> {
        let index = load_index(git_dir, hash)?;
        Ok(RefStore {
            git_dir: git_dir.to_path_buf(),
            hash,
            index: ArcSwap::from_pointee(index),
        })
    }

    /// Rebuilds the index from disk (loose refs shadow packed ones).
    pub fn reload(&self) -> Result<()> {
        self.index.store(Arc::new(load_index(&self.git_dir, self.hash)?));
        Ok(())
    }

    /// Immutable snapshot of all known refs.
    pub fn snapshot(&self) -> Arc<HashMap<String, ObjectId>> {
        self.index.load_full()
    }

    /// All refs sorted by name, for advertisement.
    pub fn sorted(&self) -> Vec<(String, ObjectId)> {
        let snapshot = self.snapshot();
        let mut list: Vec<_> = snapshot
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub fn head(&self) -> Result<Head> {
        let raw = fs::read_to_string(self.git_dir.join("HEAD"))
            .map_err(|_| GitError::NotFound("HEAD".into()))?;
        let raw = raw.trim();
        if let Some(target) = raw.strip_prefix("ref: ") {
            Ok(Head::Symbolic(target.trim().to_string()))
        } else {
            Ok(Head::Detached(ObjectId::from_hex(raw).map_err(|_| {
                GitError::InvalidData(format!("malformed HEAD: {raw:?}"))
            })?))
        }
    }

    /// Resolves HEAD to a hash, following one level of `ref:` indirection.
    /// `None` for an unborn branch.
    pub fn head_id(&self) -> Result<Option<ObjectId>> {
        match self.head()? {
            Head::Detached(id) => Ok(Some(id)),
            Head::Symbolic(target) => self.current(&target),
        }
    }

    /// Exact lookup of a fully qualified ref: loose file first, then the
    /// packed index. No name expansion.
    pub fn current(&self, name: &str) -> Result<Option<ObjectId>> {
        if let Some(id) = self.read_loose(name)? {
            return Ok(Some(id));
        }
        Ok(self.snapshot().get(name).copied())
    }

    /// Resolves a user-supplied reference string: HEAD, a literal hash, then
    /// the usual prefix expansion (`refs/heads/`, `refs/tags/`,
    /// `refs/remotes/`).
    pub fn resolve(&self, name: &str) -> Result<ObjectId> {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("HEAD") {
            return self
                .head_id()?
                .ok_or_else(|| GitError::NotFound("HEAD is unborn".into()));
        }
        if name.len() == self.hash.hex_len()
            && let Ok(id) = ObjectId::from_hex(name)
        {
            return Ok(id);
        }
        let candidates = [
            name.to_string(),
            format!("refs/heads/{name}"),
            format!("refs/tags/{name}"),
            format!("refs/remotes/{name}"),
        ];
        for candidate in &candidates {
            if let Some(id) = self.current(candidate)? {
                return Ok(id);
            }
        }
        Err(GitError::NotFound(format!("reference {name:?}")))
    }

    fn read_loose(&self, name: &str) -> Result<Option<ObjectId>> {
        let path = self.git_dir.join(name);
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let raw = raw.trim();
                if raw.starts_with("ref: ") {
                    // symbolic refs other than HEAD are not followed
                    return Ok(None);
                }
                Ok(Some(ObjectId::from_hex(raw).map_err(|_| {
                    GitError::InvalidData(format!("malformed ref {name}: {raw:?}"))
                })?))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            // a directory of the same name (e.g. refs/heads/foo vs foo/bar)
            Err(err) if err.kind() == ErrorKind::IsADirectory => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// CAS update: read the current value, check `expected`, then write via
    /// a sibling temp file and atomic rename (or delete). Callers hold the
    /// ref's lock; see [`lock::MultiRefLock::write_with_validation`].
    pub(crate) fn update(
        &self,
        name: &str,
        expected: Option<Expected>,
        new: Option<ObjectId>,
    ) -> Result<()> {
        let current = self.current(name)?;
        match expected {
            Some(Expected::Absent) if current.is_some() => {
                return Err(GitError::Conflict(format!("ref {name} already exists")));
            }
            Some(Expected::Value(want)) if current != Some(want) => {
                return Err(GitError::Conflict(format!(
                    "ref {name} moved: expected {want}, found {}",
                    current.map(|c| c.to_string()).unwrap_or_else(|| "absent".into())
                )));
            }
            _ => {}
        }

        let path = self.git_dir.join(name);
        match new {
            None => {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                self.patch_index(name, None);
            }
            Some(id) => {
                let parent = path
                    .parent()
                    .ok_or_else(|| GitError::InvalidArgument(format!("bad ref path {name:?}")))?;
                fs::create_dir_all(parent)?;
                let mut tmp = NamedTempFile::new_in(parent)?;
                tmp.write_all(format!("{id}\n").as_bytes())?;
                tmp.persist(&path).map_err(|err| GitError::Io(err.error))?;
                self.patch_index(name, Some(id));
            }
        }
        Ok(())
    }

    fn patch_index(&self, name: &str, value: Option<ObjectId>) {
        self.index.rcu(|current| {
            let mut next: HashMap<String, ObjectId> = (**current).clone();
            match value {
                Some(id) => next.insert(name.to_string(), id),
                None => next.remove(name),
            };
            next
        });
    }
}

fn load_index(git_dir: &Path, _hash: HashKind) -> Result<HashMap<String, ObjectId>> {
    let mut index = HashMap::new();

    // packed first, so loose entries shadow them
    match fs::read_to_string(git_dir.join("packed-refs")) {
        Ok(contents) => {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') || line.starts_with('^') {
                    continue;
                }
                let Some((hex, name)) = line.split_once(' ') else {
                    return Err(GitError::InvalidData(format!(
                        "malformed packed-refs line: {line:?}"
                    )));
                };
                let id = ObjectId::from_hex(hex).map_err(|_| {
                    GitError::InvalidData(format!("malformed packed-refs hash: {hex:?}"))
                })?;
                index.insert(name.trim().to_string(), id);
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    let refs_dir = git_dir.join("refs");
    if refs_dir.is_dir() {
        visit_loose(&refs_dir, "refs", &mut index)?;
    }
    Ok(index)
}

fn visit_loose(dir: &Path, prefix: &str, index: &mut HashMap<String, ObjectId>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let full = format!("{prefix}/{name}");
        let path = entry.path();
        if path.is_dir() {
            visit_loose(&path, &full, index)?;
        } else {
            let raw = fs::read_to_string(&path)?;
            let raw = raw.trim();
            match ObjectId::from_hex(raw) {
                Ok(id) => {
                    index.insert(full, id);
                }
                Err(_) => {
                    tracing::debug!("skipping unparseable ref {full}: {raw:?}");
                }
            }
        }
    }
    Ok(())
}
