//! Content-addressed object store over a repository's `objects/` directory:
//! loose objects, pack files, and an in-memory decode cache.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::errors::{GitError, Result};
use crate::hash::{HashKind, ObjectId};
use crate::objects::{self, ObjectData, ObjectType};
use crate::zlib;

pub mod delta;
pub mod pack;

pub use pack::{Pack, PackIndex};

pub struct ObjectStore {
    objects_dir: PathBuf,
    hash: HashKind,
    cache: Mutex<HashMap<ObjectId, ObjectData>>,
    packs: ArcSwap<Vec<Arc<Pack>>>,
}

impl ObjectStore {
    pub fn open(git_dir: &Path, hash: HashKind) -> Result<Self> {
        let objects_dir = git_dir.join("objects");
        let packs = load_packs(&objects_dir, hash)?;
        Ok(ObjectStore {
            objects_dir,
            hash,
            cache: Mutex::new(HashMap::new()),
            packs: ArcSwap::from_pointee(packs),
        })
    }

    pub fn hash_kind(&self) -> HashKind {
        self.hash
    }

    /// Drops the decode cache and re-enumerates the pack directory.
    pub fn invalidate(&self) -> Result<()> {
        self.cache.lock().clear();
        let packs = load_packs(&self.objects_dir, self.hash)?;
        self.packs.store(Arc::new(packs));
        Ok(())
    }

    /// Reads an object, populating the cache on a miss.
    pub fn read(&self, id: &ObjectId) -> Result<ObjectData> {
        if let Some(hit) = self.cache.lock().get(id).cloned() {
            return Ok(hit);
        }
        let data = self.read_from_disk(id)?;
        self.cache.lock().insert(*id, data.clone());
        Ok(data)
    }

    /// Like [`read`](Self::read) but never inserts into the cache.
    pub fn read_no_cache(&self, id: &ObjectId) -> Result<ObjectData> {
        if let Some(hit) = self.cache.lock().get(id).cloned() {
            return Ok(hit);
        }
        self.read_from_disk(id)
    }

    /// Cheap existence probe: loose file or pack index membership, without
    /// decoding.
    pub fn contains(&self, id: &ObjectId) -> Result<bool> {
        if self.cache.lock().contains_key(id) || self.loose_path(id).is_file() {
            return Ok(true);
        }
        for pack in self.packs.load().iter() {
            if pack.lookup(id)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn read_from_disk(&self, id: &ObjectId) -> Result<ObjectData> {
        let loose = self.loose_path(id);
        match File::open(&loose) {
            Ok(file) => {
                let inflated = zlib::inflate_all(file)?;
                let (kind, payload) = objects::split_loose(&inflated)?;
                return Ok(ObjectData::new(kind, payload.to_vec()));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        for pack in self.packs.load().iter() {
            if let Some(offset) = pack.lookup(id)? {
                return pack.read_at(offset, self);
            }
        }

        Err(GitError::NotFound(format!("object {id}")))
    }

    /// Writes a loose object and returns its content address. Existing files
    /// are left untouched: the store is immutable under a fixed hash, and a
    /// concurrent writer racing on create is producing identical bytes.
    pub fn write(&self, kind: ObjectType, payload: &[u8]) -> Result<ObjectId> {
        let mut buf = objects::loose_header(kind, payload.len());
        buf.extend_from_slice(payload);
        let id = self.hash.digest(&buf);

        let path = self.loose_path(&id);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&zlib::deflate(&buf)?)?;
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(id)
    }

    fn loose_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

fn load_packs(objects_dir: &Path, hash: HashKind) -> Result<Vec<Arc<Pack>>> {
    let pack_dir = objects_dir.join("pack");
    let mut packs = Vec::new();
    let entries = match fs::read_dir(&pack_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(packs),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "pack") {
            let idx = path.with_extension("idx");
            if idx.is_file() {
                packs.push(Arc::new(Pack::new(path, idx, hash)));
            } else {
                tracing::debug!("pack without index, skipping: {}", path.display());
            }
        }
    }
    Ok(packs)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn store() -> (TempDir, ObjectStore) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("objects")).unwrap();
        let store = ObjectStore::open(dir.path(), HashKind::Sha1).unwrap();
        (dir, store)
    }

    #[test]
    fn write_then_read_round_trip() {
        let (_dir, store) = store();
        let id = store.write(ObjectType::Blob, b"hello world").unwrap();
        assert_eq!(id.to_string(), "95d09f2b10159347eece71399a7e2e907ea3df4f");
        let obj = store.read(&id).unwrap();
        assert_eq!(obj.kind, ObjectType::Blob);
        assert_eq!(&obj.data[..], b"hello world");
    }

    #[test]
    fn write_is_idempotent() {
        let (dir, store) = store();
        let first = store.write(ObjectType::Blob, b"same bytes").unwrap();
        let second = store.write(ObjectType::Blob, b"same bytes").unwrap();
        assert_eq!(first, second);
        let fanout = dir.path().join("objects").join(&first.to_hex()[..2]);
        assert_eq!(fs::read_dir(fanout).unwrap().count(), 1);
    }

    #[test]
    fn read_reports_missing_objects() {
        let (_dir, store) = store();
        let absent = ObjectId::from_hex(&"ab".repeat(20)).unwrap();
        assert!(matches!(store.read(&absent), Err(GitError::NotFound(_))));
        assert!(!store.contains(&absent).unwrap());
    }

    #[test]
    fn cache_serves_after_file_removal() {
        let (dir, store) = store();
        let id = store.write(ObjectType::Blob, b"cached").unwrap();
        store.read(&id).unwrap();
        let hex = id.to_hex();
        fs::remove_file(dir.path().join("objects").join(&hex[..2]).join(&hex[2..])).unwrap();
        // still served from cache until invalidated
        assert!(store.read(&id).is_ok());
        store.invalidate().unwrap();
        assert!(matches!(store.read(&id), Err(GitError::NotFound(_))));
    }

    #[test]
    fn read_no_cache_does_not_insert() {
        let (_dir, store) = store();
        let id = store.write(ObjectType::Blob, b"uncached").unwrap();
        store.read_no_cache(&id).unwrap();
        assert!(store.cache.lock().is_empty());
    }
}
