//! On-disk pack access: `.idx` v1/v2 parsing and reading a pack object at an
//! offset, including OFS_DELTA / REF_DELTA resolution.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::errors::{GitError, Result};
use crate::hash::{HashKind, ObjectId};
use crate::objects::{ObjectData, ObjectType};
use crate::odb::ObjectStore;
use crate::odb::delta;
use crate::zlib;

const IDX_V2_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];

pub(crate) fn read_u8(src: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    src.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Reads the size-and-type prefix of a pack entry: 3 type bits and 4 size
/// bits in the first byte, then 7 size bits per continuation byte.
pub(crate) fn read_entry_prefix(src: &mut impl Read) -> Result<(u8, u64)> {
    let first = read_u8(src)?;
    let code = (first >> 4) & 0x07;
    let mut size = u64::from(first & 0x0f);
    let mut shift = 4;
    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = read_u8(src)?;
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    Ok((code, size))
}

/// Reads the backward-offset distance of an OFS_DELTA entry. Unlike the size
/// prefix, each continuation adds one before shifting.
pub(crate) fn read_ofs_distance(src: &mut impl Read) -> Result<u64> {
    let mut byte = read_u8(src)?;
    let mut distance = u64::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = read_u8(src)?;
        distance = ((distance + 1) << 7) | u64::from(byte & 0x7f);
    }
    Ok(distance)
}

/// Parsed `.idx` contents: object id to absolute pack offset.
pub struct PackIndex {
    offsets: HashMap<ObjectId, u64>,
}

impl PackIndex {
    pub fn parse(data: &[u8], hash: HashKind) -> Result<Self> {
        if data.len() >= 8 && data[..4] == IDX_V2_MAGIC {
            let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
            if version != 2 {
                return Err(GitError::Unsupported(format!("pack index version {version}")));
            }
            Self::parse_v2(&data[8..], hash)
        } else {
            Self::parse_v1(data, hash)
        }
    }

    fn fanout_count(data: &[u8]) -> Result<usize> {
        if data.len() < 1024 {
            return Err(GitError::InvalidData("pack index fanout truncated".into()));
        }
        Ok(u32::from_be_bytes(data[1020..1024].try_into().unwrap()) as usize)
    }

    fn parse_v1(data: &[u8], hash: HashKind) -> Result<Self> {
        let count = Self::fanout_count(data)?;
        let hs = hash.len();
        let entries = &data[1024..];
        if entries.len() < count * (4 + hs) {
            return Err(GitError::InvalidData("pack index v1 truncated".into()));
        }
        let mut offsets = HashMap::with_capacity(count);
        for i in 0..count {
            let at = i * (4 + hs);
            let offset = u32::from_be_bytes(entries[at..at + 4].try_into().unwrap());
            let id = ObjectId::from_bytes(&entries[at + 4..at + 4 + hs])?;
            offsets.insert(id, u64::from(offset));
        }
        Ok(PackIndex { offsets })
    }

    fn parse_v2(data: &[u8], hash: HashKind) -> Result<Self> {
        let count = Self::fanout_count(data)?;
        let hs = hash.len();
        let ids_at = 1024;
        let crc_at = ids_at + count * hs;
        let small_at = crc_at + count * 4;
        let large_at = small_at + count * 4;
        if data.len() < large_at {
            return Err(GitError::InvalidData("pack index v2 truncated".into()));
        }

        let mut offsets = HashMap::with_capacity(count);
        for i in 0..count {
            let id = ObjectId::from_bytes(&data[ids_at + i * hs..ids_at + (i + 1) * hs])?;
            let small =
                u32::from_be_bytes(data[small_at + i * 4..small_at + (i + 1) * 4].try_into().unwrap());
            let offset = if small & 0x8000_0000 != 0 {
                let slot = (small & 0x7fff_ffff) as usize;
                let at = large_at + slot * 8;
                if data.len() < at + 8 {
                    return Err(GitError::InvalidData(
                        "pack index large-offset table truncated".into(),
                    ));
                }
                u64::from_be_bytes(data[at..at + 8].try_into().unwrap())
            } else {
                u64::from(small)
            };
            offsets.insert(id, offset);
        }
        Ok(PackIndex { offsets })
    }

    pub fn lookup(&self, id: &ObjectId) -> Option<u64> {
        self.offsets.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// One `pack-*.pack` / `pack-*.idx` pair. The index is parsed lazily on the
/// first lookup and dropped on store invalidation.
pub struct Pack {
    pack_path: PathBuf,
    idx_path: PathBuf,
    hash: HashKind,
    index: Mutex<Option<Arc<PackIndex>>>,
}

impl Pack {
    pub fn new(pack_path: PathBuf, idx_path: PathBuf, hash: HashKind) -> Self {
        Pack {
            pack_path,
            idx_path,
            hash,
            index: Mutex::new(None),
        }
    }

    pub fn index(&self) -> Result<Arc<PackIndex>> {
        let mut slot = self.index.lock();
        if let Some(index) = slot.as_ref() {
            return Ok(index.clone());
        }
        let data = std::fs::read(&self.idx_path)?;
        let parsed = Arc::new(PackIndex::parse(&data, self.hash)?);
        *slot = Some(parsed.clone());
        Ok(parsed)
    }

    pub fn lookup(&self, id: &ObjectId) -> Result<Option<u64>> {
        Ok(self.index()?.lookup(id))
    }

    /// Reads and fully resolves the object at `offset`. REF_DELTA bases are
    /// looked up through the store, which may land in another pack or a
    /// loose object.
    pub fn read_at(&self, offset: u64, store: &ObjectStore) -> Result<ObjectData> {
        let mut file = File::open(&self.pack_path)?;
        self.read_entry(&mut file, offset, store)
    }

    fn read_entry(&self, file: &mut File, offset: u64, store: &ObjectStore) -> Result<ObjectData> {
        file.seek(SeekFrom::Start(offset))?;
        let (code, size) = read_entry_prefix(file)?;
        match code {
            1..=4 => {
                let kind = ObjectType::from_pack_code(code)?;
                let data = zlib::inflate_from(file)?;
                if data.len() as u64 != size {
                    return Err(GitError::InvalidData(format!(
                        "pack entry size mismatch at offset {offset}"
                    )));
                }
                Ok(ObjectData::new(kind, data))
            }
            6 => {
                let distance = read_ofs_distance(file)?;
                let base_offset = offset.checked_sub(distance).ok_or_else(|| {
                    GitError::InvalidData(format!(
                        "ofs delta distance {distance} underflows offset {offset}"
                    ))
                })?;
                let delta_bytes = zlib::inflate_from(file)?;
                let base = self.read_entry(file, base_offset, store)?;
                let data = delta::apply(&base.data, &delta_bytes)?;
                Ok(ObjectData::new(base.kind, data))
            }
            7 => {
                let mut raw = vec![0u8; self.hash.len()];
                file.read_exact(&mut raw)?;
                let base_id = ObjectId::from_bytes(&raw)?;
                let delta_bytes = zlib::inflate_from(file)?;
                let base = store.read(&base_id)?;
                let data = delta::apply(&base.data, &delta_bytes)?;
                Ok(ObjectData::new(base.kind, data))
            }
            other => Err(GitError::Unsupported(format!("pack object kind {other}"))),
        }
    }
}
