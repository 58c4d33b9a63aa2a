//! Ingests a received pack: verifies the trailer, decodes every entry
//! (resolving OFS and REF deltas, the latter possibly forward-referenced),
//! and expands the objects into loose storage.
//!
//! The input is spooled to an unnamed temp file first so the checksum pass
//! and the random-access entry reads both work on non-seekable sources; the
//! file is deleted on drop even when decoding fails mid-way.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use crate::errors::{GitError, Result};
use crate::hash::{Hasher, ObjectId};
use crate::objects::ObjectType;
use crate::odb::ObjectStore;
use crate::odb::delta;
use crate::odb::pack::{read_entry_prefix, read_ofs_distance};
use crate::zlib;

/// A REF_DELTA whose base was not yet known when the entry was read.
struct DeferredDelta {
    base: ObjectId,
    delta: Vec<u8>,
    offset: u64,
}

/// Reads a pack stream into the store and returns the ids of every object
/// written, in resolution order.
pub fn read_pack<R: Read>(store: &ObjectStore, mut input: R) -> Result<Vec<ObjectId>> {
    let mut spool = tempfile::tempfile()?;
    std::io::copy(&mut input, &mut spool)?;
    let total = spool.seek(SeekFrom::End(0))?;

    let hash = store.hash_kind();
    let trailer_len = hash.len() as u64;
    if total < 12 + trailer_len {
        return Err(GitError::InvalidData("pack stream is too short".into()));
    }

    verify_trailer(&mut spool, total, trailer_len, store)?;

    spool.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; 12];
    spool.read_exact(&mut header)?;
    if &header[..4] != b"PACK" {
        return Err(GitError::InvalidData("missing PACK signature".into()));
    }
    let version = u32::from_be_bytes(header[4..8].try_into().unwrap());
    if version != 2 {
        return Err(GitError::Unsupported(format!("pack version {version}")));
    }
    let count = u32::from_be_bytes(header[8..12].try_into().unwrap());

    let mut written = Vec::with_capacity(count as usize);
    let mut by_offset: HashMap<u64, ObjectId> = HashMap::new();
    let mut deferred: Vec<DeferredDelta> = Vec::new();

    for _ in 0..count {
        let offset = spool.stream_position()?;
        let (code, size) = read_entry_prefix(&mut spool)?;
        match code {
            1..=4 => {
                let kind = ObjectType::from_pack_code(code)?;
                let data = zlib::inflate_from(&mut spool)?;
                if data.len() as u64 != size {
                    return Err(GitError::InvalidData(format!(
                        "pack entry at offset {offset} declares {size} bytes, carries {}",
                        data.len()
                    )));
                }
                let id = store.write(kind, &data)?;
                by_offset.insert(offset, id);
                written.push(id);
            }
            6 => {
                let distance = read_ofs_distance(&mut spool)?;
                let base_offset = offset.checked_sub(distance).ok_or_else(|| {
                    GitError::InvalidData(format!(
                        "ofs delta at offset {offset} reaches before the pack start"
                    ))
                })?;
                let delta_bytes = zlib::inflate_from(&mut spool)?;
                // ofs bases always point backwards, so the id must be known
                let base_id = *by_offset.get(&base_offset).ok_or_else(|| {
                    GitError::InvalidData(format!(
                        "ofs delta at offset {offset} references unknown base offset {base_offset}"
                    ))
                })?;
                let id = apply_and_store(store, &base_id, &delta_bytes)?;
                by_offset.insert(offset, id);
                written.push(id);
            }
            7 => {
                let mut raw = vec![0u8; hash.len()];
                spool.read_exact(&mut raw)?;
                let base = ObjectId::from_bytes(&raw)?;
                let delta_bytes = zlib::inflate_from(&mut spool)?;
                if store.contains(&base)? {
                    let id = apply_and_store(store, &base, &delta_bytes)?;
                    by_offset.insert(offset, id);
                    written.push(id);
                } else {
                    deferred.push(DeferredDelta {
                        base,
                        delta: delta_bytes,
                        offset,
                    });
                }
            }
            other => {
                return Err(GitError::Unsupported(format!("pack object kind {other}")));
            }
        }
    }

    // Resolving one deferred delta can make another's base available, so
    // scan until a full pass makes no progress.
    while !deferred.is_empty() {
        let before = deferred.len();
        let mut still_blocked = Vec::new();
        for pending in deferred {
            if store.contains(&pending.base)? {
                let id = apply_and_store(store, &pending.base, &pending.delta)?;
                by_offset.insert(pending.offset, id);
                written.push(id);
            } else {
                still_blocked.push(pending);
            }
        }
        deferred = still_blocked;
        if deferred.len() == before {
            return Err(GitError::InvalidData(format!(
                "pack references missing base object {}",
                deferred[0].base
            )));
        }
    }

    Ok(written)
}

fn apply_and_store(store: &ObjectStore, base_id: &ObjectId, delta: &[u8]) -> Result<ObjectId> {
    let base = store.read(base_id)?;
    let data = delta::apply(&base.data, delta)?;
    store.write(base.kind, &data)
}

fn verify_trailer(
    spool: &mut std::fs::File,
    total: u64,
    trailer_len: u64,
    store: &ObjectStore,
) -> Result<()> {
    spool.seek(SeekFrom::Start(0))?;
    let mut hasher = Hasher::new(store.hash_kind());
    let mut remaining = total - trailer_len;
    let mut buf = [0u8; 8192];
    while remaining > 0 {
        let take = remaining.min(buf.len() as u64) as usize;
        spool.read_exact(&mut buf[..take])?;
        hasher.update(&buf[..take]);
        remaining -= take as u64;
    }
    let mut trailer = vec![0u8; trailer_len as usize];
    spool.read_exact(&mut trailer)?;
    let digest = hasher.finalize();
    if digest.as_bytes() != trailer.as_slice() {
        return Err(GitError::InvalidData(format!(
            "pack checksum mismatch: computed {digest}, trailer carries {}",
            hex::encode(&trailer)
        )));
    }
    Ok(())
}
