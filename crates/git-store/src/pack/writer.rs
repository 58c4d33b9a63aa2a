//! Streams a pack from an ordered list of object ids: header, one non-delta
//! entry per object, and the repo-hash trailer. Output is written through a
//! hashing wrapper so the trailer never requires buffering the pack.

use std::io::{self, Write};

use crate::errors::Result;
use crate::hash::{HashKind, Hasher, ObjectId};
use crate::odb::ObjectStore;
use crate::zlib;

/// `Write` adapter that feeds every byte into the repo hash.
struct HashingWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> HashingWriter<W> {
    fn new(kind: HashKind, inner: W) -> Self {
        HashingWriter {
            inner,
            hasher: Hasher::new(kind),
        }
    }

    fn finish(self) -> (ObjectId, W) {
        (self.hasher.finalize(), self.inner)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// The size-and-type prefix of a pack entry: 3 type bits and the low 4 size
/// bits in the first byte, 7 size bits per continuation byte.
pub(crate) fn entry_prefix(code: u8, size: u64) -> Vec<u8> {
    let mut remaining = size >> 4;
    let mut first = (code << 4) | (size & 0x0f) as u8;
    if remaining != 0 {
        first |= 0x80;
    }
    let mut out = vec![first];
    while remaining != 0 {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out
}

/// Writes a version-2 pack containing `ids` in order. Entries are emitted
/// whole (no delta compression); readers that expect deltas still accept
/// such packs.
pub fn write_pack<W: Write>(store: &ObjectStore, ids: &[ObjectId], out: W) -> Result<()> {
    let mut writer = HashingWriter::new(store.hash_kind(), out);

    writer.write_all(b"PACK")?;
    writer.write_all(&2u32.to_be_bytes())?;
    writer.write_all(&(ids.len() as u32).to_be_bytes())?;

    for id in ids {
        let obj = store.read(id)?;
        writer.write_all(&entry_prefix(obj.kind.pack_code(), obj.data.len() as u64))?;
        writer.write_all(&zlib::deflate(&obj.data)?)?;
    }

    let (digest, mut inner) = writer.finish();
    inner.write_all(digest.as_bytes())?;
    inner.flush()?;
    Ok(())
}
