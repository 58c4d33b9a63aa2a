//! Zlib helpers. Pack parsing needs to know exactly how many input bytes the
//! inflater consumed so the next entry can be read from the right position;
//! `inflate_from` repositions a seekable source to the first byte past the
//! compressed stream.

use std::io::{Read, Seek, SeekFrom, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::errors::{GitError, Result};

/// Inflates one zlib stream starting at the current position of `src`, then
/// seeks `src` to the first byte after the stream (the decoder buffers ahead,
/// so the cursor must be restored from the reported consumed-input count).
pub fn inflate_from<R: Read + Seek>(src: &mut R) -> Result<Vec<u8>> {
    let start = src.stream_position()?;
    let mut decoder = ZlibDecoder::new(&mut *src);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| GitError::InvalidData(format!("zlib inflate failed: {err}")))?;
    let consumed = decoder.total_in();
    drop(decoder);
    src.seek(SeekFrom::Start(start + consumed))?;
    Ok(out)
}

/// Inflates an entire stream, e.g. a loose object file.
pub fn inflate_all<R: Read>(src: R) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(src);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|err| GitError::InvalidData(format!("zlib inflate failed: {err}")))?;
    Ok(out)
}

/// Deflates a buffer at the best compression level.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
