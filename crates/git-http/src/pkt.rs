//! pkt-line encode/decode and side-band framing.

use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

pub const PKT_FLUSH: &[u8] = b"0000";
pub const PKT_DELIM: &[u8] = b"0001";

/// Largest payload that fits a side-band-64k pkt-line: 65520 total, minus
/// the 4-byte length prefix and the band byte.
pub const MAX_SIDEBAND_PAYLOAD: usize = 65520 - 4 - 1;

pub const BAND_DATA: u8 = 1;
pub const BAND_PROGRESS: u8 = 2;
pub const BAND_FATAL: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pkt {
    Data(Vec<u8>),
    Flush,
    Delim,
}

pub fn encode_pkt_line(data: &[u8]) -> Vec<u8> {
    let len = 4 + data.len();
    debug_assert!(len <= 65520, "pkt-line payload too large: {len}");
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(format!("{len:04x}").as_bytes());
    out.extend_from_slice(data);
    out
}

/// Decodes a buffer that consists entirely of pkt-lines.
pub fn decode_pkt_lines(mut buf: &[u8]) -> anyhow::Result<Vec<Pkt>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let (pkt, rest) = decode_one(buf)?;
        out.push(pkt);
        buf = rest;
    }
    Ok(out)
}

/// Decodes pkt-lines up to and including the first flush, returning the
/// packets and the number of bytes consumed. Used for request bodies where
/// raw data (a pack stream) follows the pkt-line section.
pub fn decode_pkt_section(buf: &[u8]) -> anyhow::Result<(Vec<Pkt>, usize)> {
    let mut out = Vec::new();
    let mut rest = buf;
    loop {
        if rest.is_empty() {
            // a body with no flush at all, e.g. an empty push
            return Ok((out, buf.len()));
        }
        let (pkt, next) = decode_one(rest)?;
        let is_flush = pkt == Pkt::Flush;
        out.push(pkt);
        rest = next;
        if is_flush {
            return Ok((out, buf.len() - rest.len()));
        }
    }
}

fn decode_one(buf: &[u8]) -> anyhow::Result<(Pkt, &[u8])> {
    if buf.len() < 4 {
        anyhow::bail!("truncated pkt-line length");
    }
    let len = usize::from_str_radix(std::str::from_utf8(&buf[..4])?, 16)?;
    let buf = &buf[4..];
    match len {
        0 => Ok((Pkt::Flush, buf)),
        1 => Ok((Pkt::Delim, buf)),
        2 | 3 => anyhow::bail!("invalid pkt-line length {len}"),
        _ => {
            let data_len = len - 4;
            if buf.len() < data_len {
                anyhow::bail!("truncated pkt-line data");
            }
            Ok((Pkt::Data(buf[..data_len].to_vec()), &buf[data_len..]))
        }
    }
}

/// Wraps a finished byte stream (itself pkt-line framed, e.g. a report) in
/// band-1 chunks, terminated with a flush.
pub fn sideband_wrap(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 64);
    for chunk in data.chunks(MAX_SIDEBAND_PAYLOAD) {
        let mut payload = Vec::with_capacity(1 + chunk.len());
        payload.push(BAND_DATA);
        payload.extend_from_slice(chunk);
        out.extend_from_slice(&encode_pkt_line(&payload));
    }
    out.extend_from_slice(PKT_FLUSH);
    out
}

/// `io::Write` sink that frames pack bytes for an HTTP response channel:
/// band-1 pkt-lines when side-band was negotiated, raw chunks otherwise.
/// Built for use on a blocking worker; sends fail with `BrokenPipe` once the
/// client goes away.
pub struct SidebandWriter {
    tx: mpsc::Sender<Bytes>,
    sideband: bool,
    buf: Vec<u8>,
}

impl SidebandWriter {
    pub fn new(tx: mpsc::Sender<Bytes>, sideband: bool) -> Self {
        SidebandWriter {
            tx,
            sideband,
            buf: Vec::with_capacity(MAX_SIDEBAND_PAYLOAD),
        }
    }

    fn send(&self, frame: Vec<u8>) -> io::Result<()> {
        self.tx
            .blocking_send(Bytes::from(frame))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response channel closed"))
    }

    fn send_band(&self, band: u8, chunk: &[u8]) -> io::Result<()> {
        if self.sideband {
            let mut payload = Vec::with_capacity(1 + chunk.len());
            payload.push(band);
            payload.extend_from_slice(chunk);
            self.send(encode_pkt_line(&payload))
        } else if band == BAND_DATA {
            self.send(chunk.to_vec())
        } else {
            Ok(())
        }
    }

    pub fn progress(&mut self, message: &str) {
        let mut line = message.as_bytes().to_vec();
        line.push(b'\n');
        if let Err(err) = self.send_band(BAND_PROGRESS, &line) {
            tracing::debug!("dropping progress message: {err}");
        }
    }

    pub fn fatal(&mut self, message: &str) {
        let mut line = message.as_bytes().to_vec();
        line.push(b'\n');
        if let Err(err) = self.send_band(BAND_FATAL, &line) {
            tracing::debug!("dropping fatal message: {err}");
        }
    }
}

impl io::Write for SidebandWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= MAX_SIDEBAND_PAYLOAD {
            let rest = self.buf.split_off(MAX_SIDEBAND_PAYLOAD);
            let full = std::mem::replace(&mut self.buf, rest);
            self.send_band(BAND_DATA, &full)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            let chunk = std::mem::take(&mut self.buf);
            self.send_band(BAND_DATA, &chunk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn roundtrip_pkt_line() {
        let msg = b"hello\n";
        let enc = encode_pkt_line(msg);
        assert_eq!(&enc[..4], b"000a");
        let pkts = decode_pkt_lines(&enc).unwrap();
        assert!(matches!(&pkts[0], Pkt::Data(d) if d == msg));
    }

    #[test]
    fn decode_flush_and_delim() {
        let mut buf = Vec::new();
        buf.extend_from_slice(PKT_FLUSH);
        buf.extend_from_slice(PKT_DELIM);
        let pkts = decode_pkt_lines(&buf).unwrap();
        assert_eq!(pkts[0], Pkt::Flush);
        assert_eq!(pkts[1], Pkt::Delim);
    }

    #[test]
    fn section_stops_at_flush() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode_pkt_line(b"line one\n"));
        buf.extend_from_slice(PKT_FLUSH);
        buf.extend_from_slice(b"PACK raw bytes follow");
        let (pkts, consumed) = decode_pkt_section(&buf).unwrap();
        assert_eq!(pkts.len(), 2);
        assert_eq!(&buf[consumed..], b"PACK raw bytes follow");
    }

    #[test]
    fn truncated_data_is_an_error() {
        let mut enc = encode_pkt_line(b"hello");
        enc.truncate(enc.len() - 2);
        assert!(decode_pkt_lines(&enc).is_err());
    }

    #[tokio::test]
    async fn sideband_writer_frames_band_one() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(64);
        let sent = tokio::task::spawn_blocking(move || {
            let mut w = SidebandWriter::new(tx, true);
            w.write_all(b"pack bytes").unwrap();
            w.flush().unwrap();
        });
        sent.await.unwrap();
        let frame = rx.recv().await.unwrap();
        let pkts = decode_pkt_lines(&frame).unwrap();
        let Pkt::Data(payload) = &pkts[0] else {
            panic!("expected data pkt");
        };
        assert_eq!(payload[0], BAND_DATA);
        assert_eq!(&payload[1..], b"pack bytes");
    }

    #[test]
    fn sideband_wrap_splits_large_reports() {
        let report = vec![0x42u8; MAX_SIDEBAND_PAYLOAD + 10];
        let wrapped = sideband_wrap(&report);
        let pkts = decode_pkt_lines(&wrapped).unwrap();
        assert_eq!(pkts.len(), 3); // two data chunks + flush
        assert_eq!(pkts[2], Pkt::Flush);
    }
}
