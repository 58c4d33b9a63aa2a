//! Commit object codec.

use std::fmt;

use crate::errors::{GitError, Result};
use crate::hash::ObjectId;

/// An author/committer line: `Name <email> <unix-seconds> <±HHMM>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub timezone: String,
}

impl Signature {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        timestamp: i64,
        timezone: impl Into<String>,
    ) -> Self {
        Signature {
            name: name.into(),
            email: email.into(),
            timestamp,
            timezone: timezone.into(),
        }
    }

    pub fn utc(name: impl Into<String>, email: impl Into<String>, timestamp: i64) -> Self {
        Self::new(name, email, timestamp, "+0000")
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }
}

/// A decoded commit. `headers` keeps every header except `tree` and `parent`
/// in input order; multi-line values (gpgsig) carry embedded newlines and are
/// re-emitted with continuation spaces.
#[derive(Debug, Clone)]
pub struct Commit {
    pub id: ObjectId,
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub headers: Vec<(String, String)>,
    pub message: String,
}

impl Commit {
    pub fn parse(id: ObjectId, data: &[u8]) -> Result<Self> {
        let split = data.windows(2).position(|w| w == b"\n\n");
        let (head, message) = match split {
            Some(at) => (&data[..at], &data[at + 2..]),
            None => (data, &data[..0]),
        };

        let mut tree = None;
        let mut parents = Vec::new();
        let mut headers: Vec<(String, String)> = Vec::new();
        for line in head.split(|b| *b == b'\n') {
            if let Some(cont) = line.strip_prefix(b" ") {
                // continuation of the previous header value
                let (_, value) = headers.last_mut().ok_or_else(|| {
                    GitError::InvalidData("commit header continuation without header".into())
                })?;
                value.push('\n');
                value.push_str(&String::from_utf8_lossy(cont));
                continue;
            }
            let space = line.iter().position(|b| *b == b' ').ok_or_else(|| {
                GitError::InvalidData(format!(
                    "malformed commit header line {:?}",
                    String::from_utf8_lossy(line)
                ))
            })?;
            let name = std::str::from_utf8(&line[..space])
                .map_err(|_| GitError::InvalidData("non-utf8 commit header name".into()))?;
            let value = String::from_utf8_lossy(&line[space + 1..]).into_owned();
            match name {
                "tree" => {
                    if tree.is_some() {
                        return Err(GitError::InvalidData("commit has multiple trees".into()));
                    }
                    tree = Some(ObjectId::from_hex(&value).map_err(|_| {
                        GitError::InvalidData(format!("bad tree hash in commit: {value:?}"))
                    })?);
                }
                "parent" => {
                    parents.push(ObjectId::from_hex(&value).map_err(|_| {
                        GitError::InvalidData(format!("bad parent hash in commit: {value:?}"))
                    })?);
                }
                _ => headers.push((name.to_string(), value)),
            }
        }

        let tree = tree.ok_or_else(|| GitError::InvalidData("commit is missing a tree".into()))?;
        let message = String::from_utf8(message.to_vec())
            .map_err(|_| GitError::InvalidData("commit message is not utf-8".into()))?;

        Ok(Commit {
            id,
            tree,
            parents,
            headers,
            message,
        })
    }

    /// Canonical serialization: tree, parents, author, committer, remaining
    /// headers in insertion order, blank line, message.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.message.len());
        push_header(&mut out, "tree", &self.tree.to_hex());
        for parent in &self.parents {
            push_header(&mut out, "parent", &parent.to_hex());
        }
        for name in ["author", "committer"] {
            if let Some(value) = self.header(name) {
                push_header(&mut out, name, value);
            }
        }
        for (name, value) in &self.headers {
            if name == "author" || name == "committer" {
                continue;
            }
            push_header(&mut out, name, value);
        }
        out.push(b'\n');
        out.extend_from_slice(self.message.as_bytes());
        out
    }

    /// Raw value of a header, e.g. `author` or `committer`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.push(b' ');
    // embedded newlines become continuation lines
    let mut lines = value.split('\n');
    if let Some(first) = lines.next() {
        out.extend_from_slice(first.as_bytes());
    }
    for line in lines {
        out.push(b'\n');
        out.push(b' ');
        out.extend_from_slice(line.as_bytes());
    }
    out.push(b'\n');
}
