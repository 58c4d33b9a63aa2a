//! Annotated tag codec. Parsing mirrors commits: header lines, blank line,
//! message. Only the target fields are interpreted; everything else stays in
//! the raw header list.

use crate::errors::{GitError, Result};
use crate::hash::ObjectId;
use crate::objects::ObjectType;

#[derive(Debug, Clone)]
pub struct Tag {
    pub id: ObjectId,
    pub target: ObjectId,
    pub target_type: ObjectType,
    pub headers: Vec<(String, String)>,
    pub message: String,
}

impl Tag {
    pub fn parse(id: ObjectId, data: &[u8]) -> Result<Self> {
        let split = data.windows(2).position(|w| w == b"\n\n");
        let (head, message) = match split {
            Some(at) => (&data[..at], &data[at + 2..]),
            None => (data, &data[..0]),
        };

        let mut target = None;
        let mut target_type = None;
        let mut headers = Vec::new();
        for line in head.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            let space = line.iter().position(|b| *b == b' ').ok_or_else(|| {
                GitError::InvalidData(format!(
                    "malformed tag header line {:?}",
                    String::from_utf8_lossy(line)
                ))
            })?;
            let name = String::from_utf8_lossy(&line[..space]).into_owned();
            let value = String::from_utf8_lossy(&line[space + 1..]).into_owned();
            match name.as_str() {
                "object" => {
                    target = Some(ObjectId::from_hex(&value).map_err(|_| {
                        GitError::InvalidData(format!("bad object hash in tag: {value:?}"))
                    })?);
                }
                "type" => target_type = Some(ObjectType::from_name(value.as_bytes())?),
                _ => headers.push((name, value)),
            }
        }

        Ok(Tag {
            id,
            target: target
                .ok_or_else(|| GitError::InvalidData("tag is missing an object header".into()))?,
            target_type: target_type
                .ok_or_else(|| GitError::InvalidData("tag is missing a type header".into()))?,
            headers,
            message: String::from_utf8_lossy(message).into_owned(),
        })
    }
}
