// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Key rendering and the value frame shared by both tiers.
//!
//! Frame layout:
//!
//! ```text
//! +------+---------+------+-----------------+-----------+
//! | "TC" | version | kind | JSON payload    | crc32 LE  |
//! | 2 B  | 1 B     | 1 B  | variable        | 4 B       |
//! +------+---------+------+-----------------+-----------+
//! ```
//!
//! The checksum covers every byte before it. Any process running the same
//! codec version produces identical bytes for the same logical value.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{CacheError, Result};

pub const CODEC_MAGIC: [u8; 2] = *b"TC";
pub const CODEC_VERSION: u8 = 1;

const KIND_VALUE: u8 = 0;
const KIND_NOT_FOUND: u8 = 1;
const HEADER_LEN: usize = 4;
const CRC_LEN: usize = 4;

/// Namespaced cache key, rendered as `<prefix>:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    prefix: String,
    id: String,
}

impl CacheKey {
    pub fn new(prefix: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        let id = id.into();
        validate_prefix(&prefix)?;
        if id.is_empty() {
            return Err(CacheError::InvalidKey(format!("empty id under prefix '{}'", prefix)));
        }
        Ok(Self { prefix, id })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The `<prefix>:<id>` wire form.
    pub fn render(&self) -> String {
        format!("{}:{}", self.prefix, self.id)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.prefix, self.id)
    }
}

/// Builds the key for `id` under `prefix`. Any non-empty id is accepted;
/// only the prefix is restricted.
pub fn encode(prefix: &str, id: &str) -> Result<CacheKey> {
    CacheKey::new(prefix, id)
}

pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(CacheError::InvalidKey("empty prefix".to_string()));
    }
    if !prefix.chars().all(|c| c.is_ascii_graphic() && c != ':') {
        return Err(CacheError::InvalidKey(format!(
            "prefix '{}' must be printable ASCII without ':'",
            prefix
        )));
    }
    Ok(())
}

/// The pattern a tier uses to match every key of a prefix.
pub fn prefix_pattern(prefix: &str) -> String {
    format!("{}:", prefix)
}

/// Decoded frame contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Value(Bytes),
    NotFound,
}

pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    let payload = serde_json::to_vec(value)?;
    Ok(seal(KIND_VALUE, &payload))
}

/// Marker stored for a verified "no such record" when negative caching is on.
pub fn encode_not_found() -> Bytes {
    seal(KIND_NOT_FOUND, &[])
}

pub fn decode_frame(raw: &[u8]) -> Result<Frame> {
    if raw.len() < HEADER_LEN + CRC_LEN {
        return Err(CacheError::Codec(format!(
            "frame too short: {} bytes",
            raw.len()
        )));
    }

    let (body, stored_crc) = raw.split_at(raw.len() - CRC_LEN);
    let stored_crc = u32::from_le_bytes([stored_crc[0], stored_crc[1], stored_crc[2], stored_crc[3]]);
    let computed_crc = crc32fast::hash(body);
    if stored_crc != computed_crc {
        return Err(CacheError::Codec(format!(
            "crc32 mismatch: stored {:08x}, computed {:08x}",
            stored_crc, computed_crc
        )));
    }

    if body[..2] != CODEC_MAGIC {
        return Err(CacheError::Codec("bad frame magic".to_string()));
    }
    if body[2] != CODEC_VERSION {
        return Err(CacheError::Codec(format!(
            "unsupported codec version {}",
            body[2]
        )));
    }

    match body[3] {
        KIND_VALUE => Ok(Frame::Value(Bytes::copy_from_slice(&body[HEADER_LEN..]))),
        KIND_NOT_FOUND => Ok(Frame::NotFound),
        other => Err(CacheError::Codec(format!("unknown frame kind {}", other))),
    }
}

/// Decodes a value frame. A not-found marker is reported as
/// [`CacheError::NotFound`] with an empty key; callers that know the key
/// rewrite it.
pub fn decode_value<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    match decode_frame(raw)? {
        Frame::Value(payload) => decode_payload(&payload),
        Frame::NotFound => Err(CacheError::NotFound(String::new())),
    }
}

/// Decodes the JSON payload of a [`Frame::Value`].
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

fn seal(kind: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    buf.put_slice(&CODEC_MAGIC);
    buf.put_u8(CODEC_VERSION);
    buf.put_u8(kind);
    buf.put_slice(payload);
    let crc = crc32fast::hash(&buf);
    buf.put_u32_le(crc);
    buf.freeze()
}
