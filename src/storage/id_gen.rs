//! Store-generated document ids
//!
//! Layout (12 bytes, big-endian where numeric):
//!
//! | bytes | content                                     |
//! |-------|---------------------------------------------|
//! | 0..4  | Unix seconds at creation                    |
//! | 4..9  | per-process value: BLAKE3(pid \| start nanos) |
//! | 9..12 | wrapping counter                            |
//!
//! The time prefix makes raw-byte order roughly follow creation order, which
//! the store relies on for its default iteration order.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use blake3::Hasher;

use crate::error::GraphError;

/// Prefix marking an id in tagged text (see [`crate::storage::value`]).
pub const ID_TAG: &str = "$oid:";

static PROCESS_PART: OnceLock<[u8; 5]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

fn start_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

fn process_part() -> [u8; 5] {
    *PROCESS_PART.get_or_init(|| {
        let mut hasher = Hasher::new();
        hasher.update(&std::process::id().to_le_bytes());
        hasher.update(b"|");
        hasher.update(&start_nanos().to_le_bytes());
        let hash = hasher.finalize();
        let mut out = [0u8; 5];
        out.copy_from_slice(&hash.as_bytes()[0..5]);
        out
    })
}

fn next_count() -> u32 {
    let counter = COUNTER.get_or_init(|| {
        // seeded per process
        let p = process_part();
        AtomicU32::new(u32::from_le_bytes([p[1], p[2], p[3], p[4]]))
    });
    counter.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF
}

/// Opaque 12-byte document identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a fresh id
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let count = next_count();

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&process_part());
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Creation time in Unix seconds
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Canonical 24-char lowercase hex form
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(24);
        for b in self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    /// Id rendered in tagged text form (`$oid:<hex>`)
    pub fn to_tagged(&self) -> String {
        format!("{}{}", ID_TAG, self.to_hex())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GraphError::Validation(format!("invalid object id '{}'", s)));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| GraphError::Validation(format!("invalid object id '{}'", s)))?;
        }
        Ok(Self(bytes))
    }
}

impl TryFrom<&[u8]> for ObjectId {
    type Error = GraphError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 12] = raw
            .try_into()
            .map_err(|_| GraphError::Encoding(format!("document key has {} bytes, expected 12", raw.len())))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<ObjectId> = (0..10_000).map(|_| ObjectId::new()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_hex_round_trip() {
        let id = ObjectId::new();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 24);
        assert_eq!(hex.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!("".parse::<ObjectId>().is_err());
        assert!("0123456789abcdef0123456".parse::<ObjectId>().is_err());
        assert!("zz23456789abcdef01234567".parse::<ObjectId>().is_err());
        assert!("0123456789abcdef012345678".parse::<ObjectId>().is_err());
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let id: ObjectId = "0123456789ABCDEF01234567".parse().unwrap();
        assert_eq!(id.to_hex(), "0123456789abcdef01234567");
    }

    #[test]
    fn test_ordering_follows_timestamp_prefix() {
        let a = ObjectId::from_bytes([0, 0, 0, 1, 9, 9, 9, 9, 9, 0, 0, 5]);
        let b = ObjectId::from_bytes([0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(a < b);
        assert_eq!(b.timestamp(), 2);
    }

    #[test]
    fn test_tagged_form() {
        let id: ObjectId = "0123456789abcdef01234567".parse().unwrap();
        assert_eq!(id.to_tagged(), "$oid:0123456789abcdef01234567");
    }
}
