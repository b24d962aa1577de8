//! Fast non-cryptographic hashing using rapidhash.
//!
//! Everything that must be stable across processes and releases goes through
//! here: canary bucket assignment, write-call idempotency keys and the
//! PII-redaction tokens used in log bodies.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// A 64-bit rapidhash value.
///
/// Serializes as a 16-character hex string for JSON compatibility with
/// JavaScript (which loses precision on large u64 values).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StableHash(u64);

impl StableHash {
    /// Hash the given data using the rapidhash v3 algorithm.
    #[inline]
    pub fn new(data: &[u8]) -> Self {
        Self(rapidhash::v3::rapidhash_v3(data))
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Convert to a 16-character lowercase hex string.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Debug for StableHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StableHash({:016x})", self.0)
    }
}

impl fmt::Display for StableHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for StableHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for StableHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        u64::from_str_radix(&s, 16)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// Canary bucket for a conversation: `hash(conversation_id) mod 100`.
///
/// The same conversation always lands in the same bucket, which is what makes
/// routing sticky under a fixed canary percent.
pub fn canary_bucket(conversation_id: &str) -> u8 {
    (StableHash::new(conversation_id.as_bytes()).as_u64() % 100) as u8
}

/// Idempotency key for a write-marked tool call.
///
/// `hash(workspace_id || conversation_id || tool || canonical_json(args))`,
/// rendered as hex. Retries of the same logical write collapse to one key.
pub fn idempotency_key(
    workspace_id: &str,
    conversation_id: &str,
    tool: &str,
    args: &Value,
) -> String {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(workspace_id.as_bytes());
    buf.push(0x1f);
    buf.extend_from_slice(conversation_id.as_bytes());
    buf.push(0x1f);
    buf.extend_from_slice(tool.as_bytes());
    buf.push(0x1f);
    buf.extend_from_slice(canonical_json(args).as_bytes());
    StableHash::new(&buf).to_hex()
}

/// Serialize a JSON value with all object keys recursively sorted.
///
/// Two values that differ only in key insertion order produce byte-equal
/// output, so hashes over the result are order-insensitive.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Redaction token for contact data in log bodies.
///
/// Logs never carry raw phone numbers, emails or message text; they carry
/// this hash instead, which still correlates across log lines.
pub fn redact(sensitive: &str) -> String {
    format!("#{}", StableHash::new(sensitive.as_bytes()).to_hex())
}
