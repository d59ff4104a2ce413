use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Checksum algorithm advertised by every backend. S3 etags for single-part
/// uploads are hex MD5 digests, and the local variants compute the same.
pub const CHECKSUM_ALGORITHM: &str = "MD5";

// ── Bitstream ──

/// A unit of binary content tracked by the repository, plus the technical
/// metadata that `put` fills in from what the store reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Bitstream {
    pub internal_id: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum_algorithm: Option<String>,
}

impl Bitstream {
    pub fn new(internal_id: impl Into<String>) -> Self {
        Self {
            internal_id: internal_id.into(),
            ..Default::default()
        }
    }

    /// Record the outcome of a successful store. All three fields change
    /// together or not at all.
    pub fn record_stored(&mut self, size_bytes: u64, checksum: impl Into<String>) {
        self.size_bytes = size_bytes;
        self.checksum = Some(checksum.into());
        self.checksum_algorithm = Some(CHECKSUM_ALGORITHM.to_string());
    }
}

// ── Attributes ──

/// Attribute names a caller may ask `about` for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKey {
    SizeBytes,
    Checksum,
    ChecksumAlgorithm,
    Modified,
}

impl AttributeKey {
    pub const ALL: [AttributeKey; 4] = [
        AttributeKey::SizeBytes,
        AttributeKey::Checksum,
        AttributeKey::ChecksumAlgorithm,
        AttributeKey::Modified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKey::SizeBytes => "size_bytes",
            AttributeKey::Checksum => "checksum",
            AttributeKey::ChecksumAlgorithm => "checksum_algorithm",
            AttributeKey::Modified => "modified",
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown attribute: {0}")]
pub struct UnknownAttribute(pub String);

impl FromStr for AttributeKey {
    type Err = UnknownAttribute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownAttribute(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AttributeValue {
    Size(u64),
    Text(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Size(n) => write!(f, "{}", n),
            AttributeValue::Text(s) => f.write_str(s),
        }
    }
}

/// Result of `about`: only the keys the caller asked for.
pub type Attributes = BTreeMap<AttributeKey, AttributeValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stored_sets_all_fields() {
        let mut b = Bitstream::new("abc123");
        b.record_stored(42, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(b.size_bytes, 42);
        assert_eq!(b.checksum.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
        assert_eq!(b.checksum_algorithm.as_deref(), Some("MD5"));
    }

    #[test]
    fn test_attribute_key_parse() {
        assert_eq!("size_bytes".parse::<AttributeKey>().unwrap(), AttributeKey::SizeBytes);
        assert_eq!("modified".parse::<AttributeKey>().unwrap(), AttributeKey::Modified);
        assert!("etag".parse::<AttributeKey>().is_err());
    }

    #[test]
    fn test_attributes_serialize_as_plain_map() {
        let mut attrs = Attributes::new();
        attrs.insert(AttributeKey::SizeBytes, AttributeValue::Size(7));
        attrs.insert(AttributeKey::Checksum, AttributeValue::Text("abc".to_string()));
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json, serde_json::json!({"size_bytes": 7, "checksum": "abc"}));
    }

    #[test]
    fn test_bitstream_json_omits_unset_checksum() {
        let b = Bitstream::new("xyz");
        let json = serde_json::to_value(&b).unwrap();
        assert!(json.get("checksum").is_none());
        let back: Bitstream = serde_json::from_value(json).unwrap();
        assert_eq!(back, b);
    }
}
