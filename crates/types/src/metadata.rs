//! Product metadata: an ordered string→string table and its on-chain wire form.
//!
//! Wire form, per entry: `len(key) u8 ++ key ++ len(value) u8 ++ value`.
//! Order is significant; two tables are equal only if their entries match
//! position by position.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Longest key or value a single length byte can describe.
pub const MAX_FIELD_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("metadata field `{field}` is {len} bytes (max {MAX_FIELD_LEN})")]
    FieldTooLong { field: String, len: usize },
    #[error("encoded metadata is {len} bytes, product account holds {capacity}")]
    TooLarge { len: usize, capacity: usize },
    #[error("metadata truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("metadata is not valid UTF-8 at byte {offset}")]
    InvalidUtf8 { offset: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductMetadata(Vec<(String, String)>);

impl ProductMetadata {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets `key`, keeping its original position if it already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn symbol(&self) -> Option<&str> {
        self.get("symbol")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks every key and value against the one-byte length prefix.
    pub fn validate(&self) -> Result<(), EncodingError> {
        for (k, v) in &self.0 {
            if k.len() > MAX_FIELD_LEN {
                return Err(EncodingError::FieldTooLong { field: k.clone(), len: k.len() });
            }
            if v.len() > MAX_FIELD_LEN {
                return Err(EncodingError::FieldTooLong { field: k.clone(), len: v.len() });
            }
        }
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        self.0.iter().map(|(k, v)| 2 + k.len() + v.len()).sum()
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        self.validate()?;
        let mut out = Vec::with_capacity(self.encoded_len());
        for (k, v) in &self.0 {
            out.push(k.len() as u8);
            out.extend_from_slice(k.as_bytes());
            out.push(v.len() as u8);
            out.extend_from_slice(v.as_bytes());
        }
        Ok(out)
    }

    /// Like [`encode`](Self::encode), but also enforces a total byte budget.
    pub fn encode_with_capacity(&self, capacity: usize) -> Result<Vec<u8>, EncodingError> {
        let bytes = self.encode()?;
        if bytes.len() > capacity {
            return Err(EncodingError::TooLarge { len: bytes.len(), capacity });
        }
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut entries = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let key = read_field(bytes, &mut offset)?;
            let value = read_field(bytes, &mut offset)?;
            entries.push((key, value));
        }
        Ok(Self(entries))
    }
}

fn read_field(bytes: &[u8], offset: &mut usize) -> Result<String, EncodingError> {
    let start = *offset;
    let len = *bytes.get(start).ok_or(EncodingError::Truncated { offset: start })? as usize;
    let body = bytes
        .get(start + 1..start + 1 + len)
        .ok_or(EncodingError::Truncated { offset: start })?;
    let s = std::str::from_utf8(body).map_err(|_| EncodingError::InvalidUtf8 { offset: start + 1 })?;
    *offset = start + 1 + len;
    Ok(s.to_string())
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ProductMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = ProductMetadata::new();
        for (k, v) in iter {
            md.insert(k, v);
        }
        md
    }
}

impl Serialize for ProductMetadata {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// Deserialized through a visitor so document order survives.
impl<'de> Deserialize<'de> for ProductMetadata {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct MetadataVisitor;

        impl<'de> Visitor<'de> for MetadataVisitor {
            type Value = ProductMetadata;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string keys to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut md = ProductMetadata::new();
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    md.insert(k, v);
                }
                Ok(md)
            }
        }

        d.deserialize_map(MetadataVisitor)
    }
}
