//! Cache key generation.

use crate::{Error, ErrorContext, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Recursively sorts object keys so serialization is independent of insertion order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Builds fingerprints from a request's semantic parameters.
///
/// Parameter names are sorted and top-level list values are treated as sets
/// (an ingredient list in a different order is the same request).
#[derive(Debug, Clone, Default)]
pub struct FingerprintKeyBuilder {
    namespace: Option<String>,
    salt: Option<String>,
}

impl FingerprintKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix every key, e.g. `recipe:`. Namespaces keep artifact classes apart
    /// when they share a backend.
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// Mixed into the hash; bump it to invalidate keys after a prompt change.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// The canonical serialized form that gets hashed.
    pub fn canonical_form(&self, parameters: &Map<String, Value>) -> String {
        let mut parts: BTreeMap<&str, Value> = BTreeMap::new();
        for (name, value) in parameters {
            let normalized = match canonicalize(value) {
                Value::Array(items) => {
                    let mut keyed: Vec<(String, Value)> = items
                        .into_iter()
                        .map(|v| (v.to_string(), v))
                        .collect();
                    keyed.sort_by(|a, b| a.0.cmp(&b.0));
                    Value::Array(keyed.into_iter().map(|(_, v)| v).collect())
                }
                other => other,
            };
            parts.insert(name.as_str(), normalized);
        }
        let mut canonical = serde_json::to_string(&parts).unwrap_or_default();
        if let Some(ref s) = self.salt {
            canonical.push('|');
            canonical.push_str(s);
        }
        canonical
    }

    pub fn build_key(&self, parameters: &Map<String, Value>) -> CacheKey {
        let hash = hex_digest(self.canonical_form(parameters).as_bytes());
        self.finish(hash)
    }

    /// Convenience for a `json!({...})` literal. Non-object values are keyed as a
    /// single `value` parameter.
    pub fn build_key_from_json(&self, parameters: &Value) -> CacheKey {
        match parameters {
            Value::Object(map) => self.build_key(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                self.build_key(&map)
            }
        }
    }

    /// Key for a binary artifact (e.g. an uploaded image): SHA-256 of the raw bytes.
    pub fn digest_bytes(&self, bytes: &[u8]) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        if let Some(ref s) = self.salt {
            hasher.update(b"|");
            hasher.update(s.as_bytes());
        }
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        self.finish(hash)
    }

    /// Decodes a base64 payload (a bare string or a `data:<mime>;base64,` URL)
    /// and digests the raw bytes.
    pub fn digest_base64(&self, encoded: &str) -> Result<CacheKey> {
        let payload = match encoded.split_once(";base64,") {
            Some((prefix, data)) if prefix.starts_with("data:") => data,
            _ => encoded,
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| {
                Error::validation_with_context(
                    "image payload is not valid base64",
                    ErrorContext::new()
                        .with_details(e.to_string())
                        .with_source("fingerprint_key_builder"),
                )
            })?;
        Ok(self.digest_bytes(&bytes))
    }

    fn finish(&self, hash: String) -> CacheKey {
        match self.namespace {
            Some(ref ns) => CacheKey::new(format!("{}:{}", ns, hash)),
            None => CacheKey::new(hash),
        }
    }
}
