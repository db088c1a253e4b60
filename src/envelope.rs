//! The wire message: a JSON object with reserved keys `action`, `id`,
//! `signature`, plus action-specific fields. Backed by `serde_json::Map`,
//! which (absent the `preserve_order` feature) is a `BTreeMap` — so
//! `serde_json::to_string` on it already yields the sorted-key, no-extra-
//! whitespace canonical form this crate signs over.

use serde_json::{Map, Value};

use crate::error::{NodeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Start building an envelope with the given `action`. `id` and
    /// `signature` are added later, by `NodeIdentity::sign`.
    pub fn new(action: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("action".to_string(), Value::String(action.into()));
        Envelope(map)
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn set_field(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn action(&self) -> Option<&str> {
        self.0.get("action").and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    pub fn signature(&self) -> Option<&str> {
        self.0.get("signature").and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: String) {
        self.0.insert("id".to_string(), Value::String(id));
    }

    pub fn set_signature(&mut self, signature: String) {
        self.0.insert("signature".to_string(), Value::String(signature));
    }

    pub fn is_signed(&self) -> bool {
        self.0.contains_key("id") && self.0.contains_key("signature")
    }

    /// The bytes signed over: the envelope with `signature` removed,
    /// rendered via the frozen canonical encoding. All other keys,
    /// including `id`, stay inside the signed scope.
    pub fn canonical_bytes_without_signature(&self) -> Vec<u8> {
        let mut scratch = self.0.clone();
        scratch.remove("signature");
        serde_json::to_vec(&Value::Object(scratch)).expect("Map<String, Value> always serializes")
    }

    /// Serialize for the wire: compact JSON. The caller appends the
    /// newline frame delimiter.
    pub fn to_wire_string(&self) -> String {
        serde_json::to_string(&Value::Object(self.0.clone()))
            .expect("Map<String, Value> always serializes")
    }

    /// Parse one newline-delimited frame. Validates the two reserved keys
    /// every inbound envelope must carry before any further processing.
    pub fn from_wire_str(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line.trim_end_matches(['\n', '\r']))
            .map_err(|e| NodeError::MalformedEnvelope(e.to_string()))?;
        let map = match value {
            Value::Object(map) => map,
            _ => return Err(NodeError::MalformedEnvelope("envelope is not an object".into())),
        };
        let env = Envelope(map);
        if env.action().is_none() {
            return Err(NodeError::MalformedEnvelope("missing action".into()));
        }
        if env.signature().is_none() {
            return Err(NodeError::MalformedEnvelope("missing signature".into()));
        }
        Ok(env)
    }
}
