//! Request and response envelopes.
//!
//! One envelope travels per frame payload, as a JSON object tagged by
//! `type`. Bodies are base64 strings on the wire (an absent or empty
//! string means a zero-length body); header values are accepted as either
//! a bare string or an array of strings, and emitted as a bare string
//! when single-valued.

use bytes::Bytes;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use crate::errors::ProtocolError;

/// Multi-valued header map with string-or-array wire representation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(HashMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Append a value, preserving existing values for the name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.entry(name.into()).or_default().push(value.into());
    }

    /// All values for a header name.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(|v| v.as_slice())
    }

    /// First value for a header name.
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.first()).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over names and their value lists.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Vec<String>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate over flattened name-value pairs.
    pub fn iter_flat(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }
}

impl From<HashMap<String, Vec<String>>> for Headers {
    fn from(map: HashMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, values) in &self.0 {
            match values.as_slice() {
                [single] => map.serialize_entry(name, single)?,
                many => map.serialize_entry(name, many)?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        let raw = HashMap::<String, OneOrMany>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter()
                .map(|(name, v)| {
                    let values = match v {
                        OneOrMany::One(s) => vec![s],
                        OneOrMany::Many(vs) => vs,
                    };
                    (name, values)
                })
                .collect(),
        ))
    }
}

/// Base64 body transport: `Bytes` in memory, string on the wire.
mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        if encoded.is_empty() {
            return Ok(Bytes::new());
        }
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}

/// A request shipped from broker to agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Agent the broker dispatched this request to.
    #[serde(rename = "clientId")]
    pub agent_id: String,
    /// Correlation ID; the matching response carries the same value.
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "body_base64")]
    pub body: Bytes,
}

/// A response shipped from agent to broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "clientId")]
    pub agent_id: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "body_base64")]
    pub body: Bytes,
}

impl ResponseEnvelope {
    /// Synthetic response for an upstream the agent could not reach.
    pub fn internal_error(agent_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            request_id: request_id.into(),
            status_code: 500,
            headers: Headers::new(),
            body: Bytes::from_static(b"Internal Server Error"),
        }
    }
}

/// One tunnel message, dispatched on the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "request")]
    Request(RequestEnvelope),
    #[serde(rename = "response")]
    Response(ResponseEnvelope),
}

/// Decode one frame payload into an envelope.
///
/// Unknown JSON fields are ignored; anything else fails with
/// [`ProtocolError::EnvelopeMalformed`].
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, ProtocolError> {
    serde_json::from_slice(payload).map_err(|e| ProtocolError::EnvelopeMalformed(e.to_string()))
}

/// Encode an envelope as a frame payload.
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(envelope)
        .map(Bytes::from)
        .map_err(|e| ProtocolError::EnvelopeMalformed(e.to_string()))
}
