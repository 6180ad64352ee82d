//! The `{id, type, payload}` wrapper around every protocol message.
//!
//! Decoding is two-phase: the envelope is read with the payload left as an
//! untyped JSON value, the `type` discriminator picks the payload shape, and
//! only then is the payload decoded into that shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why an inbound frame could not be turned into a typed message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("envelope has no id")]
    MissingId,

    #[error("unknown message type `{0}`")]
    UnknownType(String),

    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A closed union of payload shapes selected by a string discriminator.
pub trait Payload: Sized {
    /// Whether a decoded envelope must carry a correlation id.
    const REQUIRES_ID: bool;

    /// Wire discriminator of this variant.
    fn kind(&self) -> &'static str;

    /// Payload body, `None` for variants without one.
    fn to_payload(&self) -> Result<Option<Value>, serde_json::Error>;

    /// Select the payload shape for `kind` and decode `payload` into it.
    fn from_parts(kind: &str, payload: Value) -> Result<Self, DecodeError>;
}

/// A typed message plus its correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub id: String,
    pub message: T,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl<T: Payload> Envelope<T> {
    pub fn new(id: impl Into<String>, message: T) -> Self {
        Self {
            id: id.into(),
            message,
        }
    }

    /// Decode a complete frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let raw: RawEnvelope = serde_json::from_slice(bytes).map_err(DecodeError::Malformed)?;
        let id = match raw.id {
            Some(id) if !id.is_empty() => id,
            _ if T::REQUIRES_ID => return Err(DecodeError::MissingId),
            _ => String::new(),
        };
        let message = T::from_parts(&raw.kind, raw.payload)?;
        Ok(Self { id, message })
    }

    /// Encode to a compact JSON string. Compact output never contains a raw
    /// newline, which the outbound pump relies on when coalescing frames.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let wire = WireEnvelope {
            id: (!self.id.is_empty()).then_some(self.id.as_str()),
            kind: self.message.kind(),
            payload: self.message.to_payload()?,
        };
        serde_json::to_string(&wire)
    }
}

/// Best-effort extraction of the correlation id from a frame that failed to
/// decode.
pub fn peek_id(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}

/// Decode `payload` into the shape registered for `kind`.
pub(crate) fn payload_as<P: DeserializeOwned>(kind: &str, payload: Value) -> Result<P, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

pub(crate) fn payload_value<P: Serialize>(payload: &P) -> Result<Option<Value>, serde_json::Error> {
    serde_json::to_value(payload).map(Some)
}
