//! Codecs turning payload bytes into function values and back, and the registry they live in.
//!
//! A [`CodecRegistry`] is filled once and then frozen behind an `Arc` inside a
//! [`ContentNegotiator`], which is the only thing the pipeline consults.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

pub mod error;
pub mod negotiation;

pub use error::{CodecError, RegistrationError, UnsupportedContentType};
pub use negotiation::ContentNegotiator;

use self::error::{CodecAlreadyRegistered, InvalidMediaType};

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream";

pub type MarshalFn = dyn Fn(&Value) -> Result<Bytes, CodecError> + Send + Sync;
pub type UnmarshalFn = dyn Fn(&[u8]) -> Result<Value, CodecError> + Send + Sync;

/// A marshal/unmarshal pair bound to one concrete content type.
#[derive(Clone)]
pub struct Codec {
    content_type: Arc<str>,
    marshal: Arc<MarshalFn>,
    unmarshal: Arc<UnmarshalFn>,
}

impl Codec {
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn marshal(&self, value: &Value) -> Result<Bytes, CodecError> {
        (self.marshal)(value)
    }

    pub fn unmarshal(&self, payload: &[u8]) -> Result<Value, CodecError> {
        (self.unmarshal)(payload)
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// The set of codecs known to an invoker, in registration order.
#[derive(Debug, Default)]
pub struct CodecRegistry {
    codecs: Vec<Codec>,
}

impl CodecRegistry {
    /// Construct a new empty [`CodecRegistry`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the JSON, plain text and octet-stream codecs, in that order.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (content_type, marshal, unmarshal) in [
            (
                APPLICATION_JSON,
                json_marshal as fn(&Value) -> Result<Bytes, CodecError>,
                json_unmarshal as fn(&[u8]) -> Result<Value, CodecError>,
            ),
            (TEXT_PLAIN, text_marshal, text_unmarshal),
            (APPLICATION_OCTET_STREAM, octet_marshal, octet_unmarshal),
        ] {
            registry.codecs.push(Codec {
                content_type: content_type.into(),
                marshal: Arc::new(marshal),
                unmarshal: Arc::new(unmarshal),
            });
        }
        registry
    }

    /// Register a codec for the concrete `content_type` (e.g. `text/csv`).
    pub fn register<M, U>(
        &mut self,
        content_type: &str,
        marshal: M,
        unmarshal: U,
    ) -> Result<(), RegistrationError>
    where
        M: Fn(&Value) -> Result<Bytes, CodecError> + Send + Sync + 'static,
        U: Fn(&[u8]) -> Result<Value, CodecError> + Send + Sync + 'static,
    {
        let normalized = content_type.trim().to_ascii_lowercase();
        let concrete = match normalized.split_once('/') {
            Some((ty, sub)) => !ty.is_empty() && !sub.is_empty() && ty != "*" && sub != "*",
            None => false,
        };
        if !concrete || normalized.contains(';') {
            return Err(InvalidMediaType {
                content_type: content_type.to_string(),
            }
            .into());
        }

        if self.get(&normalized).is_some() {
            return Err(CodecAlreadyRegistered {
                content_type: normalized,
            }
            .into());
        }

        self.codecs.push(Codec {
            content_type: normalized.into(),
            marshal: Arc::new(marshal),
            unmarshal: Arc::new(unmarshal),
        });
        Ok(())
    }

    /// Look up a codec by its exact concrete content type.
    pub fn get(&self, content_type: &str) -> Option<&Codec> {
        self.codecs
            .iter()
            .find(|codec| codec.content_type.eq_ignore_ascii_case(content_type))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Codec> {
        self.codecs.iter()
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

fn json_marshal(value: &Value) -> Result<Bytes, CodecError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| CodecError::new(format!("could not marshal {value} to JSON: {e}")))
}

fn json_unmarshal(payload: &[u8]) -> Result<Value, CodecError> {
    serde_json::from_slice(payload)
        .map_err(|e| CodecError::new(format!("invalid JSON payload: {e}")))
}

fn text_marshal(value: &Value) -> Result<Bytes, CodecError> {
    match value {
        Value::String(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
        other => Ok(Bytes::from(other.to_string())),
    }
}

fn text_unmarshal(payload: &[u8]) -> Result<Value, CodecError> {
    std::str::from_utf8(payload)
        .map(|text| Value::String(text.to_string()))
        .map_err(|e| CodecError::new(format!("payload is not valid UTF-8: {e}")))
}

fn octet_marshal(value: &Value) -> Result<Bytes, CodecError> {
    match value {
        Value::String(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| CodecError::new(format!("{item} is not a byte")))
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Bytes::from),
        other => Err(CodecError::new(format!(
            "could not marshal {other} to application/octet-stream"
        ))),
    }
}

fn octet_unmarshal(payload: &[u8]) -> Result<Value, CodecError> {
    Ok(Value::Array(
        payload.iter().map(|byte| Value::from(*byte)).collect(),
    ))
}
