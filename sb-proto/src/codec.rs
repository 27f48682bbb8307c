//! JSON payload codec (payload inside a typed frame).

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::frame::RawFrame;
use crate::protocol::{ErrorPayload, MessageType};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown message type byte: {0}")]
    UnknownType(u8),
    #[error("payload is not valid UTF-8")]
    BadUtf8,
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A frame whose type byte has been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageType,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new<T: Serialize>(kind: MessageType, body: &T) -> Result<Self, CodecError> {
        Ok(Self {
            kind,
            payload: encode_payload(body)?,
        })
    }

    pub fn empty(kind: MessageType) -> Self {
        Self {
            kind,
            payload: Vec::new(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        let body = ErrorPayload { error: msg.into() };
        // Serializing a single-string struct cannot fail.
        let payload = serde_json::to_vec(&body).unwrap_or_default();
        Self {
            kind: MessageType::Error,
            payload,
        }
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        decode_payload(&self.payload)
    }

    /// Human-readable text of an `Error` message.
    pub fn error_text(&self) -> String {
        error_text(&self.payload)
    }
}

pub fn encode_payload<T: Serialize>(body: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(body)?)
}

pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let s = std::str::from_utf8(bytes).map_err(|_| CodecError::BadUtf8)?;
    Ok(serde_json::from_str(s)?)
}

pub fn decode_message(raw: RawFrame) -> Result<Message, CodecError> {
    let kind = MessageType::from_u8(raw.msg_type).ok_or(CodecError::UnknownType(raw.msg_type))?;
    Ok(Message {
        kind,
        payload: raw.payload,
    })
}

/// `{"error": "..."}` payloads yield the inner message; anything else is
/// reported verbatim (lossy UTF-8).
pub fn error_text(payload: &[u8]) -> String {
    match decode_payload::<ErrorPayload>(payload) {
        Ok(e) => e.error,
        Err(_) => String::from_utf8_lossy(payload).into_owned(),
    }
}
