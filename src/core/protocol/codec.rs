// src/core/protocol/codec.rs

//! Codec selection by transport frame type.

use crate::core::EventGateError;
use axum::extract::ws::Message as Frame;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Content types that select the binary codec on the request/response path.
const BINARY_CONTENT_TYPES: [&str; 2] = ["application/proto", "application/x-protobuf"];

/// A message that can travel through either codec.
pub trait WireMessage: prost::Message + Default + Serialize + DeserializeOwned {}

impl<T> WireMessage for T where T: prost::Message + Default + Serialize + DeserializeOwned {}

/// The serializer/deserializer pair bound to a transport frame type.
///
/// Binary frames carry protobuf; text frames carry the JSON mapping of the same messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Binary,
    Text,
}

impl Codec {
    /// Selects the codec for a data frame. Control frames have no codec.
    pub fn for_frame(frame: &Frame) -> Option<Codec> {
        match frame {
            Frame::Binary(_) => Some(Codec::Binary),
            Frame::Text(_) => Some(Codec::Text),
            _ => None,
        }
    }

    /// Selects the codec for an HTTP body. Anything that is not protobuf is treated as JSON.
    pub fn for_content_type(content_type: Option<&str>) -> Codec {
        let mime = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase());
        match mime {
            Some(m) if BINARY_CONTENT_TYPES.contains(&m.as_str()) => Codec::Binary,
            _ => Codec::Text,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Codec::Binary => BINARY_CONTENT_TYPES[0],
            Codec::Text => "application/json",
        }
    }

    pub fn deserialize<M: WireMessage>(&self, payload: &[u8]) -> Result<M, EventGateError> {
        match self {
            Codec::Binary => Ok(M::decode(payload)?),
            Codec::Text => Ok(serde_json::from_slice(payload)?),
        }
    }

    pub fn serialize<M: WireMessage>(&self, message: &M) -> Result<Bytes, EventGateError> {
        match self {
            Codec::Binary => Ok(Bytes::from(message.encode_to_vec())),
            Codec::Text => serde_json::to_vec(message)
                .map(Bytes::from)
                .map_err(|e| EventGateError::Encode(e.to_string())),
        }
    }

    /// Decodes the payload of a data frame.
    pub fn decode_frame<M: WireMessage>(&self, frame: &Frame) -> Result<M, EventGateError> {
        match frame {
            Frame::Binary(data) => self.deserialize(data),
            Frame::Text(text) => self.deserialize(text.as_str().as_bytes()),
            _ => Err(EventGateError::Decode("not a data frame".to_string())),
        }
    }

    /// Serializes a message into a frame of the same type this codec reads.
    pub fn encode_frame<M: WireMessage>(&self, message: &M) -> Result<Frame, EventGateError> {
        match self {
            Codec::Binary => Ok(Frame::Binary(self.serialize(message)?)),
            Codec::Text => serde_json::to_string(message)
                .map(|s| Frame::Text(s.into()))
                .map_err(|e| EventGateError::Encode(e.to_string())),
        }
    }
}
