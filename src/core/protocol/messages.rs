// src/core/protocol/messages.rs

//! The request/response messages exchanged with clients.
//!
//! Every message carries two encodings: `prost` field tags for the binary codec and
//! `serde` attributes for the text (JSON) codec. The JSON form follows the canonical
//! protobuf JSON mapping: camelCase field names, base64 byte fields, RFC 3339
//! timestamps and enum values rendered by name.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use prost::{Enumeration, Message};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// A point in time, as seconds and nanoseconds since the Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        Utc::now().into()
    }

    /// Converts to a `DateTime`, returning `None` for out-of-range values.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let nanos = u32::try_from(self.nanos).ok()?;
        DateTime::from_timestamp(self.seconds, nanos)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos() as i32,
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let dt = self
            .to_datetime()
            .ok_or_else(|| serde::ser::Error::custom("timestamp out of range"))?;
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let dt = DateTime::parse_from_rfc3339(&raw).map_err(serde::de::Error::custom)?;
        Ok(dt.with_timezone(&Utc).into())
    }
}

/// A single client event: an opaque payload plus the type used for topic routing.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct Event {
    #[prost(bytes = "bytes", tag = "1")]
    #[serde(rename = "eventBytes", with = "base64_bytes", default)]
    pub event_bytes: Bytes,
    #[prost(string, tag = "2")]
    #[serde(rename = "type", default)]
    pub r#type: String,
}

/// A batch of events sent by a client in one frame or HTTP request.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendEventRequest {
    /// Correlation id echoed back in the response.
    #[prost(string, tag = "1")]
    pub req_guid: String,
    #[prost(message, optional, tag = "2")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_time: Option<Timestamp>,
    #[prost(message, repeated, tag = "3")]
    pub events: Vec<Event>,
}

/// The acknowledgement written back for every request.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendEventResponse {
    #[prost(enumeration = "Status", tag = "1")]
    #[serde(with = "status_name")]
    pub status: i32,
    #[prost(enumeration = "Code", tag = "2")]
    #[serde(with = "code_name")]
    pub code: i32,
    /// Unix seconds at which the response was produced.
    #[prost(int64, tag = "3")]
    #[serde(with = "int64_string")]
    pub sent_time: i64,
    #[prost(string, tag = "4")]
    pub reason: String,
    #[prost(map = "string, string", tag = "5")]
    pub data: HashMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Status {
    Unspecified = 0,
    Success = 1,
    Error = 2,
}

impl Status {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Status::Unspecified => "STATUS_UNSPECIFIED",
            Status::Success => "STATUS_SUCCESS",
            Status::Error => "STATUS_ERROR",
        }
    }

    pub fn from_str_name(value: &str) -> Option<Self> {
        match value {
            "STATUS_UNSPECIFIED" => Some(Status::Unspecified),
            "STATUS_SUCCESS" => Some(Status::Success),
            "STATUS_ERROR" => Some(Status::Error),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Code {
    Unspecified = 0,
    Ok = 1,
    BadRequest = 2,
    InternalError = 3,
    MaxConnectionLimitReached = 4,
    MaxUserLimitReached = 5,
}

impl Code {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Code::Unspecified => "CODE_UNSPECIFIED",
            Code::Ok => "CODE_OK",
            Code::BadRequest => "CODE_BAD_REQUEST",
            Code::InternalError => "CODE_INTERNAL_ERROR",
            Code::MaxConnectionLimitReached => "CODE_MAX_CONNECTION_LIMIT_REACHED",
            Code::MaxUserLimitReached => "CODE_MAX_USER_LIMIT_REACHED",
        }
    }

    pub fn from_str_name(value: &str) -> Option<Self> {
        match value {
            "CODE_UNSPECIFIED" => Some(Code::Unspecified),
            "CODE_OK" => Some(Code::Ok),
            "CODE_BAD_REQUEST" => Some(Code::BadRequest),
            "CODE_INTERNAL_ERROR" => Some(Code::InternalError),
            "CODE_MAX_CONNECTION_LIMIT_REACHED" => Some(Code::MaxConnectionLimitReached),
            "CODE_MAX_USER_LIMIT_REACHED" => Some(Code::MaxUserLimitReached),
            _ => None,
        }
    }
}

impl SendEventResponse {
    /// Builds the acknowledgement for an accepted batch.
    pub fn success(req_guid: &str) -> Self {
        Self {
            status: Status::Success as i32,
            code: Code::Ok as i32,
            sent_time: Utc::now().timestamp(),
            reason: String::new(),
            data: HashMap::from([("req_guid".to_string(), req_guid.to_string())]),
        }
    }

    /// Builds an error response with an empty data map.
    pub fn error(code: Code, reason: impl Into<String>) -> Self {
        Self {
            status: Status::Error as i32,
            code: code as i32,
            sent_time: Utc::now().timestamp(),
            reason: reason.into(),
            data: HashMap::new(),
        }
    }
}

/// Enum values on the JSON side: names when serializing, names or numbers when parsing.
#[derive(Deserialize)]
#[serde(untagged)]
enum NameOrNumber {
    Name(String),
    Number(i32),
}

fn parse_enum<'de, D, F>(deserializer: D, from_name: F) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
    F: Fn(&str) -> Option<i32>,
{
    match NameOrNumber::deserialize(deserializer)? {
        NameOrNumber::Number(n) => Ok(n),
        NameOrNumber::Name(name) => from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown enum value '{name}'"))),
    }
}

mod status_name {
    use super::Status;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        match Status::try_from(*value) {
            Ok(status) => serializer.serialize_str(status.as_str_name()),
            Err(_) => serializer.serialize_i32(*value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        super::parse_enum(deserializer, |name| {
            Status::from_str_name(name).map(|s| s as i32)
        })
    }
}

mod code_name {
    use super::Code;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i32, serializer: S) -> Result<S::Ok, S::Error> {
        match Code::try_from(*value) {
            Ok(code) => serializer.serialize_str(code.as_str_name()),
            Err(_) => serializer.serialize_i32(*value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
        super::parse_enum(deserializer, |name| Code::from_str_name(name).map(|c| c as i32))
    }
}

// 64-bit integers are strings in the protobuf JSON mapping.
mod int64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(i64),
    }

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match StringOrNumber::deserialize(deserializer)? {
            StringOrNumber::Number(n) => Ok(n),
            StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
