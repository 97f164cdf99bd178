//! Content types and message (de)serialization.
//!
//! Four media types are understood: JSON and protobuf, each either as a
//! whole body or as a RecordIO stream of messages.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AgentError, Result};

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_PROTOBUF: &str = "application/x-protobuf";
pub const APPLICATION_STREAMING_JSON: &str = "application/json+recordio";
pub const APPLICATION_STREAMING_PROTOBUF: &str = "application/x-protobuf+recordio";

/// A negotiated media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Json,
    Protobuf,
    StreamingJson,
    StreamingProtobuf,
}

impl ContentType {
    /// Every type, in the order responses prefer them.
    pub const RESPONSE_PREFERENCE: [ContentType; 4] = [
        ContentType::StreamingProtobuf,
        ContentType::StreamingJson,
        ContentType::Protobuf,
        ContentType::Json,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => APPLICATION_JSON,
            ContentType::Protobuf => APPLICATION_PROTOBUF,
            ContentType::StreamingJson => APPLICATION_STREAMING_JSON,
            ContentType::StreamingProtobuf => APPLICATION_STREAMING_PROTOBUF,
        }
    }

    /// Parses a `Content-Type` header value. Parameters such as `charset`
    /// are ignored.
    pub fn parse(header: &str) -> Option<Self> {
        let media = header.split(';').next().unwrap_or("").trim();
        match media.to_ascii_lowercase().as_str() {
            APPLICATION_JSON => Some(ContentType::Json),
            APPLICATION_PROTOBUF => Some(ContentType::Protobuf),
            APPLICATION_STREAMING_JSON => Some(ContentType::StreamingJson),
            APPLICATION_STREAMING_PROTOBUF => Some(ContentType::StreamingProtobuf),
            _ => None,
        }
    }

    /// Whether bodies of this type are RecordIO streams.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            ContentType::StreamingJson | ContentType::StreamingProtobuf
        )
    }

    /// The encoding of each individual message.
    pub fn message_type(&self) -> ContentType {
        match self {
            ContentType::Json | ContentType::StreamingJson => ContentType::Json,
            ContentType::Protobuf | ContentType::StreamingProtobuf => ContentType::Protobuf,
        }
    }

    /// The streaming counterpart of this type.
    pub fn streaming_type(&self) -> ContentType {
        match self {
            ContentType::Json | ContentType::StreamingJson => ContentType::StreamingJson,
            ContentType::Protobuf | ContentType::StreamingProtobuf => {
                ContentType::StreamingProtobuf
            }
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message with both a protobuf and a JSON encoding.
pub trait WireMessage: prost::Message + Default + Serialize + DeserializeOwned {}

impl<T> WireMessage for T where T: prost::Message + Default + Serialize + DeserializeOwned {}

/// Encodes one message. Streaming types encode the bare message; framing is
/// applied by `recordio::encode`.
pub fn serialize<T: WireMessage>(content_type: ContentType, message: &T) -> Result<Bytes> {
    match content_type.message_type() {
        ContentType::Json => Ok(Bytes::from(serde_json::to_vec(message)?)),
        _ => Ok(Bytes::from(message.encode_to_vec())),
    }
}

/// Decodes one message.
pub fn deserialize<T: WireMessage>(content_type: ContentType, body: &[u8]) -> Result<T> {
    match content_type.message_type() {
        ContentType::Json => serde_json::from_slice(body).map_err(|e| {
            AgentError::SerializationError(format!("Failed to parse body into JSON: {}", e))
        }),
        _ => T::decode(body).map_err(|e| {
            AgentError::SerializationError(format!("Failed to parse body into protobuf: {}", e))
        }),
    }
}

/// A parsed `Accept` header.
#[derive(Debug, Clone, Default)]
pub struct Accept {
    ranges: Vec<MediaRange>,
}

#[derive(Debug, Clone)]
struct MediaRange {
    kind: String,
    subtype: String,
    quality: f32,
}

impl Accept {
    /// Parses a header value. `None` (header absent) accepts everything.
    pub fn parse(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Self::default();
        };

        let ranges = header
            .split(',')
            .filter_map(|entry| {
                let mut parts = entry.split(';');
                let media = parts.next()?.trim().to_ascii_lowercase();
                if media.is_empty() {
                    return None;
                }
                let (kind, subtype) = media.split_once('/')?;

                let quality = parts
                    .find_map(|param| {
                        let (name, value) = param.split_once('=')?;
                        if name.trim() == "q" {
                            value.trim().parse::<f32>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(1.0);

                Some(MediaRange {
                    kind: kind.to_string(),
                    subtype: subtype.to_string(),
                    quality,
                })
            })
            .collect::<Vec<_>>();

        // A header that parses to nothing still restricts the response.
        if ranges.is_empty() {
            return Self {
                ranges: vec![MediaRange {
                    kind: String::new(),
                    subtype: String::new(),
                    quality: 0.0,
                }],
            };
        }

        Self { ranges }
    }

    /// Whether `media_type` is acceptable.
    pub fn accepts(&self, media_type: &str) -> bool {
        if self.ranges.is_empty() {
            return true;
        }

        let Some((kind, subtype)) = media_type.split_once('/') else {
            return false;
        };

        // The most specific matching range decides.
        let mut best: Option<(u8, f32)> = None;
        for range in &self.ranges {
            let specificity = if range.kind == kind && range.subtype == subtype {
                2
            } else if range.kind == kind && range.subtype == "*" {
                1
            } else if range.kind == "*" && range.subtype == "*" {
                0
            } else {
                continue;
            };
            if best.map_or(true, |(s, _)| specificity > s) {
                best = Some((specificity, range.quality));
            }
        }

        matches!(best, Some((_, q)) if q > 0.0)
    }

    /// First candidate this header allows.
    pub fn negotiate(&self, candidates: &[ContentType]) -> Option<ContentType> {
        candidates
            .iter()
            .copied()
            .find(|candidate| self.accepts(candidate.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::agent::{call, Call};
    use crate::wire::mesos::ContainerId;

    #[test]
    fn test_parse_content_type() {
        assert_eq!(ContentType::parse("application/json"), Some(ContentType::Json));
        assert_eq!(
            ContentType::parse("application/json; charset=utf-8"),
            Some(ContentType::Json)
        );
        assert_eq!(
            ContentType::parse("application/x-protobuf+recordio"),
            Some(ContentType::StreamingProtobuf)
        );
        assert_eq!(ContentType::parse("text/plain"), None);
    }

    #[test]
    fn test_message_and_streaming_types() {
        assert!(ContentType::StreamingJson.is_streaming());
        assert!(!ContentType::Json.is_streaming());
        assert_eq!(ContentType::StreamingProtobuf.message_type(), ContentType::Protobuf);
        assert_eq!(ContentType::Json.streaming_type(), ContentType::StreamingJson);
    }

    #[test]
    fn test_accept_missing_allows_all() {
        let accept = Accept::parse(None);
        assert_eq!(
            accept.negotiate(&ContentType::RESPONSE_PREFERENCE),
            Some(ContentType::StreamingProtobuf)
        );
    }

    #[test]
    fn test_accept_exact_match() {
        let accept = Accept::parse(Some("application/json"));
        assert!(accept.accepts(APPLICATION_JSON));
        assert!(!accept.accepts(APPLICATION_PROTOBUF));
        assert_eq!(
            accept.negotiate(&ContentType::RESPONSE_PREFERENCE),
            Some(ContentType::Json)
        );
    }

    #[test]
    fn test_accept_wildcards() {
        assert!(Accept::parse(Some("*/*")).accepts(APPLICATION_PROTOBUF));
        assert!(Accept::parse(Some("application/*")).accepts(APPLICATION_STREAMING_JSON));
        assert!(!Accept::parse(Some("text/*")).accepts(APPLICATION_JSON));
    }

    #[test]
    fn test_accept_zero_quality_excludes() {
        let accept = Accept::parse(Some("*/*, application/x-protobuf+recordio;q=0"));
        assert!(!accept.accepts(APPLICATION_STREAMING_PROTOBUF));
        assert_eq!(
            accept.negotiate(&ContentType::RESPONSE_PREFERENCE),
            Some(ContentType::StreamingJson)
        );
    }

    #[test]
    fn test_accept_nothing_matches() {
        let accept = Accept::parse(Some("text/html"));
        assert_eq!(accept.negotiate(&ContentType::RESPONSE_PREFERENCE), None);
    }

    #[test]
    fn test_call_round_trip_both_codecs() {
        let mut original = Call::of(call::Type::KillNestedContainer);
        original.kill_nested_container = Some(call::KillNestedContainer {
            container_id: Some(ContainerId::nested(ContainerId::new("e"), "c")),
        });

        for content_type in ContentType::RESPONSE_PREFERENCE {
            let bytes = serialize(content_type, &original).unwrap();
            let decoded: Call = deserialize(content_type, &bytes).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_deserialize_bad_json() {
        let err = deserialize::<Call>(ContentType::Json, b"{not json").unwrap_err();
        assert!(err.to_string().contains("Failed to parse body into JSON"));
    }

    #[test]
    fn test_deserialize_bad_protobuf() {
        let err = deserialize::<Call>(ContentType::Protobuf, &[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, AgentError::SerializationError(_)));
    }
}
