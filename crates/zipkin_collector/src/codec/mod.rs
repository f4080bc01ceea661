//! Wire formats for spans.
//!
//! Each format has a decoder implementing [`SpanDecoder`] and an encoder
//! implementing [`SpanEncoder`]. [`DetectingDecoder`] classifies a payload by
//! its leading bytes and delegates to the matching decoder.

mod detecting;
mod json_v1;
mod json_v2;
pub mod message;
mod thrift;

pub use detecting::{detect, DetectingDecoder};
pub use json_v1::{JsonV1Decoder, JsonV1Encoder};
pub use json_v2::{JsonV2Decoder, JsonV2Encoder};
pub use self::thrift::{ThriftDecoder, ThriftEncoder};

use crate::{convert, v1, v2};
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// A supported span encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// TBinaryProtocol encoding of the zipkin v1 thrift structs
    Thrift,
    JsonV1,
    JsonV2,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Encoding::Thrift => "thrift",
            Encoding::JsonV1 => "json-v1",
            Encoding::JsonV2 => "json-v2",
        })
    }
}

/// Error types for span decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty message")]
    EmptyMessage,
    /// The payload matched no known encoding
    #[error("unknown message format")]
    UnknownFormat,
    #[error("malformed {format} message: {reason}")]
    Malformed { format: Encoding, reason: String },
    #[error("{decoder} does not support {operation}")]
    Unsupported {
        decoder: &'static str,
        operation: &'static str,
    },
}

impl DecodeError {
    pub(crate) fn malformed(format: Encoding, reason: impl fmt::Display) -> Self {
        DecodeError::Malformed {
            format,
            reason: reason.to_string(),
        }
    }
}

/// Serializes a wire DTO. Plain structs with string keys always serialize
/// into a `Vec`; anything else is logged and encodes as nothing.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|error| {
        warn!(%error, "cannot serialize span as json");
        Vec::new()
    })
}

/// Spans read from one message, in the model they were encoded in.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedSpans {
    V1(Vec<v1::Span>),
    V2(Vec<v2::Span>),
}

impl DecodedSpans {
    pub fn len(&self) -> usize {
        match self {
            DecodedSpans::V1(spans) => spans.len(),
            DecodedSpans::V2(spans) => spans.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collapses v2 spans into the v1 model.
    pub fn into_v1(self) -> Vec<v1::Span> {
        match self {
            DecodedSpans::V1(spans) => spans,
            DecodedSpans::V2(spans) => spans.iter().map(convert::to_v1).collect(),
        }
    }
}

/// Decodes encoded spans into the v1 model.
///
/// Decoders are stateless and shared across ingress threads.
pub trait SpanDecoder: Send + Sync {
    /// Decodes a payload holding exactly one span.
    fn read_span(&self, bytes: &[u8]) -> Result<v1::Span, DecodeError>;

    /// Decodes a message holding a list of spans.
    fn read_spans(&self, bytes: &[u8]) -> Result<Vec<v1::Span>, DecodeError>;

    /// Decodes a message, keeping the model it was encoded in.
    ///
    /// The default is [`SpanDecoder::read_spans`]; decoders of v2 formats
    /// override this so v2 spans reach v2 storage without a round trip
    /// through the v1 model.
    fn read_message(&self, bytes: &[u8]) -> Result<DecodedSpans, DecodeError> {
        self.read_spans(bytes).map(DecodedSpans::V1)
    }

    /// Returns the decoder name for debugging.
    fn name(&self) -> &str;
}

/// Encodes single spans of type `S`.
pub trait SpanEncoder<S>: Send + Sync {
    fn encoding(&self) -> Encoding;

    fn encode(&self, span: &S) -> Vec<u8>;

    /// Encodes `spans` as one message in this encoding.
    fn encode_list(&self, spans: &[S]) -> Vec<u8> {
        let items: Vec<Vec<u8>> = spans.iter().map(|span| self.encode(span)).collect();
        message::encode(self.encoding(), &items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TraceId;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DecodeError::malformed(Encoding::JsonV2, "expected value").to_string(),
            "malformed json-v2 message: expected value"
        );
        assert_eq!(
            DecodeError::Unsupported {
                decoder: "detecting",
                operation: "read_span"
            }
            .to_string(),
            "detecting does not support read_span"
        );
    }

    #[test]
    fn test_decoded_spans_into_v1() {
        let span = v2::Span::builder(TraceId::from_low(1), 2).name("get").build();
        let decoded = DecodedSpans::V2(vec![span.clone()]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.into_v1(), vec![convert::to_v1(&span)]);
        assert!(DecodedSpans::V1(Vec::new()).is_empty());
    }

    #[test]
    fn test_unserializable_value_encodes_as_nothing() {
        // JSON object keys must be strings
        let value = std::collections::BTreeMap::from([(vec![1u8], 1)]);
        assert!(to_json(&value).is_empty());
        assert_eq!(to_json(&[1, 2]), b"[1,2]");
    }
}
