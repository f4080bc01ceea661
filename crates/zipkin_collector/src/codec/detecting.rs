use super::{
    DecodeError, DecodedSpans, Encoding, JsonV1Decoder, JsonV2Decoder, SpanDecoder, ThriftDecoder,
};
use crate::v1;
use memchr::memmem;
use tracing::trace;

/// How far into a JSON message to look for a version marker
const DETECTION_WINDOW: usize = 512;

const V1_MARKERS: [&[u8]; 2] = [b"\"binaryAnnotations\"", b"\"endpoint\""];
const V2_MARKERS: [&[u8]; 5] = [
    b"\"localEndpoint\"",
    b"\"remoteEndpoint\"",
    b"\"kind\"",
    b"\"tags\"",
    b"\"shared\"",
];

/// Classifies a message by its leading bytes.
///
/// TBinaryProtocol messages start with a type id (0 to 16). JSON messages
/// start with `[` and are told apart by whichever version-specific field
/// name appears first, as an object key, in the first 512 bytes; with no
/// marker the message is read as v1. Field names that only occur inside
/// string values, such as a span named `kind`, are not markers. Only a
/// bounded prefix is inspected.
pub fn detect(bytes: &[u8]) -> Result<Encoding, DecodeError> {
    match bytes.first() {
        None => Err(DecodeError::EmptyMessage),
        Some(&b) if b <= 16 => Ok(Encoding::Thrift),
        Some(b'[') => {
            let window = &bytes[..bytes.len().min(DETECTION_WINDOW)];
            let v1 = earliest(window, &V1_MARKERS);
            let v2 = earliest(window, &V2_MARKERS);
            match (v1, v2) {
                (Some(v1), Some(v2)) if v2 < v1 => Ok(Encoding::JsonV2),
                (None, Some(_)) => Ok(Encoding::JsonV2),
                _ => Ok(Encoding::JsonV1),
            }
        }
        Some(_) => Err(DecodeError::UnknownFormat),
    }
}

fn earliest(window: &[u8], markers: &[&[u8]]) -> Option<usize> {
    markers
        .iter()
        .filter_map(|marker| {
            memmem::find_iter(window, marker).find(|&at| is_key(window, at, marker.len()))
        })
        .min()
}

/// Whether the quoted name at `at..at + len` is an object key: preceded by
/// `{` or `,` and followed by `:`, ignoring whitespace. Quotes inside a
/// string value are escaped, so they never follow either byte.
fn is_key(window: &[u8], at: usize, len: usize) -> bool {
    let before = window[..at].iter().rev().find(|b| !b.is_ascii_whitespace());
    let after = window[at + len..].iter().find(|b| !b.is_ascii_whitespace());
    matches!(before, Some(b'{' | b',')) && after == Some(&b':')
}

/// Decoder that detects the encoding of each message and delegates to the
/// matching decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectingDecoder;

impl DetectingDecoder {
    fn delegate(bytes: &[u8]) -> Result<&'static dyn SpanDecoder, DecodeError> {
        let encoding = detect(bytes)?;
        trace!(%encoding, len = bytes.len(), "detected message encoding");
        Ok(match encoding {
            Encoding::Thrift => &ThriftDecoder,
            Encoding::JsonV1 => &JsonV1Decoder,
            Encoding::JsonV2 => &JsonV2Decoder,
        })
    }
}

impl SpanDecoder for DetectingDecoder {
    /// A single span cannot be told apart from a list without parsing it, so
    /// only messages are supported.
    fn read_span(&self, _bytes: &[u8]) -> Result<v1::Span, DecodeError> {
        Err(DecodeError::Unsupported {
            decoder: "detecting",
            operation: "read_span",
        })
    }

    fn read_spans(&self, bytes: &[u8]) -> Result<Vec<v1::Span>, DecodeError> {
        Self::delegate(bytes)?.read_spans(bytes)
    }

    fn read_message(&self, bytes: &[u8]) -> Result<DecodedSpans, DecodeError> {
        Self::delegate(bytes)?.read_message(bytes)
    }

    fn name(&self) -> &str {
        "detecting"
    }
}
