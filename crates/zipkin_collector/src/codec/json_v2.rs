use super::{to_json, DecodeError, DecodedSpans, Encoding, SpanDecoder, SpanEncoder};
use crate::{convert, v1, v2};

/// Decodes the zipkin v2 JSON format.
///
/// Only lists are supported. [`SpanDecoder::read_message`] keeps the spans in
/// the v2 model; [`SpanDecoder::read_spans`] collapses each into v1.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonV2Decoder;

impl JsonV2Decoder {
    /// Decodes a list of v2 spans without conversion.
    pub fn read_v2_spans(&self, bytes: &[u8]) -> Result<Vec<v2::Span>, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::EmptyMessage);
        }
        let spans: Vec<v2::Span> = serde_json::from_slice(bytes)
            .map_err(|e| DecodeError::malformed(Encoding::JsonV2, e))?;
        Ok(spans.into_iter().map(v2::Span::normalized).collect())
    }
}

impl SpanDecoder for JsonV2Decoder {
    fn read_span(&self, _bytes: &[u8]) -> Result<v1::Span, DecodeError> {
        Err(DecodeError::Unsupported {
            decoder: "json-v2",
            operation: "read_span",
        })
    }

    fn read_spans(&self, bytes: &[u8]) -> Result<Vec<v1::Span>, DecodeError> {
        Ok(self.read_v2_spans(bytes)?.iter().map(convert::to_v1).collect())
    }

    fn read_message(&self, bytes: &[u8]) -> Result<DecodedSpans, DecodeError> {
        self.read_v2_spans(bytes).map(DecodedSpans::V2)
    }

    fn name(&self) -> &str {
        "json-v2"
    }
}

/// Encodes v2 spans in the zipkin v2 JSON format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonV2Encoder;

impl SpanEncoder<v2::Span> for JsonV2Encoder {
    fn encoding(&self) -> Encoding {
        Encoding::JsonV2
    }

    fn encode(&self, span: &v2::Span) -> Vec<u8> {
        to_json(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::ids::TraceId;
    use crate::v2::Kind;

    fn span() -> v2::Span {
        v2::Span::builder(TraceId::from_low(0x86154a4ba6e91385), 0x4d1e00c0db9010db)
            .parent_id(0x86154a4ba6e91385)
            .name("get")
            .kind(Kind::Client)
            .local_endpoint(Endpoint::new("frontend"))
            .remote_endpoint(Endpoint::new("backend").with_port(9000))
            .timestamp(1_472_470_996_199_000)
            .duration(207_000)
            .annotation(1_472_470_996_238_000, "foo")
            .tag("http.path", "/api")
            .build()
    }

    #[test]
    fn test_read_message_keeps_v2() {
        let message = JsonV2Encoder.encode_list(&[span()]);
        assert_eq!(
            JsonV2Decoder.read_message(&message).unwrap(),
            DecodedSpans::V2(vec![span()])
        );
    }

    #[test]
    fn test_read_spans_converts_to_v1() {
        let message = JsonV2Encoder.encode_list(&[span()]);
        assert_eq!(
            JsonV2Decoder.read_spans(&message).unwrap(),
            vec![convert::to_v1(&span())]
        );
    }

    #[test]
    fn test_read_span_unsupported() {
        let encoded = JsonV2Encoder.encode(&span());
        assert!(matches!(
            JsonV2Decoder.read_span(&encoded),
            Err(DecodeError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_wire_values_are_normalized() {
        let json = br#"[{"traceId":"1","id":"2","name":"","localEndpoint":{"serviceName":"FrontEnd"},"timestamp":0}]"#;
        let spans = JsonV2Decoder.read_v2_spans(json).unwrap();
        assert_eq!(
            spans,
            [v2::Span::builder(TraceId::from_low(1), 2)
                .local_endpoint(Endpoint::new("frontend"))
                .build()]
        );
    }

    #[test]
    fn test_malformed() {
        let err = JsonV2Decoder.read_spans(br#"[{"id":"2"}]"#).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { format: Encoding::JsonV2, .. }), "{err}");
        assert_eq!(JsonV2Decoder.read_message(b""), Err(DecodeError::EmptyMessage));
    }
}
