use super::{to_json, DecodeError, Encoding, SpanDecoder, SpanEncoder};
use crate::endpoint::Endpoint;
use crate::ids::{self, TraceId};
use crate::v1::{self, Annotation, AnnotationValue, BinaryAnnotation};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

fn malformed(reason: impl std::fmt::Display) -> DecodeError {
    DecodeError::malformed(Encoding::JsonV1, reason)
}

/// Decodes the zipkin v1 JSON format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonV1Decoder;

impl SpanDecoder for JsonV1Decoder {
    fn read_span(&self, bytes: &[u8]) -> Result<v1::Span, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::EmptyMessage);
        }
        let span: JsonSpan = serde_json::from_slice(bytes).map_err(malformed)?;
        span.into_span()
    }

    fn read_spans(&self, bytes: &[u8]) -> Result<Vec<v1::Span>, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::EmptyMessage);
        }
        let spans: Vec<JsonSpan> = serde_json::from_slice(bytes).map_err(malformed)?;
        spans.into_iter().map(JsonSpan::into_span).collect()
    }

    fn name(&self) -> &str {
        "json-v1"
    }
}

/// Encodes v1 spans in the zipkin v1 JSON format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonV1Encoder;

impl SpanEncoder<v1::Span> for JsonV1Encoder {
    fn encoding(&self) -> Encoding {
        Encoding::JsonV1
    }

    fn encode(&self, span: &v1::Span) -> Vec<u8> {
        to_json(&JsonSpan::from(span))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonSpan {
    trace_id: TraceId,
    #[serde(default)]
    name: String,
    #[serde(with = "ids::hex")]
    id: u64,
    #[serde(
        default,
        with = "ids::hex_opt",
        skip_serializing_if = "Option::is_none"
    )]
    parent_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<JsonAnnotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    binary_annotations: Vec<JsonBinaryAnnotation>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    debug: bool,
}

#[derive(Serialize, Deserialize)]
struct JsonAnnotation {
    timestamp: u64,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<Endpoint>,
}

/// `type` is omitted for strings and booleans, which JSON types natively.
#[derive(Serialize, Deserialize)]
struct JsonBinaryAnnotation {
    key: String,
    value: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<Endpoint>,
}

impl JsonSpan {
    fn into_span(self) -> Result<v1::Span, DecodeError> {
        let annotations = self.annotations.into_iter().map(|a| {
            Annotation::new(a.timestamp, a.value, a.endpoint.map(Endpoint::normalized))
        });
        let binary_annotations = self
            .binary_annotations
            .into_iter()
            .map(|b| {
                let value = decode_value(b.value, b.value_type.as_deref())
                    .map_err(|reason| malformed(format!("binary annotation {:?}: {reason}", b.key)))?;
                Ok(BinaryAnnotation::new(b.key, value, b.endpoint.map(Endpoint::normalized)))
            })
            .collect::<Result<Vec<_>, DecodeError>>()?;

        Ok(v1::Span::builder(self.trace_id, self.id)
            .name(self.name)
            .parent_id(self.parent_id)
            .timestamp(self.timestamp)
            .duration(self.duration)
            .debug(self.debug)
            .annotations(annotations)
            .binary_annotations(binary_annotations)
            .build())
    }
}

impl From<&v1::Span> for JsonSpan {
    fn from(span: &v1::Span) -> Self {
        JsonSpan {
            trace_id: span.trace_id(),
            name: span.name().to_string(),
            id: span.id(),
            parent_id: span.parent_id(),
            timestamp: span.timestamp(),
            duration: span.duration(),
            annotations: span
                .annotations()
                .iter()
                .map(|a| JsonAnnotation {
                    timestamp: a.timestamp,
                    value: a.value.clone(),
                    endpoint: a.endpoint.clone(),
                })
                .collect(),
            binary_annotations: span
                .binary_annotations()
                .iter()
                .map(|b| {
                    let (value, value_type) = encode_value(&b.value);
                    JsonBinaryAnnotation {
                        key: b.key.clone(),
                        value,
                        value_type: value_type.map(str::to_string),
                        endpoint: b.endpoint.clone(),
                    }
                })
                .collect(),
            debug: span.debug(),
        }
    }
}

fn encode_value(value: &AnnotationValue) -> (Value, Option<&'static str>) {
    match value {
        AnnotationValue::String(v) => (Value::String(v.clone()), None),
        AnnotationValue::Bool(v) => (Value::Bool(*v), None),
        AnnotationValue::Bytes(v) => (Value::String(STANDARD.encode(v)), Some("BYTES")),
        AnnotationValue::I16(v) => (Value::from(*v), Some("I16")),
        AnnotationValue::I32(v) => (Value::from(*v), Some("I32")),
        AnnotationValue::I64(v) => (Value::from(*v), Some("I64")),
        // JSON has no NaN or infinity
        AnnotationValue::Double(v) => (
            Number::from_f64(*v).map_or_else(|| Value::String(v.to_string()), Value::Number),
            Some("DOUBLE"),
        ),
    }
}

fn decode_value(value: Value, value_type: Option<&str>) -> Result<AnnotationValue, String> {
    let value = match (value_type, value) {
        (None | Some("STRING"), Value::String(v)) => AnnotationValue::String(v),
        (None | Some("BOOL"), Value::Bool(v)) => AnnotationValue::Bool(v),
        (None, Value::Number(n)) => match n.as_i64() {
            Some(v) => AnnotationValue::I64(v),
            None => AnnotationValue::Double(n.as_f64().ok_or("number out of range")?),
        },
        (Some("BYTES"), Value::String(v)) => {
            AnnotationValue::Bytes(STANDARD.decode(v).map_err(|e| e.to_string())?)
        }
        (Some("I16"), v) => {
            AnnotationValue::I16(integer(&v)?.try_into().map_err(|_| "out of range for I16")?)
        }
        (Some("I32"), v) => {
            AnnotationValue::I32(integer(&v)?.try_into().map_err(|_| "out of range for I32")?)
        }
        (Some("I64"), v) => AnnotationValue::I64(integer(&v)?),
        (Some("DOUBLE"), v) => AnnotationValue::Double(double(&v)?),
        (value_type, value) => {
            return Err(format!(
                "unsupported value {value} for type {}",
                value_type.unwrap_or("<none>")
            ))
        }
    };
    Ok(value)
}

/// Accepts numbers and quoted numbers; some reporters quote 64-bit values.
fn integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("{value} is not an integer"))
}

fn double(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("{value} is not a number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CLIENT_RECV, CLIENT_SEND, SERVER_ADDR};
    use std::net::Ipv4Addr;

    fn frontend() -> Endpoint {
        Endpoint::new("frontend").with_ipv4(Ipv4Addr::new(127, 0, 0, 1))
    }

    fn span() -> v1::Span {
        v1::Span::builder(TraceId::from_low(0x86154a4ba6e91385), 0x4d1e00c0db9010db)
            .parent_id(0x86154a4ba6e91385)
            .name("get")
            .timestamp(1_472_470_996_199_000)
            .duration(207_000)
            .annotation(Annotation::new(1_472_470_996_199_000, CLIENT_SEND, Some(frontend())))
            .annotation(Annotation::new(1_472_470_996_406_000, CLIENT_RECV, Some(frontend())))
            .binary_annotation(BinaryAnnotation::new("http.path", "/api", Some(frontend())))
            .binary_annotation(BinaryAnnotation::address(SERVER_ADDR, Endpoint::new("backend").with_port(9000)))
            .build()
    }

    #[test]
    fn test_json_shape() {
        let json = String::from_utf8(JsonV1Encoder.encode(&span())).unwrap();
        assert_eq!(
            json,
            concat!(
                r#"{"traceId":"86154a4ba6e91385","name":"get","id":"4d1e00c0db9010db","#,
                r#""parentId":"86154a4ba6e91385","timestamp":1472470996199000,"duration":207000,"#,
                r#""annotations":[{"timestamp":1472470996199000,"value":"cs","endpoint":{"serviceName":"frontend","ipv4":"127.0.0.1"}},"#,
                r#"{"timestamp":1472470996406000,"value":"cr","endpoint":{"serviceName":"frontend","ipv4":"127.0.0.1"}}],"#,
                r#""binaryAnnotations":[{"key":"http.path","value":"/api","endpoint":{"serviceName":"frontend","ipv4":"127.0.0.1"}},"#,
                r#"{"key":"sa","value":true,"endpoint":{"serviceName":"backend","port":9000}}]}"#
            )
        );
    }

    #[test]
    fn test_roundtrip() {
        let typed = span()
            .to_builder()
            .debug(true)
            .binary_annotation(BinaryAnnotation::new("bytes", AnnotationValue::Bytes(b"hi".to_vec()), None))
            .binary_annotation(BinaryAnnotation::new("i16", AnnotationValue::I16(3), None))
            .binary_annotation(BinaryAnnotation::new("i32", AnnotationValue::I32(-9), None))
            .binary_annotation(BinaryAnnotation::new("i64", AnnotationValue::I64(i64::MAX), None))
            .binary_annotation(BinaryAnnotation::new("double", AnnotationValue::Double(2.5), None))
            .build();

        let decoded = JsonV1Decoder.read_span(&JsonV1Encoder.encode(&typed)).unwrap();
        assert_eq!(decoded, typed);

        let message = JsonV1Encoder.encode_list(&[typed.clone(), span()]);
        assert_eq!(JsonV1Decoder.read_spans(&message).unwrap(), vec![typed, span()]);
    }

    #[test]
    fn test_untyped_values() {
        let json = br#"[{"traceId":"1","id":"2","binaryAnnotations":[
            {"key":"a","value":"x"},{"key":"b","value":false},
            {"key":"c","value":7},{"key":"d","value":0.5},
            {"key":"e","value":"42","type":"I64"},{"key":"f","value":"aGk=","type":"BYTES"}]}]"#;
        let spans = JsonV1Decoder.read_spans(json).unwrap();
        let values: Vec<_> = spans[0].binary_annotations().iter().map(|b| b.value.clone()).collect();
        assert_eq!(
            values,
            [
                AnnotationValue::String("x".into()),
                AnnotationValue::Bool(false),
                AnnotationValue::I64(7),
                AnnotationValue::Double(0.5),
                AnnotationValue::I64(42),
                AnnotationValue::Bytes(b"hi".to_vec()),
            ]
        );
    }

    #[test]
    fn test_endpoint_is_normalized() {
        let json = br#"{"traceId":"1","id":"2","annotations":[
            {"timestamp":1,"value":"foo","endpoint":{"serviceName":"FrontEnd","port":0}}]}"#;
        let span = JsonV1Decoder.read_span(json).unwrap();
        assert_eq!(span.annotations()[0].endpoint, Some(Endpoint::new("frontend")));
    }

    #[test]
    fn test_malformed() {
        let cases: [&[u8]; 3] = [
            br#"[{"traceId":"1"}]"#,
            b"[{",
            br#"[{"traceId":"zz","id":"1"}]"#,
        ];
        for json in cases {
            let err = JsonV1Decoder.read_spans(json).unwrap_err();
            assert!(matches!(err, DecodeError::Malformed { format: Encoding::JsonV1, .. }), "{err}");
        }

        let json = br#"[{"traceId":"1","id":"2","binaryAnnotations":[{"key":"a","value":70000,"type":"I16"}]}]"#;
        assert!(JsonV1Decoder.read_spans(json).is_err());
        assert_eq!(JsonV1Decoder.read_spans(b""), Err(DecodeError::EmptyMessage));
    }
}
