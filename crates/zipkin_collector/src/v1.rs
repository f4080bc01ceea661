//! The v1 span model.
//!
//! A v1 span may be reported in pieces by every host that took part in an
//! operation, so each annotation carries the endpoint that recorded it.

use crate::constants;
use crate::endpoint::Endpoint;
use crate::ids::TraceId;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// A timestamped event recorded by a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Annotation {
    /// Microseconds since epoch
    pub timestamp: u64,
    pub value: String,
    pub endpoint: Option<Endpoint>,
}

impl Annotation {
    pub fn new(timestamp: u64, value: impl Into<String>, endpoint: Option<Endpoint>) -> Self {
        Self {
            timestamp,
            value: value.into(),
            endpoint,
        }
    }
}

/// Typed value of a binary annotation, mirroring the thrift `AnnotationType`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Bool(bool),
    Bytes(Vec<u8>),
    I16(i16),
    I32(i32),
    I64(i64),
    Double(f64),
    String(String),
}

impl AnnotationValue {
    /// Renders the value the way a v2 tag stores it.
    pub fn to_tag_value(&self) -> String {
        match self {
            Self::Bool(v) => v.to_string(),
            Self::Bytes(v) => STANDARD.encode(v),
            Self::I16(v) => v.to_string(),
            Self::I32(v) => v.to_string(),
            Self::I64(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::String(v) => v.clone(),
        }
    }
}

impl From<&str> for AnnotationValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AnnotationValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AnnotationValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A key/value tag, or an address when the key is `ca`, `sa` or `ma`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryAnnotation {
    pub key: String,
    pub value: AnnotationValue,
    pub endpoint: Option<Endpoint>,
}

impl BinaryAnnotation {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<AnnotationValue>,
        endpoint: Option<Endpoint>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            endpoint,
        }
    }

    /// An address annotation pointing at `endpoint`.
    pub fn address(key: impl Into<String>, endpoint: Endpoint) -> Self {
        Self::new(key, true, Some(endpoint))
    }

    /// True for `ca`/`sa`/`ma` entries set to `true` with an endpoint.
    pub fn is_address(&self) -> bool {
        constants::is_address_key(&self.key)
            && self.value == AnnotationValue::Bool(true)
            && self.endpoint.is_some()
    }
}

/// A v1 span. Identifiers are fixed at construction; use
/// [`Span::to_builder`] to derive a modified copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    trace_id: TraceId,
    name: String,
    id: u64,
    parent_id: Option<u64>,
    timestamp: Option<u64>,
    duration: Option<u64>,
    annotations: Vec<Annotation>,
    binary_annotations: Vec<BinaryAnnotation>,
    debug: bool,
}

impl Span {
    pub fn builder(trace_id: TraceId, id: u64) -> SpanBuilder {
        SpanBuilder {
            trace_id,
            id,
            name: String::new(),
            parent_id: None,
            timestamp: None,
            duration: None,
            annotations: Vec::new(),
            binary_annotations: Vec::new(),
            debug: false,
        }
    }

    pub fn to_builder(&self) -> SpanBuilder {
        SpanBuilder {
            trace_id: self.trace_id,
            id: self.id,
            name: self.name.clone(),
            parent_id: self.parent_id,
            timestamp: self.timestamp,
            duration: self.duration,
            annotations: self.annotations.clone(),
            binary_annotations: self.binary_annotations.clone(),
            debug: self.debug,
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    /// Microseconds since epoch
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Microseconds
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    /// Sorted by timestamp
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Sorted by key
    pub fn binary_annotations(&self) -> &[BinaryAnnotation] {
        &self.binary_annotations
    }

    pub fn debug(&self) -> bool {
        self.debug
    }
}

/// Builder for [`Span`].
#[derive(Debug, Clone)]
pub struct SpanBuilder {
    trace_id: TraceId,
    id: u64,
    name: String,
    parent_id: Option<u64>,
    timestamp: Option<u64>,
    duration: Option<u64>,
    annotations: Vec<Annotation>,
    binary_annotations: Vec<BinaryAnnotation>,
    debug: bool,
}

impl SpanBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// A parent id of zero means the span is a root.
    pub fn parent_id(mut self, parent_id: impl Into<Option<u64>>) -> Self {
        self.parent_id = parent_id.into().filter(|id| *id != 0);
        self
    }

    pub fn timestamp(mut self, timestamp: impl Into<Option<u64>>) -> Self {
        self.timestamp = timestamp.into().filter(|ts| *ts != 0);
        self
    }

    pub fn duration(mut self, duration: impl Into<Option<u64>>) -> Self {
        self.duration = duration.into().filter(|d| *d != 0);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn annotations<I>(mut self, annotations: I) -> Self
    where
        I: IntoIterator<Item = Annotation>,
    {
        self.annotations.extend(annotations);
        self
    }

    pub fn binary_annotation(mut self, binary_annotation: BinaryAnnotation) -> Self {
        self.binary_annotations.push(binary_annotation);
        self
    }

    pub fn binary_annotations<I>(mut self, binary_annotations: I) -> Self
    where
        I: IntoIterator<Item = BinaryAnnotation>,
    {
        self.binary_annotations.extend(binary_annotations);
        self
    }

    /// Builds the span, putting annotations in timestamp order and binary
    /// annotations in key order so equality doesn't depend on wire order.
    pub fn build(mut self) -> Span {
        self.annotations
            .sort_by(|a, b| (a.timestamp, &a.value).cmp(&(b.timestamp, &b.value)));
        self.binary_annotations.sort_by(|a, b| a.key.cmp(&b.key));

        Span {
            trace_id: self.trace_id,
            name: self.name,
            id: self.id,
            parent_id: self.parent_id,
            timestamp: self.timestamp,
            duration: self.duration,
            annotations: self.annotations,
            binary_annotations: self.binary_annotations,
            debug: self.debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sorts_annotations() {
        let span = Span::builder(TraceId::from_low(1), 2)
            .name("get")
            .annotation(Annotation::new(30, "cr", None))
            .annotation(Annotation::new(10, "cs", None))
            .binary_annotation(BinaryAnnotation::new("z", "1", None))
            .binary_annotation(BinaryAnnotation::new("a", "2", None))
            .build();

        let values: Vec<_> = span.annotations().iter().map(|a| a.value.as_str()).collect();
        assert_eq!(values, ["cs", "cr"]);
        let keys: Vec<_> = span.binary_annotations().iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, ["a", "z"]);
    }

    #[test]
    fn test_zero_parent_is_root() {
        let span = Span::builder(TraceId::from_low(1), 2).parent_id(0).build();
        assert_eq!(span.parent_id(), None);
        let span = span.to_builder().parent_id(7).build();
        assert_eq!(span.parent_id(), Some(7));
    }

    #[test]
    fn test_is_address() {
        let sa = BinaryAnnotation::address(constants::SERVER_ADDR, Endpoint::new("db"));
        assert!(sa.is_address());
        assert!(!BinaryAnnotation::new(constants::SERVER_ADDR, false, Some(Endpoint::new("db"))).is_address());
        assert!(!BinaryAnnotation::new(constants::SERVER_ADDR, true, None).is_address());
        assert!(!BinaryAnnotation::address("http.url", Endpoint::new("db")).is_address());
    }

    #[test]
    fn test_tag_values() {
        assert_eq!(AnnotationValue::Bool(true).to_tag_value(), "true");
        assert_eq!(AnnotationValue::I64(-3).to_tag_value(), "-3");
        assert_eq!(AnnotationValue::Double(1.5).to_tag_value(), "1.5");
        assert_eq!(AnnotationValue::Bytes(b"hi".to_vec()).to_tag_value(), "aGk=");
    }
}
