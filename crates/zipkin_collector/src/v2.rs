//! The v2 span model.
//!
//! A v2 span is recorded by exactly one host: its endpoint is stated once as
//! `local_endpoint`, and an RPC seen from both sides becomes two spans sharing
//! the same ids (the server one marked `shared`).

use crate::endpoint::Endpoint;
use crate::ids::{self, TraceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The role a span played in an RPC or messaging exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    Client,
    Server,
    Producer,
    Consumer,
}

/// A timestamped event on the local endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Annotation {
    /// Microseconds since epoch
    pub timestamp: u64,
    pub value: String,
}

impl Annotation {
    pub fn new(timestamp: u64, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// A v2 span; fields are serialized in the zipkin v2 JSON field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    trace_id: TraceId,
    #[serde(
        default,
        with = "ids::hex_opt",
        skip_serializing_if = "Option::is_none"
    )]
    parent_id: Option<u64>,
    #[serde(with = "ids::hex")]
    id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<Kind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_false")]
    debug: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    shared: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl Span {
    pub fn builder(trace_id: TraceId, id: u64) -> SpanBuilder {
        SpanBuilder {
            span: Span {
                trace_id,
                parent_id: None,
                id,
                kind: None,
                name: None,
                timestamp: None,
                duration: None,
                local_endpoint: None,
                remote_endpoint: None,
                annotations: Vec::new(),
                tags: BTreeMap::new(),
                debug: false,
                shared: false,
            },
        }
    }

    pub fn to_builder(&self) -> SpanBuilder {
        SpanBuilder { span: self.clone() }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> Option<Kind> {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    pub fn local_endpoint(&self) -> Option<&Endpoint> {
        self.local_endpoint.as_ref()
    }

    pub fn remote_endpoint(&self) -> Option<&Endpoint> {
        self.remote_endpoint.as_ref()
    }

    pub fn local_service_name(&self) -> Option<&str> {
        self.local_endpoint.as_ref().and_then(Endpoint::service_name)
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn shared(&self) -> bool {
        self.shared
    }

    /// Applies the builder rules to a span read off the wire.
    pub(crate) fn normalized(self) -> Self {
        let Span {
            trace_id,
            parent_id,
            id,
            kind,
            name,
            timestamp,
            duration,
            local_endpoint,
            remote_endpoint,
            annotations,
            tags,
            debug,
            shared,
        } = self;

        let mut builder = Span::builder(trace_id, id)
            .parent_id(parent_id)
            .kind(kind)
            .timestamp(timestamp)
            .duration(duration)
            .local_endpoint(local_endpoint.map(Endpoint::normalized))
            .remote_endpoint(remote_endpoint.map(Endpoint::normalized))
            .annotations(annotations)
            .tags(tags)
            .debug(debug)
            .shared(shared);
        if let Some(name) = name {
            builder = builder.name(name);
        }
        builder.build()
    }
}

/// Builder for [`Span`].
#[derive(Debug, Clone)]
pub struct SpanBuilder {
    span: Span,
}

impl SpanBuilder {
    /// A parent id of zero means the span is a root.
    pub fn parent_id(mut self, parent_id: impl Into<Option<u64>>) -> Self {
        self.span.parent_id = parent_id.into().filter(|id| *id != 0);
        self
    }

    pub fn kind(mut self, kind: impl Into<Option<Kind>>) -> Self {
        self.span.kind = kind.into();
        self
    }

    /// An empty name is treated as absent.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.span.name = (!name.is_empty()).then_some(name);
        self
    }

    pub fn timestamp(mut self, timestamp: impl Into<Option<u64>>) -> Self {
        self.span.timestamp = timestamp.into().filter(|ts| *ts != 0);
        self
    }

    pub fn duration(mut self, duration: impl Into<Option<u64>>) -> Self {
        self.span.duration = duration.into().filter(|d| *d != 0);
        self
    }

    pub fn local_endpoint(mut self, endpoint: impl Into<Option<Endpoint>>) -> Self {
        self.span.local_endpoint = endpoint.into().filter(|e| *e != Endpoint::default());
        self
    }

    pub fn remote_endpoint(mut self, endpoint: impl Into<Option<Endpoint>>) -> Self {
        self.span.remote_endpoint = endpoint.into().filter(|e| *e != Endpoint::default());
        self
    }

    pub fn annotation(mut self, timestamp: u64, value: impl Into<String>) -> Self {
        self.span.annotations.push(Annotation::new(timestamp, value));
        self
    }

    pub fn annotations<I>(mut self, annotations: I) -> Self
    where
        I: IntoIterator<Item = Annotation>,
    {
        self.span.annotations.extend(annotations);
        self
    }

    /// Later values replace earlier ones for the same key.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.span.tags.insert(key.into(), value.into());
        self
    }

    pub fn tags<I>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.span.tags.extend(tags);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.span.debug = debug;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.span.shared = shared;
        self
    }

    pub fn build(mut self) -> Span {
        self.span
            .annotations
            .sort_by(|a, b| (a.timestamp, &a.value).cmp(&(b.timestamp, &b.value)));
        self.span
    }
}
