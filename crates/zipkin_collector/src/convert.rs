//! Conversion between the v1 and v2 span models.
//!
//! `to_v2` is one-to-many: a v1 span that recorded both sides of an RPC, or
//! carries several address annotations, becomes one v2 span per role. `to_v1`
//! is the inverse for a single v2 span; merging the pieces back together is
//! left to whoever reads them.

use crate::constants::{
    CLIENT_ADDR, CLIENT_RECV, CLIENT_SEND, LOCAL_COMPONENT, MESSAGE_ADDR, MESSAGE_RECV,
    MESSAGE_SEND, SERVER_ADDR, SERVER_RECV, SERVER_SEND, WIRE_RECV, WIRE_SEND,
};
use crate::endpoint::Endpoint;
use crate::v1;
use crate::v2::{self, Kind};
use std::collections::BTreeMap;

/// One side of an exchange as seen in a v1 span.
#[derive(Debug, Default)]
struct Role {
    present: bool,
    local: Option<Endpoint>,
    remote: Option<Endpoint>,
    begin: Option<u64>,
    end: Option<u64>,
}

impl Role {
    fn begin_at(&mut self, annotation: &v1::Annotation) {
        self.present = true;
        self.begin = Some(annotation.timestamp);
        self.observe_local(annotation);
    }

    fn end_at(&mut self, annotation: &v1::Annotation) {
        self.present = true;
        self.end = Some(annotation.timestamp);
        self.observe_local(annotation);
    }

    fn observe_local(&mut self, annotation: &v1::Annotation) {
        if self.local.is_none() {
            self.local.clone_from(&annotation.endpoint);
        }
    }

    fn remote_at(&mut self, endpoint: Option<Endpoint>) {
        self.present = true;
        self.remote = endpoint;
    }

    fn duration(&self) -> Option<u64> {
        match (self.begin, self.end) {
            (Some(begin), Some(end)) if end > begin => Some(end - begin),
            _ => None,
        }
    }
}

/// Converts a v1 span into one or more v2 spans.
///
/// Core annotations and address annotations decide the roles (client,
/// server, producer, consumer); one v2 span is emitted per role, in that
/// order, or a single span without a kind when there is no role. The first
/// span owns the v1 timestamp and duration, the remaining annotations and
/// every non-address binary annotation as a tag. A server span that follows
/// a client span is marked shared.
///
/// Callers that want derived timestamps should run
/// [`apply_timestamp_and_duration`](crate::normalize::apply_timestamp_and_duration)
/// first.
pub fn to_v2(source: &v1::Span) -> Vec<v2::Span> {
    let mut client = Role::default();
    let mut server = Role::default();
    let mut producer = Role::default();
    let mut consumer = Role::default();
    let mut local: Option<Endpoint> = None;
    let mut annotations = Vec::new();

    for annotation in source.annotations() {
        match annotation.value.as_str() {
            CLIENT_SEND => client.begin_at(annotation),
            CLIENT_RECV => client.end_at(annotation),
            SERVER_RECV => server.begin_at(annotation),
            SERVER_SEND => server.end_at(annotation),
            MESSAGE_SEND => producer.begin_at(annotation),
            WIRE_SEND => producer.end_at(annotation),
            WIRE_RECV => consumer.begin_at(annotation),
            MESSAGE_RECV => consumer.end_at(annotation),
            _ => {
                if local.is_none() {
                    local.clone_from(&annotation.endpoint);
                }
                annotations.push(v2::Annotation::new(annotation.timestamp, &annotation.value));
            }
        }
    }
    // a consumer that only logged "mr" started there
    if consumer.begin.is_none() {
        consumer.begin = consumer.end.take();
    }

    let mut tags = BTreeMap::new();
    for binary_annotation in source.binary_annotations() {
        if binary_annotation.is_address() {
            let endpoint = binary_annotation.endpoint.clone();
            match binary_annotation.key.as_str() {
                SERVER_ADDR => client.remote_at(endpoint),
                CLIENT_ADDR => server.remote_at(endpoint),
                _ if consumer.present && !producer.present => consumer.remote_at(endpoint),
                _ => producer.remote_at(endpoint),
            }
            continue;
        }
        if local.is_none() {
            local.clone_from(&binary_annotation.endpoint);
        }
        tags.insert(
            binary_annotation.key.clone(),
            binary_annotation.value.to_tag_value(),
        );
    }

    let new_span = || {
        v2::Span::builder(source.trace_id(), source.id())
            .parent_id(source.parent_id())
            .name(source.name())
            .debug(source.debug())
    };

    let roles: Vec<(Kind, Role)> = [
        (Kind::Client, client),
        (Kind::Server, server),
        (Kind::Producer, producer),
        (Kind::Consumer, consumer),
    ]
    .into_iter()
    .filter(|(_, role)| role.present)
    .collect();

    if roles.is_empty() {
        return vec![new_span()
            .local_endpoint(local)
            .timestamp(source.timestamp())
            .duration(source.duration())
            .annotations(annotations)
            .tags(tags)
            .build()];
    }

    let mut result = Vec::with_capacity(roles.len());
    let mut annotations = Some(annotations);
    let mut tags = Some(tags);
    for (index, (kind, role)) in roles.into_iter().enumerate() {
        let duration = role.duration();
        let mut span = new_span()
            .kind(kind)
            .local_endpoint(role.local.or_else(|| local.clone()))
            .remote_endpoint(role.remote);
        if index == 0 {
            span = span
                .timestamp(source.timestamp().or(role.begin))
                .duration(source.duration().or(duration))
                .annotations(annotations.take().unwrap_or_default())
                .tags(tags.take().unwrap_or_default());
        } else {
            span = span
                .timestamp(role.begin)
                .duration(duration)
                .shared(kind == Kind::Server);
        }
        result.push(span.build());
    }
    result
}

/// Converts a v2 span back into the v1 model.
///
/// The kind and timing become core annotations on the local endpoint, tags
/// become string binary annotations, and the remote endpoint becomes an
/// address annotation. A shared server span reports no timestamp or duration
/// since the client side owns them.
pub fn to_v1(span: &v2::Span) -> v1::Span {
    let local = span.local_endpoint().cloned();
    let mut result = v1::Span::builder(span.trace_id(), span.id())
        .parent_id(span.parent_id())
        .name(span.name().unwrap_or_default())
        .debug(span.debug());

    if !(span.shared() && span.kind() == Some(Kind::Server)) {
        result = result.timestamp(span.timestamp()).duration(span.duration());
    }

    let (begin, end, address) = match span.kind() {
        Some(Kind::Client) => (Some(CLIENT_SEND), Some(CLIENT_RECV), Some(SERVER_ADDR)),
        Some(Kind::Server) => (Some(SERVER_RECV), Some(SERVER_SEND), Some(CLIENT_ADDR)),
        Some(Kind::Producer) => (Some(MESSAGE_SEND), Some(WIRE_SEND), Some(MESSAGE_ADDR)),
        Some(Kind::Consumer) if span.duration().is_some() => {
            (Some(WIRE_RECV), Some(MESSAGE_RECV), Some(MESSAGE_ADDR))
        }
        Some(Kind::Consumer) => (Some(MESSAGE_RECV), None, Some(MESSAGE_ADDR)),
        None => (None, None, None),
    };

    let mut carries_local = false;
    if let (Some(begin), Some(timestamp)) = (begin, span.timestamp()) {
        result = result.annotation(v1::Annotation::new(timestamp, begin, local.clone()));
        if let (Some(end), Some(duration)) = (end, span.duration()) {
            result = result.annotation(v1::Annotation::new(
                timestamp.saturating_add(duration),
                end,
                local.clone(),
            ));
        }
        carries_local = true;
    }

    for annotation in span.annotations() {
        result = result.annotation(v1::Annotation::new(
            annotation.timestamp,
            &annotation.value,
            local.clone(),
        ));
        carries_local = true;
    }

    for (key, value) in span.tags() {
        result = result.binary_annotation(v1::BinaryAnnotation::new(
            key,
            value.as_str(),
            local.clone(),
        ));
        carries_local = true;
    }

    if let (Some(address), Some(remote)) = (address, span.remote_endpoint()) {
        result = result.binary_annotation(v1::BinaryAnnotation::address(address, remote.clone()));
    }

    // keep the local endpoint reachable on spans with nothing else to hang it on
    if local.is_some() && !carries_local {
        result = result.binary_annotation(v1::BinaryAnnotation::new(LOCAL_COMPONENT, "", local));
    }

    result.build()
}
