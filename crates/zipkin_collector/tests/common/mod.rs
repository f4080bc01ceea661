//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use zipkin_collector::normalize::apply_timestamp_and_duration;
use zipkin_collector::v1::{Annotation, BinaryAnnotation, Span};
use zipkin_collector::{constants, Callback, CollectorError, Endpoint, FnCallback, TraceId};

pub const TRACE_ID: TraceId = TraceId::new(0, 0x463a_c35c_9f64_13ad);

pub fn frontend() -> Endpoint {
    Endpoint::new("frontend")
        .with_ipv4(Ipv4Addr::new(172, 17, 0, 13))
        .with_port(8080)
}

pub fn backend() -> Endpoint {
    Endpoint::new("backend")
        .with_ipv4(Ipv4Addr::new(192, 168, 99, 101))
        .with_port(9000)
}

/// A client span with its remote address and one tag.
pub fn span1() -> Span {
    let span = Span::builder(TRACE_ID, 0x72_485a_3953_bb61)
        .name("get")
        .annotation(Annotation::new(1_472_470_996_199_000, constants::CLIENT_SEND, Some(frontend())))
        .annotation(Annotation::new(1_472_470_996_406_000, constants::CLIENT_RECV, Some(frontend())))
        .binary_annotation(BinaryAnnotation::new("http.path", "/api", Some(frontend())))
        .binary_annotation(BinaryAnnotation::address(constants::SERVER_ADDR, backend()))
        .build();
    apply_timestamp_and_duration(span)
}

/// An in-process span of the same trace.
pub fn span2() -> Span {
    Span::builder(TRACE_ID, 0x0f38_0cd6_d5ab_e1b7)
        .parent_id(0x72_485a_3953_bb61)
        .name("compute")
        .timestamp(1_472_470_996_250_000)
        .duration(50_000)
        .binary_annotation(BinaryAnnotation::new(constants::LOCAL_COMPONENT, "math", Some(frontend())))
        .build()
}

pub type Outcomes = Arc<Mutex<Vec<Result<(), CollectorError>>>>;

/// A callback that records every outcome it receives.
pub fn recording() -> (Outcomes, Box<dyn Callback<CollectorError>>) {
    let outcomes = Outcomes::default();
    let sink = Arc::clone(&outcomes);
    let callback = FnCallback(move |outcome| sink.lock().unwrap().push(outcome));
    (outcomes, Box::new(callback))
}
