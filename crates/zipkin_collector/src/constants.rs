//! Well-known annotation values and binary annotation keys.

/// The client sent ("cs") a request to a server.
///
/// Starts the client side of an RPC span.
pub const CLIENT_SEND: &str = "cs";

/// The client received ("cr") a response from a server.
pub const CLIENT_RECV: &str = "cr";

/// The server sent ("ss") a response to a client.
pub const SERVER_SEND: &str = "ss";

/// The server received ("sr") a request from a client.
///
/// Starts the server side of an RPC span.
pub const SERVER_RECV: &str = "sr";

/// Message send ("ms") by a producer to a broker.
pub const MESSAGE_SEND: &str = "ms";

/// A consumer received ("mr") a message from a broker.
pub const MESSAGE_RECV: &str = "mr";

/// Optionally logs progress of a producer ("ws"), ending the producer span.
pub const WIRE_SEND: &str = "ws";

/// Optionally logs the consumer starting to process a message ("wr").
pub const WIRE_RECV: &str = "wr";

/// Annotation values that carry span kind and timing.
pub const CORE_ANNOTATIONS: [&str; 8] = [
    CLIENT_SEND,
    CLIENT_RECV,
    SERVER_SEND,
    SERVER_RECV,
    MESSAGE_SEND,
    MESSAGE_RECV,
    WIRE_SEND,
    WIRE_RECV,
];

/// Binary annotation key ("ca") whose endpoint is the calling client.
pub const CLIENT_ADDR: &str = "ca";

/// Binary annotation key ("sa") whose endpoint is the called server.
pub const SERVER_ADDR: &str = "sa";

/// Binary annotation key ("ma") whose endpoint is the message broker.
pub const MESSAGE_ADDR: &str = "ma";

/// The local component ("lc") that recorded an in-process span.
pub const LOCAL_COMPONENT: &str = "lc";

pub fn is_core_annotation(value: &str) -> bool {
    CORE_ANNOTATIONS.contains(&value)
}

pub fn is_address_key(key: &str) -> bool {
    matches!(key, CLIENT_ADDR | SERVER_ADDR | MESSAGE_ADDR)
}
