//! Zipkin Span Collector
//!
//! The ingestion core of a zipkin-compatible tracing collector. Transports
//! hand it encoded span messages; it detects the wire format, decodes,
//! samples per trace and passes the retained spans to a pluggable storage
//! backend, reporting the outcome through a callback.
//!
//! Two span models coexist: v1, where every annotation carries its host, and
//! v2, where a span has one local endpoint. Storage that takes v2 spans
//! natively receives them without a round trip through v1.
//!
//! Storage consumers use native async traits (no `#[async_trait]` macro).

pub mod callback;
pub mod codec;
pub mod collector;
pub mod constants;
pub mod convert;
pub mod endpoint;
pub mod ids;
pub mod in_memory;
pub mod metrics;
pub mod normalize;
pub mod retry;
pub mod sampler;
pub mod storage;
pub mod v1;
pub mod v2;

// Re-export main types
pub use callback::{Callback, FnCallback, NoopCallback};
pub use codec::{
    DecodeError, DecodedSpans, DetectingDecoder, Encoding, JsonV1Decoder, JsonV1Encoder,
    JsonV2Decoder, JsonV2Encoder, SpanDecoder, SpanEncoder, ThriftDecoder, ThriftEncoder,
};
pub use collector::{Collector, CollectorConfig, CollectorError};
pub use endpoint::Endpoint;
pub use ids::{IdParseError, TraceId};
pub use in_memory::InMemoryStorage;
pub use metrics::{CollectorMetrics, InMemoryCollectorMetrics, NoopMetrics};
pub use retry::{RetryConfig, RetryingSpanConsumer};
pub use sampler::{CollectorSampler, SamplerError, SpanSampler};
pub use storage::{
    AsyncSpanConsumer, SpanConsumer, SpanConsumerBoxed, StorageComponent, StorageError,
};
