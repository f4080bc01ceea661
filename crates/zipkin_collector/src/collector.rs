//! The ingestion pipeline.
//!
//! Spans enter through [`Collector::accept`] (already decoded) or
//! [`Collector::accept_spans`] (raw bytes plus a decoder). Either way they are
//! normalized, sampled per trace and handed to storage in a single call. The
//! caller learns the outcome through its callback, which completes exactly
//! once whatever happens along the way, including panics.

use crate::callback::{Callback, StorageCallback};
use crate::codec::{DecodeError, DecodedSpans, SpanDecoder};
use crate::ids::TraceId;
use crate::in_memory::InMemoryStorage;
use crate::metrics::{CollectorMetrics, NoopMetrics};
use crate::normalize::apply_timestamp_and_duration;
use crate::sampler::{CollectorSampler, SpanSampler};
use crate::storage::{SpanConsumerBoxed, StorageComponent, StorageError};
use crate::{convert, v1, v2};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, error, trace, warn};

/// Ids listed in a storage error message
const MAX_LOGGED_IDS: usize = 3;

/// Error types reported to collector callbacks
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Cannot decode spans: {0}")]
    Decode(#[from] DecodeError),
    #[error("Cannot store spans {spans} due to {source}")]
    Storage { spans: String, source: StorageError },
    /// A panic caught while accepting spans
    #[error("Unexpected error accepting spans: {0}")]
    Internal(String),
    #[error("invalid collector configuration: {0}")]
    Config(String),
}

/// Configuration for the collector.
///
/// Every field is optional:
///
/// - `sampler`: defaults to keeping every trace
/// - `metrics`: defaults to [`NoopMetrics`]
/// - `storage`: defaults to a v2-native [`InMemoryStorage`]
/// - `runtime`: where v2 storage calls run; defaults to the runtime the
///   collector is built on
#[derive(Clone, Default)]
pub struct CollectorConfig {
    pub sampler: Option<Arc<dyn SpanSampler>>,
    pub metrics: Option<Arc<dyn CollectorMetrics>>,
    pub storage: Option<Arc<dyn StorageComponent>>,
    pub runtime: Option<Handle>,
}

/// Where sampled spans go, decided once from the storage's capabilities.
#[derive(Clone)]
enum StorageRoute {
    V1,
    V2 {
        consumer: Arc<dyn SpanConsumerBoxed>,
        runtime: Handle,
    },
}

/// The caller's callback until it is completed or handed to storage.
struct Pending(Option<Box<dyn Callback<CollectorError>>>);

impl Pending {
    fn take(&mut self) -> Option<Box<dyn Callback<CollectorError>>> {
        self.0.take()
    }

    fn succeed(&mut self) {
        if let Some(callback) = self.take() {
            callback.on_success();
        }
    }

    fn fail(&mut self, error: CollectorError) {
        if let Some(callback) = self.take() {
            callback.on_error(error);
        }
    }
}

/// Accepts spans from transports and forwards the sampled ones to storage.
///
/// The collector holds no per-request state; share one instance (it is
/// cheap to clone) across all transports.
#[derive(Clone)]
pub struct Collector {
    sampler: Arc<dyn SpanSampler>,
    metrics: Arc<dyn CollectorMetrics>,
    storage: Arc<dyn StorageComponent>,
    route: StorageRoute,
}

impl Collector {
    /// Builds a collector, probing the storage for a v2 consumer.
    ///
    /// Fails when the storage takes v2 spans but there is no tokio runtime to
    /// run its consumer on.
    pub fn new(config: CollectorConfig) -> Result<Self, CollectorError> {
        let storage: Arc<dyn StorageComponent> = config
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));

        let route = match storage.v2_span_consumer() {
            None => StorageRoute::V1,
            Some(consumer) => {
                let runtime = match config.runtime {
                    Some(runtime) => runtime,
                    None => Handle::try_current().map_err(|e| {
                        CollectorError::Config(format!("v2 storage needs a tokio runtime: {e}"))
                    })?,
                };
                StorageRoute::V2 { consumer, runtime }
            }
        };
        debug!(
            v2_storage = matches!(route, StorageRoute::V2 { .. }),
            "collector created"
        );

        Ok(Self {
            sampler: config
                .sampler
                .unwrap_or_else(|| Arc::new(CollectorSampler::always_sample())),
            metrics: config.metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
            storage,
            route,
        })
    }

    /// Accepts already decoded spans.
    ///
    /// Returns once the spans are handed to storage; `callback` completes
    /// when storage does.
    pub fn accept(&self, spans: Vec<v1::Span>, callback: Box<dyn Callback<CollectorError>>) {
        self.metrics.increment_messages();
        self.ingress(callback, |pending| self.accept_v1(spans, pending));
    }

    /// Decodes `bytes` with `decoder` and accepts the result.
    ///
    /// A payload that cannot be decoded counts as a dropped message and fails
    /// `callback` with [`CollectorError::Decode`]; nothing reaches storage.
    pub fn accept_spans(
        &self,
        bytes: &[u8],
        decoder: &dyn SpanDecoder,
        callback: Box<dyn Callback<CollectorError>>,
    ) {
        self.metrics.increment_messages();
        self.metrics.increment_bytes(bytes.len());
        self.ingress(callback, |pending| {
            let decoded = if bytes.is_empty() {
                Err(DecodeError::EmptyMessage)
            } else {
                decoder.read_message(bytes)
            };
            match decoded {
                Err(error) => {
                    self.metrics.increment_messages_dropped();
                    warn!(decoder = decoder.name(), %error, "cannot decode spans");
                    pending.fail(CollectorError::Decode(error));
                }
                Ok(DecodedSpans::V1(spans)) => self.accept_v1(spans, pending),
                Ok(DecodedSpans::V2(spans)) => match &self.route {
                    StorageRoute::V2 { .. } => self.accept_v2(spans, pending),
                    StorageRoute::V1 => {
                        self.accept_v1(spans.iter().map(convert::to_v1).collect(), pending);
                    }
                },
            }
        });
    }

    /// Renders a span's trace id for logs.
    pub fn id_string(span: &v1::Span) -> String {
        span.trace_id().to_string()
    }

    /// Runs `body` so that a panic fails the callback instead of unwinding
    /// into the transport.
    fn ingress(
        &self,
        callback: Box<dyn Callback<CollectorError>>,
        body: impl FnOnce(&mut Pending),
    ) {
        let mut pending = Pending(Some(callback));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&mut pending)));
        if let Err(payload) = outcome {
            let reason = panic_reason(&*payload);
            error!(%reason, "unexpected error accepting spans");
            pending.fail(CollectorError::Internal(reason));
        } else if pending.0.is_some() {
            pending.fail(CollectorError::Internal("request completed without an outcome".into()));
        }
    }

    fn accept_v1(&self, spans: Vec<v1::Span>, pending: &mut Pending) {
        if spans.is_empty() {
            return pending.succeed();
        }
        self.metrics.increment_spans(spans.len());

        let received = spans.len();
        let sampled: Vec<v1::Span> = spans
            .into_iter()
            .map(apply_timestamp_and_duration)
            .filter(|span| self.is_sampled(span.trace_id(), span.debug()))
            .collect();
        if !self.record_sampling(received, sampled.len()) {
            return pending.succeed();
        }

        match &self.route {
            StorageRoute::V2 { consumer, runtime } => {
                let spans = sampled.iter().flat_map(convert::to_v2).collect();
                Self::store_v2(consumer, runtime, spans, pending);
            }
            StorageRoute::V1 => self.store_v1(sampled, pending),
        }
    }

    /// Only reached when storage is v2-native, so spans are never converted.
    fn accept_v2(&self, spans: Vec<v2::Span>, pending: &mut Pending) {
        let StorageRoute::V2 { consumer, runtime } = &self.route else {
            return self.accept_v1(spans.iter().map(convert::to_v1).collect(), pending);
        };
        if spans.is_empty() {
            return pending.succeed();
        }
        self.metrics.increment_spans(spans.len());

        let received = spans.len();
        let sampled: Vec<v2::Span> = spans
            .into_iter()
            .filter(|span| self.is_sampled(span.trace_id(), span.debug()))
            .collect();
        if !self.record_sampling(received, sampled.len()) {
            return pending.succeed();
        }
        Self::store_v2(consumer, runtime, sampled, pending);
    }

    fn is_sampled(&self, trace_id: TraceId, debug: bool) -> bool {
        self.sampler.is_sampled(trace_id.high, trace_id.low, debug)
    }

    /// Counts spans dropped by sampling; returns false when none are left.
    fn record_sampling(&self, received: usize, sampled: usize) -> bool {
        let dropped = received - sampled;
        if dropped > 0 {
            self.metrics.increment_spans_dropped(dropped);
            trace!(dropped, received, "spans dropped by sampling");
        }
        sampled > 0
    }

    fn store_v1(&self, spans: Vec<v1::Span>, pending: &mut Pending) {
        let consumer = self.storage.async_span_consumer();
        let Some(callback) = pending.take() else {
            return;
        };
        let description = describe(spans.iter().map(v1::Span::trace_id), spans.len());
        consumer.accept(spans, Box::new(StorageCallback::new(callback, description)));
    }

    fn store_v2(
        consumer: &Arc<dyn SpanConsumerBoxed>,
        runtime: &Handle,
        spans: Vec<v2::Span>,
        pending: &mut Pending,
    ) {
        let Some(callback) = pending.take() else {
            return;
        };
        let description = describe(spans.iter().map(v2::Span::trace_id), spans.len());
        let guard = Box::new(StorageCallback::new(callback, description));
        let consumer = Arc::clone(consumer);
        runtime.spawn(async move {
            match consumer.accept_boxed(spans).await {
                Ok(()) => guard.on_success(),
                Err(error) => guard.on_error(error),
            }
        });
    }
}

/// Lists the first few trace ids of a batch, as `[a, b, c, ...]`.
fn describe(trace_ids: impl Iterator<Item = TraceId>, count: usize) -> String {
    let ids: Vec<String> = trace_ids
        .take(MAX_LOGGED_IDS)
        .map(|id| id.to_string())
        .collect();
    let mut description = format!("[{}", ids.join(", "));
    if count > MAX_LOGGED_IDS {
        description.push_str(", ...");
    }
    description.push(']');
    description
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let ids = |n: u64| (1..=n).map(TraceId::from_low);
        assert_eq!(describe(ids(1), 1), "[0000000000000001]");
        assert_eq!(
            describe(ids(5), 5),
            "[0000000000000001, 0000000000000002, 0000000000000003, ...]"
        );
    }

    #[test]
    fn test_id_string() {
        let span = v1::Span::builder(TraceId::new(u64::MAX, 0), 1).build();
        assert_eq!(Collector::id_string(&span), "ffffffffffffffff0000000000000000");
    }

    #[test]
    fn test_v2_storage_without_runtime_is_rejected() {
        let result = Collector::new(CollectorConfig::default());
        assert!(matches!(result, Err(CollectorError::Config(_))));
    }

    #[test]
    fn test_v1_storage_needs_no_runtime() {
        let config = CollectorConfig {
            storage: Some(Arc::new(InMemoryStorage::v1_only())),
            ..Default::default()
        };
        assert!(Collector::new(config).is_ok());
    }

    #[test]
    fn test_panic_reason() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_reason(&*payload), "boom 1");
    }
}
