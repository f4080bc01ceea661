//! Ingestion counters.
//!
//! The collector reports to a [`CollectorMetrics`] sink and never reads it
//! back. Counters only increase and are safe to bump from any thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Sink for collector counters.
pub trait CollectorMetrics: Send + Sync {
    /// Returns a sink whose counts are kept per transport, such as `http` or
    /// `kafka`.
    fn for_transport(&self, transport: &str) -> Arc<dyn CollectorMetrics>;

    /// One message (an accept call or an encoded payload) was received.
    fn increment_messages(&self);

    /// A message could not be decoded and none of its spans were accepted.
    fn increment_messages_dropped(&self);

    fn increment_bytes(&self, quantity: usize);

    fn increment_spans(&self, quantity: usize);

    /// Spans dropped by sampling
    fn increment_spans_dropped(&self, quantity: usize);
}

/// Discards all counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl CollectorMetrics for NoopMetrics {
    fn for_transport(&self, _transport: &str) -> Arc<dyn CollectorMetrics> {
        Arc::new(NoopMetrics)
    }

    fn increment_messages(&self) {}

    fn increment_messages_dropped(&self) {}

    fn increment_bytes(&self, _quantity: usize) {}

    fn increment_spans(&self, _quantity: usize) {}

    fn increment_spans_dropped(&self, _quantity: usize) {}
}

#[derive(Debug, Default)]
struct Counters {
    messages: AtomicU64,
    messages_dropped: AtomicU64,
    bytes: AtomicU64,
    spans: AtomicU64,
    spans_dropped: AtomicU64,
}

/// Keeps counts in memory so they can be read back, mainly by tests and the
/// demo.
///
/// Scoped sinks from [`InMemoryCollectorMetrics::scoped`] share one registry;
/// scoping twice with the same name yields the same counters.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCollectorMetrics {
    name: String,
    counters: Arc<Counters>,
    registry: Arc<Mutex<HashMap<String, Arc<Counters>>>>,
}

impl InMemoryCollectorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sink for `transport`, nested under this sink's name.
    pub fn scoped(&self, transport: &str) -> Self {
        let name = if self.name.is_empty() {
            transport.to_string()
        } else {
            format!("{}.{}", self.name, transport)
        };
        let counters = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.clone())
            .or_default()
            .clone();
        Self {
            name,
            counters,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Empty for the root sink
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> u64 {
        self.counters.messages.load(Ordering::Relaxed)
    }

    pub fn messages_dropped(&self) -> u64 {
        self.counters.messages_dropped.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.counters.bytes.load(Ordering::Relaxed)
    }

    pub fn spans(&self) -> u64 {
        self.counters.spans.load(Ordering::Relaxed)
    }

    pub fn spans_dropped(&self) -> u64 {
        self.counters.spans_dropped.load(Ordering::Relaxed)
    }
}

impl CollectorMetrics for InMemoryCollectorMetrics {
    fn for_transport(&self, transport: &str) -> Arc<dyn CollectorMetrics> {
        Arc::new(self.scoped(transport))
    }

    fn increment_messages(&self) {
        self.counters.messages.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_messages_dropped(&self) {
        self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_bytes(&self, quantity: usize) {
        self.counters.bytes.fetch_add(quantity as u64, Ordering::Relaxed);
    }

    fn increment_spans(&self, quantity: usize) {
        self.counters.spans.fetch_add(quantity as u64, Ordering::Relaxed);
    }

    fn increment_spans_dropped(&self, quantity: usize) {
        self.counters.spans_dropped.fetch_add(quantity as u64, Ordering::Relaxed);
    }
}
