use crate::callback::Callback;
use crate::convert;
use crate::storage::{
    AsyncSpanConsumer, SpanConsumer, SpanConsumerBoxed, StorageComponent, StorageError,
};
use crate::{v1, v2};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// Storage that keeps accepted spans in memory, for tests and local use.
///
/// [`InMemoryStorage::new`] stores v2 spans natively: v1 batches handed to its
/// v1 consumer are converted on the way in. [`InMemoryStorage::v1_only`]
/// offers no v2 consumer and keeps v1 spans as received. Clones share the
/// same spans.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    v1_only: bool,
    spans: Mutex<Vec<v2::Span>>,
    v1_spans: Mutex<Vec<v1::Span>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn v1_only() -> Self {
        Self {
            inner: Arc::new(Inner {
                v1_only: true,
                ..Inner::default()
            }),
        }
    }

    /// Stored v2 spans, in arrival order.
    pub fn spans(&self) -> Vec<v2::Span> {
        self.inner
            .spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stored v1 spans; only a v1-only storage keeps these.
    pub fn v1_spans(&self) -> Vec<v1::Span> {
        self.inner
            .v1_spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn span_count(&self) -> usize {
        if self.inner.v1_only {
            self.inner.v1_spans.lock().unwrap_or_else(PoisonError::into_inner).len()
        } else {
            self.inner.spans.lock().unwrap_or_else(PoisonError::into_inner).len()
        }
    }

    pub fn clear(&self) {
        self.inner.spans.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.inner.v1_spans.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn store_v2(&self, spans: Vec<v2::Span>) {
        trace!(count = spans.len(), "storing v2 spans");
        self.inner
            .spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(spans);
    }
}

impl AsyncSpanConsumer for InMemoryStorage {
    fn accept(&self, spans: Vec<v1::Span>, callback: Box<dyn Callback<StorageError>>) {
        if self.inner.v1_only {
            trace!(count = spans.len(), "storing v1 spans");
            self.inner
                .v1_spans
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(spans);
        } else {
            self.store_v2(spans.iter().flat_map(convert::to_v2).collect());
        }
        callback.on_success();
    }
}

impl SpanConsumer for InMemoryStorage {
    async fn accept(&self, spans: Vec<v2::Span>) -> Result<(), StorageError> {
        self.store_v2(spans);
        Ok(())
    }
}

impl StorageComponent for InMemoryStorage {
    fn async_span_consumer(&self) -> Arc<dyn AsyncSpanConsumer> {
        Arc::new(self.clone())
    }

    fn v2_span_consumer(&self) -> Option<Arc<dyn SpanConsumerBoxed>> {
        if self.inner.v1_only {
            None
        } else {
            Some(Arc::new(self.clone()))
        }
    }
}
