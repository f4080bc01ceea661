//! The storage port.
//!
//! A [`StorageComponent`] always offers the callback-style v1 consumer and may
//! additionally offer a v2 consumer. The collector asks for the v2 consumer
//! once, when it is built, and routes every batch according to the answer.

use crate::callback::Callback;
use crate::{v1, v2};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Error types for storage operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend could not be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Backend refused the batch
    #[error("storage rejected spans: {0}")]
    Rejected(String),
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
    #[error("storage operation timed out")]
    Timeout,
}

/// Accepts v1 spans and reports the outcome through a callback.
///
/// Implementations must complete the callback exactly once. They may do so
/// before returning or later from another thread.
pub trait AsyncSpanConsumer: Send + Sync {
    fn accept(&self, spans: Vec<v1::Span>, callback: Box<dyn Callback<StorageError>>);
}

/// Accepts v2 spans.
///
/// Uses native async fn in traits. For dynamic dispatch use
/// [`SpanConsumerBoxed`], which every `SpanConsumer` implements.
pub trait SpanConsumer: Send + Sync {
    fn accept(&self, spans: Vec<v2::Span>) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Object-safe version of [`SpanConsumer`].
pub trait SpanConsumerBoxed: Send + Sync {
    fn accept_boxed(
        &self,
        spans: Vec<v2::Span>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>>;
}

impl<T: SpanConsumer> SpanConsumerBoxed for T {
    fn accept_boxed(
        &self,
        spans: Vec<v2::Span>,
    ) -> Pin<Box<dyn Future<Output = Result<(), StorageError>> + Send + '_>> {
        Box::pin(self.accept(spans))
    }
}

/// A storage backend as seen by the collector.
pub trait StorageComponent: Send + Sync {
    /// The v1 consumer. Every backend provides one, even if it converts
    /// internally.
    fn async_span_consumer(&self) -> Arc<dyn AsyncSpanConsumer>;

    /// The v2 consumer, for backends that store v2 spans natively.
    fn v2_span_consumer(&self) -> Option<Arc<dyn SpanConsumerBoxed>> {
        None
    }
}
