//! Completion callbacks.
//!
//! Every accept call completes its callback exactly once, with either
//! `on_success` or `on_error`. Both methods consume the callback, so a second
//! completion does not type check.

use crate::collector::CollectorError;
use crate::storage::StorageError;
use std::fmt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Receives the outcome of an asynchronous operation.
pub trait Callback<E>: Send {
    fn on_success(self: Box<Self>);

    fn on_error(self: Box<Self>, error: E);
}

/// Ignores success and logs errors at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallback;

impl<E: fmt::Display> Callback<E> for NoopCallback {
    fn on_success(self: Box<Self>) {}

    fn on_error(self: Box<Self>, error: E) {
        debug!(%error, "ignoring failed request");
    }
}

/// Forwards the outcome to an awaiting task. A receiver that went away is
/// not an error.
impl<E: Send> Callback<E> for oneshot::Sender<Result<(), E>> {
    fn on_success(self: Box<Self>) {
        let _ = (*self).send(Ok(()));
    }

    fn on_error(self: Box<Self>, error: E) {
        let _ = (*self).send(Err(error));
    }
}

/// Adapts a closure taking the outcome as a `Result`.
pub struct FnCallback<F>(pub F);

impl<F> fmt::Debug for FnCallback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCallback")
    }
}

impl<E, F> Callback<E> for FnCallback<F>
where
    F: FnOnce(Result<(), E>) + Send,
{
    fn on_success(self: Box<Self>) {
        let FnCallback(f) = *self;
        f(Ok(()));
    }

    fn on_error(self: Box<Self>, error: E) {
        let FnCallback(f) = *self;
        f(Err(error));
    }
}

/// Handed to storage in place of the caller's callback.
///
/// Storage errors are wrapped with the ids of the affected spans. If storage
/// drops the guard without completing it, or panics while holding it, the
/// caller is told with [`CollectorError::Internal`].
pub(crate) struct StorageCallback {
    delegate: Option<Box<dyn Callback<CollectorError>>>,
    spans: String,
}

impl StorageCallback {
    pub(crate) fn new(delegate: Box<dyn Callback<CollectorError>>, spans: String) -> Self {
        Self {
            delegate: Some(delegate),
            spans,
        }
    }
}

impl Callback<StorageError> for StorageCallback {
    fn on_success(mut self: Box<Self>) {
        if let Some(delegate) = self.delegate.take() {
            delegate.on_success();
        }
    }

    fn on_error(mut self: Box<Self>, error: StorageError) {
        if let Some(delegate) = self.delegate.take() {
            let error = CollectorError::Storage {
                spans: std::mem::take(&mut self.spans),
                source: error,
            };
            warn!(%error, "storage rejected spans");
            delegate.on_error(error);
        }
    }
}

impl Drop for StorageCallback {
    fn drop(&mut self) {
        if let Some(delegate) = self.delegate.take() {
            let reason = if std::thread::panicking() {
                format!("storage panicked while storing spans {}", self.spans)
            } else {
                format!("storage completed neither outcome for spans {}", self.spans)
            };
            warn!(%reason, "storage callback abandoned");
            delegate.on_error(CollectorError::Internal(reason));
        }
    }
}
