//! Backfills v1 span timestamp and duration from annotations.

use crate::constants::{self, CLIENT_RECV, CLIENT_SEND};
use crate::v1::Span;

/// Derives `timestamp` and `duration` from annotations when they were not
/// reported explicitly.
///
/// Explicit values always win. RPC spans take their bounds from `cs`/`cr`
/// when present; otherwise the first and last annotations bound the span.
/// A span with a single annotation only gets a timestamp. Applying this twice
/// is the same as applying it once.
pub fn apply_timestamp_and_duration(span: Span) -> Span {
    if span.timestamp().is_some() && span.duration().is_some() {
        return span;
    }

    let annotations = span.annotations();
    if annotations.len() < 2 {
        if span.timestamp().is_some() {
            return span;
        }
        return match guess_timestamp(&span) {
            Some(guess) => span.to_builder().timestamp(guess).build(),
            None => span,
        };
    }

    let mut first = annotations[0].timestamp;
    let mut last = annotations[annotations.len() - 1].timestamp;
    for annotation in annotations {
        match annotation.value.as_str() {
            CLIENT_SEND => first = annotation.timestamp,
            CLIENT_RECV => last = annotation.timestamp,
            _ => {}
        }
    }

    let timestamp = span.timestamp().unwrap_or(first);
    let duration = span
        .duration()
        .or_else(|| (last != first).then_some(last.saturating_sub(first)));
    span.to_builder()
        .timestamp(timestamp)
        .duration(duration)
        .build()
}

/// Best guess at the start of a span with fewer than two annotations.
///
/// Only a client send, or the lone annotation of a local span, is trusted:
/// a server-side annotation would skew the start of a shared span.
fn guess_timestamp(span: &Span) -> Option<u64> {
    let mut is_local = true;
    for annotation in span.annotations() {
        if constants::is_core_annotation(&annotation.value) {
            if annotation.value == CLIENT_SEND {
                return Some(annotation.timestamp);
            }
            is_local = false;
        }
    }
    if is_local {
        span.annotations().first().map(|a| a.timestamp)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{SERVER_RECV, SERVER_SEND};
    use crate::endpoint::Endpoint;
    use crate::ids::TraceId;
    use crate::v1::Annotation;

    fn base() -> crate::v1::SpanBuilder {
        Span::builder(TraceId::from_low(1), 2).name("get")
    }

    fn annotation(timestamp: u64, value: &str) -> Annotation {
        Annotation::new(timestamp, value, Some(Endpoint::new("frontend")))
    }

    #[test]
    fn test_explicit_values_win() {
        let span = base()
            .timestamp(5)
            .duration(7)
            .annotation(annotation(10, CLIENT_SEND))
            .annotation(annotation(40, CLIENT_RECV))
            .build();
        assert_eq!(apply_timestamp_and_duration(span.clone()), span);
    }

    #[test]
    fn test_client_bounds() {
        let span = base()
            .annotation(annotation(5, "foo"))
            .annotation(annotation(10, CLIENT_SEND))
            .annotation(annotation(40, CLIENT_RECV))
            .annotation(annotation(50, "bar"))
            .build();
        let span = apply_timestamp_and_duration(span);
        assert_eq!(span.timestamp(), Some(10));
        assert_eq!(span.duration(), Some(30));
    }

    #[test]
    fn test_server_bounds_from_first_and_last() {
        let span = base()
            .annotation(annotation(12, SERVER_RECV))
            .annotation(annotation(30, SERVER_SEND))
            .build();
        let span = apply_timestamp_and_duration(span);
        assert_eq!(span.timestamp(), Some(12));
        assert_eq!(span.duration(), Some(18));
    }

    #[test]
    fn test_single_annotation_only_sets_timestamp() {
        let local = apply_timestamp_and_duration(base().annotation(annotation(3, "foo")).build());
        assert_eq!(local.timestamp(), Some(3));
        assert_eq!(local.duration(), None);

        let client = apply_timestamp_and_duration(base().annotation(annotation(4, CLIENT_SEND)).build());
        assert_eq!(client.timestamp(), Some(4));
    }

    #[test]
    fn test_lone_server_annotation_is_not_trusted() {
        let span = base().annotation(annotation(3, SERVER_RECV)).build();
        assert_eq!(apply_timestamp_and_duration(span.clone()), span);
    }

    #[test]
    fn test_equal_bounds_have_no_duration() {
        let span = base()
            .annotation(annotation(10, CLIENT_SEND))
            .annotation(annotation(10, CLIENT_RECV))
            .build();
        let span = apply_timestamp_and_duration(span);
        assert_eq!(span.timestamp(), Some(10));
        assert_eq!(span.duration(), None);
    }

    #[test]
    fn test_idempotent() {
        let span = base()
            .annotation(annotation(10, CLIENT_SEND))
            .annotation(annotation(40, CLIENT_RECV))
            .build();
        let once = apply_timestamp_and_duration(span);
        assert_eq!(apply_timestamp_and_duration(once.clone()), once);
    }
}
