//! Per-trace sampling.
//!
//! Decisions depend only on the trace id and the debug flag, so every span of
//! a trace gets the same decision no matter which request delivered it.

use crate::v1;
use std::fmt;
use thiserror::Error;

/// Knuth's multiplicative hash constant
const KNUTH_FACTOR: u64 = 1_111_111_111_111_111_111;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SamplerError {
    #[error("sample rate {0} is not between 0.0 and 1.0")]
    InvalidRate(f64),
}

/// Decides whether a trace is retained.
pub trait SpanSampler: Send + Sync {
    /// Returns true when spans of this trace should be stored. Debug spans
    /// are always stored.
    fn is_sampled(&self, trace_id_high: u64, trace_id: u64, debug: bool) -> bool;

    /// Decides on a whole span.
    ///
    /// Delegates to [`SpanSampler::is_sampled`]; the collector never calls it.
    #[deprecated(note = "use `is_sampled` with the span's trace id and debug flag")]
    fn is_sampled_span(&self, span: &v1::Span) -> bool {
        let trace_id = span.trace_id();
        self.is_sampled(trace_id.high, trace_id.low, span.debug())
    }
}

/// Keeps (100 * `rate`)% of traces, chosen by hashing the low 64 bits of the
/// trace id.
#[derive(Clone)]
pub struct CollectorSampler {
    rate: f64,
    threshold: u64,
}

impl fmt::Debug for CollectorSampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectorSampler")
            .field("rate", &self.rate)
            .finish()
    }
}

impl CollectorSampler {
    /// Creates a sampler keeping the given fraction of traces.
    pub fn create(rate: f64) -> Result<Self, SamplerError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(SamplerError::InvalidRate(rate));
        }
        let threshold = if rate >= 1.0 {
            u64::MAX
        } else {
            (rate * (u64::MAX as f64)) as u64
        };
        Ok(Self { rate, threshold })
    }

    /// Retains every trace.
    pub fn always_sample() -> Self {
        Self {
            rate: 1.0,
            threshold: u64::MAX,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Default for CollectorSampler {
    fn default() -> Self {
        Self::always_sample()
    }
}

impl SpanSampler for CollectorSampler {
    fn is_sampled(&self, _trace_id_high: u64, trace_id: u64, debug: bool) -> bool {
        if debug {
            return true;
        }
        // Fast-path for sample rate of 0.0 (always drop) or 1.0 (always sample)
        if self.rate <= 0.0 {
            return false;
        }
        if self.rate >= 1.0 {
            return true;
        }
        trace_id.wrapping_mul(KNUTH_FACTOR) <= self.threshold
    }
}
