//! Sampling decides, per trace, whether spans are recorded and reported.
//!
//! A [`Sampler`] is a pure predicate over the trace id. It is consulted at
//! most once per context that needs a decision — when a root context is
//! created, or when a continued context arrives with an unknown flag — and
//! the result is cached on the context for the rest of the trace.

use std::fmt;

use contrail::TraceId;

/// Decides whether a new trace is recorded.
///
/// Implementations must be pure: same trace id, same answer. They run on the
/// thread creating the span, so they should be fast and must not panic.
pub trait Sampler: CloneSampler + Send + Sync + fmt::Debug {
    /// Decide whether the trace identified by `trace_id` is sampled.
    fn decide(&self, trace_id: TraceId) -> bool;
}

/// Support trait allowing boxed samplers to be cloned. Use [`Sampler`]
/// instead of this directly.
pub trait CloneSampler {
    /// Clone into a new box.
    fn box_clone(&self) -> Box<dyn Sampler>;
}

impl<T> CloneSampler for T
where
    T: Sampler + Clone + 'static,
{
    fn box_clone(&self) -> Box<dyn Sampler> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Sampler> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Samples every trace. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysSampler;

impl Sampler for AlwaysSampler {
    fn decide(&self, _trace_id: TraceId) -> bool {
        true
    }
}

/// Samples no traces. Contexts still propagate; nothing is recorded.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverSampler;

impl Sampler for NeverSampler {
    fn decide(&self, _trace_id: TraceId) -> bool {
        false
    }
}

/// Samples a fixed fraction of traces, keyed on the trace id.
///
/// Because the decision is a function of the trace id alone, every span of a
/// sampled trace lands in the same bucket regardless of where in the process
/// it is created. Ratios at or above 1.0 sample everything; ratios at or
/// below 0.0 sample nothing.
#[derive(Clone, Copy, Debug)]
pub struct TraceIdRatioSampler {
    ratio: f64,
}

impl TraceIdRatioSampler {
    /// Create a sampler keeping roughly `ratio` of traces.
    pub fn new(ratio: f64) -> Self {
        TraceIdRatioSampler { ratio }
    }
}

impl Sampler for TraceIdRatioSampler {
    fn decide(&self, trace_id: TraceId) -> bool {
        if self.ratio >= 1.0 {
            return true;
        }
        let threshold = (self.ratio.max(0.0) * (1u64 << 63) as f64) as u64;
        // Use the low half of the trace id as the randomness source, shifted
        // to stay within the threshold's domain.
        let bytes = trace_id.to_bytes();
        let (_, low) = bytes.split_at(8);
        let low: [u8; 8] = low.try_into().unwrap_or_default();
        let bucket = u64::from_be_bytes(low) >> 1;
        bucket < threshold
    }
}
