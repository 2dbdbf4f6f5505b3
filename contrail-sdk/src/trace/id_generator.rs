//! Trace and span identifier generation.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use contrail::{SpanId, TraceId};
use rand::{rngs, Rng, SeedableRng};

/// Source of fresh trace and span identifiers.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new trace id for a root span.
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new span id. Every span gets a fresh one.
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`], drawing ids from a per-thread random number
/// generator.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().random::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().random::<u64>()))
    }
}

thread_local! {
    /// Per-thread generator state so id generation never contends.
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

/// [`IdGenerator`] handing out consecutive ids, for predictable values in
/// tests.
#[derive(Clone, Debug)]
pub struct SequentialIdGenerator(Arc<AtomicU64>);

impl SequentialIdGenerator {
    /// Create a generator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        SequentialIdGenerator(Arc::new(AtomicU64::new(1)))
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        TraceId::from(self.0.fetch_add(1, Ordering::SeqCst) as u128)
    }

    fn new_span_id(&self) -> SpanId {
        SpanId::from(self.0.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_count_up() {
        let generator = SequentialIdGenerator::default();
        assert_eq!(generator.new_trace_id(), TraceId::from(1));
        assert_eq!(generator.new_span_id(), SpanId::from(2));
        assert_eq!(generator.new_span_id(), SpanId::from(3));
    }

    #[test]
    fn sequential_clones_share_the_counter() {
        let generator = SequentialIdGenerator::default();
        let clone = generator.clone();
        let first = generator.new_span_id();
        let second = clone.new_span_id();
        assert_ne!(first, second);
    }

    #[test]
    fn random_ids_differ() {
        let generator = RandomIdGenerator::default();
        // Two draws colliding is as likely as a 128-bit collision.
        assert_ne!(generator.new_trace_id(), generator.new_trace_id());
        assert_ne!(generator.new_span_id(), generator.new_span_id());
    }
}
