use std::fmt;
use std::num::ParseIntError;

use crate::baggage::Baggage;

/// A 16-byte identifier shared by every span in one trace tree.
///
/// Trace ids are inherited unchanged from the root span across the whole
/// trace; only the root ever generates one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    /// Invalid trace id of all zeroes.
    pub const INVALID: TraceId = TraceId(0);

    /// Construct a trace id from its big-endian byte representation.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(u128::from_be_bytes(bytes))
    }

    /// Big-endian byte representation of this trace id.
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Parse a trace id from its 32-character lowercase hex form.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u128::from_str_radix(hex, 16).map(TraceId)
    }
}

impl From<u128> for TraceId {
    fn from(value: u128) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:032x}", self.0))
    }
}

impl fmt::LowerHex for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// An 8-byte identifier for a single span, freshly generated per span.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    /// Invalid span id of all zeroes.
    pub const INVALID: SpanId = SpanId(0);

    /// Construct a span id from its big-endian byte representation.
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        SpanId(u64::from_be_bytes(bytes))
    }

    /// Big-endian byte representation of this span id.
    pub const fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Parse a span id from its 16-character lowercase hex form.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u64::from_str_radix(hex, 16).map(SpanId)
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::LowerHex for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Immutable identity of one span, propagated in-process and across execution
/// units.
///
/// A `TraceContext` carries the position of a span in its trace tree
/// (`trace_id`, `span_id`, `parent_id`) together with the recording decision
/// for the trace. Write operations produce new values; existing contexts are
/// never mutated, which is what makes sharing them across threads safe
/// without locks.
///
/// The sampled flag is tri-state: `Some(true)`/`Some(false)` once a decision
/// has been made, `None` while it is still deferred. The `debug` flag forces
/// recording regardless of the sampled flag.
///
/// # Examples
///
/// ```
/// use contrail::{SpanId, TraceContext, TraceId};
///
/// let root = TraceContext::builder()
///     .trace_id(TraceId::from(1))
///     .span_id(SpanId::from(2))
///     .sampled(true)
///     .build();
///
/// let child = root.new_child(SpanId::from(3));
/// assert_eq!(child.trace_id(), root.trace_id());
/// assert_eq!(child.parent_id(), Some(root.span_id()));
/// assert_eq!(child.sampled(), Some(true));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    parent_id: Option<SpanId>,
    sampled: Option<bool>,
    debug: bool,
    baggage: Baggage,
}

impl TraceContext {
    /// Start building a new context value.
    pub fn builder() -> TraceContextBuilder {
        TraceContextBuilder::default()
    }

    /// The trace this span belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The identifier of this span.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The span that caused this one to be created, absent on a root.
    pub fn parent_id(&self) -> Option<SpanId> {
        self.parent_id
    }

    /// The cached sampling decision, `None` while deferred.
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    /// Whether this trace was force-enabled for recording.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Whether spans under this context record and report data.
    ///
    /// Debug implies recording even when the sampled flag says otherwise.
    pub fn is_recording(&self) -> bool {
        self.debug || self.sampled == Some(true)
    }

    /// `true` when both the trace id and span id are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }

    /// Baggage entries riding on this context.
    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    /// A copy of this context with a decided sampled flag.
    ///
    /// An already-decided context is returned unchanged; decisions are made
    /// once per trace and reused.
    pub fn with_sampling_decision(&self, sampled: bool) -> Self {
        if self.sampled.is_some() {
            return self.clone();
        }
        TraceContext {
            sampled: Some(sampled),
            ..self.clone()
        }
    }

    /// A copy of this context carrying an extra baggage entry.
    pub fn with_baggage_entry(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        TraceContext {
            baggage: self.baggage.with_entry(key, value),
            ..self.clone()
        }
    }

    /// Derive a child context under this one.
    ///
    /// The trace id, sampling decision, debug flag and baggage are inherited
    /// unchanged; the fresh `span_id` must come from an id generator, and the
    /// parent link points back at this span.
    pub fn new_child(&self, span_id: SpanId) -> Self {
        TraceContext {
            trace_id: self.trace_id,
            span_id,
            parent_id: Some(self.span_id),
            sampled: self.sampled,
            debug: self.debug,
            baggage: self.baggage.clone(),
        }
    }
}

impl fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceContext")
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("parent_id", &self.parent_id)
            .field("sampled", &self.sampled)
            .field("debug", &self.debug)
            .field("baggage", &self.baggage)
            .finish()
    }
}

/// Builder for [`TraceContext`] values.
#[derive(Clone, Debug, Default)]
pub struct TraceContextBuilder {
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    parent_id: Option<SpanId>,
    sampled: Option<bool>,
    debug: bool,
    baggage: Baggage,
}

impl TraceContextBuilder {
    /// Set the trace id.
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Set the span id.
    pub fn span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Set the parent span id.
    pub fn parent_id(mut self, parent_id: SpanId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Record a sampling decision. Leaving this unset defers the decision.
    pub fn sampled(mut self, sampled: bool) -> Self {
        self.sampled = Some(sampled);
        self
    }

    /// Force recording regardless of the sampled flag.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Attach baggage to the context.
    pub fn baggage(mut self, baggage: Baggage) -> Self {
        self.baggage = baggage;
        self
    }

    /// Finish building. Missing ids default to [`TraceId::INVALID`] /
    /// [`SpanId::INVALID`].
    pub fn build(self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id.unwrap_or(TraceId::INVALID),
            span_id: self.span_id.unwrap_or(SpanId::INVALID),
            parent_id: self.parent_id,
            sampled: self.sampled,
            debug: self.debug,
            baggage: self.baggage,
        }
    }
}
