//! # Tracer
//!
//! The `Tracer` is the sole span factory and the integration point between
//! span creation, sampling, and reporting. It resolves parentage against the
//! calling thread's current context, defers the sampling decision until a
//! context needs a decided flag, and keeps a registry of live recorders so a
//! context handed to another execution unit can be continued against the
//! same span state ([`Tracer::to_span`]).

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

use contrail::context::Scope;
use contrail::name::FALLBACK_SPAN_NAME;
use contrail::{context, SpanId, TraceContext, TraceId};

use crate::trace::id_generator::{IdGenerator, RandomIdGenerator};
use crate::trace::reporter::{NoopReporter, ReportError, SpanReporter};
use crate::trace::sampler::{AlwaysSampler, Sampler};
use crate::trace::span::{Recording, Span, SpanShared, STARTED};

/// Registry entries whose spans have been dropped are swept once the map
/// grows past this size.
const PRUNE_THRESHOLD: usize = 64;

/// Creates and manages spans.
///
/// Cheap to clone; clones share the sampler, reporter, and live-span
/// registry.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    sampler: Box<dyn Sampler>,
    reporter: Box<dyn SpanReporter>,
    id_generator: Box<dyn IdGenerator>,
    /// Live recorders keyed by span identity, held weakly so an abandoned
    /// span can be reclaimed without a terminal transition.
    live: Mutex<HashMap<(TraceId, SpanId), Weak<SpanShared>>>,
    shutdown: AtomicBool,
}

impl Tracer {
    /// Start configuring a tracer.
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    /// Begin a span under the calling thread's current context.
    ///
    /// With an active context the new span is its child; without one it is
    /// the root of a new trace. A root's sampling decision is made here, by
    /// consulting the sampler exactly once, and then rides on the context for
    /// the rest of the trace; children inherit the parent's decision
    /// unchanged.
    pub fn next_span(&self) -> SpanBuilder {
        let parent = context::current();
        self.new_child_of(parent.as_ref())
    }

    /// Begin a span under an explicitly supplied parent context.
    ///
    /// This is what the execution-unit wrappers use so that parentage follows
    /// the context captured at wrap time rather than whatever is current when
    /// the work finally runs.
    pub fn new_child_of(&self, parent: Option<&TraceContext>) -> SpanBuilder {
        let context = match parent {
            Some(parent) => self.decided(parent).new_child(self.inner.id_generator.new_span_id()),
            None => {
                let trace_id = self.inner.id_generator.new_trace_id();
                let root = TraceContext::builder()
                    .trace_id(trace_id)
                    .span_id(self.inner.id_generator.new_span_id())
                    .build();
                root.with_sampling_decision(self.inner.sampler.decide(trace_id))
            }
        };
        SpanBuilder {
            tracer: self.clone(),
            context,
            name: Cow::Borrowed(FALLBACK_SPAN_NAME),
            tags: HashMap::new(),
        }
    }

    /// Continue work under an already-created context, without implying any
    /// parentage change.
    ///
    /// If the span's recorder is still live in this process the returned
    /// handle shares it, so mutations made here surface in whichever report
    /// concludes the span. Otherwise — the recorder was reclaimed, or the
    /// context arrived from outside the process — a fresh recorder is
    /// attached to the same identifiers, already started, with the
    /// continuation time as its start time.
    pub fn to_span(&self, context: TraceContext) -> Span {
        let context = self.decided(&context);
        let key = (context.trace_id(), context.span_id());
        if let Some(shared) = self.lookup(key) {
            return Span::from_shared(context, shared);
        }
        let recording = (context.is_recording() && !self.is_shutdown()).then(|| Recording {
            name: Cow::Borrowed(FALLBACK_SPAN_NAME),
            start_time: Some(SystemTime::now()),
            end_time: None,
            tags: HashMap::new(),
            annotations: Vec::new(),
        });
        let span = Span::new(context, recording, STARTED, self.clone());
        self.register(&span);
        span
    }

    /// Install `span`'s context as current until the returned scope drops.
    ///
    /// Combines context install with scoped restore; see
    /// [`contrail::context::new_scope`] for the scope discipline.
    pub fn with_span_in_scope(&self, span: &Span) -> Scope {
        context::attach(span.context().clone())
    }

    /// Ask the reporter to surface anything it has buffered.
    pub fn force_flush(&self) -> Result<(), ReportError> {
        self.inner.reporter.force_flush()
    }

    /// Shut the tracer down. Spans created afterwards go through the full
    /// lifecycle but record and report nothing.
    pub fn shutdown(&self) -> Result<(), ReportError> {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return Err(ReportError::AlreadyShutdown);
        }
        self.inner.reporter.shutdown()
    }

    /// Whether [`shutdown`](Tracer::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Resolve a possibly-deferred sampling decision for `context`.
    ///
    /// Decided contexts pass through untouched; the sampler is only
    /// consulted for an unknown flag.
    fn decided(&self, context: &TraceContext) -> TraceContext {
        if context.sampled().is_none() {
            context.with_sampling_decision(self.inner.sampler.decide(context.trace_id()))
        } else {
            context.clone()
        }
    }

    fn lookup(&self, key: (TraceId, SpanId)) -> Option<Arc<SpanShared>> {
        let mut live = self.inner.live.lock().ok()?;
        let shared = live.get(&key).and_then(Weak::upgrade);
        if shared.is_none() {
            // Stale entries are not resurrected; drop the dead weak ref.
            live.remove(&key);
        }
        shared
    }

    pub(crate) fn register(&self, span: &Span) {
        if !span.is_recording() {
            return;
        }
        if let Ok(mut live) = self.inner.live.lock() {
            if live.len() >= PRUNE_THRESHOLD {
                live.retain(|_, entry| entry.strong_count() > 0);
            }
            live.insert(
                (span.context().trace_id(), span.context().span_id()),
                Arc::downgrade(span.shared()),
            );
        }
    }

    pub(crate) fn deregister(&self, trace_id: TraceId, span_id: SpanId) {
        if let Ok(mut live) = self.inner.live.lock() {
            live.remove(&(trace_id, span_id));
        }
    }

    pub(crate) fn reporter(&self) -> &dyn SpanReporter {
        self.inner.reporter.as_ref()
    }
}

impl fmt::Debug for Tracer {
    /// Omits the live-span registry, which is internal bookkeeping.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("sampler", &self.inner.sampler)
            .field("reporter", &self.inner.reporter)
            .field("id_generator", &self.inner.id_generator)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Configures and builds a [`Tracer`].
///
/// Defaults: sample everything, report nowhere, random identifiers, lenient
/// scope checking.
pub struct TracerBuilder {
    sampler: Box<dyn Sampler>,
    reporter: Box<dyn SpanReporter>,
    id_generator: Box<dyn IdGenerator>,
    strict_scopes: bool,
}

impl Default for TracerBuilder {
    fn default() -> Self {
        TracerBuilder {
            sampler: Box::new(AlwaysSampler),
            reporter: Box::new(NoopReporter),
            id_generator: Box::new(RandomIdGenerator::default()),
            strict_scopes: false,
        }
    }
}

impl TracerBuilder {
    /// The sampler consulted for new traces, see [`Sampler`].
    pub fn with_sampler<S: Sampler + 'static>(mut self, sampler: S) -> Self {
        self.sampler = Box::new(sampler);
        self
    }

    /// The reporter receiving finished and flushed spans.
    pub fn with_reporter<R: SpanReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    /// The generator for trace and span identifiers.
    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, id_generator: G) -> Self {
        self.id_generator = Box::new(id_generator);
        self
    }

    /// Turn scope misuse into panics instead of log lines.
    ///
    /// The switch is process-wide (the current-context store is, too);
    /// passing `true` enables it, passing `false` leaves whatever is already
    /// configured untouched.
    pub fn strict_scopes(mut self, strict: bool) -> Self {
        self.strict_scopes = strict;
        self
    }

    /// Build the tracer.
    pub fn build(self) -> Tracer {
        if self.strict_scopes {
            context::set_strict_scopes(true);
        }
        Tracer {
            inner: Arc::new(TracerInner {
                sampler: self.sampler,
                reporter: self.reporter,
                id_generator: self.id_generator,
                live: Mutex::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }
}

impl fmt::Debug for TracerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerBuilder")
            .field("sampler", &self.sampler)
            .field("strict_scopes", &self.strict_scopes)
            .finish()
    }
}

/// Configures a span before it exists.
///
/// Pre-start mutations (name, tags) set here are preserved into the span.
/// [`start`](SpanBuilder::start) is the common path; [`build`](SpanBuilder::build)
/// yields an unstarted span for callers that separate creation from starting.
#[derive(Debug)]
pub struct SpanBuilder {
    tracer: Tracer,
    context: TraceContext,
    name: Cow<'static, str>,
    tags: HashMap<String, String>,
}

impl SpanBuilder {
    /// Name the span.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set a tag before the span starts.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// The context the span will own.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Create the span and record its start timestamp now.
    pub fn start(self) -> Span {
        self.into_span(Some(SystemTime::now()))
    }

    /// [`start`](SpanBuilder::start) with a caller-chosen timestamp.
    pub fn start_with_timestamp(self, timestamp: SystemTime) -> Span {
        self.into_span(Some(timestamp))
    }

    /// Create the span without starting it.
    pub fn build(self) -> Span {
        self.into_span(None)
    }

    fn into_span(self, start_time: Option<SystemTime>) -> Span {
        let SpanBuilder {
            tracer,
            context,
            name,
            tags,
        } = self;
        let lifecycle = if start_time.is_some() {
            STARTED
        } else {
            crate::trace::span::UNSTARTED
        };
        let recording = (context.is_recording() && !tracer.is_shutdown()).then(|| Recording {
            name,
            start_time,
            end_time: None,
            tags,
            annotations: Vec::new(),
        });
        let span = Span::new(context, recording, lifecycle, tracer.clone());
        tracer.register(&span);
        span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{InMemoryReporter, NeverSampler, SequentialIdGenerator};
    use std::sync::atomic::AtomicUsize;

    fn test_tracer() -> (Tracer, InMemoryReporter) {
        let reporter = InMemoryReporter::default();
        let tracer = Tracer::builder()
            .with_reporter(reporter.clone())
            .with_id_generator(SequentialIdGenerator::default())
            .build();
        (tracer, reporter)
    }

    #[derive(Clone, Debug)]
    struct CountingSampler {
        decisions: Arc<AtomicUsize>,
    }

    impl Sampler for CountingSampler {
        fn decide(&self, _trace_id: TraceId) -> bool {
            self.decisions.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn next_span_without_context_is_a_root() {
        let (tracer, _reporter) = test_tracer();
        let span = tracer.next_span().name("calculateTax").start();

        assert!(span.context().is_valid());
        assert_eq!(span.context().parent_id(), None);
        assert_eq!(span.context().sampled(), Some(true));
        let _ = span.finish();
    }

    #[test]
    fn next_span_under_a_scope_is_a_child() {
        let (tracer, _reporter) = test_tracer();
        let parent = tracer.next_span().name("calculateTax").start();
        let child = {
            let _scope = tracer.with_span_in_scope(&parent);
            tracer.next_span().name("calculateCommission").start()
        };

        assert_eq!(child.context().trace_id(), parent.context().trace_id());
        assert_eq!(child.context().parent_id(), Some(parent.context().span_id()));
        assert_ne!(child.context().span_id(), parent.context().span_id());
    }

    // The manual span creation flow: start a span, make it current, tag and
    // annotate it, then finish and collect it.
    #[test]
    fn manual_span_creation_reaches_the_reporter() {
        let (tracer, reporter) = test_tracer();
        let new_span = tracer.next_span().name("calculateTax").start();
        {
            let _ws = tracer.with_span_in_scope(&new_span);
            new_span.tag("taxValue", "10").unwrap();
            new_span.annotate("taxCalculated").unwrap();
        }
        new_span.finish().unwrap();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "calculateTax");
        assert_eq!(spans[0].tag("taxValue"), Some("10"));
        assert_eq!(spans[0].annotations.len(), 1);
    }

    // Continuation: thread Y receives the context from thread X, continues
    // the same span, and flushes; X later concludes it. The tag added on Y
    // must be present in the finish-time report.
    #[test]
    fn continuation_across_threads_shares_the_recorder() {
        let (tracer, reporter) = test_tracer();
        let new_span = tracer.next_span().name("calculateTax").start();
        {
            let _ws = tracer.with_span_in_scope(&new_span);
            let handoff = new_span.context().clone();
            let tracer_y = tracer.clone();
            std::thread::spawn(move || {
                let continued_span = tracer_y.to_span(handoff);
                continued_span.tag("taxValue", "10").unwrap();
                continued_span.annotate("taxCalculated").unwrap();
                continued_span.flush().unwrap();
            })
            .join()
            .unwrap();
        }
        new_span.finish().unwrap();

        let spans = reporter.get_finished_spans().unwrap();
        // One flush-time report, one authoritative finish-time report.
        assert_eq!(spans.len(), 2);
        let finished = spans.last().unwrap();
        assert!(finished.end_time.is_some());
        assert_eq!(finished.name, "calculateTax");
        assert_eq!(finished.tag("taxValue"), Some("10"));
        assert_eq!(finished.annotations.len(), 1);
    }

    // Explicit parent: thread Y installs the span received from X and
    // creates a child, which finishes before the parent does.
    #[test]
    fn child_on_another_thread_reports_independently() {
        let (tracer, reporter) = test_tracer();
        let initial_span = tracer.next_span().name("calculateTax").start();

        let tracer_y = tracer.clone();
        let parent_cx = initial_span.context().clone();
        std::thread::spawn(move || {
            let handed_over = tracer_y.to_span(parent_cx);
            let _ws = tracer_y.with_span_in_scope(&handed_over);
            let new_span = tracer_y.next_span().name("calculateCommission").start();
            new_span.tag("commissionValue", "10").unwrap();
            new_span.annotate("commissionCalculated").unwrap();
            new_span.finish().unwrap();
        })
        .join()
        .unwrap();

        let spans = reporter.get_finished_spans().unwrap();
        let commission = spans
            .iter()
            .find(|span| span.name == "calculateCommission")
            .expect("child span reported");
        assert_eq!(commission.tag("commissionValue"), Some("10"));
        assert_eq!(commission.annotations.len(), 1);
        assert_eq!(
            commission.context.parent_id(),
            Some(initial_span.context().span_id())
        );
        // The parent is still open; its eventual tags are not the child's.
        initial_span.tag("taxValue", "10").unwrap();
        initial_span.finish().unwrap();
        let spans = reporter.get_finished_spans().unwrap();
        let commission = spans
            .iter()
            .find(|span| span.name == "calculateCommission")
            .unwrap();
        assert_eq!(commission.tag("taxValue"), None);
    }

    #[test]
    fn to_span_of_a_departed_context_rematerializes() {
        let (tracer, reporter) = test_tracer();
        let foreign = TraceContext::builder()
            .trace_id(TraceId::from(0xabcd))
            .span_id(SpanId::from(0x1234))
            .sampled(true)
            .build();

        let span = tracer.to_span(foreign.clone());
        span.tag("taxValue", "10").unwrap();
        span.finish().unwrap();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].context.trace_id(), foreign.trace_id());
        assert_eq!(spans[0].context.span_id(), foreign.span_id());
        // Parentage is whatever the context already said.
        assert_eq!(spans[0].context.parent_id(), None);
        assert_eq!(spans[0].tag("taxValue"), Some("10"));
    }

    #[test]
    fn to_span_decides_an_unknown_sampled_flag_once() {
        let decisions = Arc::new(AtomicUsize::new(0));
        let reporter = InMemoryReporter::default();
        let tracer = Tracer::builder()
            .with_reporter(reporter.clone())
            .with_sampler(CountingSampler {
                decisions: decisions.clone(),
            })
            .build();

        let undecided = TraceContext::builder()
            .trace_id(TraceId::from(1))
            .span_id(SpanId::from(2))
            .build();
        let span = tracer.to_span(undecided);
        assert_eq!(span.context().sampled(), Some(true));
        assert_eq!(decisions.load(Ordering::SeqCst), 1);
        // An already-decided context never re-consults the sampler.
        let _child = tracer.new_child_of(Some(span.context()));
        assert_eq!(decisions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sampler_is_consulted_once_per_trace() {
        let decisions = Arc::new(AtomicUsize::new(0));
        let tracer = Tracer::builder()
            .with_sampler(CountingSampler {
                decisions: decisions.clone(),
            })
            .build();

        let root = tracer.next_span().name("calculateTax").start();
        assert_eq!(decisions.load(Ordering::SeqCst), 1);
        let _ws = tracer.with_span_in_scope(&root);
        let _child = tracer.next_span().name("calculateCommission").start();
        let _grandchild = tracer.next_span().name("persist").start();
        assert_eq!(decisions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsampled_traces_propagate_without_reporting() {
        let reporter = InMemoryReporter::default();
        let tracer = Tracer::builder()
            .with_reporter(reporter.clone())
            .with_sampler(NeverSampler)
            .build();

        let root = tracer.next_span().name("calculateTax").start();
        let _ws = tracer.with_span_in_scope(&root);
        let child = tracer.next_span().name("calculateCommission").start();
        assert_eq!(child.context().sampled(), Some(false));
        child.finish().unwrap();
        root.finish().unwrap();

        assert!(reporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn shutdown_silences_new_spans() {
        let (tracer, reporter) = test_tracer();
        tracer.shutdown().unwrap();
        assert_eq!(tracer.shutdown(), Err(ReportError::AlreadyShutdown));

        let span = tracer.next_span().name("calculateTax").start();
        assert!(!span.is_recording());
        span.finish().unwrap();
        assert!(reporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn registry_is_pruned_after_spans_depart() {
        let (tracer, _reporter) = test_tracer();
        let cx = {
            let span = tracer.next_span().name("calculateTax").start();
            span.context().clone()
            // Span dropped here without finish; its weak entry goes stale.
        };
        // The stale entry is not resurrected: this re-materializes.
        let continued = tracer.to_span(cx);
        assert!(continued.is_recording());
        continued.finish().unwrap();
    }

    #[test]
    fn builder_can_enable_strict_scopes() {
        let previously = context::strict_scopes();
        let _tracer = Tracer::builder().strict_scopes(true).build();
        assert!(context::strict_scopes());
        context::set_strict_scopes(previously);
    }
}
