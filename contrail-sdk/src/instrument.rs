//! Trace-propagating wrappers for deferred units of work.
//!
//! A [`TracedJob`] captures the current context when it is *constructed* and
//! emits a child span of that context when it eventually *runs* — however
//! much later and on whichever thread that happens. This wrap-time capture is
//! the contract that keeps parentage correct across worker-pool handoff: the
//! wrapping thread may move on to entirely different work before the job is
//! picked up.
//!
//! The span is named by ordered capability probing (explicit name, declared
//! name, self-description, fallback; see [`contrail::name`]), installed as
//! current for the duration of the call, and finished on every exit path. A
//! panic in the wrapped logic is observed — the span is tagged `error` and
//! finished — and then propagated unchanged.
//!
//! Callers that only want the existing context reinstalled, without a new
//! span, use [`contrail::context::wrap`] instead.
//!
//! ```
//! use contrail::name::{named, DefaultSpanNamer};
//! use contrail_sdk::instrument::TracedJob;
//! use contrail_sdk::trace::{InMemoryReporter, Tracer};
//!
//! let reporter = InMemoryReporter::default();
//! let tracer = Tracer::builder().with_reporter(reporter.clone()).build();
//!
//! let job = TracedJob::new(
//!     tracer,
//!     DefaultSpanNamer,
//!     named("calculateTax", || {
//!         // perform logic
//!     }),
//! );
//! std::thread::spawn(job.into_job()).join().unwrap();
//!
//! let spans = reporter.get_finished_spans().unwrap();
//! assert_eq!(spans[0].name, "calculateTax");
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};

use contrail::context;
use contrail::contrail_debug;
use contrail::name::{SpanNamer, Work, FALLBACK_SPAN_NAME};
use contrail::TraceContext;

use crate::trace::{Span, Tracer};

/// A unit of work that emits one span around its execution.
///
/// Construction captures the wrap-time current context; nothing is recorded
/// until [`run`](TracedJob::run) — a job dropped unexecuted emits no span.
#[derive(Debug)]
pub struct TracedJob<W, N> {
    tracer: Tracer,
    namer: N,
    work: W,
    name: Option<Cow<'static, str>>,
    parent: Option<TraceContext>,
}

impl<W, N> TracedJob<W, N>
where
    W: Work,
    N: SpanNamer,
{
    /// Wrap `work`, naming its span through `namer`.
    pub fn new(tracer: Tracer, namer: N, work: W) -> Self {
        TracedJob {
            tracer,
            namer,
            work,
            name: None,
            parent: context::current(),
        }
    }

    /// Wrap `work` with an explicit span name, overriding anything the work
    /// itself advertises.
    pub fn named(
        tracer: Tracer,
        namer: N,
        work: W,
        name: impl Into<Cow<'static, str>>,
    ) -> Self {
        TracedJob {
            name: Some(name.into()),
            ..Self::new(tracer, namer, work)
        }
    }

    /// The name the span will get, resolved now.
    pub fn span_name(&self) -> Cow<'static, str> {
        match &self.name {
            Some(name) => name.clone(),
            None => self.namer.span_name(&self.work, FALLBACK_SPAN_NAME),
        }
    }

    /// Execute the wrapped work under a new span.
    ///
    /// The span is a child of the wrap-time context, is current while the
    /// work runs, and is finished when the work returns or panics.
    pub fn run(self) -> W::Output {
        let name = self.span_name();
        let span = self
            .tracer
            .new_child_of(self.parent.as_ref())
            .name(name)
            .start();
        let _scope = self.tracer.with_span_in_scope(&span);
        let work = self.work;
        match panic::catch_unwind(AssertUnwindSafe(move || work.run())) {
            Ok(output) => {
                finish_span(&span);
                output
            }
            Err(payload) => {
                let _ = span.tag("error", panic_message(payload.as_ref()));
                finish_span(&span);
                panic::resume_unwind(payload);
            }
        }
    }

    /// Convert into a plain closure, for handing to executors and thread
    /// pools.
    pub fn into_job(self) -> impl FnOnce() -> W::Output {
        move || self.run()
    }
}

/// Finish a wrapper-owned span; a failure here is a telemetry problem, never
/// the caller's.
fn finish_span(span: &Span) {
    if let Err(err) = span.finish() {
        contrail_debug!(
            name: "TracedJob.FinishFailed",
            reason = err.to_string()
        );
    }
}

/// Best-effort rendering of a panic payload for the `error` tag.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{InMemoryReporter, SequentialIdGenerator};
    use contrail::name::{described, named, DefaultSpanNamer};

    fn test_tracer() -> (Tracer, InMemoryReporter) {
        let reporter = InMemoryReporter::default();
        let tracer = Tracer::builder()
            .with_reporter(reporter.clone())
            .with_id_generator(SequentialIdGenerator::default())
            .build();
        (tracer, reporter)
    }

    #[test]
    fn declared_name_wins_over_description() {
        let (tracer, reporter) = test_tracer();
        let job = TracedJob::new(
            tracer,
            DefaultSpanNamer,
            named("calculateTax", described("spanNameFromToStringMethod", || ())),
        );
        std::thread::spawn(job.into_job()).join().unwrap();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "calculateTax");
    }

    #[test]
    fn description_names_the_span_when_nothing_is_declared() {
        let (tracer, reporter) = test_tracer();
        let job = TracedJob::new(
            tracer,
            DefaultSpanNamer,
            described("calculateTax", || {
                // perform logic
            }),
        );
        std::thread::spawn(job.into_job()).join().unwrap();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "calculateTax");
    }

    #[test]
    fn explicit_name_wins_over_everything() {
        let (tracer, reporter) = test_tracer();
        let job = TracedJob::named(
            tracer,
            DefaultSpanNamer,
            named("declared", described("described", || ())),
            "calculateTax",
        );
        job.run();

        assert_eq!(reporter.get_finished_spans().unwrap()[0].name, "calculateTax");
    }

    #[test]
    fn plain_closures_fall_back() {
        let (tracer, reporter) = test_tracer();
        TracedJob::new(tracer, DefaultSpanNamer, || ()).run();

        assert_eq!(
            reporter.get_finished_spans().unwrap()[0].name,
            FALLBACK_SPAN_NAME
        );
    }

    // The parent is the context current at wrap time, not at execution time.
    #[test]
    fn parentage_follows_the_wrap_time_context() {
        let (tracer, reporter) = test_tracer();
        let span_a = tracer.next_span().name("contextA").start();
        let span_b = tracer.next_span().name("contextB").start();

        let job = {
            let _scope = tracer.with_span_in_scope(&span_a);
            TracedJob::new(tracer.clone(), DefaultSpanNamer, || ())
        };
        // Replace the current context before the job runs.
        let _scope = tracer.with_span_in_scope(&span_b);
        job.run();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].context.parent_id(),
            Some(span_a.context().span_id())
        );
        assert_eq!(spans[0].context.trace_id(), span_a.context().trace_id());
    }

    #[test]
    fn wrapped_work_runs_under_its_own_span() {
        let (tracer, reporter) = test_tracer();
        let observer = tracer.clone();
        let job = TracedJob::new(
            tracer,
            DefaultSpanNamer,
            named("calculateTax", move || {
                let current = contrail::context::current().expect("span in scope");
                // Visible as parent for spans created inside the work.
                observer.next_span().name("nested").start().finish().unwrap();
                current
            }),
        );
        let seen = std::thread::spawn(job.into_job()).join().unwrap();

        let spans = reporter.get_finished_spans().unwrap();
        let nested = spans.iter().find(|s| s.name == "nested").unwrap();
        let outer = spans.iter().find(|s| s.name == "calculateTax").unwrap();
        assert_eq!(outer.context.span_id(), seen.span_id());
        assert_eq!(nested.context.parent_id(), Some(seen.span_id()));
    }

    #[test]
    fn scope_is_restored_after_the_job() {
        let (tracer, _reporter) = test_tracer();
        TracedJob::new(tracer, DefaultSpanNamer, || ()).run();
        assert_eq!(contrail::context::current(), None);
    }

    #[test]
    fn panicking_work_still_finishes_its_span() {
        let (tracer, reporter) = test_tracer();
        let job = TracedJob::new(
            tracer,
            DefaultSpanNamer,
            named("calculateTax", || panic!("tax service down")),
        );
        let result = std::thread::spawn(job.into_job()).join();
        assert!(result.is_err());

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].end_time.is_some());
        assert_eq!(spans[0].tag("error"), Some("tax service down"));
    }

    #[test]
    fn unexecuted_jobs_emit_no_span() {
        let (tracer, reporter) = test_tracer();
        let job = TracedJob::new(
            tracer,
            DefaultSpanNamer,
            named("calculateTax", || ()),
        );
        drop(job);

        assert!(reporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn output_passes_through_unchanged() {
        let (tracer, _reporter) = test_tracer();
        let job = TracedJob::new(tracer, DefaultSpanNamer, || "some logic");
        assert_eq!(job.run(), "some logic");
    }
}
