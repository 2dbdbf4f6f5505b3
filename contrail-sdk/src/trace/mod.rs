//! The span lifecycle engine.
//!
//! A [`Tracer`] creates spans as children of the calling thread's current
//! context (or as new roots), integrates the [`Sampler`] decision into the
//! context, and hands frozen [`FinishedSpan`] snapshots to the configured
//! [`SpanReporter`] at reporting transitions. [`Tracer::to_span`] continues a
//! context handed across a thread boundary against the same live recorder.
//!
//! # In-process usage
//!
//! ```
//! use contrail_sdk::trace::{InMemoryReporter, Tracer};
//!
//! let reporter = InMemoryReporter::default();
//! let tracer = Tracer::builder().with_reporter(reporter.clone()).build();
//!
//! // Start a span. If a span is current on this thread, it becomes the
//! // new span's parent.
//! let new_span = tracer.next_span().name("calculateTax").start();
//! {
//!     let _ws = tracer.with_span_in_scope(&new_span);
//!     new_span.tag("taxValue", "10").unwrap();
//!     new_span.annotate("taxCalculated").unwrap();
//! }
//! // Finishing reports the frozen span to the reporter.
//! new_span.finish().unwrap();
//!
//! assert_eq!(reporter.get_finished_spans().unwrap().len(), 1);
//! ```

mod id_generator;
mod in_memory_reporter;
mod reporter;
mod sampler;
mod span;
mod tracer;

pub use id_generator::{IdGenerator, RandomIdGenerator, SequentialIdGenerator};
pub use in_memory_reporter::{InMemoryReporter, InMemoryReporterBuilder};
pub use reporter::{NoopReporter, ReportError, SpanReporter};
pub use sampler::{AlwaysSampler, CloneSampler, NeverSampler, Sampler, TraceIdRatioSampler};
pub use span::{Annotation, FinishedSpan, Span};
pub use tracer::{SpanBuilder, Tracer, TracerBuilder};
