//! Span lifecycle engine for the contrail tracing API.
//!
//! Where the `contrail` crate answers "what context is current", this crate
//! owns everything that happens to a span between creation and the reporter:
//!
//! - [`trace::Tracer`] — the sole span factory, resolving parentage against
//!   the current context, consulting the [`trace::Sampler`] once per trace,
//!   and continuing handed-over contexts against live recorders
//!   ([`trace::Tracer::to_span`]).
//! - [`trace::Span`] — the shared recorder with an atomic lifecycle
//!   (`Unstarted → Started → {Finished | Flushed}`, `Flushed → Finished`),
//!   guaranteeing at most one report per reporting transition.
//! - [`trace::SpanReporter`] — the seam to the outside; reporter failures are
//!   logged and never touch the traced work.
//! - [`instrument::TracedJob`] — the execution-unit wrapper that captures the
//!   context at wrap time and emits a correctly-parented span when the work
//!   runs, wherever that is.
//!
//! # Getting started
//!
//! ```
//! use contrail_sdk::trace::{InMemoryReporter, Tracer};
//!
//! let reporter = InMemoryReporter::default();
//! let tracer = Tracer::builder().with_reporter(reporter.clone()).build();
//!
//! let span = tracer.next_span().name("calculateTax").start();
//! {
//!     let _ws = tracer.with_span_in_scope(&span);
//!     span.tag("taxValue", "10").unwrap();
//! }
//! span.finish().unwrap();
//! # assert_eq!(reporter.get_finished_spans().unwrap().len(), 1);
//! ```
//!
//! # Feature flags
//!
//! - `internal-logs`: route the engine's self-diagnostics through `tracing`.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod instrument;
pub mod trace;
