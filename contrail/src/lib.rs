//! In-process trace context propagation.
//!
//! This crate is the API half of the contrail tracing engine. It defines the
//! identifiers that give a span its place in a trace tree, the immutable
//! [`TraceContext`] value that travels between execution units, and the
//! thread-scoped [`context`] store that answers "what is the active context
//! right now" with scoped install/restore semantics.
//!
//! The span lifecycle engine — tracer, recorders, samplers, reporters — lives
//! in the `contrail-sdk` crate and builds on these types.
//!
//! # Propagating a context
//!
//! Contexts become visible to downstream code by installing them for a
//! bounded scope:
//!
//! ```
//! use contrail::{context, SpanId, TraceContext, TraceId};
//!
//! let cx = TraceContext::builder()
//!     .trace_id(TraceId::from(1))
//!     .span_id(SpanId::from(2))
//!     .sampled(true)
//!     .build();
//!
//! {
//!     let _scope = context::attach(cx.clone());
//!     // Anything called from here observes `cx` as current.
//!     assert_eq!(context::current(), Some(cx));
//! }
//! assert_eq!(context::current(), None);
//! ```
//!
//! Crossing a thread boundary requires explicit capture-and-reinstall;
//! [`context::wrap`] packages that for closures and [`FutureContextExt`]
//! (feature `futures`, on by default) for futures and streams.
//!
//! # Feature flags
//!
//! - `futures`: poll-scoped context reinstall for futures and streams.
//! - `internal-logs`: route the crate's self-diagnostics through `tracing`.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod internal_logging;

pub mod baggage;
pub mod context;
pub mod name;

mod error;
mod trace_context;

#[cfg(feature = "futures")]
mod future_ext;

pub use baggage::Baggage;
pub use context::Scope;
pub use error::SpanError;
pub use trace_context::{SpanId, TraceContext, TraceContextBuilder, TraceId};

#[cfg(feature = "futures")]
pub use future_ext::{FutureContextExt, StreamContextExt, WithContext};

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
