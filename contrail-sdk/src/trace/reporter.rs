//! Handoff of reported spans to an external collector.
//!
//! The engine owns no wire format; a [`SpanReporter`] is the narrow seam
//! through which finished and flushed spans leave the core. The tracer
//! guarantees at most one call per reporting transition per span, and never
//! a call before the span started. Reporter failures are logged by the
//! caller and swallowed — telemetry must never change the outcome of the
//! traced work.

use std::fmt;
use std::sync::PoisonError;

use thiserror::Error;

use crate::trace::span::FinishedSpan;

/// Receives immutable span snapshots at reporting transitions.
pub trait SpanReporter: Send + Sync + fmt::Debug {
    /// Accept one span snapshot.
    ///
    /// Called once per finish, and once per flush for spans using the
    /// continuation pattern. A flush-time snapshot has no end timestamp.
    fn report(&self, span: FinishedSpan) -> Result<(), ReportError>;

    /// Surface anything buffered. The default does nothing.
    fn force_flush(&self) -> Result<(), ReportError> {
        Ok(())
    }

    /// Release resources. Called at most once by tracer shutdown; the
    /// default does nothing.
    fn shutdown(&self) -> Result<(), ReportError> {
        Ok(())
    }
}

/// Errors surfaced by reporters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReportError {
    /// The reporter (or its tracer) was already shut down.
    #[error("reporter already shut down")]
    AlreadyShutdown,

    /// Any other reporter-internal failure.
    #[error("{0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for ReportError {
    fn from(err: PoisonError<T>) -> Self {
        ReportError::InternalFailure(format!("lock poisoned: {err}"))
    }
}

/// Discards every span. The default reporter.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter;

impl SpanReporter for NoopReporter {
    fn report(&self, _span: FinishedSpan) -> Result<(), ReportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{SequentialIdGenerator, Tracer};

    // A reporter that always fails, to pin the log-and-continue policy.
    #[derive(Clone, Debug)]
    struct FailingReporter;

    impl SpanReporter for FailingReporter {
        fn report(&self, _span: FinishedSpan) -> Result<(), ReportError> {
            Err(ReportError::InternalFailure("collector unreachable".into()))
        }
    }

    #[test]
    fn reporter_failure_does_not_reach_the_caller() {
        let tracer = Tracer::builder()
            .with_reporter(FailingReporter)
            .with_id_generator(SequentialIdGenerator::default())
            .build();
        let span = tracer.next_span().name("calculateTax").start();
        // The failure is logged and swallowed; finish still succeeds.
        assert_eq!(span.finish(), Ok(()));
    }

    #[test]
    fn poison_errors_convert() {
        let mutex = std::sync::Mutex::new(());
        let _ = std::panic::catch_unwind(|| {
            let _guard = mutex.lock().unwrap();
            panic!("poison");
        });
        let err: ReportError = mutex.lock().unwrap_err().into();
        assert!(matches!(err, ReportError::InternalFailure(_)));
    }
}
