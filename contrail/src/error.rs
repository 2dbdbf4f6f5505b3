use thiserror::Error;

/// Errors raised by span lifecycle and mutation operations.
///
/// Every variant signals caller misuse rather than a transient condition:
/// the operation arrived in a lifecycle state that cannot accept it. The
/// wrapped business logic is never affected; these errors stay inside the
/// telemetry layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SpanError {
    /// `start()` was called on a span that is already started.
    #[error("span has already been started")]
    AlreadyStarted,

    /// The span was finished; no further mutation or reporting transition is
    /// possible.
    #[error("span has already been finished")]
    AlreadyFinished,

    /// The span was flushed; mutation is rejected, only `finish()` remains
    /// legal.
    #[error("span has been flushed and is no longer mutable")]
    AlreadyFlushed,

    /// `finish()` or `flush()` was called on a span that was never started.
    #[error("span was never started")]
    NeverStarted,
}
