//! # Span
//!
//! A `Span` is one timed unit of work inside a trace tree. While open it
//! accumulates a name, tags, and annotations in a recorder shared by every
//! handle to the same logical span; once a reporting transition happens the
//! recorded state is frozen into a [`FinishedSpan`] snapshot and handed to
//! the tracer's reporter.
//!
//! The lifecycle is an explicit tagged state driven by atomic compare-and-set
//! transitions: `Unstarted → Started → {Finished | Flushed}`, plus
//! `Flushed → Finished` for the continuation pattern where one execution unit
//! flushes and another concludes. The compare-and-set guarantees each
//! reporting transition fires at most once under races.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use contrail::contrail_debug;
use contrail::{SpanError, TraceContext};

use crate::trace::tracer::Tracer;

/// Lifecycle states. Kept as plain integers so transitions can ride on one
/// atomic word.
pub(crate) const UNSTARTED: u8 = 0;
pub(crate) const STARTED: u8 = 1;
pub(crate) const FLUSHED: u8 = 2;
pub(crate) const FINISHED: u8 = 3;

/// Single timed operation within a trace.
///
/// Handles are cheap to clone and share one recorder, so a span obtained on
/// thread X and continued on thread Y through [`Tracer::to_span`] accumulates
/// into the same state. The recorder itself is mutated under a lock by
/// whichever execution unit currently holds the span; the lifecycle word is
/// what keeps reporting exactly-once.
#[derive(Clone)]
pub struct Span {
    context: TraceContext,
    inner: Arc<SpanShared>,
}

pub(crate) struct SpanShared {
    lifecycle: AtomicU8,
    /// `None` on spans that lost the sampling decision; they keep the full
    /// lifecycle but record and report nothing.
    recording: Option<Mutex<Recording>>,
    tracer: Tracer,
}

/// Mutable accumulation buffer for one span.
pub(crate) struct Recording {
    pub(crate) name: Cow<'static, str>,
    pub(crate) start_time: Option<SystemTime>,
    pub(crate) end_time: Option<SystemTime>,
    pub(crate) tags: HashMap<String, String>,
    pub(crate) annotations: Vec<Annotation>,
}

/// A timestamped event recorded on a span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    /// When the event happened.
    pub timestamp: SystemTime,
    /// What happened.
    pub value: String,
}

/// Immutable view of a span at a reporting transition.
///
/// `end_time` is `None` for flush-time reports; a finish-time report always
/// carries one.
#[derive(Clone, Debug)]
pub struct FinishedSpan {
    /// Identity of the reported span.
    pub context: TraceContext,
    /// Name at report time.
    pub name: Cow<'static, str>,
    /// When the span started.
    pub start_time: SystemTime,
    /// When the span finished, absent on flush-time reports.
    pub end_time: Option<SystemTime>,
    /// Tag key-value pairs, unique keys, last write wins.
    pub tags: HashMap<String, String>,
    /// Annotations in recording order.
    pub annotations: Vec<Annotation>,
}

impl Span {
    pub(crate) fn new(
        context: TraceContext,
        recording: Option<Recording>,
        lifecycle: u8,
        tracer: Tracer,
    ) -> Self {
        Span {
            context,
            inner: Arc::new(SpanShared {
                lifecycle: AtomicU8::new(lifecycle),
                recording: recording.map(Mutex::new),
                tracer,
            }),
        }
    }

    pub(crate) fn from_shared(context: TraceContext, inner: Arc<SpanShared>) -> Self {
        Span { context, inner }
    }

    pub(crate) fn shared(&self) -> &Arc<SpanShared> {
        &self.inner
    }

    /// The immutable identity of this span.
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// `true` while this span accumulates data that will be reported.
    ///
    /// Always `false` for unsampled spans and after a reporting transition.
    pub fn is_recording(&self) -> bool {
        self.inner.recording.is_some()
            && matches!(self.inner.lifecycle.load(Ordering::Acquire), UNSTARTED | STARTED)
    }

    /// Records the start timestamp, transitioning `Unstarted → Started`.
    ///
    /// Mutations made before the start (through the builder) are preserved.
    pub fn start(&self) -> Result<(), SpanError> {
        self.start_with_timestamp(SystemTime::now())
    }

    /// [`start`](Span::start) with a caller-chosen timestamp.
    pub fn start_with_timestamp(&self, timestamp: SystemTime) -> Result<(), SpanError> {
        match self.inner.lifecycle.compare_exchange(
            UNSTARTED,
            STARTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.with_recording(|recording| recording.start_time = Some(timestamp));
                Ok(())
            }
            Err(STARTED) => Err(SpanError::AlreadyStarted),
            Err(FLUSHED) => Err(SpanError::AlreadyFlushed),
            Err(_) => Err(SpanError::AlreadyFinished),
        }
    }

    /// Sets a tag, replacing any existing value for the key.
    ///
    /// Legal until a reporting transition; afterwards this fails with
    /// [`SpanError::AlreadyFlushed`] or [`SpanError::AlreadyFinished`]. On an
    /// unsampled span the call succeeds and the value is dropped.
    pub fn tag(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), SpanError> {
        let (key, value) = (key.into(), value.into());
        self.mutate(|recording| {
            recording.tags.insert(key, value);
        })
    }

    /// Appends a timestamped annotation.
    pub fn annotate(&self, value: impl Into<String>) -> Result<(), SpanError> {
        self.annotate_with_timestamp(SystemTime::now(), value)
    }

    /// [`annotate`](Span::annotate) with a caller-chosen timestamp.
    pub fn annotate_with_timestamp(
        &self,
        timestamp: SystemTime,
        value: impl Into<String>,
    ) -> Result<(), SpanError> {
        let value = value.into();
        self.mutate(|recording| {
            recording.annotations.push(Annotation { timestamp, value });
        })
    }

    /// Replaces the span's name. Legal until a reporting transition.
    pub fn rename(&self, name: impl Into<Cow<'static, str>>) -> Result<(), SpanError> {
        let name = name.into();
        self.mutate(|recording| recording.name = name)
    }

    /// Reports the span's current state without concluding it.
    ///
    /// The span becomes immutable, but stays live so a later [`finish`]
    /// (possibly from a different execution unit) delivers the authoritative
    /// finish-time snapshot. Flush followed by finish therefore reaches the
    /// reporter twice; only the finish-time report carries an end timestamp.
    ///
    /// [`finish`]: Span::finish
    pub fn flush(&self) -> Result<(), SpanError> {
        match self.inner.lifecycle.compare_exchange(
            STARTED,
            FLUSHED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.report(None);
                Ok(())
            }
            Err(UNSTARTED) => Err(SpanError::NeverStarted),
            Err(FLUSHED) => Err(SpanError::AlreadyFlushed),
            Err(_) => Err(SpanError::AlreadyFinished),
        }
    }

    /// Sets the end timestamp and reports the frozen span.
    ///
    /// Exactly one finish succeeds; a second call observes the terminal
    /// state, returns [`SpanError::AlreadyFinished`] and delivers nothing.
    /// Finishing a span that was never started is an error, so the reporter
    /// can never observe a span without a start.
    pub fn finish(&self) -> Result<(), SpanError> {
        self.finish_with_timestamp(SystemTime::now())
    }

    /// [`finish`](Span::finish) with a caller-chosen timestamp.
    pub fn finish_with_timestamp(&self, timestamp: SystemTime) -> Result<(), SpanError> {
        match self.inner.lifecycle.compare_exchange(
            STARTED,
            FINISHED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(UNSTARTED) => return Err(SpanError::NeverStarted),
            Err(FLUSHED) => {
                // A flushed span may still be concluded, once.
                if self
                    .inner
                    .lifecycle
                    .compare_exchange(FLUSHED, FINISHED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return Err(SpanError::AlreadyFinished);
                }
            }
            Err(_) => return Err(SpanError::AlreadyFinished),
        }
        self.with_recording(|recording| recording.end_time = Some(timestamp));
        self.report(Some(timestamp));
        self.inner
            .tracer
            .deregister(self.context.trace_id(), self.context.span_id());
        Ok(())
    }

    /// Applies a mutation under the recorder lock, first re-checking the
    /// lifecycle so a concurrent reporting transition cannot be mutated past.
    fn mutate(&self, f: impl FnOnce(&mut Recording)) -> Result<(), SpanError> {
        match self.inner.lifecycle.load(Ordering::Acquire) {
            UNSTARTED | STARTED => {}
            FLUSHED => return Err(SpanError::AlreadyFlushed),
            _ => return Err(SpanError::AlreadyFinished),
        }
        self.with_recording(f);
        Ok(())
    }

    fn with_recording(&self, f: impl FnOnce(&mut Recording)) {
        if let Some(recording) = &self.inner.recording {
            if let Ok(mut guard) = recording.lock() {
                f(&mut guard);
            }
        }
    }

    /// Snapshot the recorder and hand the result to the reporter.
    ///
    /// Reporter failures are logged and swallowed; telemetry must never
    /// change the outcome of the traced work.
    fn report(&self, end_time: Option<SystemTime>) {
        let Some(recording) = &self.inner.recording else {
            return;
        };
        let snapshot = match recording.lock() {
            Ok(guard) => match guard.start_time {
                Some(start_time) => FinishedSpan {
                    context: self.context.clone(),
                    name: guard.name.clone(),
                    start_time,
                    end_time,
                    tags: guard.tags.clone(),
                    annotations: guard.annotations.clone(),
                },
                None => {
                    contrail_debug!(
                        name: "Span.ReportWithoutStart",
                        span_id = self.context.span_id().to_string()
                    );
                    return;
                }
            },
            Err(_) => {
                contrail_debug!(name: "Span.RecorderPoisoned");
                return;
            }
        };
        if let Err(err) = self.inner.tracer.reporter().report(snapshot) {
            contrail_debug!(
                name: "Span.ReportFailed",
                reason = err.to_string()
            );
        }
    }

}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.lifecycle.load(Ordering::Acquire) {
            UNSTARTED => "unstarted",
            STARTED => "started",
            FLUSHED => "flushed",
            _ => "finished",
        };
        f.debug_struct("Span")
            .field("context", &self.context)
            .field("state", &state)
            .field("recording", &self.inner.recording.is_some())
            .finish()
    }
}

impl FinishedSpan {
    /// Convenience lookup into the reported tags.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}
