use std::sync::{Arc, Mutex};

use crate::trace::reporter::{ReportError, SpanReporter};
use crate::trace::span::FinishedSpan;

/// A reporter that keeps span snapshots in memory.
///
/// Useful for tests and debugging: reported spans can be retrieved with
/// [`get_finished_spans`] and cleared with [`reset`]. Clones share the same
/// storage, so a clone handed to a tracer observes everything the tracer
/// reports.
///
/// # Example
///
/// ```
/// use contrail_sdk::trace::{InMemoryReporter, Tracer};
///
/// let reporter = InMemoryReporter::default();
/// let tracer = Tracer::builder().with_reporter(reporter.clone()).build();
///
/// let span = tracer.next_span().name("say hello").start();
/// span.annotate("handling this...").unwrap();
/// span.finish().unwrap();
///
/// let spans = reporter.get_finished_spans().unwrap();
/// assert_eq!(spans.len(), 1);
/// assert_eq!(spans[0].name, "say hello");
/// ```
///
/// [`get_finished_spans`]: InMemoryReporter::get_finished_spans
/// [`reset`]: InMemoryReporter::reset
#[derive(Clone, Debug)]
pub struct InMemoryReporter {
    spans: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl Default for InMemoryReporter {
    fn default() -> Self {
        InMemoryReporterBuilder::new().build()
    }
}

/// Builder for [`InMemoryReporter`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryReporterBuilder {}

impl InMemoryReporterBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {}
    }

    /// Creates the reporter.
    pub fn build(&self) -> InMemoryReporter {
        InMemoryReporter {
            spans: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl InMemoryReporter {
    /// Returns every snapshot reported so far, in report order.
    ///
    /// # Errors
    ///
    /// Returns a [`ReportError`] if the internal lock cannot be acquired.
    pub fn get_finished_spans(&self) -> Result<Vec<FinishedSpan>, ReportError> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .map_err(ReportError::from)
    }

    /// Clears the internal storage.
    pub fn reset(&self) {
        let _ = self.spans.lock().map(|mut spans| spans.clear());
    }
}

impl SpanReporter for InMemoryReporter {
    fn report(&self, span: FinishedSpan) -> Result<(), ReportError> {
        self.spans.lock().map(|mut spans| spans.push(span))?;
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ReportError> {
        self.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::Tracer;

    #[test]
    fn collects_in_report_order() {
        let reporter = InMemoryReporter::default();
        let tracer = Tracer::builder().with_reporter(reporter.clone()).build();

        tracer.next_span().name("first").start().finish().unwrap();
        tracer.next_span().name("second").start().finish().unwrap();

        let spans = reporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "first");
        assert_eq!(spans[1].name, "second");
    }

    #[test]
    fn reset_clears_storage() {
        let reporter = InMemoryReporter::default();
        let tracer = Tracer::builder().with_reporter(reporter.clone()).build();

        tracer.next_span().name("calculateTax").start().finish().unwrap();
        assert_eq!(reporter.get_finished_spans().unwrap().len(), 1);

        reporter.reset();
        assert!(reporter.get_finished_spans().unwrap().is_empty());
    }
}
