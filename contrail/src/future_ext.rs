//! Context propagation for deferred execution units that are polled rather
//! than called: the captured context is reinstalled around every poll, so
//! work resumed on an executor thread still sees the trace that spawned it.

use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

use futures_core::Stream;
use pin_project_lite::pin_project;

use crate::context::{self, Scope};
use crate::TraceContext;

pin_project! {
    /// A future or stream with an associated trace context.
    ///
    /// Created by [`FutureContextExt::with_context`] or
    /// [`StreamContextExt::with_context`].
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        trace_cx: Option<TraceContext>,
    }
}

impl<T> WithContext<T> {
    fn scope(trace_cx: &Option<TraceContext>) -> Scope {
        context::new_scope(trace_cx.clone())
    }
}

impl<T: std::future::Future> std::future::Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _scope = Self::scope(this.trace_cx);
        this.inner.poll(task_cx)
    }
}

impl<T: Stream> Stream for WithContext<T> {
    type Item = T::Item;

    fn poll_next(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let _scope = Self::scope(this.trace_cx);
        this.inner.poll_next(task_cx)
    }
}

impl<F: std::future::Future> FutureContextExt for F {}

/// Extension trait attaching a trace context to a future.
pub trait FutureContextExt: Sized {
    /// Reinstalls `trace_cx` (or "no context", for `None`) as current while
    /// this future is being polled.
    fn with_context(self, trace_cx: Option<TraceContext>) -> WithContext<Self> {
        WithContext {
            inner: self,
            trace_cx,
        }
    }

    /// Captures the context current *now* and reinstalls it while this
    /// future is being polled.
    fn with_current_context(self) -> WithContext<Self> {
        self.with_context(context::current())
    }
}

impl<S: Stream> StreamContextExt for S {}

/// Extension trait attaching a trace context to a stream.
pub trait StreamContextExt: Sized {
    /// Reinstalls `trace_cx` (or "no context", for `None`) as current while
    /// this stream is being polled.
    fn with_context(self, trace_cx: Option<TraceContext>) -> WithContext<Self> {
        WithContext {
            inner: self,
            trace_cx,
        }
    }

    /// Captures the context current *now* and reinstalls it while this
    /// stream is being polled.
    fn with_current_context(self) -> WithContext<Self> {
        self.with_context(context::current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SpanId, TraceId};

    fn cx(n: u64) -> TraceContext {
        TraceContext::builder()
            .trace_id(TraceId::from(n as u128))
            .span_id(SpanId::from(n))
            .build()
    }

    #[test]
    fn future_polls_under_captured_context() {
        let fut = {
            let _scope = context::attach(cx(5));
            std::future::ready(()).with_current_context()
        };
        assert_eq!(context::current(), None);

        let seen = futures_executor::block_on(async move {
            fut.await;
            // The scope only covers polls of the wrapped future itself.
            context::current()
        });
        assert_eq!(seen, None);
    }

    #[test]
    fn future_sees_context_inside_poll() {
        async fn observe() -> Option<TraceContext> {
            context::current()
        }

        let fut = observe().with_context(Some(cx(8)));
        let seen = futures_executor::block_on(fut);
        assert_eq!(seen, Some(cx(8)));
    }
}
