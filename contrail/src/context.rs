//! Execution-scoped trace context propagation.
//!
//! This module owns the answer to "what is the active [`TraceContext`] right
//! now, for the calling thread". Contexts are installed for a bounded scope
//! via [`new_scope`]/[`attach`]; dropping the returned [`Scope`] restores the
//! previous value, including on unwind. Scopes nest with stack discipline
//! within one thread and never cross threads on their own — crossing requires
//! explicit capture-and-reinstall, for which [`wrap`] is the primitive.
//!
//! Storage is thread-local, so reads and writes never lock; each thread owns
//! its stack exclusively.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::TraceContext;

thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

/// Process-wide switch for strict scope checking, see [`set_strict_scopes`].
static STRICT_SCOPES: AtomicBool = AtomicBool::new(false);

/// Returns the active context for the calling thread, if any.
///
/// Never blocks. The returned value is a snapshot; replacing the current
/// context afterwards does not affect it.
///
/// # Examples
///
/// ```
/// use contrail::{context, SpanId, TraceContext, TraceId};
///
/// assert!(context::current().is_none());
///
/// let cx = TraceContext::builder()
///     .trace_id(TraceId::from(1))
///     .span_id(SpanId::from(1))
///     .build();
/// let _scope = context::attach(cx.clone());
/// assert_eq!(context::current(), Some(cx));
/// ```
pub fn current() -> Option<TraceContext> {
    map_current(|cx| cx.cloned())
}

/// Applies `f` to the active context without cloning it.
///
/// Cheaper than [`current`] when only a field is needed. `f` must not open
/// or release scopes; the stack is borrowed while it runs.
pub fn map_current<T>(f: impl FnOnce(Option<&TraceContext>) -> T) -> T {
    CURRENT_CONTEXT.with(|stack| f(stack.borrow().current.as_ref()))
}

/// Installs `context` as current for the calling thread until the returned
/// [`Scope`] is dropped; `None` clears the current context for the scope's
/// duration.
///
/// Release is guaranteed on every exit path because restoration happens in
/// the guard's `Drop`. Scopes must be released in reverse order of
/// acquisition; an out-of-order release is tolerated (the slot is vacated and
/// the stack repaired once the enclosing scopes unwind) unless strict mode is
/// on, in which case it panics.
pub fn new_scope(context: Option<TraceContext>) -> Scope {
    let pos = CURRENT_CONTEXT.with(|stack| stack.borrow_mut().push(context));
    Scope {
        pos,
        strict: STRICT_SCOPES.load(Ordering::Relaxed),
        _marker: PhantomData,
    }
}

/// Convenience for `new_scope(Some(context))`.
pub fn attach(context: TraceContext) -> Scope {
    new_scope(Some(context))
}

/// Turns strict scope checking on or off, process-wide.
///
/// Strict mode turns an out-of-order scope release into a panic at the
/// release site instead of a log line, and raises thread-exit leak reports
/// from warnings to errors. Both conditions signal a programming error in the
/// caller, never a transient failure. The flag is sampled when a scope is
/// created, so flipping it does not change scopes already open.
pub fn set_strict_scopes(strict: bool) {
    STRICT_SCOPES.store(strict, Ordering::Relaxed);
}

/// Whether strict scope checking is currently on.
pub fn strict_scopes() -> bool {
    STRICT_SCOPES.load(Ordering::Relaxed)
}

/// Wraps `f` so that the context current *now* is reinstalled around its
/// eventual call.
///
/// This is the light-weight propagation primitive: no span is created, the
/// wrap-time context (possibly "no context") is simply made current while the
/// wrapped closure runs, however far from the wrapping thread that happens.
///
/// # Examples
///
/// ```
/// use contrail::{context, SpanId, TraceContext, TraceId};
///
/// let cx = TraceContext::builder()
///     .trace_id(TraceId::from(1))
///     .span_id(SpanId::from(1))
///     .build();
///
/// let job = {
///     let _scope = context::attach(cx.clone());
///     context::wrap(|| context::current())
/// };
///
/// // The wrapping scope is gone, but the captured context is reinstalled
/// // for the duration of the call.
/// assert!(context::current().is_none());
/// assert_eq!(job(), Some(cx));
/// ```
pub fn wrap<F, R>(f: F) -> impl FnOnce() -> R
where
    F: FnOnce() -> R,
{
    let captured = current();
    move || {
        let _scope = new_scope(captured);
        f()
    }
}

/// A guard that restores the previous current context when dropped.
#[derive(Debug)]
pub struct Scope {
    // Position of the saved context in the thread's stack.
    pos: u16,
    strict: bool,
    // Relies on thread-local storage, so must not cross threads.
    _marker: PhantomData<*const ()>,
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.pos == ContextStack::BASE_POS || self.pos == ContextStack::MAX_POS {
            // Base cannot be popped and the overflow position never
            // installed anything.
            return;
        }
        let outcome =
            CURRENT_CONTEXT.with(|stack| stack.borrow_mut().pop_pos(self.pos));
        if outcome == PopOutcome::OutOfOrder && self.strict {
            if std::thread::panicking() {
                contrail_error!(
                    name: "Scope.OutOfOrderRelease",
                    position = self.pos,
                    message = "scope released out of order while unwinding"
                );
            } else {
                panic!(
                    "trace context scope at position {} released out of order",
                    self.pos
                );
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PopOutcome {
    /// The scope was the innermost one; the saved context was restored.
    Restored,
    /// An enclosing scope was still open; the slot was vacated instead.
    OutOfOrder,
    /// The position no longer exists. Only reachable through a logic error,
    /// since positions are handed out by the stack itself.
    OutOfBounds,
}

/// Per-thread stack of installed contexts.
///
/// The top of the stack lives in `current` for fast reads. Each open scope
/// saves the value it replaced in a positional slot so that guards dropped
/// out of order can be detected by position: a non-top release vacates its
/// slot, and vacated slots are swept when the real top is released.
struct ContextStack {
    current: Option<TraceContext>,
    stack: Vec<Option<Saved>>,
    _marker: PhantomData<*const ()>,
}

/// What a scope saved when it was installed: the previous current context,
/// which may itself have been "none".
type Saved = Option<TraceContext>;

impl ContextStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    fn push(&mut self, context: Option<TraceContext>) -> u16 {
        // Position 0 is the implicit base; the first scope gets position 1.
        let next_pos = self.stack.len() + 1;
        if next_pos >= ContextStack::MAX_POS.into() {
            contrail_warn!(
                name: "Scope.StackOverflow",
                message = format!(
                    "too many nested scopes, limit is {}; the current context is unchanged \
                     and releasing the returned scope will have no effect",
                    ContextStack::MAX_POS
                )
            );
            return ContextStack::MAX_POS;
        }
        let saved = std::mem::replace(&mut self.current, context);
        self.stack.push(Some(saved));
        next_pos as u16
    }

    fn pop_pos(&mut self, pos: u16) -> PopOutcome {
        let len = self.stack.len() as u16;
        if pos > len {
            contrail_warn!(
                name: "Scope.PopOutOfBounds",
                position = pos,
                stack_length = len,
                message = "attempted to release a scope beyond the end of the stack"
            );
            return PopOutcome::OutOfBounds;
        }
        if pos == len {
            // Innermost open scope: restore what it saved, then sweep any
            // slots vacated by earlier out-of-order releases.
            if let Some(Some(saved)) = self.stack.pop() {
                self.current = saved;
            }
            while let Some(None) = self.stack.last() {
                let _ = self.stack.pop();
            }
            PopOutcome::Restored
        } else {
            // An enclosing scope is still open. Vacate the slot so the
            // eventual in-order release repairs the stack.
            contrail_warn!(
                name: "Scope.OutOfOrderRelease",
                position = pos,
                stack_length = len,
                message = "scope released before an inner scope it encloses"
            );
            let _ = self.stack[pos as usize - 1].take();
            PopOutcome::OutOfOrder
        }
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current: None,
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
            _marker: PhantomData,
        }
    }
}

impl Drop for ContextStack {
    fn drop(&mut self) {
        // Runs at thread exit. Anything still on the stack is a scope that
        // was never released before its execution unit ended.
        if !self.stack.is_empty() {
            if STRICT_SCOPES.load(Ordering::Relaxed) {
                contrail_error!(
                    name: "Scope.LeakedAtThreadExit",
                    leaked = self.stack.len(),
                    message = "thread exited with trace context scopes still open"
                );
            } else {
                contrail_warn!(
                    name: "Scope.LeakedAtThreadExit",
                    leaked = self.stack.len(),
                    message = "thread exited with trace context scopes still open"
                );
            }
        }
    }
}
