//! Naming of wrapped units of work.
//!
//! A unit of work may advertise its span name through two optional
//! capabilities: a *declared name* (the strongest signal, corresponding to
//! name metadata attached to the unit's type) and a *self-description*
//! (a human-readable rendering of the unit itself). A [`SpanNamer`] resolves
//! the final name by ordered capability probing; [`DefaultSpanNamer`] probes
//! declared name, then description, then falls back.

use std::borrow::Cow;
use std::fmt;

/// Span name used when a unit of work advertises nothing and no explicit
/// name was given.
pub const FALLBACK_SPAN_NAME: &str = "unknown";

/// A unit of work that can be executed once, with optional naming
/// capabilities.
///
/// Any `FnOnce() -> R` closure is a `Work` with both probes absent. Types
/// that carry naming metadata implement the trait directly:
///
/// ```
/// use contrail::name::Work;
/// use std::borrow::Cow;
///
/// struct TaxCalculation;
///
/// impl Work for TaxCalculation {
///     type Output = ();
///
///     fn run(self) {}
///
///     fn declared_name(&self) -> Option<Cow<'static, str>> {
///         Some("calculateTax".into())
///     }
/// }
/// ```
pub trait Work {
    /// Result produced by the work.
    type Output;

    /// Execute the work, consuming it.
    fn run(self) -> Self::Output;

    /// Name metadata declared on the unit's type, if any.
    fn declared_name(&self) -> Option<Cow<'static, str>> {
        None
    }

    /// The unit's human-readable self-description, if it has one.
    fn description(&self) -> Option<Cow<'static, str>> {
        None
    }
}

impl<R, F> Work for F
where
    F: FnOnce() -> R,
{
    type Output = R;

    fn run(self) -> R {
        self()
    }
}

/// Attach a declared name to a unit of work.
///
/// The declared name is the strongest naming capability and wins over the
/// unit's self-description.
pub fn named<W: Work>(name: impl Into<Cow<'static, str>>, work: W) -> NamedWork<W> {
    NamedWork {
        name: name.into(),
        work,
    }
}

/// Attach a self-description to a unit of work.
pub fn described<W: Work>(description: impl Into<Cow<'static, str>>, work: W) -> DescribedWork<W> {
    DescribedWork {
        description: description.into(),
        work,
    }
}

/// A unit of work carrying a declared name, see [`named`].
#[derive(Clone)]
pub struct NamedWork<W> {
    name: Cow<'static, str>,
    work: W,
}

impl<W: Work> Work for NamedWork<W> {
    type Output = W::Output;

    fn run(self) -> Self::Output {
        self.work.run()
    }

    fn declared_name(&self) -> Option<Cow<'static, str>> {
        Some(self.name.clone())
    }

    fn description(&self) -> Option<Cow<'static, str>> {
        self.work.description()
    }
}

impl<W> fmt::Debug for NamedWork<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedWork").field("name", &self.name).finish()
    }
}

/// A unit of work carrying a self-description, see [`described`].
#[derive(Clone)]
pub struct DescribedWork<W> {
    description: Cow<'static, str>,
    work: W,
}

impl<W: Work> Work for DescribedWork<W> {
    type Output = W::Output;

    fn run(self) -> Self::Output {
        self.work.run()
    }

    fn declared_name(&self) -> Option<Cow<'static, str>> {
        self.work.declared_name()
    }

    fn description(&self) -> Option<Cow<'static, str>> {
        Some(self.description.clone())
    }
}

impl<W> fmt::Debug for DescribedWork<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescribedWork")
            .field("description", &self.description)
            .finish()
    }
}

/// Resolves the span name for a unit of work.
pub trait SpanNamer {
    /// Produce a span name for `work`, using `fallback` when the work
    /// advertises nothing usable.
    fn span_name<W: Work>(&self, work: &W, fallback: &str) -> Cow<'static, str>;
}

/// The standard namer: declared name, then self-description, then fallback.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSpanNamer;

impl SpanNamer for DefaultSpanNamer {
    fn span_name<W: Work>(&self, work: &W, fallback: &str) -> Cow<'static, str> {
        work.declared_name()
            .or_else(|| work.description())
            .unwrap_or_else(|| Cow::Owned(fallback.to_owned()))
    }
}
