//! Opaque key-value entries that ride on a [`TraceContext`].
//!
//! Baggage lets callers pin arbitrary correlation values (a tenant id, a
//! request class) to a trace so they travel with the context through scope
//! installs and cross-thread handoff. Keys are unique; writing an existing
//! key replaces its value.
//!
//! Entries are stored behind an `Arc`, so cloning a context (which happens on
//! every scope install) never copies the map.
//!
//! [`TraceContext`]: crate::TraceContext

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Immutable key-value entries attached to a trace context.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Baggage {
    entries: Option<Arc<HashMap<String, String>>>,
}

impl Baggage {
    /// An empty baggage, allocation free.
    pub fn new() -> Self {
        Baggage::default()
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.as_ref()?.get(key).map(String::as_str)
    }

    /// A copy of this baggage with `key` set to `value`, replacing any
    /// existing entry for the key.
    pub fn with_entry(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut entries = self
            .entries
            .as_deref()
            .cloned()
            .unwrap_or_default();
        entries.insert(key.into(), value.into());
        Baggage {
            entries: Some(Arc::new(entries)),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.len())
    }

    /// `true` when no entries are present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .as_deref()
            .into_iter()
            .flatten()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Debug for Baggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Baggage
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let entries: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if entries.is_empty() {
            Baggage::default()
        } else {
            Baggage {
                entries: Some(Arc::new(entries)),
            }
        }
    }
}
