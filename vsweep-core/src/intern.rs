//! Key interning for the listing boundary.

use std::collections::HashSet;
use std::sync::Arc;

/// Deduplicates object keys into shared `Arc<str>` instances.
///
/// Keys recur once per version; a bucket with millions of versions may hold
/// only a few thousand distinct keys. Interning at the listing boundary
/// keeps key memory proportional to the number of distinct keys rather than
/// the number of versions.
///
/// The interner is owned by the single enumerator task and needs no
/// synchronization of its own.
#[derive(Debug, Default)]
pub struct KeyInterner {
    keys: HashSet<Arc<str>>,
}

impl KeyInterner {
    /// Creates an empty interner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared instance for `key`, inserting it on first sight.
    #[must_use]
    pub fn intern(&mut self, key: &str) -> Arc<str> {
        if let Some(existing) = self.keys.get(key) {
            return Arc::clone(existing);
        }

        let shared: Arc<str> = Arc::from(key);
        self.keys.insert(Arc::clone(&shared));
        shared
    }

    /// Number of distinct keys seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
