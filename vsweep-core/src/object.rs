//! The object version record flowing through the pipeline.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A single version of an object, including tombstones.
///
/// One record is emitted per regular version and per delete marker found in
/// the bucket listing. Records flow by value through the pipeline channels;
/// only the interned `key` is shared between records of the same object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    /// Object name within the bucket. Interned: all versions of one key
    /// share the same allocation.
    pub key: Arc<str>,

    /// Opaque provider-assigned version identifier.
    pub version_id: String,

    /// When this version was created.
    pub last_modified: DateTime<Utc>,

    /// Whether this version is the current head of the key.
    pub is_latest: bool,

    /// Whether this version is a delete marker. Delete markers carry no
    /// payload and cannot carry a retention period.
    pub delete_marker: bool,

    /// Payload size in bytes. Always 0 for delete markers.
    pub size: u64,

    /// Retention-lock expiry, if known. `None` until the annotator has
    /// consulted the cache or the provider.
    pub retain_until: Option<DateTime<Utc>>,
}

/// Total order over versions of one key: `(last_modified, version_id)`
/// ascending.
///
/// Two versions with identical timestamps are ordered by the lexicographic
/// comparison of their version IDs, making series decisions reproducible
/// regardless of listing order.
#[must_use]
pub fn version_order(a: &ObjectVersion, b: &ObjectVersion) -> Ordering {
    a.last_modified
        .cmp(&b.last_modified)
        .then_with(|| a.version_id.cmp(&b.version_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn version(year: i32, month: u32, id: &str) -> ObjectVersion {
        ObjectVersion {
            key: Arc::from("k"),
            version_id: id.to_string(),
            last_modified: Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap(),
            is_latest: false,
            delete_marker: false,
            size: 0,
            retain_until: None,
        }
    }

    #[test]
    fn test_order_by_modification_time() {
        let a = version(2004, 1, "z");
        let b = version(2004, 2, "a");

        assert_eq!(version_order(&a, &b), Ordering::Less);
        assert_eq!(version_order(&b, &a), Ordering::Greater);
    }

    #[test]
    fn test_equal_timestamps_order_by_version_id() {
        let a = version(2004, 1, "aaa");
        let b = version(2004, 1, "aab");

        assert_eq!(version_order(&a, &b), Ordering::Less);
        assert_eq!(version_order(&a, &a), Ordering::Equal);
    }
}
