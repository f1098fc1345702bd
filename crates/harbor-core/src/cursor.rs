//! Ordering cursor over the source's natural `(timestamp, id)` order.
//!
//! The cursor is the unit of resumability: it records the highest-water-mark
//! row a conversation has fully processed. It is an explicit value threaded
//! through the paging loop and returned, never shared mutable state, so the
//! single-writer discipline is visible in the types.

use serde::{Deserialize, Serialize};

/// Position marker over the source order: `(timestamp seconds, tie-break id)`.
///
/// Once non-null, every subsequently read row satisfies
/// `(ts, id) > (last_ts_seconds, last_id)` under lexicographic order.
/// Timestamps alone may tie (several messages in the same second); the
/// secondary key on the provider id breaks ties deterministically, which is
/// what makes the cursor exact rather than approximate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Timestamp (seconds) of the last processed row, if any.
    pub last_ts_seconds: Option<i64>,
    /// Provider id of the last processed row, if any.
    pub last_id: Option<String>,
}

impl Cursor {
    /// The starting cursor: import from the beginning.
    pub fn start() -> Self {
        Self::default()
    }

    /// Create a cursor positioned after `(ts_seconds, id)`.
    pub fn at(ts_seconds: i64, id: impl Into<String>) -> Self {
        Self {
            last_ts_seconds: Some(ts_seconds),
            last_id: Some(id.into()),
        }
    }

    /// Whether this cursor is at the start (nothing processed yet).
    pub fn is_start(&self) -> bool {
        self.last_ts_seconds.is_none() && self.last_id.is_none()
    }

    /// The pagination predicate: whether a row keyed `(ts_seconds, id)` lies
    /// strictly after this cursor.
    pub fn admits(&self, ts_seconds: i64, id: &str) -> bool {
        match (self.last_ts_seconds, self.last_id.as_deref()) {
            (Some(last_ts), Some(last_id)) => {
                ts_seconds > last_ts || (ts_seconds == last_ts && id > last_id)
            }
            _ => true,
        }
    }

    /// A new cursor positioned after the given row.
    ///
    /// Advancing is only legal once the row has been fully mapped,
    /// validated, and either written or explicitly skipped.
    pub fn advanced(&self, ts_seconds: i64, id: &str) -> Self {
        Self::at(ts_seconds, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_admits_everything() {
        let cursor = Cursor::start();
        assert!(cursor.is_start());
        assert!(cursor.admits(0, ""));
        assert!(cursor.admits(-5, "a"));
        assert!(cursor.admits(i64::MAX, "zzz"));
    }

    #[test]
    fn test_admits_strictly_after() {
        let cursor = Cursor::at(100, "b");
        assert!(!cursor.admits(99, "z"));
        assert!(!cursor.admits(100, "a"));
        assert!(!cursor.admits(100, "b"));
        assert!(cursor.admits(100, "c"));
        assert!(cursor.admits(101, "a"));
    }

    #[test]
    fn test_tie_break_is_lexicographic_on_id() {
        let cursor = Cursor::at(100, "msg-10");
        // String order, not numeric order.
        assert!(!cursor.admits(100, "msg-1"));
        assert!(cursor.admits(100, "msg-11"));
        assert!(cursor.admits(100, "msg-2"));
    }

    #[test]
    fn test_advanced_returns_new_value() {
        let cursor = Cursor::start();
        let next = cursor.advanced(105, "c");
        assert!(cursor.is_start());
        assert_eq!(next, Cursor::at(105, "c"));
        assert!(!next.admits(105, "c"));
    }

    #[test]
    fn test_serde_round_trip() {
        let cursor = Cursor::at(1700000000, "3EB0");
        let json = serde_json::to_string(&cursor).unwrap();
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(cursor, back);
    }
}
