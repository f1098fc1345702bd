//! Range-filter policies and time-bound computation.
//!
//! A policy is chosen once per run (not per conversation) and declaratively
//! describes which slice of each conversation to import. Bound computation
//! is a pure function over the policy plus at most one source probe, so the
//! driver performs the probe and this module stays free of I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defaults::SECONDS_PER_DAY;
use crate::error::{Error, Result};
use crate::models::MessageStamp;

/// Inclusive `[since, until]` window over source timestamps (seconds).
///
/// Either side may be absent (open-ended). Absent on both sides means the
/// batch reader applies no time restriction at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub since: Option<i64>,
    pub until: Option<i64>,
}

impl RangeBounds {
    /// No restriction on either side.
    pub const fn unbounded() -> Self {
        Self {
            since: None,
            until: None,
        }
    }

    /// Whether a timestamp falls inside the window (inclusive).
    pub fn contains(&self, ts_seconds: i64) -> bool {
        self.since.map_or(true, |s| ts_seconds >= s)
            && self.until.map_or(true, |u| ts_seconds <= u)
    }

    /// Whether both sides are open.
    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }
}

/// Which slice of each conversation a run imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangePolicy {
    /// Import only the named conversations, each in full. Membership is
    /// applied by the driver's discovery step; bound computation yields no
    /// time restriction.
    IncludeChats(Vec<String>),
    /// Absolute timestamp window; either side may be open-ended. Both sides
    /// open is the "import everything" configuration.
    Window {
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    },
    /// Last N days, anchored to the conversation's own latest message
    /// rather than to wall-clock now.
    RelativeDays(i64),
    /// Last N messages, via the timestamp of the row at offset N counting
    /// back from the most recent.
    Depth(i64),
}

impl RangePolicy {
    /// Validate configuration parameters before any conversation is touched.
    pub fn validate(&self) -> Result<()> {
        match self {
            RangePolicy::IncludeChats(chats) => {
                if chats.is_empty() {
                    return Err(Error::Config(
                        "inclusion-list policy requires at least one chat id".to_string(),
                    ));
                }
                if chats.iter().any(|c| c.trim().is_empty()) {
                    return Err(Error::Config(
                        "inclusion-list policy contains an empty chat id".to_string(),
                    ));
                }
                Ok(())
            }
            RangePolicy::Window { since, until } => {
                if let (Some(s), Some(u)) = (since, until) {
                    if s > u {
                        return Err(Error::Config(format!(
                            "window since ({}) is after until ({})",
                            s, u
                        )));
                    }
                }
                Ok(())
            }
            // depth <= 0 and days <= 0 mean "import everything", not an error
            RangePolicy::RelativeDays(_) | RangePolicy::Depth(_) => Ok(()),
        }
    }

    /// Whether bound computation needs the conversation's latest message.
    pub fn needs_latest(&self) -> bool {
        matches!(self, RangePolicy::RelativeDays(days) if *days > 0)
    }

    /// The probe offset, when bound computation needs the row at offset
    /// `depth` counting back from the most recent.
    pub fn boundary_depth(&self) -> Option<i64> {
        match self {
            RangePolicy::Depth(depth) if *depth > 0 => Some(*depth),
            _ => None,
        }
    }

    /// Compute the bounds for one conversation from this policy and the
    /// probe results the driver collected (only the probes the policy asked
    /// for are consulted).
    ///
    /// A conversation with no rows yields unbounded (and therefore zero
    /// rows from the reader), not an error.
    pub fn bounds(
        &self,
        latest: Option<&MessageStamp>,
        boundary: Option<&MessageStamp>,
    ) -> RangeBounds {
        match self {
            RangePolicy::IncludeChats(_) => RangeBounds::unbounded(),
            RangePolicy::Window { since, until } => RangeBounds {
                since: since.map(|t| t.timestamp()),
                until: until.map(|t| t.timestamp()),
            },
            RangePolicy::RelativeDays(days) => {
                if *days <= 0 {
                    return RangeBounds::unbounded();
                }
                match latest {
                    Some(stamp) => RangeBounds {
                        since: Some(stamp.ts_seconds - days * SECONDS_PER_DAY),
                        until: Some(stamp.ts_seconds),
                    },
                    None => RangeBounds::unbounded(),
                }
            }
            RangePolicy::Depth(depth) => {
                if *depth <= 0 {
                    return RangeBounds::unbounded();
                }
                // Fewer than depth+1 rows: no lower bound, import from the
                // beginning.
                match boundary {
                    Some(stamp) => RangeBounds {
                        since: Some(stamp.ts_seconds),
                        until: None,
                    },
                    None => RangeBounds::unbounded(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stamp(ts: i64) -> MessageStamp {
        MessageStamp {
            ts_seconds: ts,
            natural_id: "m".to_string(),
        }
    }

    #[test]
    fn test_unbounded_contains_everything() {
        let bounds = RangeBounds::unbounded();
        assert!(bounds.is_unbounded());
        assert!(bounds.contains(i64::MIN));
        assert!(bounds.contains(0));
        assert!(bounds.contains(i64::MAX));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let bounds = RangeBounds {
            since: Some(100),
            until: Some(200),
        };
        assert!(!bounds.contains(99));
        assert!(bounds.contains(100));
        assert!(bounds.contains(200));
        assert!(!bounds.contains(201));
    }

    #[test]
    fn test_inclusion_list_has_no_bounds() {
        let policy = RangePolicy::IncludeChats(vec!["chat-1".to_string()]);
        assert!(policy.validate().is_ok());
        assert!(policy.bounds(None, None).is_unbounded());
    }

    #[test]
    fn test_inclusion_list_rejects_empty() {
        assert!(RangePolicy::IncludeChats(vec![]).validate().is_err());
        assert!(RangePolicy::IncludeChats(vec!["  ".to_string()])
            .validate()
            .is_err());
    }

    #[test]
    fn test_window_converts_to_seconds() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let policy = RangePolicy::Window {
            since: Some(since),
            until: Some(until),
        };
        assert!(policy.validate().is_ok());
        let bounds = policy.bounds(None, None);
        assert_eq!(bounds.since, Some(since.timestamp()));
        assert_eq!(bounds.until, Some(until.timestamp()));
    }

    #[test]
    fn test_window_open_ends() {
        let policy = RangePolicy::Window {
            since: None,
            until: None,
        };
        assert!(policy.validate().is_ok());
        assert!(policy.bounds(None, None).is_unbounded());
    }

    #[test]
    fn test_window_inverted_is_config_error() {
        let since = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let policy = RangePolicy::Window {
            since: Some(since),
            until: Some(until),
        };
        assert!(matches!(policy.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_relative_days_anchors_to_latest() {
        let policy = RangePolicy::RelativeDays(7);
        assert!(policy.needs_latest());
        let bounds = policy.bounds(Some(&stamp(1_000_000)), None);
        assert_eq!(bounds.until, Some(1_000_000));
        assert_eq!(bounds.since, Some(1_000_000 - 7 * SECONDS_PER_DAY));
    }

    #[test]
    fn test_relative_days_empty_conversation() {
        let policy = RangePolicy::RelativeDays(7);
        assert!(policy.bounds(None, None).is_unbounded());
    }

    #[test]
    fn test_relative_days_zero_means_everything() {
        let policy = RangePolicy::RelativeDays(0);
        assert!(!policy.needs_latest());
        assert!(policy.bounds(Some(&stamp(500)), None).is_unbounded());
    }

    #[test]
    fn test_depth_sets_lower_bound_only() {
        let policy = RangePolicy::Depth(50);
        assert_eq!(policy.boundary_depth(), Some(50));
        let bounds = policy.bounds(None, Some(&stamp(777)));
        assert_eq!(bounds.since, Some(777));
        assert_eq!(bounds.until, None);
    }

    #[test]
    fn test_depth_underflow_imports_from_start() {
        // Fewer rows than depth+1: the probe finds nothing.
        let policy = RangePolicy::Depth(50);
        assert!(policy.bounds(None, None).is_unbounded());
    }

    #[test]
    fn test_depth_zero_or_negative_means_everything() {
        assert!(RangePolicy::Depth(0).bounds(None, None).is_unbounded());
        assert_eq!(RangePolicy::Depth(0).boundary_depth(), None);
        assert!(RangePolicy::Depth(-3).bounds(None, None).is_unbounded());
        assert!(RangePolicy::Depth(-3).validate().is_ok());
    }
}
