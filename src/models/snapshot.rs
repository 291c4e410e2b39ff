//! Feed snapshots: the unit of local persistence.

use super::{InteractionFlags, Moment};
use chrono::{Days, NaiveDate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which journal filter is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFilter {
    /// Everything.
    #[default]
    All,
    /// Moments dated within the recent window.
    Recent,
    /// Moments carrying at least one selected tag.
    Tagged,
}

/// An inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First day (inclusive).
    pub start: NaiveDate,
    /// Last day (inclusive).
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range, swapping the bounds if given in reverse.
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// The `days`-long window ending at `today`.
    #[must_use]
    pub fn trailing(today: NaiveDate, days: u32) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// Returns `true` if `date` lies within the range.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Filter state persisted alongside the moments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    /// Active filter.
    pub active_filter: FeedFilter,
    /// Tags selected for the tag filter.
    #[serde(default)]
    pub selected_tags: Vec<String>,
    /// Date range selected for the date filter.
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

impl FilterState {
    /// Returns `true` if `moment` passes the tag and date filters.
    #[must_use]
    pub fn admits(&self, moment: &Moment) -> bool {
        if !self.selected_tags.is_empty() && !moment.has_any_tag(&self.selected_tags) {
            return false;
        }
        self.date_range.is_none_or(|range| range.contains(moment.date))
    }
}

/// Anything the snapshot cache can persist.
pub trait Snapshot: Serialize + DeserializeOwned + Default + Send + Sync {
    /// Returns `true` when there is nothing worth rendering.
    fn is_empty(&self) -> bool;
}

/// Journal feed snapshot.
///
/// `moments` keeps the caller's order (newest first); nothing in the crate
/// re-sorts it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// Moments in display order.
    #[serde(default)]
    pub moments: Vec<Moment>,
    /// Filter state at the time of the snapshot.
    #[serde(default)]
    pub filter_state: FilterState,
}

impl FeedSnapshot {
    /// Moments admitted by the current filter state, in snapshot order.
    pub fn filtered(&self) -> impl Iterator<Item = &Moment> {
        self.moments.iter().filter(|m| self.filter_state.admits(m))
    }

    /// Every tag used by any moment, sorted and deduplicated.
    #[must_use]
    pub fn all_tags(&self) -> Vec<String> {
        self.moments
            .iter()
            .flat_map(|m| m.tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl Snapshot for FeedSnapshot {
    fn is_empty(&self) -> bool {
        self.moments.is_empty()
    }
}

/// A following-feed row: a moment plus the session user's interaction flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// The moment, with its author joined.
    pub moment: Moment,
    /// The session user's like/repost state.
    #[serde(flatten)]
    pub flags: InteractionFlags,
}

impl FeedEntry {
    /// Returns `true` if the session user has liked the moment.
    #[must_use]
    pub const fn liked(&self) -> bool {
        self.flags.liked
    }

    /// Returns `true` if the session user has reposted the moment.
    #[must_use]
    pub const fn reposted(&self) -> bool {
        self.flags.reposted
    }
}

/// Following-feed snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowingSnapshot {
    /// Entries in display order.
    #[serde(default)]
    pub entries: Vec<FeedEntry>,
}

impl Snapshot for FollowingSnapshot {
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
    }

    #[test]
    fn test_date_range_is_inclusive_and_normalized() {
        let range = DateRange::new(day(2026, 3, 10), day(2026, 3, 1));
        assert_eq!(range.start, day(2026, 3, 1));
        assert!(range.contains(day(2026, 3, 1)));
        assert!(range.contains(day(2026, 3, 10)));
        assert!(!range.contains(day(2026, 3, 11)));
    }

    #[test]
    fn test_trailing_window() {
        let range = DateRange::trailing(day(2026, 3, 31), 30);
        assert_eq!(range.start, day(2026, 3, 1));
        assert_eq!(range.end, day(2026, 3, 31));
    }

    #[test]
    fn test_filter_state_serializes_snake_case() {
        let state = FilterState {
            active_filter: FeedFilter::Tagged,
            selected_tags: vec!["a".into()],
            date_range: None,
        };
        let json = serde_json::to_string(&state).unwrap_or_default();
        assert!(json.contains("\"tagged\""));
    }
}
