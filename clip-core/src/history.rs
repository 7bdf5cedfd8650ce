//! Recent sync history and usage counters.
//!
//! History is kept in memory only; [`SyncStats`] is serializable so the
//! client can persist it. Calendar days are passed in by the caller.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Default number of history entries kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Number of active days remembered for the streak.
pub const STREAK_WINDOW_DAYS: usize = 365;

/// Which way an item travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Uploaded from this device.
    Sent,
    /// Applied from the counterpart.
    Received,
}

/// One synced clipboard item.
#[derive(Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Plaintext content.
    pub content: String,
    /// Device the content came from.
    pub device_name: String,
    /// Sent or received.
    pub direction: Direction,
    /// Wall-clock time (ms since epoch).
    pub at_ms: u64,
}

impl std::fmt::Debug for HistoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("content_len", &self.content.len())
            .field("device_name", &self.device_name)
            .field("direction", &self.direction)
            .field("at_ms", &self.at_ms)
            .finish()
    }
}

/// Bounded list of recent items, newest first.
#[derive(Debug, Clone)]
pub struct SyncHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl SyncHistory {
    /// Create an empty history holding at most `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Add an entry at the front.
    ///
    /// Returns `false` (and drops the entry) when the newest entry already
    /// has the same content.
    pub fn record(&mut self, entry: HistoryEntry) -> bool {
        if self
            .entries
            .front()
            .map_or(false, |head| head.content == entry.content)
        {
            return false;
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.limit);
        true
    }

    /// Entries, newest first.
    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Newest entry.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for SyncHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

/// Sync counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Items synced on `today_date`.
    #[serde(default)]
    pub today: u64,
    /// Day `today` refers to.
    #[serde(default)]
    pub today_date: Option<NaiveDate>,
    /// Items synced since this process started. Not persisted.
    #[serde(skip)]
    pub session: u64,
    /// Items synced ever.
    #[serde(default)]
    pub all_time: u64,
    /// Items uploaded ever.
    #[serde(default)]
    pub sent: u64,
    /// Items applied ever.
    #[serde(default)]
    pub received: u64,
    /// Days with at least one sync, most recent [`STREAK_WINDOW_DAYS`].
    #[serde(default)]
    pub active_days: BTreeSet<NaiveDate>,
}

impl SyncStats {
    /// Reset the daily counter if `today` is a new day.
    pub fn roll_day(&mut self, today: NaiveDate) {
        if self.today_date != Some(today) {
            self.today = 0;
            self.today_date = Some(today);
        }
    }

    /// Count one synced item.
    pub fn record(&mut self, direction: Direction, today: NaiveDate) {
        self.roll_day(today);
        self.today += 1;
        self.session += 1;
        self.all_time += 1;
        match direction {
            Direction::Sent => self.sent += 1,
            Direction::Received => self.received += 1,
        }
        self.active_days.insert(today);
        while self.active_days.len() > STREAK_WINDOW_DAYS {
            let oldest = self.active_days.iter().next().copied();
            if let Some(day) = oldest {
                self.active_days.remove(&day);
            }
        }
    }

    /// Consecutive active days ending today.
    ///
    /// A day without activity yet does not break the streak: counting
    /// starts from yesterday until the first sync of the day.
    pub fn streak(&self, today: NaiveDate) -> u32 {
        let mut expected = if self.active_days.contains(&today) {
            Some(today)
        } else {
            today.pred_opt()
        };
        let mut streak = 0;
        while let Some(day) = expected {
            if !self.active_days.contains(&day) {
                break;
            }
            streak += 1;
            expected = day.pred_opt();
        }
        streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(content: &str, direction: Direction) -> HistoryEntry {
        HistoryEntry {
            content: content.into(),
            device_name: "Pixel".into(),
            direction,
            at_ms: 0,
        }
    }

    // ===========================================
    // SyncHistory
    // ===========================================

    #[test]
    fn history_is_newest_first() {
        let mut history = SyncHistory::default();
        history.record(entry("a", Direction::Sent));
        history.record(entry("b", Direction::Received));
        let contents: Vec<_> = history.entries().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "a"]);
    }

    #[test]
    fn history_collapses_repeated_head() {
        let mut history = SyncHistory::default();
        assert!(history.record(entry("a", Direction::Sent)));
        assert!(!history.record(entry("a", Direction::Received)));
        assert_eq!(history.len(), 1);
        assert!(history.record(entry("b", Direction::Sent)));
        assert!(history.record(entry("a", Direction::Sent)));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn history_is_bounded() {
        let mut history = SyncHistory::new(3);
        for i in 0..10 {
            history.record(entry(&i.to_string(), Direction::Sent));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.latest().unwrap().content, "9");
    }

    #[test]
    fn history_clear() {
        let mut history = SyncHistory::default();
        history.record(entry("a", Direction::Sent));
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn history_entry_debug_hides_content() {
        let debug = format!("{:?}", entry("otp 424242", Direction::Sent));
        assert!(!debug.contains("424242"));
    }

    // ===========================================
    // SyncStats
    // ===========================================

    #[test]
    fn stats_count_by_direction() {
        let mut stats = SyncStats::default();
        let today = day(2026, 3, 10);
        stats.record(Direction::Sent, today);
        stats.record(Direction::Received, today);
        stats.record(Direction::Received, today);
        assert_eq!(stats.today, 3);
        assert_eq!(stats.session, 3);
        assert_eq!(stats.all_time, 3);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.received, 2);
    }

    #[test]
    fn stats_reset_today_on_new_day() {
        let mut stats = SyncStats::default();
        stats.record(Direction::Sent, day(2026, 3, 10));
        stats.record(Direction::Sent, day(2026, 3, 11));
        assert_eq!(stats.today, 1);
        assert_eq!(stats.all_time, 2);
    }

    #[test]
    fn streak_counts_consecutive_days() {
        let mut stats = SyncStats::default();
        for d in 8..=10 {
            stats.record(Direction::Sent, day(2026, 3, d));
        }
        assert_eq!(stats.streak(day(2026, 3, 10)), 3);
    }

    #[test]
    fn streak_survives_until_first_sync_of_day() {
        let mut stats = SyncStats::default();
        stats.record(Direction::Sent, day(2026, 3, 9));
        stats.record(Direction::Sent, day(2026, 3, 10));
        assert_eq!(stats.streak(day(2026, 3, 11)), 2);
        assert_eq!(stats.streak(day(2026, 3, 12)), 0);
    }

    #[test]
    fn streak_breaks_on_gap() {
        let mut stats = SyncStats::default();
        stats.record(Direction::Sent, day(2026, 3, 7));
        stats.record(Direction::Sent, day(2026, 3, 9));
        stats.record(Direction::Sent, day(2026, 3, 10));
        assert_eq!(stats.streak(day(2026, 3, 10)), 2);
    }

    #[test]
    fn streak_crosses_month_boundary() {
        let mut stats = SyncStats::default();
        stats.record(Direction::Sent, day(2026, 2, 28));
        stats.record(Direction::Sent, day(2026, 3, 1));
        assert_eq!(stats.streak(day(2026, 3, 1)), 2);
    }

    #[test]
    fn active_days_are_bounded() {
        let mut stats = SyncStats::default();
        let mut d = day(2025, 1, 1);
        for _ in 0..400 {
            stats.record(Direction::Sent, d);
            d = d.succ_opt().unwrap();
        }
        assert_eq!(stats.active_days.len(), STREAK_WINDOW_DAYS);
        assert_eq!(stats.streak(d.pred_opt().unwrap()), STREAK_WINDOW_DAYS as u32);
    }

    #[test]
    fn session_is_not_persisted() {
        let mut stats = SyncStats::default();
        stats.record(Direction::Sent, day(2026, 3, 10));
        let json = serde_json::to_string(&stats).unwrap();
        let restored: SyncStats = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.session, 0);
        assert_eq!(restored.all_time, 1);
        assert_eq!(restored.today_date, Some(day(2026, 3, 10)));
    }
}
