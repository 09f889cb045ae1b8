//! Daily sighting counter and first-sighting history.

use crate::storage::{
    StateStore, StorageError, KEY_DAILY_COUNT, KEY_HISTORY, KEY_LAST_RESET_DATE, KEY_SEEN_TODAY,
};
use crate::types::{Aircraft, SightingHistoryEntry};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Distinct aircraft seen on one local calendar day.
///
/// `seen.len() == count` holds at all times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyStats {
    date: String,
    seen: BTreeSet<String>,
    count: usize,
}

impl DailyStats {
    pub fn new(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            ..Default::default()
        }
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn has_seen(&self, icao24: &str) -> bool {
        self.seen.contains(icao24)
    }

    /// Count `icao24` unless already seen today. Returns whether it was new.
    pub fn record(&mut self, icao24: &str) -> bool {
        if self.seen.insert(icao24.to_string()) {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Start a fresh day if `today` differs from the tracked one.
    pub fn roll_over(&mut self, today: &str) -> bool {
        if self.date == today {
            return false;
        }
        self.date = today.to_string();
        self.seen.clear();
        self.count = 0;
        true
    }
}

/// Result of folding one sighting cycle into the statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Aircraft counted for the first time today
    pub new_today: usize,
    /// Aircraft absent from the previous cycle
    pub newly_seen: usize,
}

/// Daily counter plus a capped, newest-first history of first sightings.
#[derive(Debug, Clone)]
pub struct StatsTracker {
    daily: DailyStats,
    history: VecDeque<SightingHistoryEntry>,
    history_limit: usize,
    previous_cycle: HashSet<String>,
}

impl StatsTracker {
    pub fn new(today: &str, history_limit: usize) -> Self {
        Self {
            daily: DailyStats::new(today),
            history: VecDeque::with_capacity(history_limit),
            history_limit,
            previous_cycle: HashSet::new(),
        }
    }

    /// Restore persisted state, rolling over if it belongs to another day.
    pub fn load(store: &StateStore, today: &str, history_limit: usize) -> Self {
        let date: Option<String> = store.load(KEY_LAST_RESET_DATE);
        let seen: BTreeSet<String> = store.load(KEY_SEEN_TODAY).unwrap_or_default();
        let stored_count: usize = store.load(KEY_DAILY_COUNT).unwrap_or(0);
        let mut history: VecDeque<SightingHistoryEntry> = store.load(KEY_HISTORY).unwrap_or_default();
        history.truncate(history_limit);

        if stored_count != seen.len() {
            tracing::warn!(
                "Stored daily count {} disagrees with {} seen aircraft, using the latter",
                stored_count,
                seen.len()
            );
        }

        let mut tracker = Self {
            daily: DailyStats {
                date: date.clone().unwrap_or_default(),
                count: seen.len(),
                seen,
            },
            history,
            history_limit,
            previous_cycle: HashSet::new(),
        };

        if tracker.daily.roll_over(today) {
            tracing::info!(
                "New day {} (last reset {}), daily count cleared",
                today,
                date.as_deref().unwrap_or("never")
            );
            if let Err(e) = tracker.persist_daily(store) {
                tracing::error!("Failed to persist daily reset: {}", e);
            }
        }

        tracker
    }

    pub fn daily(&self) -> &DailyStats {
        &self.daily
    }

    pub fn daily_count(&self) -> usize {
        self.daily.count
    }

    pub fn history(&self) -> impl Iterator<Item = &SightingHistoryEntry> {
        self.history.iter()
    }

    /// Roll the day over if needed, persisting the reset immediately.
    pub fn check_day(&mut self, today: &str, store: &StateStore) -> Result<bool, StorageError> {
        if !self.daily.roll_over(today) {
            return Ok(false);
        }
        tracing::info!("Day rolled over to {}, daily count cleared", today);
        self.persist_daily(store)?;
        Ok(true)
    }

    /// Fold one successful cycle's result set into the statistics.
    ///
    /// `aircraft_type` is consulted once per new history entry; the value is
    /// frozen into the entry.
    pub fn record_cycle<F>(&mut self, aircraft: &[Aircraft], aircraft_type: F, now: DateTime<Utc>) -> CycleStats
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut stats = CycleStats::default();

        for a in aircraft {
            if self.daily.record(&a.icao24) {
                stats.new_today += 1;
            }
        }

        // Farthest first, so the closest new aircraft ends up at the front.
        let mut captured = HashSet::new();
        for a in aircraft.iter().rev() {
            if self.previous_cycle.contains(&a.icao24) || !captured.insert(a.icao24.as_str()) {
                continue;
            }
            let entry = SightingHistoryEntry::capture(a, aircraft_type(&a.icao24), now);
            self.history.push_front(entry);
            stats.newly_seen += 1;
        }
        self.history.truncate(self.history_limit);

        self.previous_cycle = aircraft.iter().map(|a| a.icao24.clone()).collect();
        stats
    }

    fn persist_daily(&self, store: &StateStore) -> Result<(), StorageError> {
        store.save(KEY_LAST_RESET_DATE, &self.daily.date)?;
        store.save(KEY_SEEN_TODAY, &self.daily.seen)?;
        store.save(KEY_DAILY_COUNT, &self.daily.count)?;
        Ok(())
    }

    /// Write daily stats and history.
    pub fn persist(&self, store: &StateStore) -> Result<(), StorageError> {
        self.persist_daily(store)?;
        store.save(KEY_HISTORY, &self.history)?;
        Ok(())
    }
}
