//! Attempt history and best-result tracking
//!
//! - [`HistoryManager`]: bounded timeline of candidate documents, with
//!   rollback to an earlier entry or phase
//! - [`BestResultTracker`]: running maximum over every scored candidate,
//!   unaffected by history trimming

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};
use vfix_core::{FixPhase, Patch};

/// Default number of entries kept by [`HistoryManager`]
pub const DEFAULT_MAX_ENTRIES: usize = 20;

/// Snapshot of one candidate document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub html: String,
    pub phase: FixPhase,
    pub score: Option<f64>,
    pub patches_applied: Vec<Patch>,
    pub errors_before: usize,
    pub errors_after: Option<usize>,
    pub validation_passed: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

/// Size-bounded, oldest-first-evicting log of candidates
#[derive(Debug, Clone)]
pub struct HistoryManager {
    entries: VecDeque<HistoryEntry>,
    max_entries: usize,
}

impl HistoryManager {
    /// A capacity of zero is treated as one
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
        }
    }

    /// Append a candidate, evicting the oldest entries beyond capacity
    pub fn push(
        &mut self,
        html: impl Into<String>,
        phase: FixPhase,
        score: Option<f64>,
        patches_applied: Vec<Patch>,
        errors_before: usize,
    ) {
        self.entries.push_back(HistoryEntry {
            html: html.into(),
            phase,
            score,
            patches_applied,
            errors_before,
            errors_after: None,
            validation_passed: None,
            timestamp: Utc::now(),
        });
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        debug!(phase = %phase, entries = self.entries.len(), "History entry recorded");
    }

    /// Record validation outcome on the most recent entry
    ///
    /// Returns false when the history is empty.
    pub fn update_score(
        &mut self,
        score: f64,
        errors_after: Option<usize>,
        validation_passed: Option<bool>,
    ) -> bool {
        match self.entries.back_mut() {
            Some(entry) => {
                entry.score = Some(score);
                if errors_after.is_some() {
                    entry.errors_after = errors_after;
                }
                if validation_passed.is_some() {
                    entry.validation_passed = validation_passed;
                }
                true
            }
            None => false,
        }
    }

    /// Highest-scoring retained entry; the oldest retained entry when none is scored
    ///
    /// Ties go to the earlier entry.
    pub fn get_best(&self) -> Option<&HistoryEntry> {
        let mut best: Option<(&HistoryEntry, f64)> = None;
        for entry in &self.entries {
            if let Some(score) = entry.score {
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((entry, score));
                }
            }
        }
        best.map(|(entry, _)| entry).or_else(|| self.entries.front())
    }

    /// Drop the `steps` newest entries and return the new latest
    ///
    /// The oldest retained entry is never dropped.
    pub fn rollback(&mut self, steps: usize) -> Option<&HistoryEntry> {
        let keep = self.entries.len().saturating_sub(steps).max(1);
        if keep < self.entries.len() {
            info!(
                "Rolling back {} history entries",
                self.entries.len() - keep
            );
            self.entries.truncate(keep);
        }
        self.entries.back()
    }

    /// Drop everything after the most recent entry recorded in `phase`
    ///
    /// Leaves the history untouched and returns `None` when no entry matches.
    pub fn rollback_to_phase(&mut self, phase: FixPhase) -> Option<&HistoryEntry> {
        let index = self.entries.iter().rposition(|e| e.phase == phase)?;
        if index + 1 < self.entries.len() {
            info!("Rolling back history to last {} entry", phase);
            self.entries.truncate(index + 1);
        }
        self.entries.back()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.entries.into()
    }
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

/// Best candidate seen during a run
///
/// Monotonic: the best score never decreases, and ties keep the earlier result.
#[derive(Debug, Clone)]
pub struct BestResultTracker {
    original_html: String,
    best_html: String,
    best_score: f64,
    best_phase: FixPhase,
    errors_remaining: Option<usize>,
}

impl BestResultTracker {
    pub fn new(original_html: impl Into<String>) -> Self {
        let original_html = original_html.into();
        Self {
            best_html: original_html.clone(),
            original_html,
            best_score: 0.0,
            best_phase: FixPhase::Initial,
            errors_remaining: None,
        }
    }

    /// Adopt the candidate if `score` is strictly greater than the current best
    pub fn update(
        &mut self,
        html: &str,
        score: f64,
        phase: FixPhase,
        errors_remaining: usize,
    ) -> bool {
        if score > self.best_score {
            debug!(
                phase = %phase,
                score,
                previous = self.best_score,
                "New best result"
            );
            self.best_html = html.to_string();
            self.best_score = score;
            self.best_phase = phase;
            self.errors_remaining = Some(errors_remaining);
            true
        } else {
            false
        }
    }

    /// Best document differs from the original and scored above zero
    pub fn improved(&self) -> bool {
        self.best_html != self.original_html && self.best_score > 0.0
    }

    pub fn original_html(&self) -> &str {
        &self.original_html
    }

    pub fn best_html(&self) -> &str {
        &self.best_html
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn best_phase(&self) -> FixPhase {
        self.best_phase
    }

    /// Errors left in the best candidate; `None` until something was adopted
    pub fn errors_remaining(&self) -> Option<usize> {
        self.errors_remaining
    }
}
