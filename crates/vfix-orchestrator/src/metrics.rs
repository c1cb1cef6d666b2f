//! Per-run telemetry

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Timings and counters for one `fix()` call
///
/// Read-only for consumers; durations are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixMetrics {
    pub total_time_ms: u64,
    pub classify_time_ms: u64,
    pub deterministic_time_ms: u64,
    pub validation_time_ms: u64,
    pub llm_time_ms: u64,
    pub validations_run: u32,
    pub deterministic_patches_applied: u32,
    pub llm_attempts: u32,
    pub llm_calls_made: u32,
    pub tokens_used: u64,
    pub rollbacks: u32,
}

pub(crate) fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
