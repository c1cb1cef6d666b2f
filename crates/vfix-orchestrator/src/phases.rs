//! Phase tracking for a repair run
//!
//! The transition check is a pure function; [`PhaseTracker`] applies it and
//! records every phase the run entered.

use tracing::debug;
use vfix_core::{FixPhase, Result, VfixError};

/// Whether a run may move from `from` to `to`
///
/// Allowed moves:
/// - forward in phase order, skipping phases is fine
/// - any non-terminal phase straight to `Complete`
/// - `ValidateDeterministic -> Deterministic` for the feedback-derived pass
/// - `ValidateLlm -> LlmFix` for another AI attempt
///
/// Nothing leaves `Complete`.
pub fn is_valid_transition(from: FixPhase, to: FixPhase) -> bool {
    if from.is_terminal() {
        return false;
    }
    match (from, to) {
        (_, FixPhase::Complete) => true,
        (FixPhase::ValidateDeterministic, FixPhase::Deterministic) => true,
        (FixPhase::ValidateLlm, FixPhase::LlmFix) => true,
        (from, to) => to.ordinal() > from.ordinal(),
    }
}

/// Current phase plus the ordered list of phases entered so far
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    current: FixPhase,
    entered: Vec<FixPhase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: FixPhase::Initial,
            entered: vec![FixPhase::Initial],
        }
    }

    pub fn current(&self) -> FixPhase {
        self.current
    }

    /// Move to `next`, rejecting moves the phase order does not allow
    pub fn advance(&mut self, next: FixPhase) -> Result<()> {
        if !is_valid_transition(self.current, next) {
            return Err(VfixError::Phase(format!(
                "invalid transition {} -> {}",
                self.current, next
            )));
        }
        debug!(from = %self.current, to = %next, "Phase transition");
        self.current = next;
        self.entered.push(next);
        Ok(())
    }

    /// Enter `Complete` unless already there
    pub fn complete(&mut self) {
        if !self.current.is_terminal() {
            self.current = FixPhase::Complete;
            self.entered.push(FixPhase::Complete);
        }
    }

    pub fn phases(&self) -> &[FixPhase] {
        &self.entered
    }

    pub fn into_phases(self) -> Vec<FixPhase> {
        self.entered
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
