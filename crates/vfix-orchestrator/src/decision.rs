//! Retry, selection and rollback policy
//!
//! Pure: no I/O, no state beyond the configuration.

use tracing::debug;
use vfix_core::{ClassifiedError, DecisionConfig};

#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Split into (deterministic-fixable, AI-fixable)
    pub fn partition_errors(
        &self,
        errors: &[ClassifiedError],
    ) -> (Vec<ClassifiedError>, Vec<ClassifiedError>) {
        errors.iter().cloned().partition(|e| !e.requires_llm())
    }

    /// Pick the AI-fixable errors worth spending a call on
    ///
    /// Errors under the confidence threshold are only used if none reach it.
    /// The result is ordered by confidence, highest first, and holds at most
    /// `max_errors` items.
    pub fn select_errors_for_llm(
        &self,
        errors: &[ClassifiedError],
        max_errors: usize,
    ) -> Vec<ClassifiedError> {
        let llm: Vec<&ClassifiedError> = errors.iter().filter(|e| e.requires_llm()).collect();
        let confident: Vec<&ClassifiedError> = llm
            .iter()
            .copied()
            .filter(|e| e.confidence >= self.config.confidence_threshold)
            .collect();

        let mut selected: Vec<ClassifiedError> = if confident.is_empty() {
            llm.into_iter().cloned().collect()
        } else {
            confident.into_iter().cloned().collect()
        };
        selected.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        selected.truncate(max_errors);
        selected
    }

    /// Same as [`Self::select_errors_for_llm`] with the configured maximum
    pub fn select_default(&self, errors: &[ClassifiedError]) -> Vec<ClassifiedError> {
        self.select_errors_for_llm(errors, self.config.max_llm_errors)
    }

    /// Whether another AI attempt is worthwhile
    ///
    /// `attempt` is the number of attempts already made. The improvement check
    /// only applies once at least one attempt has run.
    pub fn should_continue_fixing(
        &self,
        current_score: f64,
        previous_score: f64,
        remaining_errors: usize,
        attempt: usize,
    ) -> bool {
        let reason = if current_score >= 1.0 {
            Some("perfect score")
        } else if remaining_errors == 0 {
            Some("no errors remain")
        } else if attempt >= self.config.max_llm_attempts {
            Some("attempt budget exhausted")
        } else if attempt > 0 && current_score - previous_score < self.config.min_improvement {
            Some("improvement below minimum")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                debug!(current_score, previous_score, attempt, "Stop fixing: {}", reason);
                false
            }
            None => true,
        }
    }

    /// Candidate dropped by more than the rollback threshold
    pub fn should_rollback(&self, current_score: f64, previous_score: f64) -> bool {
        previous_score - current_score > self.config.rollback_threshold
    }
}
