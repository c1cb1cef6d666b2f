//! Repair run coordinator
//!
//! [`Orchestrator::fix`] drives one document through the phase pipeline:
//!
//! 1. Classify defects; with none found, validate anyway and derive defects
//!    from sandbox failures
//! 2. Partition into deterministic and AI-fixable
//! 3. Apply rule patches, validate, then one more rule pass built from the
//!    sandbox's own failures
//! 4. Bounded AI attempts, each validated, regressions discarded
//! 5. Return the best candidate seen
//!
//! The whole run is bounded by `global_timeout_seconds`. The pipeline writes
//! into run state owned by `fix()`, so a timeout, error or panic still leaves
//! the best-so-far result readable.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vfix_browser::{BrowserSession, PageValidator, Sandbox, ValidationResult};
use vfix_core::{ClassifiedError, FixPhase, OrchestratorConfig, Patch, Result, VfixConfig};

use crate::collaborators::Collaborators;
use crate::decision::DecisionEngine;
use crate::feedback::synthesize_errors;
use crate::history::{BestResultTracker, HistoryEntry, HistoryManager};
use crate::metrics::{elapsed_ms, FixMetrics};
use crate::phases::PhaseTracker;

/// `error_message` of a run stopped by the global deadline
pub const TIMEOUT_MESSAGE: &str = "Global timeout reached";

/// Outcome of one repair run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub run_id: Uuid,
    pub success: bool,
    pub original_html: String,
    /// Best candidate found; equal to `original_html` when nothing improved
    pub fixed_html: String,
    pub final_score: f64,
    pub phases_completed: Vec<FixPhase>,
    pub errors_fixed: usize,
    pub errors_remaining: usize,
    /// Whether the returned document passed validation
    pub validation_passed: bool,
    pub metrics: FixMetrics,
    pub error_message: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Everything a run has learned so far
struct RunState {
    phases: PhaseTracker,
    history: HistoryManager,
    tracker: BestResultTracker,
    metrics: FixMetrics,
    errors_before: usize,
    best_passed: bool,
    last_screenshot: Option<Vec<u8>>,
}

impl RunState {
    fn new(html: &str, history_max_entries: usize) -> Self {
        Self {
            phases: PhaseTracker::new(),
            history: HistoryManager::new(history_max_entries),
            tracker: BestResultTracker::new(html),
            metrics: FixMetrics::default(),
            errors_before: 0,
            best_passed: false,
            last_screenshot: None,
        }
    }

    /// Score the latest history entry and offer it to the tracker
    fn record(&mut self, html: &str, phase: FixPhase, validation: &ValidationResult) -> Scored {
        let score = validation.score();
        let passed = validation.passed();
        let remaining = if passed {
            0
        } else {
            synthesize_errors(validation).len()
        };

        self.history
            .update_score(score, Some(remaining), Some(passed));
        if self.tracker.update(html, score, phase, remaining) {
            self.best_passed = passed;
        }
        if validation.initial_screenshot.is_some() {
            self.last_screenshot = validation.initial_screenshot.clone();
        }

        Scored {
            score,
            passed,
            remaining,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f64,
    passed: bool,
    remaining: usize,
}

/// Coordinates classification, patching, AI repair and validation
pub struct Orchestrator {
    collaborators: Collaborators,
    validator: Box<dyn PageValidator>,
    decision: DecisionEngine,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        validator: impl PageValidator + 'static,
        config: &VfixConfig,
    ) -> Self {
        Self {
            collaborators,
            validator: Box::new(validator),
            decision: DecisionEngine::new(config.decision.clone()),
            config: config.orchestrator.clone(),
        }
    }

    /// Orchestrator validating through a headless-Chrome [`Sandbox`]
    pub fn with_sandbox(collaborators: Collaborators, config: &VfixConfig) -> Self {
        Self::new(collaborators, Sandbox::from_config(config), config)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Repair `html`
    ///
    /// Never fails: timeouts, collaborator errors and panics are reported
    /// through `error_message` next to the best result found before they
    /// happened.
    pub async fn fix(
        &self,
        html: &str,
        page: Option<&BrowserSession>,
        screenshots: Option<&[Vec<u8>]>,
    ) -> OrchestratorResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let budget = Duration::try_from_secs_f64(self.config.global_timeout_seconds.max(0.0))
            .unwrap_or(Duration::MAX);
        let deadline = clock.checked_add(budget);

        info!(%run_id, bytes = html.len(), "Starting repair run");

        let mut state = RunState::new(html, self.config.history_max_entries);
        let outcome = {
            let pipeline = AssertUnwindSafe(self.run_pipeline(
                &mut state,
                html,
                page,
                screenshots,
                deadline,
            ))
            .catch_unwind();
            tokio::time::timeout(budget, pipeline).await
        };

        let error_message = match outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => {
                warn!(%run_id, "Repair run failed: {}", e);
                Some(e.to_string())
            }
            Ok(Err(panic)) => {
                let message = format!("Pipeline panicked: {}", panic_message(panic.as_ref()));
                warn!(%run_id, "{}", message);
                Some(message)
            }
            Err(_) => {
                warn!(%run_id, "Repair run hit the {:?} deadline", budget);
                Some(TIMEOUT_MESSAGE.to_string())
            }
        };

        state.metrics.total_time_ms = elapsed_ms(clock);
        let result = self.build_result(run_id, state, error_message, started_at);

        info!(
            %run_id,
            success = result.success,
            score = result.final_score,
            validation_passed = result.validation_passed,
            "Repair run finished in {}ms",
            result.metrics.total_time_ms
        );
        result
    }

    async fn run_pipeline(
        &self,
        state: &mut RunState,
        html: &str,
        page: Option<&BrowserSession>,
        screenshots: Option<&[Vec<u8>]>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        // 1. classify
        state.phases.advance(FixPhase::Classify)?;
        let started = Instant::now();
        let mut errors = self.collaborators.classifier.classify(html, page).await?;
        state.metrics.classify_time_ms += elapsed_ms(started);
        info!("Classified {} defects", errors.len());

        state.errors_before = errors.len();
        state
            .history
            .push(html, FixPhase::Initial, None, Vec::new(), errors.len());

        if errors.is_empty() {
            let validation = self.validate(state, html).await;
            let scored = state.record(html, FixPhase::Classify, &validation);
            if scored.passed {
                info!("No defects and validation passed");
                state.phases.complete();
                return Ok(());
            }
            errors = synthesize_errors(&validation);
            state.errors_before = errors.len();
            info!("Validation found {} feedback-only defects", errors.len());
            if errors.is_empty() {
                state.phases.complete();
                return Ok(());
            }
        }

        // 2. partition
        let (deterministic, mut llm_errors) = self.decision.partition_errors(&errors);
        debug!(
            deterministic = deterministic.len(),
            llm = llm_errors.len(),
            "Partitioned defects"
        );

        // 3. deterministic fixes
        let mut current_html = html.to_string();
        let mut current = None;
        if !deterministic.is_empty() {
            let (scored, mut sandbox_errors) = self
                .deterministic_pass(state, &mut current_html, &deterministic, errors.len())
                .await?;
            if scored.passed {
                state.phases.complete();
                return Ok(());
            }
            current = Some(scored);

            let feedback: Vec<ClassifiedError> = sandbox_errors
                .iter()
                .filter(|e| !e.requires_llm())
                .cloned()
                .collect();
            if !feedback.is_empty() {
                info!("Feedback pass for {} sandbox failures", feedback.len());
                let (scored, errors_after) = self
                    .deterministic_pass(state, &mut current_html, &feedback, feedback.len())
                    .await?;
                if scored.passed {
                    state.phases.complete();
                    return Ok(());
                }
                current = Some(scored);
                sandbox_errors = errors_after;
            }
            merge_errors(
                &mut llm_errors,
                sandbox_errors.into_iter().filter(|e| e.requires_llm()),
            );
        }

        // 4. AI fixes
        self.llm_loop(state, current_html, llm_errors, current, screenshots, deadline)
            .await?;

        state.phases.complete();
        Ok(())
    }

    /// Rule patches, injection and one validation
    ///
    /// Returns the score and the defects derived from that validation.
    async fn deterministic_pass(
        &self,
        state: &mut RunState,
        current_html: &mut String,
        errors: &[ClassifiedError],
        errors_before: usize,
    ) -> Result<(Scored, Vec<ClassifiedError>)> {
        state.phases.advance(FixPhase::Deterministic)?;
        let started = Instant::now();
        let patches = self.collaborators.rule_engine.apply_rules(errors).await?;
        let injection = self
            .collaborators
            .injector
            .inject(current_html, &patches)
            .await?;
        state.metrics.deterministic_time_ms += elapsed_ms(started);

        for failed in &injection.failed {
            warn!(selector = %failed.patch.selector, "Patch not applied: {}", failed.reason);
        }
        if injection.success && !injection.applied.is_empty() {
            state.metrics.deterministic_patches_applied += injection.applied.len() as u32;
            *current_html = injection.html;
            state.history.push(
                current_html.as_str(),
                FixPhase::Deterministic,
                None,
                injection.applied,
                errors_before,
            );
        } else {
            debug!("No deterministic patches applied");
        }

        state.phases.advance(FixPhase::ValidateDeterministic)?;
        let validation = self.validate(state, current_html).await;
        let scored = state.record(current_html, FixPhase::ValidateDeterministic, &validation);
        info!(
            score = scored.score,
            passed = scored.passed,
            "Deterministic candidate validated"
        );
        Ok((scored, synthesize_errors(&validation)))
    }

    async fn llm_loop(
        &self,
        state: &mut RunState,
        mut current_html: String,
        llm_errors: Vec<ClassifiedError>,
        current: Option<Scored>,
        screenshots: Option<&[Vec<u8>]>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let mut selected = self.decision.select_default(&llm_errors);
        if selected.is_empty() {
            debug!("No AI-fixable defects");
            return Ok(());
        }

        let min_llm = Duration::try_from_secs_f64(self.config.min_llm_seconds.max(0.0))
            .unwrap_or(Duration::MAX);
        let remaining_time = deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::MAX);
        if remaining_time <= min_llm {
            warn!(
                "Skipping AI fixes: {:?} left, need more than {:?}",
                remaining_time, min_llm
            );
            return Ok(());
        }

        let mut current_score = current.map_or(state.tracker.best_score(), |s| s.score);
        let remaining = current.map_or(selected.len(), |s| s.remaining.max(selected.len()));
        if !self
            .decision
            .should_continue_fixing(current_score, current_score, remaining, 0)
        {
            return Ok(());
        }

        let max_attempts = self.decision.config().max_llm_attempts;
        let mut attempt = 0;
        while attempt < max_attempts {
            state.phases.advance(FixPhase::LlmFix)?;
            attempt += 1;
            info!(attempt, errors = selected.len(), "AI fix attempt");

            let started = Instant::now();
            let shots: Option<Vec<Vec<u8>>> = match screenshots {
                Some(_) => None,
                None => state.last_screenshot.clone().map(|png| vec![png]),
            };
            let fix = self
                .collaborators
                .ai_fixer
                .fix(&selected, &current_html, screenshots.or(shots.as_deref()))
                .await?;
            state.metrics.llm_time_ms += elapsed_ms(started);
            state.metrics.llm_attempts += 1;
            state.metrics.llm_calls_made += fix.llm_calls_made;
            state.metrics.tokens_used += fix.tokens_used;

            let Some(candidate) = fix.candidate().map(str::to_string) else {
                warn!("AI fixer produced no candidate");
                state.phases.advance(FixPhase::ValidateLlm)?;
                continue;
            };

            let patches: Vec<Patch> = fix
                .tailwind_patches
                .iter()
                .chain(fix.js_patches.iter())
                .cloned()
                .collect();
            state
                .history
                .push(candidate.as_str(), FixPhase::LlmFix, None, patches, selected.len());

            state.phases.advance(FixPhase::ValidateLlm)?;
            let best_before = state.tracker.best_score();
            let validation = self.validate(state, &candidate).await;
            let candidate_score = validation.score();

            // Regressed candidates are discarded; the next attempt starts
            // from the last adopted document.
            if self.decision.should_rollback(candidate_score, best_before) {
                warn!(
                    score = candidate_score,
                    best = best_before,
                    "AI candidate regressed, rolling back"
                );
                state
                    .history
                    .update_score(candidate_score, None, Some(validation.passed()));
                state.history.rollback(1);
                state.metrics.rollbacks += 1;
                continue;
            }

            let scored = state.record(&candidate, FixPhase::ValidateLlm, &validation);
            info!(score = scored.score, passed = scored.passed, "AI candidate validated");
            if scored.passed {
                return Ok(());
            }
            if !self.decision.should_continue_fixing(
                scored.score,
                current_score,
                scored.remaining,
                attempt,
            ) {
                break;
            }

            let next_selected = self.decision.select_default(&synthesize_errors(&validation));
            if !next_selected.is_empty() {
                selected = next_selected;
            }
            current_html = candidate;
            current_score = scored.score;
        }

        Ok(())
    }

    async fn validate(&self, state: &mut RunState, html: &str) -> ValidationResult {
        let started = Instant::now();
        let validation = self.validator.validate(html, false).await;
        state.metrics.validation_time_ms += elapsed_ms(started);
        state.metrics.validations_run += 1;
        validation
    }

    fn build_result(
        &self,
        run_id: Uuid,
        state: RunState,
        error_message: Option<String>,
        started_at: DateTime<Utc>,
    ) -> OrchestratorResult {
        let RunState {
            phases,
            history,
            tracker,
            metrics,
            errors_before,
            best_passed,
            ..
        } = state;

        let improved = tracker.improved();
        let success = match error_message {
            None => best_passed || improved,
            Some(_) => improved,
        };
        let errors_remaining = tracker.errors_remaining().unwrap_or(errors_before);

        OrchestratorResult {
            run_id,
            success,
            original_html: tracker.original_html().to_string(),
            fixed_html: tracker.best_html().to_string(),
            final_score: tracker.best_score(),
            phases_completed: phases.into_phases(),
            errors_fixed: errors_before.saturating_sub(errors_remaining),
            errors_remaining,
            validation_passed: best_passed,
            metrics,
            error_message,
            history: history.into_entries(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Append errors not already present for the same selector and type
fn merge_errors(
    into: &mut Vec<ClassifiedError>,
    extra: impl IntoIterator<Item = ClassifiedError>,
) {
    for error in extra {
        let duplicate = into
            .iter()
            .any(|e| e.error_type == error.error_type && e.selector == error.selector);
        if !duplicate {
            into.push(error);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
