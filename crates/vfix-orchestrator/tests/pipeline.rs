//! Integration tests for the repair pipeline.
//!
//! Every collaborator and the page validator are in-memory fakes, so these
//! tests exercise phase order, rollback, timeout and failure handling
//! without a browser.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vfix_browser::{ElementResult, ElementStatus, PageValidator, ValidationResult, PASS_RATE};
use vfix_core::{
    AiFixResult, ClassifiedError, ErrorType, FixPhase, InjectionResult, Patch, PatchKind, Result,
    VfixConfig, VfixError,
};
use vfix_orchestrator::{
    AiFixer, Collaborators, ErrorClassifier, Orchestrator, PatchInjector, RuleEngine,
    TIMEOUT_MESSAGE,
};

const MARKER: &str = "<!--patched-->";
const ORIGINAL: &str = "<button id=\"buy\">Buy</button>";

// ---------------------------------------------------------------------------
// fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeClassifier {
    errors: Vec<ClassifiedError>,
    delay: Option<Duration>,
    fail: bool,
}

#[async_trait]
impl ErrorClassifier for FakeClassifier {
    async fn classify_static(&self, _html: &str) -> Result<Vec<ClassifiedError>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(VfixError::Classifier("model unavailable".to_string()));
        }
        Ok(self.errors.clone())
    }
}

struct FakeRules;

#[async_trait]
impl RuleEngine for FakeRules {
    async fn apply_rules(&self, errors: &[ClassifiedError]) -> Result<Vec<Patch>> {
        Ok(errors
            .iter()
            .map(|e| {
                Patch::new(&e.selector, PatchKind::TailwindClasses, "relative z-10")
                    .for_error(e.error_type)
            })
            .collect())
    }
}

struct PanickingRules;

#[async_trait]
impl RuleEngine for PanickingRules {
    async fn apply_rules(&self, _errors: &[ClassifiedError]) -> Result<Vec<Patch>> {
        panic!("rule table corrupted");
    }
}

/// Appends one marker per call
struct FakeInjector;

#[async_trait]
impl PatchInjector for FakeInjector {
    async fn inject(&self, html: &str, patches: &[Patch]) -> Result<InjectionResult> {
        Ok(InjectionResult {
            success: true,
            html: format!("{}{}", html, MARKER),
            applied: patches.to_vec(),
            failed: Vec::new(),
        })
    }
}

/// Replays scripted results and records what it was given; clones share state
#[derive(Clone, Default)]
struct FakeAiFixer {
    script: Arc<Mutex<VecDeque<AiFixResult>>>,
    calls: Arc<AtomicUsize>,
    screenshot_counts: Arc<Mutex<Vec<Option<usize>>>>,
}

impl FakeAiFixer {
    fn scripted(candidates: &[&str]) -> Self {
        let script = candidates
            .iter()
            .map(|html| AiFixResult {
                success: true,
                fixed_html: Some(html.to_string()),
                llm_calls_made: 1,
                tokens_used: 100,
                ..Default::default()
            })
            .collect();
        Self {
            script: Arc::new(Mutex::new(script)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AiFixer for FakeAiFixer {
    async fn fix(
        &self,
        _errors: &[ClassifiedError],
        _html: &str,
        screenshots: Option<&[Vec<u8>]>,
    ) -> Result<AiFixResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.screenshot_counts
            .lock()
            .unwrap()
            .push(screenshots.map(|s| s.len()));
        Ok(self.script.lock().unwrap().pop_front().unwrap_or_default())
    }
}

struct FnValidator<F>(F);

#[async_trait]
impl<F> PageValidator for FnValidator<F>
where
    F: Fn(&str) -> ValidationResult + Send + Sync,
{
    async fn validate(&self, html: &str, _js_only: bool) -> ValidationResult {
        (self.0)(html)
    }
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn page(statuses: &[ElementStatus]) -> ValidationResult {
    ValidationResult {
        element_results: statuses
            .iter()
            .enumerate()
            .map(|(i, status)| ElementResult {
                selector: format!("#el{}", i),
                tag: "button".to_string(),
                status: *status,
                diff_ratio: 0.0,
                blocking_element: None,
                diff_result: None,
                classification: None,
                error_message: None,
            })
            .collect(),
        rendered: true,
        viewport_width: 1280,
        viewport_height: 720,
        ..Default::default()
    }
}

fn passing() -> ValidationResult {
    page(&[ElementStatus::Responsive])
}

fn defect(error_type: ErrorType, selector: &str) -> ClassifiedError {
    ClassifiedError::new(error_type, selector, "button", 0.9)
}

fn collaborators(classifier: FakeClassifier, ai_fixer: FakeAiFixer) -> Collaborators {
    Collaborators::new(classifier, FakeRules, FakeInjector, ai_fixer)
}

// ---------------------------------------------------------------------------
// tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_deterministic_fix_end_to_end() {
    let classifier = FakeClassifier {
        errors: vec![defect(ErrorType::ZIndexConflict, "#buy")],
        ..Default::default()
    };
    let fixer = FakeAiFixer::scripted(&[]);
    let validator = FnValidator(|html: &str| {
        if html.contains(MARKER) {
            passing()
        } else {
            page(&[ElementStatus::Intercepted])
        }
    });
    let orchestrator = Orchestrator::new(
        collaborators(classifier, fixer.clone()),
        validator,
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert!(result.success);
    assert!(result.validation_passed);
    assert!(result.error_message.is_none());
    assert_eq!(
        result.phases_completed,
        vec![
            FixPhase::Initial,
            FixPhase::Classify,
            FixPhase::Deterministic,
            FixPhase::ValidateDeterministic,
            FixPhase::Complete,
        ]
    );
    assert_eq!(result.metrics.llm_calls_made, 0);
    assert_eq!(result.metrics.deterministic_patches_applied, 1);
    assert_eq!(result.errors_fixed, 1);
    assert_eq!(result.errors_remaining, 0);
    assert_eq!(result.fixed_html, format!("{}{}", ORIGINAL, MARKER));
    assert_eq!(result.final_score, 1.0);
    assert_eq!(fixer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_global_timeout_returns_partial_result() {
    let classifier = FakeClassifier {
        errors: vec![defect(ErrorType::ZIndexConflict, "#buy")],
        delay: Some(Duration::from_millis(500)),
        ..Default::default()
    };
    let mut config = VfixConfig::default();
    config.orchestrator.global_timeout_seconds = 0.05;
    let orchestrator = Orchestrator::new(
        collaborators(classifier, FakeAiFixer::scripted(&[])),
        FnValidator(|_: &str| passing()),
        &config,
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert_eq!(result.error_message.as_deref(), Some(TIMEOUT_MESSAGE));
    assert_eq!(result.error_message.as_deref(), Some("Global timeout reached"));
    assert!(!result.success);
    assert_eq!(result.fixed_html, ORIGINAL);
    assert_eq!(result.final_score, 0.0);
    assert_eq!(
        result.phases_completed,
        vec![FixPhase::Initial, FixPhase::Classify]
    );
}

#[tokio::test]
async fn test_classifier_error_does_not_escape() {
    let classifier = FakeClassifier {
        fail: true,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(
        collaborators(classifier, FakeAiFixer::scripted(&[])),
        FnValidator(|_: &str| passing()),
        &VfixConfig::default(),
    );

    let result = orchestrator.fix("<div><button>unclosed", None, None).await;

    assert!(!result.success);
    let message = result.error_message.unwrap();
    assert!(message.contains("model unavailable"), "{}", message);
    assert_eq!(result.fixed_html, "<div><button>unclosed");
}

#[tokio::test]
async fn test_panicking_collaborator_does_not_escape() {
    let classifier = FakeClassifier {
        errors: vec![defect(ErrorType::MissingFocusState, "#buy")],
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(
        Collaborators::new(
            classifier,
            PanickingRules,
            FakeInjector,
            FakeAiFixer::scripted(&[]),
        ),
        FnValidator(|_: &str| passing()),
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert!(!result.success);
    let message = result.error_message.unwrap();
    assert!(message.starts_with("Pipeline panicked"), "{}", message);
    assert!(message.contains("rule table corrupted"));
}

#[tokio::test]
async fn test_no_defects_and_passing_page() {
    let orchestrator = Orchestrator::new(
        collaborators(FakeClassifier::default(), FakeAiFixer::scripted(&[])),
        FnValidator(|_: &str| passing()),
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert!(result.success);
    assert!(result.validation_passed);
    assert_eq!(result.fixed_html, ORIGINAL);
    assert_eq!(result.metrics.validations_run, 1);
    assert_eq!(
        result.phases_completed,
        vec![FixPhase::Initial, FixPhase::Classify, FixPhase::Complete]
    );
}

#[tokio::test]
async fn test_driver_unavailable_is_reported_as_failure() {
    let orchestrator = Orchestrator::new(
        collaborators(FakeClassifier::default(), FakeAiFixer::scripted(&[])),
        FnValidator(|_: &str| {
            ValidationResult::driver_unavailable("chrome not found", &Default::default())
        }),
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert!(!result.success);
    assert!(!result.validation_passed);
    assert!(result.error_message.is_none());
    assert_eq!(result.final_score, 0.0);
}

#[tokio::test]
async fn test_passing_patch_is_adopted_over_higher_rate_failure() {
    use ElementStatus::{Intercepted as I, NoVisualChange as N, Responsive as R};

    // no static defects; the sandbox finds one blocked element. The patch
    // unblocks it but leaves two elements without feedback: a lower success
    // rate than before, yet passing.
    let validator = FnValidator(|html: &str| {
        let mut statuses = vec![R; 18];
        if html.contains(MARKER) {
            statuses.extend([N, N]);
        } else {
            statuses.extend([R, I]);
        }
        page(&statuses)
    });
    let orchestrator = Orchestrator::new(
        collaborators(FakeClassifier::default(), FakeAiFixer::scripted(&[])),
        validator,
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert!(result.validation_passed);
    assert!(result.success);
    assert_eq!(result.fixed_html, format!("{}{}", ORIGINAL, MARKER));
    assert!((result.final_score - 0.9).abs() < 1e-9);
    assert_eq!(
        result.phases_completed,
        vec![
            FixPhase::Initial,
            FixPhase::Classify,
            FixPhase::Deterministic,
            FixPhase::ValidateDeterministic,
            FixPhase::Complete,
        ]
    );
}

#[tokio::test]
async fn test_feedback_pass_after_failed_validation() {
    // the page only passes after two rounds of patches
    let classifier = FakeClassifier {
        errors: vec![defect(ErrorType::MissingFocusState, "#buy")],
        ..Default::default()
    };
    let validator = FnValidator(|html: &str| {
        if html.matches(MARKER).count() >= 2 {
            passing()
        } else {
            page(&[ElementStatus::NoVisualChange])
        }
    });
    let orchestrator = Orchestrator::new(
        collaborators(classifier, FakeAiFixer::scripted(&[])),
        validator,
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert!(result.success);
    assert!(result.validation_passed);
    assert_eq!(
        result.phases_completed,
        vec![
            FixPhase::Initial,
            FixPhase::Classify,
            FixPhase::Deterministic,
            FixPhase::ValidateDeterministic,
            FixPhase::Deterministic,
            FixPhase::ValidateDeterministic,
            FixPhase::Complete,
        ]
    );
    assert_eq!(result.metrics.deterministic_patches_applied, 2);
    assert_eq!(result.metrics.llm_calls_made, 0);
}

#[tokio::test]
async fn test_ai_candidate_regression_is_rolled_back() {
    let classifier = FakeClassifier {
        errors: vec![defect(ErrorType::StateNotUpdated, "#counter")],
        ..Default::default()
    };
    let fixer = FakeAiFixer::scripted(&["cand-a", "cand-b", "cand-c"]);
    let validator = FnValidator(|html: &str| match html {
        // 0.5 success rate
        "cand-a" => page(&[ElementStatus::Responsive, ElementStatus::NoVisualChange]),
        // 0.25 success rate, scores more than 0.10 below the best
        "cand-b" => page(&[
            ElementStatus::Responsive,
            ElementStatus::NoVisualChange,
            ElementStatus::NoVisualChange,
            ElementStatus::NoVisualChange,
        ]),
        "cand-c" => passing(),
        _ => page(&[ElementStatus::NoVisualChange]),
    });
    let orchestrator = Orchestrator::new(
        collaborators(classifier, fixer.clone()),
        validator,
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert!(result.success);
    assert!(result.validation_passed);
    assert_eq!(result.fixed_html, "cand-c");
    assert_eq!(result.metrics.rollbacks, 1);
    assert_eq!(result.metrics.llm_attempts, 3);
    assert_eq!(result.metrics.llm_calls_made, 3);
    assert_eq!(result.metrics.tokens_used, 300);
    assert!(result.history.iter().all(|e| e.html != "cand-b"));
    assert_eq!(result.phases_completed.last(), Some(&FixPhase::Complete));
    assert_eq!(fixer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_ai_attempts_are_bounded() {
    let classifier = FakeClassifier {
        errors: vec![defect(ErrorType::HandlerFailure, "#save")],
        ..Default::default()
    };
    // each candidate improves but none passes, so the attempt budget stops the loop
    let fixer = FakeAiFixer::scripted(&["x1", "x2", "x3", "x4", "x5"]);
    let validator = FnValidator(|html: &str| {
        use ElementStatus::{NoVisualChange as N, Responsive as R};
        match html {
            "x1" => page(&[R, N, N, N]),
            "x2" => page(&[R, R, N, N]),
            "x3" => page(&[R, R, R, N]),
            _ => page(&[N]),
        }
    });
    let orchestrator = Orchestrator::new(
        collaborators(classifier, fixer.clone()),
        validator,
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert_eq!(fixer.calls.load(Ordering::SeqCst), 3);
    assert!(result.success);
    assert!(!result.validation_passed);
    assert_eq!(result.fixed_html, "x3");
    assert!((result.final_score - 0.75 * PASS_RATE).abs() < 1e-9);
    assert!(result.error_message.is_none());
}

#[tokio::test]
async fn test_ai_stops_when_improvement_stalls() {
    let classifier = FakeClassifier {
        errors: vec![defect(ErrorType::HandlerFailure, "#save")],
        ..Default::default()
    };
    let fixer = FakeAiFixer::scripted(&["y1", "y2", "y3"]);
    let validator = FnValidator(|html: &str| match html {
        "y1" => page(&[ElementStatus::Responsive, ElementStatus::NoVisualChange]),
        // same score as y1
        _ => page(&[ElementStatus::NoVisualChange, ElementStatus::Responsive]),
    });
    let orchestrator = Orchestrator::new(
        collaborators(classifier, fixer.clone()),
        validator,
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert_eq!(fixer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.fixed_html, "y1");
    assert!((result.final_score - 0.5 * PASS_RATE).abs() < 1e-9);
}

#[tokio::test]
async fn test_mixed_defects_reach_ai_with_screenshot() {
    let classifier = FakeClassifier {
        errors: vec![
            defect(ErrorType::ZIndexConflict, "#buy"),
            defect(ErrorType::HandlerFailure, "#save"),
        ],
        ..Default::default()
    };
    let fixer = FakeAiFixer::scripted(&["fixed-by-ai"]);
    let validator = FnValidator(|html: &str| {
        if html == "fixed-by-ai" {
            return passing();
        }
        let mut result = page(&[ElementStatus::Responsive, ElementStatus::Timeout]);
        result.initial_screenshot = Some(vec![0x89, 0x50, 0x4e, 0x47]);
        result
    });
    let orchestrator = Orchestrator::new(
        collaborators(classifier, fixer.clone()),
        validator,
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert!(result.success);
    assert!(result.validation_passed);
    assert_eq!(result.fixed_html, "fixed-by-ai");
    assert_eq!(result.errors_fixed, 2);
    assert_eq!(
        result.phases_completed,
        vec![
            FixPhase::Initial,
            FixPhase::Classify,
            FixPhase::Deterministic,
            FixPhase::ValidateDeterministic,
            FixPhase::LlmFix,
            FixPhase::ValidateLlm,
            FixPhase::Complete,
        ]
    );
    assert_eq!(*fixer.screenshot_counts.lock().unwrap(), vec![Some(1)]);
}

#[tokio::test]
async fn test_ai_phase_skipped_without_time_budget() {
    let classifier = FakeClassifier {
        errors: vec![defect(ErrorType::StateNotUpdated, "#counter")],
        ..Default::default()
    };
    let fixer = FakeAiFixer::scripted(&["never"]);
    let mut config = VfixConfig::default();
    config.orchestrator.global_timeout_seconds = 10.0;
    config.orchestrator.min_llm_seconds = 30.0;
    let orchestrator = Orchestrator::new(
        collaborators(classifier, fixer.clone()),
        FnValidator(|_: &str| passing()),
        &config,
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;

    assert_eq!(fixer.calls.load(Ordering::SeqCst), 0);
    assert!(!result.success);
    assert!(result.error_message.is_none());
    assert_eq!(
        result.phases_completed,
        vec![FixPhase::Initial, FixPhase::Classify, FixPhase::Complete]
    );
}

#[tokio::test]
async fn test_result_serializes_with_screaming_phases() {
    let orchestrator = Orchestrator::new(
        collaborators(FakeClassifier::default(), FakeAiFixer::scripted(&[])),
        FnValidator(|_: &str| passing()),
        &VfixConfig::default(),
    );

    let result = orchestrator.fix(ORIGINAL, None, None).await;
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["phases_completed"][1], "CLASSIFY");
    assert_eq!(json["history"][0]["phase"], "INITIAL");
    assert!(json["run_id"].is_string());
}
