//! Rendered-page validation
//!
//! [`Sandbox::validate`] loads a document in headless Chrome, clicks every
//! discovered interactive element in turn and diffs a screenshot taken before
//! the click against one taken after it. Every failure, including a missing
//! browser, comes back as data inside [`ValidationResult`].

use crate::browser::BrowserSession;
use crate::discovery::{discover_elements, drain_page_errors, Discovered, ElementInfo, PageErrors};
use crate::interaction::{classify_click_error, click_element, probe_element};
use crate::screenshot::{capture_viewport, write_diff_artifact};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vfix_core::fail_open::fail_open_sync;
use vfix_core::{BoundingBox, Result, SandboxConfig, VfixConfig};
use vfix_diff::{
    ClassificationResult, DiffEngine, DiffResult, DiffScale, InteractionClassification,
    ResultClassifier,
};

/// Minimum share of responsive elements for a page to pass
pub const PASS_RATE: f64 = 0.9;

/// Outcome of clicking one element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementStatus {
    Responsive,
    NoVisualChange,
    /// Another element sits on top of it
    Intercepted,
    Timeout,
    Error,
    /// Skipped, e.g. because the page could not be restored
    NotTested,
}

impl From<InteractionClassification> for ElementStatus {
    fn from(classification: InteractionClassification) -> Self {
        match classification {
            InteractionClassification::Responsive
            | InteractionClassification::Navigation
            | InteractionClassification::CascadeEffect => Self::Responsive,
            InteractionClassification::WeakFeedback | InteractionClassification::NoResponse => {
                Self::NoVisualChange
            }
        }
    }
}

impl std::fmt::Display for ElementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Responsive => "RESPONSIVE",
            Self::NoVisualChange => "NO_VISUAL_CHANGE",
            Self::Intercepted => "INTERCEPTED",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
            Self::NotTested => "NOT_TESTED",
        };
        write!(f, "{}", label)
    }
}

/// Result for one tested element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementResult {
    pub selector: String,
    pub tag: String,
    pub status: ElementStatus,
    /// Tight-region diff ratio, 0 when no diff was taken
    pub diff_ratio: f64,
    /// `tag#id.class` of the element that swallowed the click
    pub blocking_element: Option<String>,
    pub diff_result: Option<DiffResult>,
    pub classification: Option<ClassificationResult>,
    pub error_message: Option<String>,
}

impl ElementResult {
    fn failed(element: &ElementInfo, status: ElementStatus, message: Option<String>) -> Self {
        Self {
            selector: element.selector.clone(),
            tag: element.tag.clone(),
            status,
            diff_ratio: 0.0,
            blocking_element: None,
            diff_result: None,
            classification: None,
            error_message: message,
        }
    }
}

/// Aggregate outcome of one validation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub element_results: Vec<ElementResult>,
    pub js_errors: Vec<String>,
    pub console_errors: Vec<String>,
    pub duration_ms: u64,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// False when the page never rendered (no driver, load failure)
    pub rendered: bool,
    /// PNG of the page right after load
    #[serde(skip)]
    pub initial_screenshot: Option<Vec<u8>>,
}

impl ValidationResult {
    /// Empty, failing result describing why the browser could not be used
    pub fn driver_unavailable(reason: impl std::fmt::Display, config: &SandboxConfig) -> Self {
        Self {
            js_errors: vec![format!("Browser driver unavailable: {}", reason)],
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            rendered: false,
            ..Default::default()
        }
    }

    pub fn total(&self) -> usize {
        self.element_results.len()
    }

    pub fn count(&self, status: ElementStatus) -> usize {
        self.element_results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    pub fn responsive_count(&self) -> usize {
        self.count(ElementStatus::Responsive)
    }

    pub fn intercepted_count(&self) -> usize {
        self.count(ElementStatus::Intercepted)
    }

    /// `responsive / total`, 1.0 when nothing was tested
    pub fn success_rate(&self) -> f64 {
        if self.element_results.is_empty() {
            1.0
        } else {
            self.responsive_count() as f64 / self.total() as f64
        }
    }

    pub fn passed(&self) -> bool {
        self.success_rate() >= PASS_RATE
            && self.js_errors.is_empty()
            && self.intercepted_count() == 0
    }

    /// Score in `[0, 1]` used to rank repair candidates
    ///
    /// A passing page scores its success rate, which is at least [`PASS_RATE`].
    /// A failing page scores its success rate scaled by [`PASS_RATE`], halved
    /// again when the page threw, so it always ranks below any passing page.
    /// Zero when the page never rendered.
    pub fn score(&self) -> f64 {
        if !self.rendered {
            return 0.0;
        }
        let rate = self.success_rate();
        if self.passed() {
            return rate;
        }
        let scaled = rate * PASS_RATE;
        if self.js_errors.is_empty() {
            scaled
        } else {
            scaled * 0.5
        }
    }

    /// Serializable view with the derived verdict alongside the raw results
    pub fn report(&self) -> ValidationReport<'_> {
        ValidationReport {
            result: self,
            summary: ValidationSummary::from(self),
        }
    }

    fn merge_page_errors(&mut self, errors: PageErrors) {
        let mut merged = PageErrors {
            js_errors: std::mem::take(&mut self.js_errors),
            console_errors: std::mem::take(&mut self.console_errors),
        };
        merged.merge(errors);
        self.js_errors = merged.js_errors;
        self.console_errors = merged.console_errors;
    }

    /// Elements that did not respond to their click
    pub fn failures(&self) -> impl Iterator<Item = &ElementResult> {
        self.element_results
            .iter()
            .filter(|r| r.status != ElementStatus::Responsive)
    }
}

/// Derived figures of a [`ValidationResult`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub responsive: usize,
    pub intercepted: usize,
    pub not_tested: usize,
    pub success_rate: f64,
    pub score: f64,
    pub passed: bool,
}

impl From<&ValidationResult> for ValidationSummary {
    fn from(result: &ValidationResult) -> Self {
        Self {
            total: result.total(),
            responsive: result.responsive_count(),
            intercepted: result.intercepted_count(),
            not_tested: result.count(ElementStatus::NotTested),
            success_rate: result.success_rate(),
            score: result.score(),
            passed: result.passed(),
        }
    }
}

/// A [`ValidationResult`] serialized together with its [`ValidationSummary`]
#[derive(Debug, Serialize)]
pub struct ValidationReport<'a> {
    #[serde(flatten)]
    pub result: &'a ValidationResult,
    pub summary: ValidationSummary,
}

/// Anything that can render and judge a document
///
/// Implementations must not fail: problems are reported inside the result.
#[async_trait]
pub trait PageValidator: Send + Sync {
    async fn validate(&self, html: &str, js_only: bool) -> ValidationResult;
}

/// Headless Chrome validator
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
    engine: DiffEngine,
    classifier: ResultClassifier,
}

impl Sandbox {
    pub fn new(config: SandboxConfig, engine: DiffEngine, classifier: ResultClassifier) -> Self {
        Self {
            config,
            engine,
            classifier,
        }
    }

    /// Build from the `[sandbox]`, `[diff]` and `[classifier]` sections
    pub fn from_config(config: &VfixConfig) -> Self {
        Self::new(
            config.sandbox.clone(),
            DiffEngine::new(config.diff.clone()),
            ResultClassifier::new(config.classifier.clone()),
        )
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn run(&self, html: &str, js_only: bool) -> ValidationResult {
        let started = Instant::now();

        let mut session = match BrowserSession::open(&self.config) {
            Ok(session) => session,
            Err(e) => {
                warn!("Browser unavailable, reporting failed validation: {}", e);
                let mut result = ValidationResult::driver_unavailable(e, &self.config);
                result.duration_ms = elapsed_ms(started);
                return result;
            }
        };

        let mut result = ValidationResult {
            viewport_width: self.config.viewport_width,
            viewport_height: self.config.viewport_height,
            ..Default::default()
        };

        if let Err(e) = session.load_html(html) {
            warn!("Page failed to load: {}", e);
            result.js_errors.push(format!("Page failed to load: {}", e));
            result.duration_ms = elapsed_ms(started);
            return result;
        }
        result.rendered = true;
        result.initial_screenshot = capture_viewport(&session)
            .map_err(|e| warn!("Initial screenshot failed: {}", e))
            .ok();
        apply_page_errors(&mut result, &session);

        if js_only {
            result.duration_ms = elapsed_ms(started);
            info!(
                "JS-only validation: {} JS errors, {} console errors",
                result.js_errors.len(),
                result.console_errors.len()
            );
            return result;
        }

        let Discovered { elements, skipped } =
            match discover_elements(&session, self.config.max_elements) {
                Ok(discovered) => discovered,
                Err(e) => {
                    warn!("Element discovery failed: {}", e);
                    result.js_errors.push(format!("Element discovery failed: {}", e));
                    Discovered::default()
                }
            };

        let mut page_lost = false;
        for (index, element) in elements.iter().enumerate() {
            if page_lost {
                result.element_results.push(ElementResult::failed(
                    element,
                    ElementStatus::NotTested,
                    Some("Page under test could not be restored".to_string()),
                ));
                continue;
            }

            let element_result = self.test_element(&session, index, element);
            debug!(
                selector = %element.selector,
                status = %element_result.status,
                "Element tested"
            );
            result.element_results.push(element_result);

            // Errors live in the page; collect them before a later click can
            // navigate away and discard them.
            if session.on_document().unwrap_or(false) {
                apply_page_errors(&mut result, &session);
            } else {
                debug!("Click left the document, reloading");
                match session.reload_document() {
                    Ok(()) => apply_page_errors(&mut result, &session),
                    Err(e) => {
                        warn!("Could not restore page after navigation: {}", e);
                        page_lost = true;
                    }
                }
            }
        }

        let limit = self.config.max_elements;
        result.element_results.extend(skipped.iter().map(|element| {
            ElementResult::failed(
                element,
                ElementStatus::NotTested,
                Some(format!("Element limit of {} reached", limit)),
            )
        }));
        result.duration_ms = elapsed_ms(started);

        info!(
            "Validation finished: {}/{} responsive, {} intercepted, {} JS errors ({}ms)",
            result.responsive_count(),
            result.total(),
            result.intercepted_count(),
            result.js_errors.len(),
            result.duration_ms
        );
        result
    }

    fn test_element(
        &self,
        session: &BrowserSession,
        index: usize,
        element: &ElementInfo,
    ) -> ElementResult {
        let timeout = Duration::from_millis(self.config.click_timeout_ms);

        let element_box = match probe_element(session, &element.selector, timeout) {
            Ok(element_box) => element_box,
            Err(message) => return click_failure(element, message),
        };

        // Probing scrolls the element into view; "before" must share that scroll position.
        let before = match capture_viewport(session) {
            Ok(png) => png,
            Err(e) => return ElementResult::failed(element, ElementStatus::Error, Some(e.to_string())),
        };

        if let Err(message) = click_element(session, &element.selector) {
            return click_failure(element, message);
        }

        std::thread::sleep(Duration::from_millis(self.config.settle_ms));

        match self.diff_click(session, &before, &element_box) {
            Ok(diff) => {
                let classification = self.classifier.classify(&diff, Some(&element.selector));
                if let Some(dir) = self.config.artifact_dir.as_deref() {
                    for scale in [DiffScale::Tight, DiffScale::Local, DiffScale::Global] {
                        if let Some(png) = diff.region(scale).diff_image.as_deref() {
                            fail_open_sync("write diff artifact", || {
                                write_diff_artifact(dir, index, &scale.to_string(), &element.selector, png)
                            });
                        }
                    }
                }
                ElementResult {
                    selector: element.selector.clone(),
                    tag: element.tag.clone(),
                    status: classification.classification.into(),
                    diff_ratio: diff.tight.diff_ratio,
                    blocking_element: None,
                    diff_result: Some(diff),
                    classification: Some(classification),
                    error_message: None,
                }
            }
            Err(e) => ElementResult::failed(element, ElementStatus::Error, Some(e.to_string())),
        }
    }

    fn diff_click(
        &self,
        session: &BrowserSession,
        before: &[u8],
        element_box: &BoundingBox,
    ) -> Result<DiffResult> {
        let after = capture_viewport(session)?;
        let generate_images = self.config.artifact_dir.is_some();
        self.engine.compare(before, &after, element_box, generate_images)
    }
}

#[async_trait]
impl PageValidator for Sandbox {
    async fn validate(&self, html: &str, js_only: bool) -> ValidationResult {
        let sandbox = self.clone();
        let html = html.to_string();
        match tokio::task::spawn_blocking(move || sandbox.run(&html, js_only)).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Validation worker failed: {}", e);
                ValidationResult::driver_unavailable(format!("validation worker failed: {}", e), &self.config)
            }
        }
    }
}

fn click_failure(element: &ElementInfo, message: String) -> ElementResult {
    let (status, blocking_element) = classify_click_error(&message);
    let mut failed = ElementResult::failed(element, status, Some(message));
    failed.blocking_element = blocking_element;
    failed
}

fn apply_page_errors(result: &mut ValidationResult, session: &BrowserSession) {
    match drain_page_errors(session) {
        Ok(errors) => result.merge_page_errors(errors),
        Err(e) => warn!("Could not read page errors: {}", e),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
