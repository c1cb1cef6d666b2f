//! Core type definitions shared across the vfix pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Axis-aligned box in CSS pixels, as reported by `getBoundingClientRect`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Grow the box by `padding` on every side
    pub fn expand(&self, padding: f64) -> Self {
        Self {
            x: self.x - padding,
            y: self.y - padding,
            width: self.width + padding * 2.0,
            height: self.height + padding * 2.0,
        }
    }
}

/// Kind of defect detected on an interactive element
///
/// Each kind is either fixable by a deterministic rule or requires generative
/// repair; see [`ErrorType::requires_llm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Element sits under another element in the stacking order
    ZIndexConflict,
    /// `pointer-events: none` on the element or an overlay intercepting clicks
    PointerBlocked,
    /// No `:active` style
    MissingActiveState,
    /// No `:focus`/`:focus-visible` style
    MissingFocusState,
    /// No `:hover` style
    MissingHoverState,
    /// Clicking produced no visible change at all
    MissingVisualFeedback,
    /// Element is rendered but transparent or zero-sized
    InvisibleElement,
    /// Handler exists but does not update the DOM state it should
    StateNotUpdated,
    /// Handler missing, throws, or hangs
    HandlerFailure,
    /// Uncaught script error on the page
    JsRuntimeError,
}

impl ErrorType {
    /// Whether this defect needs the AI fixer rather than the rule engine
    pub fn requires_llm(&self) -> bool {
        match self {
            Self::ZIndexConflict
            | Self::PointerBlocked
            | Self::MissingActiveState
            | Self::MissingFocusState
            | Self::MissingHoverState
            | Self::MissingVisualFeedback
            | Self::InvisibleElement => false,
            Self::StateNotUpdated | Self::HandlerFailure | Self::JsRuntimeError => true,
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZIndexConflict => write!(f, "z_index_conflict"),
            Self::PointerBlocked => write!(f, "pointer_blocked"),
            Self::MissingActiveState => write!(f, "missing_active_state"),
            Self::MissingFocusState => write!(f, "missing_focus_state"),
            Self::MissingHoverState => write!(f, "missing_hover_state"),
            Self::MissingVisualFeedback => write!(f, "missing_visual_feedback"),
            Self::InvisibleElement => write!(f, "invisible_element"),
            Self::StateNotUpdated => write!(f, "state_not_updated"),
            Self::HandlerFailure => write!(f, "handler_failure"),
            Self::JsRuntimeError => write!(f, "js_runtime_error"),
        }
    }
}

/// A defect found on one element by a classifier (static, dynamic or synthesized
/// from sandbox failures)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub error_type: ErrorType,
    pub selector: String,
    pub element_tag: String,
    /// Style introspection details (computed z-index, pointer-events, blocking element...)
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Classifier confidence in `[0, 1]`
    pub confidence: f64,
}

impl ClassifiedError {
    pub fn new(
        error_type: ErrorType,
        selector: impl Into<String>,
        element_tag: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            error_type,
            selector: selector.into(),
            element_tag: element_tag.into(),
            metadata: BTreeMap::new(),
            confidence,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn requires_llm(&self) -> bool {
        self.error_type.requires_llm()
    }
}

/// What a patch changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchKind {
    /// Utility classes appended to the element's `class` attribute
    TailwindClasses,
    /// A CSS rule injected into the document
    Css,
    /// A script injected into the document
    Script,
    /// An attribute set on the element
    Attribute,
}

/// One edit to apply to a document, produced by the rule engine or the AI fixer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub selector: String,
    pub kind: PatchKind,
    pub content: String,
    /// Defect this patch addresses, if known
    #[serde(default)]
    pub error_type: Option<ErrorType>,
}

impl Patch {
    pub fn new(selector: impl Into<String>, kind: PatchKind, content: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            kind,
            content: content.into(),
            error_type: None,
        }
    }

    pub fn for_error(mut self, error_type: ErrorType) -> Self {
        self.error_type = Some(error_type);
        self
    }
}

/// A patch the injector could not apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedPatch {
    pub patch: Patch,
    pub reason: String,
}

/// Output of the patch injector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionResult {
    pub success: bool,
    pub html: String,
    pub applied: Vec<Patch>,
    pub failed: Vec<FailedPatch>,
}

impl InjectionResult {
    /// Result for an injection that changed nothing
    pub fn unchanged(html: impl Into<String>) -> Self {
        Self {
            success: false,
            html: html.into(),
            applied: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Output of the AI fixer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiFixResult {
    pub success: bool,
    pub fixed_html: Option<String>,
    pub tailwind_patches: Vec<Patch>,
    pub js_patches: Vec<Patch>,
    pub llm_calls_made: u32,
    pub tokens_used: u64,
}

impl AiFixResult {
    /// Candidate document, present only when the fixer reports success
    pub fn candidate(&self) -> Option<&str> {
        if self.success {
            self.fixed_html.as_deref()
        } else {
            None
        }
    }
}

/// Stage of the repair state machine
///
/// Linear with early exit:
/// `Initial -> Classify -> Deterministic -> ValidateDeterministic -> LlmFix -> ValidateLlm -> Complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixPhase {
    Initial,
    Classify,
    Deterministic,
    ValidateDeterministic,
    LlmFix,
    ValidateLlm,
    Complete,
}

impl FixPhase {
    /// Position in the linear phase order
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Initial => 0,
            Self::Classify => 1,
            Self::Deterministic => 2,
            Self::ValidateDeterministic => 3,
            Self::LlmFix => 4,
            Self::ValidateLlm => 5,
            Self::Complete => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for FixPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "INITIAL"),
            Self::Classify => write!(f, "CLASSIFY"),
            Self::Deterministic => write!(f, "DETERMINISTIC"),
            Self::ValidateDeterministic => write!(f, "VALIDATE_DETERMINISTIC"),
            Self::LlmFix => write!(f, "LLM_FIX"),
            Self::ValidateLlm => write!(f, "VALIDATE_LLM"),
            Self::Complete => write!(f, "COMPLETE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_expand() {
        let b = BoundingBox::new(10.0, 20.0, 100.0, 40.0).expand(20.0);
        assert_eq!(b, BoundingBox::new(-10.0, 0.0, 140.0, 80.0));
    }

    #[test]
    fn test_requires_llm_partition() {
        assert!(!ErrorType::ZIndexConflict.requires_llm());
        assert!(!ErrorType::MissingVisualFeedback.requires_llm());
        assert!(ErrorType::HandlerFailure.requires_llm());
        assert!(ErrorType::JsRuntimeError.requires_llm());
    }

    #[test]
    fn test_classified_error_metadata() {
        let err = ClassifiedError::new(ErrorType::PointerBlocked, "#buy", "button", 0.9)
            .with_metadata("blocking_element", "div.overlay");
        assert_eq!(err.metadata.get("blocking_element").map(String::as_str), Some("div.overlay"));
        assert!(!err.requires_llm());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&FixPhase::ValidateDeterministic).unwrap();
        assert_eq!(json, "\"VALIDATE_DETERMINISTIC\"");
        assert_eq!(FixPhase::LlmFix.to_string(), "LLM_FIX");
        assert!(FixPhase::Classify.ordinal() < FixPhase::Complete.ordinal());
    }

    #[test]
    fn test_ai_fix_candidate_requires_success() {
        let mut result = AiFixResult {
            fixed_html: Some("<p>x</p>".to_string()),
            ..Default::default()
        };
        assert!(result.candidate().is_none());
        result.success = true;
        assert_eq!(result.candidate(), Some("<p>x</p>"));
    }
}
