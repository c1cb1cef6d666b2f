//! Defects derived from sandbox failures
//!
//! Static classification can miss problems that only show up when the page is
//! clicked. These are turned into [`ClassifiedError`]s so they flow through
//! the same rule engine and AI fixer as statically detected ones.

use vfix_browser::{ElementStatus, ValidationResult};
use vfix_core::{ClassifiedError, ErrorType};

const NO_CHANGE_CONFIDENCE: f64 = 0.9;
const INTERCEPTED_CONFIDENCE: f64 = 0.95;
const HANDLER_FAILURE_CONFIDENCE: f64 = 0.7;
const JS_ERROR_CONFIDENCE: f64 = 1.0;

/// Map each failed element and each JS error to a defect
///
/// A page that never rendered yields nothing: the failure is environmental
/// and no patch can fix it.
pub fn synthesize_errors(validation: &ValidationResult) -> Vec<ClassifiedError> {
    if !validation.rendered {
        return Vec::new();
    }

    let mut errors: Vec<ClassifiedError> = validation
        .element_results
        .iter()
        .filter_map(|result| {
            let error = match result.status {
                ElementStatus::Responsive | ElementStatus::NotTested => return None,
                ElementStatus::NoVisualChange => ClassifiedError::new(
                    ErrorType::MissingVisualFeedback,
                    &result.selector,
                    &result.tag,
                    NO_CHANGE_CONFIDENCE,
                )
                .with_metadata("diff_ratio", format!("{:.4}", result.diff_ratio)),
                ElementStatus::Intercepted => {
                    let error = ClassifiedError::new(
                        ErrorType::PointerBlocked,
                        &result.selector,
                        &result.tag,
                        INTERCEPTED_CONFIDENCE,
                    );
                    match &result.blocking_element {
                        Some(blocker) => error.with_metadata("blocking_element", blocker),
                        None => error,
                    }
                }
                ElementStatus::Timeout | ElementStatus::Error => ClassifiedError::new(
                    ErrorType::HandlerFailure,
                    &result.selector,
                    &result.tag,
                    HANDLER_FAILURE_CONFIDENCE,
                )
                .with_metadata("status", result.status.to_string()),
            };
            let error = match &result.error_message {
                Some(message) => error.with_metadata("error_message", message),
                None => error,
            };
            Some(error)
        })
        .collect();

    errors.extend(validation.js_errors.iter().map(|message| {
        ClassifiedError::new(ErrorType::JsRuntimeError, "document", "script", JS_ERROR_CONFIDENCE)
            .with_metadata("message", message)
    }));

    errors
}
