//! Semantic verdicts over multi-scale diff ratios
//!
//! Decision order, first match wins:
//!
//! 1. `tight >= responsive` -> [`InteractionClassification::Responsive`]
//! 2. `global >= navigation` and `global / local > navigation_ratio` -> `Navigation`
//! 3. `(local >= cascade or global >= cascade) and tight < weak` -> `CascadeEffect`
//! 4. `tight >= weak` -> `WeakFeedback`
//! 5. otherwise -> `NoResponse`

use crate::engine::{DiffResult, DiffScale};
use serde::{Deserialize, Serialize};
use vfix_core::ClassifierConfig;

/// What a click visibly did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InteractionClassification {
    /// Visible change at the element itself
    Responsive,
    /// Page-wide change, e.g. a route or document swap
    Navigation,
    /// Change somewhere else on the page but not at the element
    CascadeEffect,
    /// Change at the element, too faint to count
    WeakFeedback,
    NoResponse,
}

impl InteractionClassification {
    /// Responsive, navigation and cascade all show the click did something
    pub fn is_passing(&self) -> bool {
        match self {
            Self::Responsive | Self::Navigation | Self::CascadeEffect => true,
            Self::WeakFeedback | Self::NoResponse => false,
        }
    }
}

impl std::fmt::Display for InteractionClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Responsive => write!(f, "RESPONSIVE"),
            Self::Navigation => write!(f, "NAVIGATION"),
            Self::CascadeEffect => write!(f, "CASCADE_EFFECT"),
            Self::WeakFeedback => write!(f, "WEAK_FEEDBACK"),
            Self::NoResponse => write!(f, "NO_RESPONSE"),
        }
    }
}

/// Diff ratios per scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffRatios {
    pub tight: f64,
    pub local: f64,
    pub global: f64,
}

impl DiffRatios {
    pub fn new(tight: f64, local: f64, global: f64) -> Self {
        Self {
            tight,
            local,
            global,
        }
    }
}

impl From<&DiffResult> for DiffRatios {
    fn from(diff: &DiffResult) -> Self {
        Self::new(
            diff.tight.diff_ratio,
            diff.local.diff_ratio,
            diff.global.diff_ratio,
        )
    }
}

/// Verdict for one interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub classification: InteractionClassification,
    /// In `[0, 1]`
    pub confidence: f64,
    pub reasoning: String,
    pub primary_scale: DiffScale,
    pub diff_ratios: DiffRatios,
}

/// Maps diff output to an [`InteractionClassification`]
///
/// Stateless and deterministic: the same ratios always give the same result.
#[derive(Debug, Clone, Default)]
pub struct ResultClassifier {
    config: ClassifierConfig,
}

impl ResultClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a diff; `element_hint` (e.g. a selector) is used in the reasoning text
    pub fn classify(&self, diff: &DiffResult, element_hint: Option<&str>) -> ClassificationResult {
        self.classify_ratios(DiffRatios::from(diff), element_hint)
    }

    /// Classify raw ratios
    pub fn classify_ratios(
        &self,
        ratios: DiffRatios,
        element_hint: Option<&str>,
    ) -> ClassificationResult {
        let c = &self.config;
        let DiffRatios {
            tight,
            local,
            global,
        } = ratios;
        let subject = element_hint.unwrap_or("element");

        let (classification, confidence, primary_scale, reasoning) = if tight
            >= c.responsive_threshold
        {
            (
                InteractionClassification::Responsive,
                (tight / c.responsive_threshold).min(1.0),
                DiffScale::Tight,
                format!(
                    "{} changed {:.1}% of its own area (threshold {:.1}%)",
                    subject,
                    tight * 100.0,
                    c.responsive_threshold * 100.0
                ),
            )
        } else if global >= c.navigation_threshold && global_to_local(global, local) > c.navigation_ratio
        {
            (
                InteractionClassification::Navigation,
                (global / c.navigation_threshold).min(1.0) * 0.9,
                DiffScale::Global,
                format!(
                    "clicking {} changed {:.1}% of the page but only {:.1}% near it, consistent with navigation",
                    subject,
                    global * 100.0,
                    local * 100.0
                ),
            )
        } else if (local >= c.cascade_threshold || global >= c.cascade_threshold)
            && tight < c.weak_threshold
        {
            let (scale, ratio) = if local >= c.cascade_threshold {
                (DiffScale::Local, local)
            } else {
                (DiffScale::Global, global)
            };
            (
                InteractionClassification::CascadeEffect,
                (ratio / c.cascade_threshold).min(1.0) * 0.8,
                scale,
                format!(
                    "clicking {} changed {:.1}% of the {} region while the element itself stayed unchanged",
                    subject,
                    ratio * 100.0,
                    scale
                ),
            )
        } else if tight >= c.weak_threshold {
            (
                InteractionClassification::WeakFeedback,
                (tight / c.responsive_threshold).min(1.0),
                DiffScale::Tight,
                format!(
                    "{} changed only {:.2}% of its area, below the {:.1}% responsive threshold",
                    subject,
                    tight * 100.0,
                    c.responsive_threshold * 100.0
                ),
            )
        } else {
            let strongest = tight.max(local).max(global);
            (
                InteractionClassification::NoResponse,
                (1.0 - strongest / c.weak_threshold).clamp(0.0, 1.0),
                DiffScale::Tight,
                format!("no meaningful visual change after clicking {}", subject),
            )
        };

        ClassificationResult {
            classification,
            confidence,
            reasoning,
            primary_scale,
            diff_ratios: ratios,
        }
    }

    /// Whether a verdict counts the element as working
    pub fn is_passing(classification: InteractionClassification) -> bool {
        classification.is_passing()
    }
}

fn global_to_local(global: f64, local: f64) -> f64 {
    if local > 0.0 {
        global / local
    } else if global > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(tight: f64, local: f64, global: f64) -> ClassificationResult {
        ResultClassifier::default().classify_ratios(DiffRatios::new(tight, local, global), None)
    }

    #[test]
    fn test_responsive() {
        let result = classify(0.03, 0.0, 0.0);
        assert_eq!(result.classification, InteractionClassification::Responsive);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.primary_scale, DiffScale::Tight);
    }

    #[test]
    fn test_responsive_confidence_scales() {
        let result = classify(0.03, 0.0, 0.0);
        assert_eq!(result.confidence, 1.0);

        let config = ClassifierConfig {
            responsive_threshold: 0.02,
            ..Default::default()
        };
        let result = ResultClassifier::new(config)
            .classify_ratios(DiffRatios::new(0.02, 0.0, 0.0), Some("#buy"));
        assert_eq!(result.confidence, 1.0);
        assert!(result.reasoning.contains("#buy"));
    }

    #[test]
    fn test_cascade_effect() {
        let result = classify(0.001, 0.02, 0.02);
        assert_eq!(result.classification, InteractionClassification::CascadeEffect);
        assert_eq!(result.primary_scale, DiffScale::Local);
    }

    #[test]
    fn test_navigation() {
        let result = classify(0.001, 0.001, 0.05);
        assert_eq!(result.classification, InteractionClassification::Navigation);
        assert_eq!(result.primary_scale, DiffScale::Global);
    }

    #[test]
    fn test_navigation_with_unchanged_local_region() {
        let result = classify(0.0, 0.0, 0.5);
        assert_eq!(result.classification, InteractionClassification::Navigation);
    }

    #[test]
    fn test_no_response() {
        let result = classify(0.001, 0.001, 0.001);
        assert_eq!(result.classification, InteractionClassification::NoResponse);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn test_weak_feedback() {
        let result = classify(0.01, 0.0, 0.0);
        assert_eq!(result.classification, InteractionClassification::WeakFeedback);
        assert!(result.confidence < 1.0);
    }

    #[test]
    fn test_weak_tight_beats_cascade() {
        // tight is above the weak threshold so rule 3 does not apply
        let result = classify(0.006, 0.02, 0.02);
        assert_eq!(result.classification, InteractionClassification::WeakFeedback);
    }

    #[test]
    fn test_passing_classifications() {
        assert!(ResultClassifier::is_passing(InteractionClassification::Responsive));
        assert!(ResultClassifier::is_passing(InteractionClassification::Navigation));
        assert!(ResultClassifier::is_passing(InteractionClassification::CascadeEffect));
        assert!(!ResultClassifier::is_passing(InteractionClassification::WeakFeedback));
        assert!(!ResultClassifier::is_passing(InteractionClassification::NoResponse));
    }

    #[test]
    fn test_deterministic() {
        let a = classify(0.004, 0.012, 0.03);
        let b = classify(0.004, 0.012, 0.03);
        assert_eq!(a, b);
    }

    #[test]
    fn test_serialized_labels() {
        let json = serde_json::to_string(&InteractionClassification::CascadeEffect).unwrap();
        assert_eq!(json, "\"CASCADE_EFFECT\"");
    }
}
