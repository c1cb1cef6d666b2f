//! Configuration management for vfix
//!
//! Every pipeline component has its own section with defaults that match the
//! documented thresholds, so a missing file or a partial file both work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, VfixError};

/// Workspace-level vfix configuration
///
/// Loaded from `.vfix/config.toml` in the project root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VfixConfig {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub diff: DiffConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub decision: DecisionConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Headless browser and click-loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Run Chrome headless (default: true)
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    /// Page load timeout
    #[serde(default = "default_navigation_timeout_seconds")]
    pub navigation_timeout_seconds: u64,

    /// Buffer after load for page scripts to initialise
    #[serde(default = "default_js_init_wait_ms")]
    pub js_init_wait_ms: u64,

    /// How long to wait for an element to become clickable
    #[serde(default = "default_click_timeout_ms")]
    pub click_timeout_ms: u64,

    /// Delay between a click and the "after" screenshot
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Upper bound on elements clicked per validation pass; the rest are
    /// reported as not tested and count against the pass rate
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,

    /// Where to write per-element diff visualisations (disabled when unset)
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,

    /// Attach to a running Chrome on this DevTools port instead of launching one
    #[serde(default)]
    pub remote_debugging_port: Option<u16>,
}

/// Pixel diff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Mean per-channel difference (0-255) above which a pixel counts as changed
    #[serde(default = "default_tolerance")]
    pub tolerance: u8,

    /// Diff ratio at which a region counts as significantly changed
    #[serde(default = "default_significance_threshold")]
    pub significance_threshold: f64,

    /// Padding around the element for the tight region
    #[serde(default = "default_tight_padding")]
    pub tight_padding: u32,

    /// Padding around the element for the local region
    #[serde(default = "default_local_padding")]
    pub local_padding: u32,
}

/// Thresholds for mapping diff ratios to an interaction verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_responsive_threshold")]
    pub responsive_threshold: f64,

    #[serde(default = "default_weak_threshold")]
    pub weak_threshold: f64,

    #[serde(default = "default_cascade_threshold")]
    pub cascade_threshold: f64,

    #[serde(default = "default_navigation_threshold")]
    pub navigation_threshold: f64,

    /// Minimum global/local ratio for a change to count as navigation
    #[serde(default = "default_navigation_ratio")]
    pub navigation_ratio: f64,
}

/// Retry, selection and rollback policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Errors below this confidence are only sent to the AI fixer if nothing qualifies
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_max_llm_errors")]
    pub max_llm_errors: usize,

    #[serde(default = "default_max_llm_attempts")]
    pub max_llm_attempts: usize,

    /// Stop iterating when an attempt improves the score by less than this
    #[serde(default = "default_min_improvement")]
    pub min_improvement: f64,

    /// Discard a candidate whose score drops by more than this
    #[serde(default = "default_rollback_threshold")]
    pub rollback_threshold: f64,
}

/// Run-level budget settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard deadline for one `fix()` call
    #[serde(default = "default_global_timeout_seconds")]
    pub global_timeout_seconds: f64,

    /// Remaining budget required before starting AI fix attempts
    #[serde(default = "default_min_llm_seconds")]
    pub min_llm_seconds: f64,

    /// Capacity of the attempt history
    #[serde(default = "default_history_max_entries")]
    pub history_max_entries: usize,
}

// Default value providers
fn default_true() -> bool {
    true
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_navigation_timeout_seconds() -> u64 {
    30
}

fn default_js_init_wait_ms() -> u64 {
    500
}

fn default_click_timeout_ms() -> u64 {
    2000
}

fn default_settle_ms() -> u64 {
    300
}

fn default_max_elements() -> usize {
    200
}

fn default_tolerance() -> u8 {
    20
}

fn default_significance_threshold() -> f64 {
    0.02
}

fn default_tight_padding() -> u32 {
    20
}

fn default_local_padding() -> u32 {
    100
}

fn default_responsive_threshold() -> f64 {
    0.02
}

fn default_weak_threshold() -> f64 {
    0.005
}

fn default_cascade_threshold() -> f64 {
    0.01
}

fn default_navigation_threshold() -> f64 {
    0.03
}

fn default_navigation_ratio() -> f64 {
    5.0
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_max_llm_errors() -> usize {
    5
}

fn default_max_llm_attempts() -> usize {
    3
}

fn default_min_improvement() -> f64 {
    0.05
}

fn default_rollback_threshold() -> f64 {
    0.10
}

fn default_global_timeout_seconds() -> f64 {
    120.0
}

fn default_min_llm_seconds() -> f64 {
    30.0
}

fn default_history_max_entries() -> usize {
    20
}

impl VfixConfig {
    /// Load configuration from `.vfix/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".vfix/config.toml");

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| VfixError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.vfix/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(".vfix");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        std::fs::write(&config_path, Self::default().to_toml()?)?;
        Ok(config_path)
    }

    /// Render as pretty TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| VfixError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Reject values that would make the pipeline meaningless
    pub fn validate(&self) -> Result<()> {
        let c = &self.classifier;
        if c.weak_threshold > c.responsive_threshold {
            return Err(VfixError::Config(format!(
                "classifier.weak_threshold ({}) must not exceed responsive_threshold ({})",
                c.weak_threshold, c.responsive_threshold
            )));
        }
        if self.orchestrator.global_timeout_seconds <= 0.0 {
            return Err(VfixError::Config(
                "orchestrator.global_timeout_seconds must be positive".to_string(),
            ));
        }
        if self.orchestrator.history_max_entries == 0 {
            return Err(VfixError::Config(
                "orchestrator.history_max_entries must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.diff.significance_threshold) {
            return Err(VfixError::Config(
                "diff.significance_threshold must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            headless: default_true(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            navigation_timeout_seconds: default_navigation_timeout_seconds(),
            js_init_wait_ms: default_js_init_wait_ms(),
            click_timeout_ms: default_click_timeout_ms(),
            settle_ms: default_settle_ms(),
            max_elements: default_max_elements(),
            artifact_dir: None,
            remote_debugging_port: None,
        }
    }
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            significance_threshold: default_significance_threshold(),
            tight_padding: default_tight_padding(),
            local_padding: default_local_padding(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            responsive_threshold: default_responsive_threshold(),
            weak_threshold: default_weak_threshold(),
            cascade_threshold: default_cascade_threshold(),
            navigation_threshold: default_navigation_threshold(),
            navigation_ratio: default_navigation_ratio(),
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_llm_errors: default_max_llm_errors(),
            max_llm_attempts: default_max_llm_attempts(),
            min_improvement: default_min_improvement(),
            rollback_threshold: default_rollback_threshold(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            global_timeout_seconds: default_global_timeout_seconds(),
            min_llm_seconds: default_min_llm_seconds(),
            history_max_entries: default_history_max_entries(),
        }
    }
}
