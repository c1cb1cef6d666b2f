//! Unified error types for vfix

use thiserror::Error;

/// Unified error type for all vfix operations
#[derive(Error, Debug)]
pub enum VfixError {
    // Browser errors
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    // Diff errors
    #[error("Image decode failed: {0}")]
    ImageDecode(String),

    // Collaborator errors
    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Rule engine error: {0}")]
    RuleEngine(String),

    #[error("Patch injection error: {0}")]
    Injection(String),

    #[error("AI fixer error: {0}")]
    AiFixer(String),

    // Orchestration errors
    #[error("Phase error: {0}")]
    Phase(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using VfixError
pub type Result<T> = std::result::Result<T, VfixError>;
