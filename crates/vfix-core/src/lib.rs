//! # vfix-core
//!
//! Core types for the vfix visual validation and repair pipeline.
//!
//! vfix repairs machine-generated interactive HTML so that every clickable
//! element gives visible feedback. This crate holds what every stage shares:
//!
//! - The unified [`VfixError`] and [`Result`] alias
//! - Defect and patch payloads exchanged with external collaborators
//! - The [`FixPhase`] stages of a repair run
//! - [`config::VfixConfig`], loaded from `.vfix/config.toml`
//! - Fail-open helpers for housekeeping that must never abort a run

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{
    ClassifierConfig, DecisionConfig, DiffConfig, OrchestratorConfig, SandboxConfig, VfixConfig,
};
pub use error::{Result, VfixError};
pub use types::*;
