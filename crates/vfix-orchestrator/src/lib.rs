//! # vfix-orchestrator
//!
//! Repair pipeline for vfix.
//!
//! This crate provides:
//! - [`Orchestrator`]: one bounded-time repair run per document, from defect
//!   classification through rule patches and AI fixes to validation
//! - [`DecisionEngine`]: retry, selection and rollback policy
//! - [`HistoryManager`] and [`BestResultTracker`]: attempt timeline and
//!   running best candidate
//! - [`PhaseTracker`]: enforces the [`vfix_core::FixPhase`] order
//! - Collaborator traits for the classifier, rule engine, patch injector and
//!   AI fixer

mod collaborators;
mod decision;
mod feedback;
mod history;
mod metrics;
mod orchestrator;
mod phases;

pub use collaborators::{AiFixer, Collaborators, ErrorClassifier, PatchInjector, RuleEngine};
pub use decision::DecisionEngine;
pub use feedback::synthesize_errors;
pub use history::{BestResultTracker, HistoryEntry, HistoryManager, DEFAULT_MAX_ENTRIES};
pub use metrics::FixMetrics;
pub use orchestrator::{Orchestrator, OrchestratorResult, TIMEOUT_MESSAGE};
pub use phases::{is_valid_transition, PhaseTracker};
