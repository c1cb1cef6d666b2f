//! # vfix-diff
//!
//! Visual change detection for vfix.
//!
//! This crate provides:
//! - [`DiffEngine`]: multi-scale (tight/local/global) pixel diffing of
//!   before/after screenshots, with optional red-highlight visualisations
//! - [`ResultClassifier`]: maps diff ratios to a semantic verdict
//!   (responsive, navigation, cascade, weak, none)
//!
//! Both are pure: no I/O beyond decoding and encoding image bytes.

mod classifier;
mod engine;

pub use classifier::{ClassificationResult, DiffRatios, InteractionClassification, ResultClassifier};
pub use engine::{DiffEngine, DiffResult, DiffScale, PixelRegion, RegionDiff};
