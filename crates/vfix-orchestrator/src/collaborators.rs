//! Interfaces of the services a repair run depends on
//!
//! The orchestrator only knows these contracts; defect detection, the rule
//! table and the AI fixer live elsewhere. Implementations report failures as
//! `Err`, which the orchestrator turns into a result with `error_message` set.

use async_trait::async_trait;
use vfix_browser::BrowserSession;
use vfix_core::{AiFixResult, ClassifiedError, InjectionResult, Patch, Result};

/// Detects defects in a document
#[async_trait]
pub trait ErrorClassifier: Send + Sync {
    /// Classify from markup alone
    async fn classify_static(&self, html: &str) -> Result<Vec<ClassifiedError>>;

    /// Classify with access to a rendered page when one is available
    ///
    /// Defaults to [`Self::classify_static`]; dynamic classifiers override it
    /// to inspect computed styles through `page`.
    async fn classify(
        &self,
        html: &str,
        page: Option<&BrowserSession>,
    ) -> Result<Vec<ClassifiedError>> {
        let _ = page;
        self.classify_static(html).await
    }
}

/// Maps deterministic defects to patches
#[async_trait]
pub trait RuleEngine: Send + Sync {
    async fn apply_rules(&self, errors: &[ClassifiedError]) -> Result<Vec<Patch>>;
}

/// Applies patches to a document
#[async_trait]
pub trait PatchInjector: Send + Sync {
    async fn inject(&self, html: &str, patches: &[Patch]) -> Result<InjectionResult>;
}

/// Generative repair for defects no rule covers
#[async_trait]
pub trait AiFixer: Send + Sync {
    async fn fix(
        &self,
        errors: &[ClassifiedError],
        html: &str,
        screenshots: Option<&[Vec<u8>]>,
    ) -> Result<AiFixResult>;
}

/// The set of services one orchestrator uses
pub struct Collaborators {
    pub classifier: Box<dyn ErrorClassifier>,
    pub rule_engine: Box<dyn RuleEngine>,
    pub injector: Box<dyn PatchInjector>,
    pub ai_fixer: Box<dyn AiFixer>,
}

impl Collaborators {
    pub fn new(
        classifier: impl ErrorClassifier + 'static,
        rule_engine: impl RuleEngine + 'static,
        injector: impl PatchInjector + 'static,
        ai_fixer: impl AiFixer + 'static,
    ) -> Self {
        Self {
            classifier: Box::new(classifier),
            rule_engine: Box::new(rule_engine),
            injector: Box::new(injector),
            ai_fixer: Box::new(ai_fixer),
        }
    }
}
