//! Fail-open utilities for graceful degradation
//!
//! Use these for infrastructure operations that must never abort a repair run:
//! writing diff artifacts and similar housekeeping.
//!
//! DO NOT use fail-open for:
//! - Validation verdicts (correctness)
//! - Collaborator calls whose output drives decisions (classifier, rule engine, AI fixer)

use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`. The
/// sandbox drives the browser from a blocking thread, so this is synchronous.
///
/// # Usage
///
/// ```no_run
/// use vfix_core::fail_open::fail_open_sync;
/// use vfix_core::Result;
///
/// fn write_artifact() -> Result<()> {
///     Ok(())
/// }
///
/// // None if write_artifact() failed, otherwise Some(())
/// let written = fail_open_sync("diff_artifact", write_artifact);
/// ```
pub fn fail_open_sync<F, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Result<T>,
{
    match f() {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
