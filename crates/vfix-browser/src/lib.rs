//! Rendered-page validation for vfix
//!
//! This crate drives headless Chrome through the Chrome DevTools Protocol to
//! check that every clickable element on a page gives visible feedback.
//!
//! # Features
//!
//! - **Browser Management**: launch Chrome/Chromium or attach to a running one
//! - **Element Discovery**: find visible interactive elements and give each a
//!   stable selector
//! - **Click Testing**: hit-test, click, and diff before/after screenshots
//! - **Error Capture**: uncaught exceptions, rejections and `console.error`
//!
//! # Example
//!
//! ```no_run
//! use vfix_browser::{PageValidator, Sandbox};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sandbox = Sandbox::default();
//!     let result = sandbox
//!         .validate("<button onclick=\"this.textContent='Done'\">Go</button>", false)
//!         .await;
//!
//!     println!(
//!         "{}/{} responsive, passed: {}",
//!         result.responsive_count(),
//!         result.total(),
//!         result.passed()
//!     );
//! }
//! ```
//!
//! # Requirements
//!
//! - Chrome or Chromium installed, or a running instance started with
//!   `chrome --remote-debugging-port=9222` and `sandbox.remote_debugging_port` set
//! - Without a browser, validation still returns, as a failing result
//!
//! # Architecture
//!
//! - [`browser`]: session lifecycle and document loading
//! - [`discovery`]: element discovery and page error capture scripts
//! - [`interaction`]: hit-testing, clicking and click-error classification
//! - [`screenshot`]: viewport capture and diff artifacts
//! - [`sandbox`]: the validation loop and its result types

pub mod browser;
pub mod discovery;
pub mod interaction;
pub mod sandbox;
pub mod screenshot;

pub use browser::BrowserSession;
pub use discovery::{Discovered, ElementInfo, PageErrors};
pub use interaction::classify_click_error;
pub use sandbox::{
    ElementResult, ElementStatus, PageValidator, Sandbox, ValidationReport, ValidationResult,
    ValidationSummary, PASS_RATE,
};
