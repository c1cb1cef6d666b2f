//! Browser lifecycle management using Chrome DevTools Protocol
//!
//! `headless_chrome` is a blocking client. Every method here blocks the calling
//! thread; async callers go through [`crate::Sandbox`], which runs sessions on
//! a blocking worker.

use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use vfix_core::{Result, SandboxConfig, VfixError};

use crate::discovery::instrument_html;

/// Active browser session with one tab
pub struct BrowserSession {
    /// Underlying browser instance (kept alive for tab lifetime)
    #[allow(dead_code)]
    browser: Browser,
    /// Current active tab
    tab: Arc<Tab>,
    /// Configuration
    config: SandboxConfig,
    /// Backing file of the document under test; removed on drop
    document: Option<NamedTempFile>,
    /// `file://` URL of the document under test
    document_url: Option<String>,
}

impl BrowserSession {
    /// Attach to `remote_debugging_port` when configured, otherwise launch
    pub fn open(config: &SandboxConfig) -> Result<Self> {
        match config.remote_debugging_port {
            Some(port) => Self::connect(port, config),
            None => Self::launch(config),
        }
    }

    /// Launch a new browser instance
    pub fn launch(config: &SandboxConfig) -> Result<Self> {
        info!(
            "Launching browser (headless: {}, size: {}x{})",
            config.headless, config.viewport_width, config.viewport_height
        );

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.viewport_width, config.viewport_height)))
            .build()
            .map_err(|e| VfixError::Browser(format!("Invalid launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| VfixError::Browser(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| VfixError::Browser(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(Duration::from_secs(config.navigation_timeout_seconds));

        debug!("Browser launched");

        Ok(Self {
            browser,
            tab,
            config: config.clone(),
            document: None,
            document_url: None,
        })
    }

    /// Connect to an existing browser instance
    ///
    /// # Arguments
    /// * `port` - Chrome DevTools Protocol port (typically 9222)
    pub fn connect(port: u16, config: &SandboxConfig) -> Result<Self> {
        info!("Connecting to existing browser on port {}", port);

        let ws_url = debugger_url(port, config)?;
        debug!("DevTools endpoint: {}", ws_url);
        let browser = Browser::connect(ws_url)
            .map_err(|e| VfixError::Browser(format!("Failed to connect to browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| VfixError::Browser(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(Duration::from_secs(config.navigation_timeout_seconds));

        Ok(Self {
            browser,
            tab,
            config: config.clone(),
            document: None,
            document_url: None,
        })
    }

    /// Render `html` as the page under test
    ///
    /// The document is instrumented with the error-capture script, written to a
    /// temp file, and loaded. Returns once navigation finished and the
    /// JS-init buffer elapsed.
    pub fn load_html(&mut self, html: &str) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("vfix-")
            .suffix(".html")
            .tempfile()?;
        file.write_all(instrument_html(html).as_bytes())?;
        file.flush()?;

        let url = format!("file://{}", file.path().display());
        self.document = Some(file);
        self.document_url = Some(url.clone());
        self.navigate(&url)
    }

    /// Reload the document under test, e.g. after a click navigated away
    pub fn reload_document(&self) -> Result<()> {
        let url = self
            .document_url
            .clone()
            .ok_or_else(|| VfixError::Browser("No document loaded".to_string()))?;
        self.navigate(&url)
    }

    /// Whether the tab still shows the document under test (fragments ignored)
    pub fn on_document(&self) -> Result<bool> {
        let Some(expected) = self.document_url.as_deref() else {
            return Ok(false);
        };
        let current = self.get_url()?;
        Ok(strip_fragment(&current) == strip_fragment(expected))
    }

    /// Navigate to a URL and wait for scripts to settle
    pub fn navigate(&self, url: &str) -> Result<()> {
        debug!("Navigating to {}", url);

        self.tab
            .navigate_to(url)
            .map_err(|e| VfixError::Browser(format!("Failed to navigate to {}: {}", url, e)))?;

        self.tab
            .wait_until_navigated()
            .map_err(|e| VfixError::Browser(format!("Navigation timeout for {}: {}", url, e)))?;

        std::thread::sleep(Duration::from_millis(self.config.js_init_wait_ms));
        Ok(())
    }

    /// Execute JavaScript in the page context
    ///
    /// # Returns
    /// JSON result from JavaScript execution
    pub fn evaluate_script(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(|e| VfixError::Browser(format!("JavaScript evaluation failed: {}", e)))?;

        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }

    /// Evaluate a script that returns `JSON.stringify(...)` and decode it
    pub fn evaluate_json<T: DeserializeOwned>(&self, script: &str) -> Result<T> {
        match self.evaluate_script(script)? {
            serde_json::Value::String(raw) => Ok(serde_json::from_str(&raw)?),
            other => Err(VfixError::Browser(format!(
                "Expected a JSON string from script, got {}",
                other
            ))),
        }
    }

    /// Get the current URL
    pub fn get_url(&self) -> Result<String> {
        let result = self.evaluate_script("window.location.href")?;
        Ok(result.as_str().unwrap_or("").to_string())
    }

    /// Viewport size the session was launched with
    pub fn viewport(&self) -> (u32, u32) {
        (self.config.viewport_width, self.config.viewport_height)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Get reference to the active tab
    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        debug!("BrowserSession dropped, browser will be cleaned up");
    }
}

/// Body of the DevTools `/json/version` endpoint
#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

fn version_endpoint(port: u16) -> String {
    format!("http://127.0.0.1:{}/json/version", port)
}

/// Resolve the browser-level `ws://` URL a running Chrome exposes on `port`
fn debugger_url(port: u16, config: &SandboxConfig) -> Result<String> {
    let endpoint = version_endpoint(port);
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(config.navigation_timeout_seconds))
        .build()
        .map_err(|e| VfixError::Browser(format!("HTTP client setup failed: {}", e)))?;

    let body = client
        .get(&endpoint)
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.text())
        .map_err(|e| VfixError::Browser(format!("No DevTools endpoint at {}: {}", endpoint, e)))?;

    parse_debugger_url(&body)
}

fn parse_debugger_url(body: &str) -> Result<String> {
    let info: VersionInfo = serde_json::from_str(body)?;
    Ok(info.web_socket_debugger_url)
}

fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map(|(base, _)| base).unwrap_or(url)
}
