//! Clicking elements and interpreting click failures

use crate::browser::BrowserSession;
use crate::sandbox::ElementStatus;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;
use vfix_core::BoundingBox;

/// Substring every pointer-interception failure carries
pub const INTERCEPT_MARKER: &str = "intercepts pointer events";

#[derive(Debug, Deserialize)]
struct ProbeResult {
    found: bool,
    #[serde(default)]
    rect: Option<BoundingBox>,
    #[serde(default)]
    intercepted: bool,
    #[serde(default)]
    blocker: Option<String>,
}

/// Scrolls the element into view, reports its viewport rect, and hit-tests its centre
fn probe_script(selector: &str) -> String {
    let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
    const el = document.querySelector({quoted});
    if (!el) return JSON.stringify({{ found: false }});
    el.scrollIntoView({{ block: 'center', inline: 'center' }});
    const r = el.getBoundingClientRect();
    const top = document.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2);
    const intercepted = !!top && top !== el && !el.contains(top);
    let blocker = null;
    if (intercepted) {{
        blocker = '<' + top.tagName.toLowerCase();
        if (top.id) blocker += ' id="' + top.id + '"';
        const cls = top.getAttribute('class');
        if (cls) blocker += ' class="' + cls + '"';
        blocker += '>';
    }}
    return JSON.stringify({{
        found: true,
        rect: {{ x: r.left, y: r.top, width: r.width, height: r.height }},
        intercepted,
        blocker
    }});
}})()"#
    )
}

/// Wait for an element, scroll it into view and check nothing covers it
///
/// Returns the element's viewport box, or a failure message suitable for
/// [`classify_click_error`].
pub fn probe_element(
    session: &BrowserSession,
    selector: &str,
    timeout: Duration,
) -> std::result::Result<BoundingBox, String> {
    let tab = session.tab();
    let timed_out = || {
        format!(
            "Timeout {}ms exceeded waiting for {}",
            timeout.as_millis(),
            selector
        )
    };

    if tab.find_element(selector).is_err() {
        tab.wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|_| timed_out())?;
    }

    let probe: ProbeResult = session
        .evaluate_json(&probe_script(selector))
        .map_err(|e| e.to_string())?;
    if !probe.found {
        return Err(timed_out());
    }
    if probe.intercepted {
        let blocker = probe.blocker.unwrap_or_else(|| "<unknown>".to_string());
        return Err(format!("{} {}", blocker, INTERCEPT_MARKER));
    }
    Ok(probe.rect.unwrap_or_default())
}

/// Dispatch a real pointer click on a probed element
pub fn click_element(session: &BrowserSession, selector: &str) -> std::result::Result<(), String> {
    let element = session
        .tab()
        .find_element(selector)
        .map_err(|e| e.to_string())?;
    element.click().map_err(|e| e.to_string())?;
    debug!("Clicked {}", selector);
    Ok(())
}

fn blocker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<([a-zA-Z][\w-]*)((?:\s+[\w-]+="[^"]*")*)\s*/?>\s*(?:from\s+.*?\s+subtree\s+)?intercepts pointer events"#)
            .expect("blocker regex is valid")
    })
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([\w-]+)="([^"]*)""#).expect("attribute regex is valid"))
}

/// Map a click failure message to a status and, for interception, the blocker
///
/// The blocker is rendered as `tag#id.class1.class2`.
pub fn classify_click_error(message: &str) -> (ElementStatus, Option<String>) {
    if message.contains(INTERCEPT_MARKER) {
        return (ElementStatus::Intercepted, extract_blocker(message));
    }
    if message.to_ascii_lowercase().contains("timeout") {
        return (ElementStatus::Timeout, None);
    }
    (ElementStatus::Error, None)
}

fn extract_blocker(message: &str) -> Option<String> {
    let caps = blocker_regex().captures(message)?;
    let mut out = caps.get(1)?.as_str().to_ascii_lowercase();
    let attrs = caps.get(2).map(|m| m.as_str()).unwrap_or("");

    let mut id = None;
    let mut classes = Vec::new();
    for attr in attr_regex().captures_iter(attrs) {
        match &attr[1] {
            "id" if !attr[2].is_empty() => id = Some(attr[2].to_string()),
            "class" => classes.extend(attr[2].split_whitespace().map(str::to_string)),
            _ => {}
        }
    }

    if let Some(id) = id {
        out.push('#');
        out.push_str(&id);
    }
    for class in classes {
        out.push('.');
        out.push_str(&class);
    }
    Some(out)
}
