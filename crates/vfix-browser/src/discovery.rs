//! DOM inspection: interactive element discovery and page error capture

use crate::browser::BrowserSession;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vfix_core::{BoundingBox, Result};

/// Selectors that make an element a click candidate
pub const INTERACTIVE_SELECTORS: &[&str] = &[
    "[onclick]",
    "button",
    "a[href]",
    "[role=\"button\"]",
    "input[type=\"button\"]",
    "input[type=\"submit\"]",
    ".clickable",
    "[data-action]",
];

/// An interactive element found on the page
///
/// Produced once per validation pass and not mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Generated selector: `#id`, else first `data-*` attribute, else
    /// `tag.class1.class2:nth-of-type(n)`
    pub selector: String,
    pub tag: String,
    pub bounding_box: BoundingBox,
    pub has_handler: bool,
    pub inner_text: String,
    pub classes: Vec<String>,
}

/// Errors captured by the instrumentation script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageErrors {
    /// Uncaught exceptions and unhandled rejections
    pub js_errors: Vec<String>,
    /// `console.error` calls
    pub console_errors: Vec<String>,
}

const CAPTURE_SCRIPT: &str = r#"<script data-vfix-capture>(function(){
window.__vfixJsErrors=[];window.__vfixConsoleErrors=[];
window.addEventListener('error',function(e){window.__vfixJsErrors.push(String(e.message||e.error||'Script error'));});
window.addEventListener('unhandledrejection',function(e){window.__vfixJsErrors.push('Unhandled rejection: '+String(e.reason));});
var original=console.error;
console.error=function(){try{window.__vfixConsoleErrors.push(Array.prototype.map.call(arguments,String).join(' '));}catch(_){}return original.apply(console,arguments);};
})();</script>"#;

const DRAIN_ERRORS_SCRIPT: &str = r#"(() => {
    const js = window.__vfixJsErrors || [];
    const con = window.__vfixConsoleErrors || [];
    const out = JSON.stringify({ js_errors: js.slice(), console_errors: con.slice() });
    js.length = 0;
    con.length = 0;
    return out;
})()"#;

/// Insert the error-capture script ahead of the document's own scripts
///
/// Placed right after `<head>` when present, else after `<html>`, else at the
/// very start.
pub fn instrument_html(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let insert_at = opening_tag_end(&lower, "head")
        .or_else(|| opening_tag_end(&lower, "html"))
        .unwrap_or(0);

    let mut out = String::with_capacity(html.len() + CAPTURE_SCRIPT.len());
    out.push_str(&html[..insert_at]);
    out.push_str(CAPTURE_SCRIPT);
    out.push_str(&html[insert_at..]);
    out
}

/// Byte offset just past the `>` of the first `<tag ...>`; ignores `<header>` for `head`
fn opening_tag_end(lower: &str, tag: &str) -> Option<usize> {
    let needle = format!("<{}", tag);
    let mut from = 0;
    while let Some(pos) = lower[from..].find(&needle) {
        let start = from + pos;
        let after = start + needle.len();
        match lower[after..].chars().next() {
            Some(c) if c == '>' || c.is_ascii_whitespace() => {
                return lower[after..].find('>').map(|end| after + end + 1);
            }
            _ => from = after,
        }
    }
    None
}

/// Discovery output split at the per-pass element limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovered {
    /// Elements to click, in document order
    pub elements: Vec<ElementInfo>,
    /// Elements beyond the limit; reported as not tested
    pub skipped: Vec<ElementInfo>,
}

impl Discovered {
    pub fn split(mut found: Vec<ElementInfo>, max_elements: usize) -> Self {
        let skipped = if found.len() > max_elements {
            found.split_off(max_elements)
        } else {
            Vec::new()
        };
        Self {
            elements: found,
            skipped,
        }
    }
}

impl PageErrors {
    /// Append errors not already recorded
    ///
    /// Reloading the document replays its load-time errors; those repeats are
    /// dropped here.
    pub fn merge(&mut self, other: PageErrors) {
        for error in other.js_errors {
            if !self.js_errors.contains(&error) {
                self.js_errors.push(error);
            }
        }
        for error in other.console_errors {
            if !self.console_errors.contains(&error) {
                self.console_errors.push(error);
            }
        }
    }
}

fn discovery_script() -> String {
    let selectors = serde_json::to_string(INTERACTIVE_SELECTORS).unwrap_or_else(|_| "[]".into());
    format!(
        r#"(() => {{
    const SELECTORS = {selectors};
    const esc = (v) => (window.CSS && CSS.escape) ? CSS.escape(v) : String(v).replace(/([^a-zA-Z0-9_-])/g, '\\$1');

    function uniqueSelector(el) {{
        if (el.id) return '#' + esc(el.id);
        for (const attr of Array.from(el.attributes)) {{
            if (attr.name.startsWith('data-')) {{
                return '[' + attr.name + '="' + attr.value.replace(/"/g, '\\"') + '"]';
            }}
        }}
        const tag = el.tagName.toLowerCase();
        const classes = Array.from(el.classList).map((c) => '.' + esc(c)).join('');
        let index = 1;
        for (let sib = el.previousElementSibling; sib; sib = sib.previousElementSibling) {{
            if (sib.tagName === el.tagName) index++;
        }}
        return tag + classes + ':nth-of-type(' + index + ')';
    }}

    function isVisible(el, rect) {{
        if (!rect || rect.width <= 0 || rect.height <= 0) return false;
        const style = window.getComputedStyle(el);
        return style.display !== 'none' && style.visibility !== 'hidden' && parseFloat(style.opacity || '1') > 0;
    }}

    const seen = new Set();
    const found = [];
    for (const el of document.querySelectorAll(SELECTORS.join(','))) {{
        const rect = el.getBoundingClientRect();
        if (!isVisible(el, rect)) continue;
        const selector = uniqueSelector(el);
        if (seen.has(selector)) continue;
        seen.add(selector);
        found.push({{
            selector,
            tag: el.tagName.toLowerCase(),
            bounding_box: {{ x: rect.left, y: rect.top, width: rect.width, height: rect.height }},
            has_handler: typeof el.onclick === 'function' || el.hasAttribute('onclick') || el.hasAttribute('data-action'),
            inner_text: (el.innerText || el.value || '').trim().slice(0, 100),
            classes: Array.from(el.classList)
        }});
    }}
    return JSON.stringify(found);
}})()"#
    )
}

/// Find visible interactive elements, de-duplicated by generated selector
pub fn discover_elements(session: &BrowserSession, max_elements: usize) -> Result<Discovered> {
    let found: Vec<ElementInfo> = session.evaluate_json(&discovery_script())?;
    debug!("Discovered {} interactive elements", found.len());
    let discovered = Discovered::split(found, max_elements);
    if !discovered.skipped.is_empty() {
        warn!(
            "Element limit of {} reached; {} elements will be reported as not tested",
            max_elements,
            discovered.skipped.len()
        );
    }
    Ok(discovered)
}

/// Read and clear the errors recorded since the last call
///
/// Must run before anything navigates the tab away, which discards them.
pub fn drain_page_errors(session: &BrowserSession) -> Result<PageErrors> {
    session.evaluate_json(DRAIN_ERRORS_SCRIPT)
}
