//! Screenshot capture using Chrome DevTools Protocol

use crate::browser::BrowserSession;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use std::path::{Path, PathBuf};
use tracing::debug;
use vfix_core::{Result, VfixError};

/// Capture the visible viewport as PNG bytes
pub fn capture_viewport(session: &BrowserSession) -> Result<Vec<u8>> {
    session
        .tab()
        .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        .map_err(|e| VfixError::Screenshot(format!("CDP capture failed: {}", e)))
}

/// Persist a diff visualisation as `<dir>/<index>-<scale>-<selector>.png`
pub fn write_diff_artifact(
    dir: &Path,
    index: usize,
    scale: &str,
    selector: &str,
    png: &[u8],
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(artifact_file_name(index, scale, selector));
    std::fs::write(&path, png)?;
    debug!("Diff artifact written: {} ({} bytes)", path.display(), png.len());
    Ok(path)
}

fn artifact_file_name(index: usize, scale: &str, selector: &str) -> String {
    let slug: String = selector
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(48)
        .collect();
    format!("{:03}-{}-{}.png", index, scale, slug.trim_matches('_'))
}
