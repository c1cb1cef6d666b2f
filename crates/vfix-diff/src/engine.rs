//! Pixel-level comparison of before/after screenshots at three nested scales
//!
//! A pixel counts as changed when the mean absolute difference over its RGB
//! channels exceeds the configured tolerance. Each scale reports
//! `changed / total` over its own crop window:
//!
//! - **tight**: element box plus `tight_padding`
//! - **local**: element box plus `local_padding`
//! - **global**: the whole frame
//!
//! Windows are clamped to the image, so an element partly off-screen yields a
//! smaller window and one fully off-screen yields an empty window (ratio 0).

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;
use vfix_core::{BoundingBox, DiffConfig, Result, VfixError};

/// One of the three comparison windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffScale {
    Tight,
    Local,
    Global,
}

impl std::fmt::Display for DiffScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tight => write!(f, "tight"),
            Self::Local => write!(f, "local"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Crop window in image pixels, already clamped to the image bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRegion {
    /// Clamp `bbox` grown by `padding` to a `width x height` image
    pub fn clamped(bbox: &BoundingBox, padding: u32, width: u32, height: u32) -> Self {
        let padded = bbox.expand(f64::from(padding));
        let clamp = |v: f64, max: u32| -> u32 { v.max(0.0).min(f64::from(max)) as u32 };

        let x0 = clamp(padded.x.floor(), width);
        let y0 = clamp(padded.y.floor(), height);
        let x1 = clamp((padded.x + padded.width).ceil(), width);
        let y1 = clamp((padded.y + padded.height).ceil(), height);

        Self {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Diff statistics for one scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDiff {
    pub scale: DiffScale,
    /// `diff_count / total_pixels`, 0 for an empty window
    pub diff_ratio: f64,
    pub diff_count: u64,
    pub total_pixels: u64,
    pub region: Option<PixelRegion>,
    /// PNG visualisation: changed pixels red, the rest dimmed
    #[serde(skip)]
    pub diff_image: Option<Vec<u8>>,
}

/// The three region diffs for one element interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub tight: RegionDiff,
    pub local: RegionDiff,
    pub global: RegionDiff,
    pub element_box: BoundingBox,
    pub has_significant_change: bool,
    /// First scale (tight, local, global) at or above the significance
    /// threshold; `Tight` when none is
    pub primary_change_location: DiffScale,
}

impl DiffResult {
    pub fn region(&self, scale: DiffScale) -> &RegionDiff {
        match scale {
            DiffScale::Tight => &self.tight,
            DiffScale::Local => &self.local,
            DiffScale::Global => &self.global,
        }
    }

    pub fn ratio(&self, scale: DiffScale) -> f64 {
        self.region(scale).diff_ratio
    }
}

/// Pixel diff engine
///
/// Stateless apart from its configuration; `compare` is a pure function of its
/// inputs.
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    config: DiffConfig,
}

impl DiffEngine {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Compare two encoded screenshots (PNG/JPEG) around `element_box`
    pub fn compare(
        &self,
        before: &[u8],
        after: &[u8],
        element_box: &BoundingBox,
        generate_diff_images: bool,
    ) -> Result<DiffResult> {
        let before = decode(before, "before")?;
        let after = decode(after, "after")?;
        self.compare_images(&before, &after, element_box, generate_diff_images)
    }

    /// Compare two decoded frames around `element_box`
    pub fn compare_images(
        &self,
        before: &RgbaImage,
        after: &RgbaImage,
        element_box: &BoundingBox,
        generate_diff_images: bool,
    ) -> Result<DiffResult> {
        let (before, after) = normalize_sizes(before, after);
        let (width, height) = before.dimensions();
        let mask = self.changed_mask(&before, &after);

        let scales = [
            (
                DiffScale::Tight,
                PixelRegion::clamped(element_box, self.config.tight_padding, width, height),
            ),
            (
                DiffScale::Local,
                PixelRegion::clamped(element_box, self.config.local_padding, width, height),
            ),
            (DiffScale::Global, PixelRegion::full(width, height)),
        ];

        let mut diffs = Vec::with_capacity(3);
        for (scale, region) in scales {
            let diff_count = count_changed(&mask, width, &region);
            let total_pixels = region.area();
            let diff_ratio = if total_pixels == 0 {
                0.0
            } else {
                diff_count as f64 / total_pixels as f64
            };
            let diff_image = if generate_diff_images && total_pixels > 0 {
                Some(render_diff_image(&after, &mask, width, &region)?)
            } else {
                None
            };
            diffs.push(RegionDiff {
                scale,
                diff_ratio,
                diff_count,
                total_pixels,
                region: Some(region),
                diff_image,
            });
        }

        let mut diffs = diffs.into_iter();
        let (Some(tight), Some(local), Some(global)) = (diffs.next(), diffs.next(), diffs.next())
        else {
            return Err(VfixError::Other("diff scales incomplete".to_string()));
        };

        let threshold = self.config.significance_threshold;
        let primary_change_location = [&tight, &local, &global]
            .into_iter()
            .find(|d| d.diff_ratio >= threshold)
            .map(|d| d.scale)
            .unwrap_or(DiffScale::Tight);
        let has_significant_change = [&tight, &local, &global]
            .iter()
            .any(|d| d.diff_ratio >= threshold);

        debug!(
            tight = tight.diff_ratio,
            local = local.diff_ratio,
            global = global.diff_ratio,
            significant = has_significant_change,
            "Compared screenshots"
        );

        Ok(DiffResult {
            tight,
            local,
            global,
            element_box: *element_box,
            has_significant_change,
            primary_change_location,
        })
    }

    /// Global-only diff ratio for call sites that need no localisation
    pub fn compare_quick(&self, before: &[u8], after: &[u8]) -> Result<f64> {
        let before = decode(before, "before")?;
        let after = decode(after, "after")?;
        let (before, after) = normalize_sizes(&before, &after);
        let (width, height) = before.dimensions();
        let mask = self.changed_mask(&before, &after);
        let region = PixelRegion::full(width, height);
        let total = region.area();
        if total == 0 {
            return Ok(0.0);
        }
        Ok(count_changed(&mask, width, &region) as f64 / total as f64)
    }

    /// Per-pixel changed flags, row-major
    fn changed_mask(&self, before: &RgbaImage, after: &RgbaImage) -> Vec<bool> {
        // mean(|dr|, |dg|, |db|) > tolerance  <=>  sum > 3 * tolerance
        let limit = u16::from(self.config.tolerance) * 3;
        before
            .pixels()
            .zip(after.pixels())
            .map(|(a, b)| {
                let sum: u16 = (0..3)
                    .map(|c| u16::from(a.0[c].abs_diff(b.0[c])))
                    .sum();
                sum > limit
            })
            .collect()
    }
}

fn decode(bytes: &[u8], label: &str) -> Result<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| VfixError::ImageDecode(format!("{} screenshot: {}", label, e)))
}

/// Bring both frames to the common minimum size; never upscales
fn normalize_sizes(before: &RgbaImage, after: &RgbaImage) -> (RgbaImage, RgbaImage) {
    if before.dimensions() == after.dimensions() {
        return (before.clone(), after.clone());
    }

    let width = before.width().min(after.width());
    let height = before.height().min(after.height());
    debug!(
        "Resizing screenshots {:?} / {:?} to {}x{}",
        before.dimensions(),
        after.dimensions(),
        width,
        height
    );

    let fit = |img: &RgbaImage| {
        if img.dimensions() == (width, height) {
            img.clone()
        } else {
            imageops::resize(img, width, height, FilterType::Triangle)
        }
    };
    (fit(before), fit(after))
}

fn count_changed(mask: &[bool], width: u32, region: &PixelRegion) -> u64 {
    let mut count = 0u64;
    for y in region.y..region.y + region.height {
        let row = (y * width) as usize;
        let start = row + region.x as usize;
        let end = start + region.width as usize;
        count += mask[start..end].iter().filter(|changed| **changed).count() as u64;
    }
    count
}

fn render_diff_image(
    after: &RgbaImage,
    mask: &[bool],
    width: u32,
    region: &PixelRegion,
) -> Result<Vec<u8>> {
    let mut out = RgbaImage::new(region.width, region.height);
    for dy in 0..region.height {
        for dx in 0..region.width {
            let (x, y) = (region.x + dx, region.y + dy);
            let pixel = if mask[(y * width + x) as usize] {
                Rgba([255, 0, 0, 255])
            } else {
                let p = after.get_pixel(x, y).0;
                Rgba([p[0] / 3, p[1] / 3, p[2] / 3, 255])
            };
            out.put_pixel(dx, dy, pixel);
        }
    }

    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(out)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| VfixError::Other(format!("Failed to encode diff image: {}", e)))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(color))
    }

    fn paint(img: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: [u8; 4]) {
        for yy in y..y + h {
            for xx in x..x + w {
                img.put_pixel(xx, yy, Rgba(color));
            }
        }
    }

    fn png(img: &RgbaImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img.clone())
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_identical_images_have_no_change() {
        let engine = DiffEngine::default();
        let img = solid(400, 300, [240, 240, 240, 255]);
        let bbox = BoundingBox::new(100.0, 100.0, 80.0, 30.0);

        let result = engine.compare(&png(&img), &png(&img), &bbox, false).unwrap();
        assert_eq!(result.tight.diff_ratio, 0.0);
        assert_eq!(result.local.diff_ratio, 0.0);
        assert_eq!(result.global.diff_ratio, 0.0);
        assert!(!result.has_significant_change);
        assert_eq!(result.primary_change_location, DiffScale::Tight);
    }

    #[test]
    fn test_change_at_element_is_tight() {
        let engine = DiffEngine::default();
        let before = solid(400, 300, [255, 255, 255, 255]);
        let mut after = before.clone();
        // button darkens on click
        paint(&mut after, 100, 100, 80, 30, [30, 30, 200, 255]);
        let bbox = BoundingBox::new(100.0, 100.0, 80.0, 30.0);

        let result = engine.compare_images(&before, &after, &bbox, false).unwrap();
        assert_eq!(result.tight.region, Some(PixelRegion { x: 80, y: 80, width: 120, height: 70 }));
        assert_eq!(result.tight.diff_count, 80 * 30);
        assert!((result.tight.diff_ratio - 2400.0 / 8400.0).abs() < 1e-9);
        assert!(result.local.diff_ratio < result.tight.diff_ratio);
        assert!(result.has_significant_change);
        assert_eq!(result.primary_change_location, DiffScale::Tight);
    }

    #[test]
    fn test_change_elsewhere_is_global() {
        let engine = DiffEngine::default();
        let before = solid(1000, 800, [255, 255, 255, 255]);
        let mut after = before.clone();
        paint(&mut after, 700, 600, 200, 150, [0, 0, 0, 255]);
        let bbox = BoundingBox::new(10.0, 10.0, 50.0, 20.0);

        let result = engine.compare_images(&before, &after, &bbox, false).unwrap();
        assert_eq!(result.tight.diff_ratio, 0.0);
        assert_eq!(result.local.diff_ratio, 0.0);
        assert!(result.global.diff_ratio >= 0.02);
        assert_eq!(result.primary_change_location, DiffScale::Global);
    }

    #[test]
    fn test_small_differences_within_tolerance() {
        let engine = DiffEngine::default();
        let before = solid(50, 50, [100, 100, 100, 255]);
        // mean diff 20 is not above the default tolerance
        let after = solid(50, 50, [120, 120, 120, 255]);
        let ratio = engine.compare_quick(&png(&before), &png(&after)).unwrap();
        assert_eq!(ratio, 0.0);

        let after = solid(50, 50, [121, 121, 121, 255]);
        let ratio = engine.compare_quick(&png(&before), &png(&after)).unwrap();
        assert_eq!(ratio, 1.0);
    }

    #[test]
    fn test_mismatched_sizes_shrink_to_minimum() {
        let engine = DiffEngine::default();
        let before = solid(200, 100, [255, 255, 255, 255]);
        let after = solid(160, 120, [255, 255, 255, 255]);
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);

        let result = engine.compare_images(&before, &after, &bbox, false).unwrap();
        assert_eq!(result.global.total_pixels, 160 * 100);
        assert_eq!(result.global.diff_ratio, 0.0);
    }

    #[test]
    fn test_offscreen_element_yields_empty_tight_region() {
        let engine = DiffEngine::default();
        let img = solid(100, 100, [0, 0, 0, 255]);
        let bbox = BoundingBox::new(500.0, 500.0, 20.0, 20.0);

        let result = engine.compare_images(&img, &img, &bbox, true).unwrap();
        assert_eq!(result.tight.total_pixels, 0);
        assert_eq!(result.tight.diff_ratio, 0.0);
        assert!(result.tight.diff_image.is_none());
        assert!(result.global.diff_image.is_some());
    }

    #[test]
    fn test_diff_image_highlights_changes() {
        let engine = DiffEngine::default();
        let before = solid(60, 60, [255, 255, 255, 255]);
        let mut after = before.clone();
        paint(&mut after, 0, 0, 10, 10, [0, 0, 0, 255]);
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);

        let result = engine.compare_images(&before, &after, &bbox, true).unwrap();
        let bytes = result.global.diff_image.expect("global diff image");
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (60, 60));
        assert_eq!(decoded.get_pixel(5, 5).0, [255, 0, 0, 255]);
        assert_eq!(decoded.get_pixel(50, 50).0, [85, 85, 85, 255]);
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let engine = DiffEngine::default();
        let err = engine.compare_quick(b"not an image", b"also not").unwrap_err();
        assert!(matches!(err, VfixError::ImageDecode(_)));
    }
}
