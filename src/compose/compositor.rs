//! The frame compositor: base scene + overlay strategies + watermark.

use std::collections::HashMap;

use crate::compose::blend::over_blit;
use crate::compose::layout_svg::{SvgLayoutStrategy, rasterize_to_premul_rgba8};
use crate::compose::manual::ManualStrategy;
use crate::compose::overlay::OverlayLayout;
use crate::compose::strategy::CompositionStrategy;
use crate::compose::FrameRgba;
use crate::foundation::core::RecordingDimensions;
use crate::foundation::error::{ExportError, ExportResult};
use crate::scene::{OverlayData, SceneSnapshot};

/// Built-in logo mark used when the host does not supply one.
const DEFAULT_LOGO_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="130" height="50" viewBox="0 0 130 50"><path d="M6 40 L26 14 L40 30 L52 20 L66 40 Z" fill="#ffffff" fill-opacity="0.9"/><circle cx="26" cy="14" r="4" fill="#ff4a2d"/><rect x="74" y="18" width="50" height="6" rx="3" fill="#ffffff" fill-opacity="0.7"/><rect x="74" y="30" width="34" height="6" rx="3" fill="#ffffff" fill-opacity="0.5"/></svg>"##;

/// Compositor construction options.
pub struct CompositorOptions {
    /// SVG markup of the logo watermark. `None` uses the built-in mark.
    pub logo_svg: Option<String>,
    /// Font bytes for the manual strategy's text layers.
    pub font_bytes: Option<Vec<u8>>,
    /// Whether the whole-layout strategy is attempted before the manual one.
    pub prefer_layout_strategy: bool,
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            logo_svg: None,
            font_bytes: None,
            prefer_layout_strategy: true,
        }
    }
}

/// Layers one frame: black clear, base scene letterboxed, overlay via the
/// first working strategy, watermark always last.
///
/// `composite` never fails on drawing problems; a broken overlay layer is
/// skipped with a warning and the frame ships without it. Only
/// dimension/contract violations return `Err`.
pub struct FrameCompositor {
    width: u32,
    height: u32,
    strategies: Vec<Box<dyn CompositionStrategy>>,
    logo_svg: String,
    // Keyed by rendered size; `None` records a failed rasterization so the
    // warning is logged once, not per frame.
    watermark_cache: HashMap<(u32, u32), Option<Vec<u8>>>,
}

impl FrameCompositor {
    /// Build a compositor for the session's recording dimensions.
    pub fn new(dims: &RecordingDimensions, opts: CompositorOptions) -> Self {
        let mut strategies: Vec<Box<dyn CompositionStrategy>> = Vec::new();
        if opts.prefer_layout_strategy {
            strategies.push(Box::new(SvgLayoutStrategy::new()));
        }
        strategies.push(Box::new(ManualStrategy::new(opts.font_bytes)));

        Self {
            width: dims.width,
            height: dims.height,
            strategies,
            logo_svg: opts.logo_svg.unwrap_or_else(|| DEFAULT_LOGO_SVG.to_owned()),
            watermark_cache: HashMap::new(),
        }
    }

    /// Target width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Target height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Composite one frame at the output resolution.
    pub fn composite(
        &mut self,
        snapshot: &SceneSnapshot,
        overlay: &OverlayData,
    ) -> ExportResult<FrameRgba> {
        self.compose_at(self.width, self.height, snapshot, overlay)
    }

    /// High-quality variant: render at `quality_multiplier` times the output
    /// resolution, then downscale. Used by the two-phase pipeline's capture
    /// phase.
    pub fn composite_oversampled(
        &mut self,
        snapshot: &SceneSnapshot,
        overlay: &OverlayData,
        quality_multiplier: u32,
    ) -> ExportResult<FrameRgba> {
        let q = quality_multiplier.clamp(1, 4);
        if q == 1 {
            return self.composite(snapshot, overlay);
        }

        let big = self.compose_at(self.width * q, self.height * q, snapshot, overlay)?;
        let img = image::RgbaImage::from_raw(big.width, big.height, big.data)
            .ok_or_else(|| ExportError::validation("oversampled frame byte length mismatch"))?;
        let down = image::imageops::resize(
            &img,
            self.width,
            self.height,
            image::imageops::FilterType::CatmullRom,
        );
        Ok(FrameRgba {
            width: self.width,
            height: self.height,
            data: down.into_raw(),
        })
    }

    fn compose_at(
        &mut self,
        width: u32,
        height: u32,
        snapshot: &SceneSnapshot,
        overlay: &OverlayData,
    ) -> ExportResult<FrameRgba> {
        if width == 0 || height == 0 {
            return Err(ExportError::validation(
                "compositor target dimensions must be non-zero",
            ));
        }
        if snapshot.rgba8_premul.len()
            != (snapshot.width as usize) * (snapshot.height as usize) * 4
        {
            return Err(ExportError::validation(
                "scene snapshot byte length mismatch",
            ));
        }

        let mut frame = FrameRgba::black(width, height);
        draw_base_letterboxed(&mut frame, snapshot)?;

        let layout = OverlayLayout::compute(width, height, overlay);
        let mut drawn = false;
        for strategy in &mut self.strategies {
            match strategy.draw_overlay(&mut frame, &layout, overlay) {
                Ok(()) => {
                    drawn = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %e,
                        "overlay strategy failed, trying next"
                    );
                }
            }
        }
        if !drawn {
            tracing::warn!("all overlay strategies failed; exporting base scene only");
        }

        // Watermark last, even when the layout strategy handled the rest: that
        // strategy cannot reliably rasterize dynamically loaded vector assets.
        self.draw_watermark(&mut frame, &layout);

        Ok(frame)
    }

    fn draw_watermark(&mut self, frame: &mut FrameRgba, layout: &OverlayLayout) {
        let wm_w = layout.watermark.width().round().max(1.0) as u32;
        let wm_h = layout.watermark.height().round().max(1.0) as u32;

        let logo_svg = &self.logo_svg;
        let entry = self
            .watermark_cache
            .entry((wm_w, wm_h))
            .or_insert_with(|| match rasterize_logo(logo_svg, wm_w, wm_h) {
                Ok(raster) => Some(raster),
                Err(e) => {
                    tracing::warn!(error = %e, "logo watermark rasterization failed; skipping");
                    None
                }
            });

        if let Some(raster) = entry {
            over_blit(
                &mut frame.data,
                frame.width,
                frame.height,
                raster,
                wm_w,
                wm_h,
                layout.watermark.x0 as i64,
                layout.watermark.y0 as i64,
            );
        }
    }
}

fn rasterize_logo(svg: &str, width: u32, height: u32) -> ExportResult<Vec<u8>> {
    let opts = usvg::Options::default();
    let tree = usvg::Tree::from_data(svg.as_bytes(), &opts)
        .map_err(|e| ExportError::draw(format!("logo svg did not parse: {e}")))?;
    rasterize_to_premul_rgba8(&tree, width, height)
}

/// Draw the base scene contain-fit into `frame`, centered over the black
/// letterbox.
///
/// During a real export the viewport has already been resized to the target
/// aspect ratio, so this is usually a 1:1 copy; the letterbox path covers
/// snapshots whose ratio still differs.
fn draw_base_letterboxed(frame: &mut FrameRgba, snapshot: &SceneSnapshot) -> ExportResult<()> {
    if snapshot.width == 0 || snapshot.height == 0 {
        return Err(ExportError::validation("scene snapshot is empty"));
    }

    if snapshot.width == frame.width && snapshot.height == frame.height {
        frame.data.copy_from_slice(&snapshot.rgba8_premul);
        return Ok(());
    }

    let scale = (f64::from(frame.width) / f64::from(snapshot.width))
        .min(f64::from(frame.height) / f64::from(snapshot.height));
    let dw = ((f64::from(snapshot.width) * scale).round() as u32).max(1);
    let dh = ((f64::from(snapshot.height) * scale).round() as u32).max(1);

    let img =
        image::RgbaImage::from_raw(snapshot.width, snapshot.height, snapshot.rgba8_premul.clone())
            .ok_or_else(|| ExportError::validation("scene snapshot byte length mismatch"))?;
    let resized = image::imageops::resize(&img, dw, dh, image::imageops::FilterType::Triangle);

    let ox = ((frame.width - dw) / 2) as usize;
    let oy = ((frame.height - dh) / 2) as usize;
    let src = resized.as_raw();
    let fw = frame.width as usize;
    for row in 0..dh as usize {
        let so = row * (dw as usize) * 4;
        let d_o = ((oy + row) * fw + ox) * 4;
        frame.data[d_o..d_o + (dw as usize) * 4]
            .copy_from_slice(&src[so..so + (dw as usize) * 4]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::{AspectRatio, DeviceTier, RecordingDimensions, Viewport};

    fn dims(w: u32, h: u32) -> RecordingDimensions {
        RecordingDimensions::derive(
            Viewport {
                width: w,
                height: h,
            },
            AspectRatio::Wide,
            1.0,
            DeviceTier::Mid,
        )
        .unwrap()
    }

    fn snapshot(w: u32, h: u32, rgb: [u8; 3]) -> SceneSnapshot {
        let mut data = vec![0u8; (w as usize) * (h as usize) * 4];
        for px in data.chunks_exact_mut(4) {
            px[0] = rgb[0];
            px[1] = rgb[1];
            px[2] = rgb[2];
            px[3] = 255;
        }
        SceneSnapshot {
            width: w,
            height: h,
            rgba8_premul: data,
        }
    }

    fn overlay() -> OverlayData {
        OverlayData {
            stats_text: String::new(),
            progress_fraction: 0.4,
            annotation: None,
        }
    }

    #[test]
    fn matching_snapshot_fills_the_frame() {
        let d = dims(640, 360);
        let mut comp = FrameCompositor::new(
            &d,
            CompositorOptions {
                prefer_layout_strategy: false,
                ..Default::default()
            },
        );
        let snap = snapshot(d.width, d.height, [10, 20, 30]);
        let frame = comp.composite(&snap, &overlay()).unwrap();
        assert_eq!(frame.width, d.width);
        assert_eq!(frame.height, d.height);
        // A pixel away from any overlay element keeps the base color.
        let o = ((d.height as usize / 3) * d.width as usize + d.width as usize / 2) * 4;
        assert_eq!(&frame.data[o..o + 3], &[10, 20, 30]);
    }

    #[test]
    fn mismatched_snapshot_is_letterboxed_on_black() {
        let d = dims(640, 360);
        let mut comp = FrameCompositor::new(
            &d,
            CompositorOptions {
                prefer_layout_strategy: false,
                ..Default::default()
            },
        );
        // A square snapshot inside a 16:9 frame leaves black pillars.
        let snap = snapshot(300, 300, [200, 200, 200]);
        let frame = comp.composite(&snap, &overlay()).unwrap();
        let o = ((d.height as usize / 2) * d.width as usize) * 4;
        assert_eq!(&frame.data[o..o + 4], &[0, 0, 0, 255], "left pillar black");
    }

    #[test]
    fn oversampled_output_keeps_target_dimensions() {
        let d = dims(640, 360);
        let mut comp = FrameCompositor::new(
            &d,
            CompositorOptions {
                prefer_layout_strategy: false,
                ..Default::default()
            },
        );
        let snap = snapshot(d.width, d.height, [50, 60, 70]);
        let frame = comp
            .composite_oversampled(&snap, &overlay(), 2)
            .unwrap();
        assert_eq!((frame.width, frame.height), (d.width, d.height));
    }

    #[test]
    fn bogus_snapshot_len_is_a_validation_error() {
        let d = dims(640, 360);
        let mut comp = FrameCompositor::new(&d, CompositorOptions::default());
        let snap = SceneSnapshot {
            width: 10,
            height: 10,
            rgba8_premul: vec![0u8; 7],
        };
        assert!(comp.composite(&snap, &overlay()).is_err());
    }
}
