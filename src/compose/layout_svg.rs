//! Whole-layout overlay rasterization via SVG.
//!
//! The entire overlay block is laid out as one SVG document and rasterized in
//! a single pass. Text resolution depends on the system font database; when it
//! cannot resolve any face the strategy reports failure and the compositor
//! falls back to manual drawing.

use std::fmt::Write as _;

use crate::compose::FrameRgba;
use crate::compose::blend::over_blit;
use crate::compose::overlay::OverlayLayout;
use crate::compose::strategy::CompositionStrategy;
use crate::foundation::error::{ExportError, ExportResult};
use crate::scene::OverlayData;

/// Layout-to-raster strategy backed by `usvg`/`resvg`.
pub struct SvgLayoutStrategy {
    fontdb: std::sync::Arc<usvg::fontdb::Database>,
}

impl SvgLayoutStrategy {
    /// Create the strategy with a system-font database loaded once.
    pub fn new() -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        Self {
            fontdb: std::sync::Arc::new(db),
        }
    }

    fn has_fonts(&self) -> bool {
        self.fontdb.faces().next().is_some()
    }
}

impl Default for SvgLayoutStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositionStrategy for SvgLayoutStrategy {
    fn name(&self) -> &'static str {
        "svg-layout"
    }

    fn draw_overlay(
        &mut self,
        frame: &mut FrameRgba,
        layout: &OverlayLayout,
        data: &OverlayData,
    ) -> ExportResult<()> {
        let needs_text = !data.stats_text.is_empty() || data.annotation.is_some();
        if needs_text && !self.has_fonts() {
            return Err(ExportError::draw(
                "no font faces available for svg text layout",
            ));
        }

        let svg = build_overlay_svg(frame.width, frame.height, layout, data);
        let opts = usvg::Options {
            fontdb: self.fontdb.clone(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_data(svg.as_bytes(), &opts)
            .map_err(|e| ExportError::draw(format!("overlay svg did not parse: {e}")))?;

        let raster = rasterize_to_premul_rgba8(&tree, frame.width, frame.height)?;
        over_blit(
            &mut frame.data,
            frame.width,
            frame.height,
            &raster,
            frame.width,
            frame.height,
            0,
            0,
        );
        Ok(())
    }
}

/// Rasterize `tree` into premultiplied RGBA8 at the given size.
pub(crate) fn rasterize_to_premul_rgba8(
    tree: &usvg::Tree,
    width: u32,
    height: u32,
) -> ExportResult<Vec<u8>> {
    let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| ExportError::draw("failed to allocate svg pixmap"))?;

    let size = tree.size();
    let sx = (width as f32) / size.width().max(1.0);
    let sy = (height as f32) / size.height().max(1.0);
    let xform = resvg::tiny_skia::Transform::from_scale(sx, sy);

    resvg::render(tree, xform, &mut pixmap.as_mut());
    Ok(pixmap.data().to_vec())
}

fn build_overlay_svg(width: u32, height: u32, layout: &OverlayLayout, data: &OverlayData) -> String {
    let mut svg = String::with_capacity(2048);
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    );

    // Stats block, right-aligned, one tspan-free <text> per line.
    for (i, line) in data.stats_text.lines().enumerate() {
        let y = layout.stats_anchor.y + (i as f64) * layout.stats_font_px * 1.25;
        let _ = write!(
            svg,
            r##"<text x="{:.1}" y="{y:.1}" font-family="sans-serif" font-size="{:.1}" font-weight="600" fill="#ffffff" text-anchor="end">{}</text>"##,
            layout.stats_anchor.x,
            layout.stats_font_px,
            escape_xml(line),
        );
    }

    // Elevation bar, traveled fill, position marker.
    let bar = layout.bar;
    let _ = write!(
        svg,
        r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" rx="{:.1}" fill="#ffffff" fill-opacity="0.35"/>"##,
        bar.x0,
        bar.y0,
        bar.width(),
        bar.height(),
        bar.height() / 2.0,
    );
    let fill = layout.bar_fill;
    let _ = write!(
        svg,
        r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" rx="{:.1}" fill="#ff4a2d"/>"##,
        fill.x0,
        fill.y0,
        fill.width(),
        fill.height(),
        fill.height() / 2.0,
    );
    let _ = write!(
        svg,
        r##"<circle cx="{:.1}" cy="{:.1}" r="{:.1}" fill="#ffffff" stroke="#ff4a2d" stroke-width="2"/>"##,
        layout.marker_center.x, layout.marker_center.y, layout.marker_radius,
    );

    // Annotation callout.
    if let (Some(b), Some(ann)) = (layout.annotation_box, data.annotation.as_ref()) {
        let _ = write!(
            svg,
            r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" rx="8" fill="#ffffff" fill-opacity="0.92"/>"##,
            b.x0,
            b.y0,
            b.width(),
            b.height(),
        );
        let pad = layout.annotation_font_px;
        let _ = write!(
            svg,
            r##"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="{:.1}" font-weight="700" fill="#1a1a1a">{}</text>"##,
            b.x0 + pad,
            b.y0 + pad * 1.4,
            layout.annotation_font_px,
            escape_xml(&ann.title),
        );
        let _ = write!(
            svg,
            r##"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="{:.1}" fill="#444444">{}</text>"##,
            b.x0 + pad,
            b.y0 + pad * 2.8,
            layout.annotation_font_px * 0.85,
            escape_xml(&ann.description),
        );
    }

    svg.push_str("</svg>");
    svg
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Annotation;

    fn overlay(progress: f64, annotated: bool) -> OverlayData {
        OverlayData {
            stats_text: "3.2 km\n120 m ascent".to_owned(),
            progress_fraction: progress,
            annotation: annotated.then(|| Annotation {
                title: "Col <north>".to_owned(),
                description: "Steep & narrow".to_owned(),
            }),
        }
    }

    #[test]
    fn overlay_svg_contains_all_layers() {
        let data = overlay(0.5, true);
        let layout = OverlayLayout::compute(1280, 720, &data);
        let svg = build_overlay_svg(1280, 720, &layout, &data);
        assert!(svg.contains("text-anchor=\"end\""));
        assert!(svg.contains("circle"));
        assert!(svg.contains("fill-opacity=\"0.92\""), "annotation box");
        assert!(svg.contains("Col &lt;north&gt;"));
        assert!(svg.contains("Steep &amp; narrow"));
    }

    #[test]
    fn overlay_svg_omits_annotation_when_absent() {
        let data = overlay(0.1, false);
        let layout = OverlayLayout::compute(1280, 720, &data);
        let svg = build_overlay_svg(1280, 720, &layout, &data);
        assert!(!svg.contains("fill-opacity=\"0.92\""));
    }

    #[test]
    fn overlay_svg_parses_as_usvg_tree() {
        let data = overlay(0.8, true);
        let layout = OverlayLayout::compute(640, 360, &data);
        let svg = build_overlay_svg(640, 360, &layout, &data);
        let opts = usvg::Options::default();
        let tree = usvg::Tree::from_data(svg.as_bytes(), &opts).unwrap();
        assert!(tree.size().width() > 0.0);
    }

    #[test]
    fn escape_xml_covers_reserved_chars() {
        assert_eq!(escape_xml("a<b>&\"'"), "a&lt;b&gt;&amp;&quot;&apos;");
    }
}
