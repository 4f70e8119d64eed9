//! Manual overlay drawing: direct primitives through `vello_cpu`.
//!
//! This is the fallback strategy when whole-layout rasterization is
//! unavailable. Shapes never need font data; text layers require font bytes
//! supplied by the host and are skipped with a warning when absent.

use crate::compose::FrameRgba;
use crate::compose::blend::over_blit;
use crate::compose::overlay::OverlayLayout;
use crate::compose::strategy::CompositionStrategy;
use crate::foundation::error::{ExportError, ExportResult};
use crate::scene::OverlayData;

/// Text color carried through Parley layouts as the brush.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct TextBrushRgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

const WHITE: TextBrushRgba8 = TextBrushRgba8 {
    r: 255,
    g: 255,
    b: 255,
    a: 255,
};
const INK: TextBrushRgba8 = TextBrushRgba8 {
    r: 26,
    g: 26,
    b: 26,
    a: 255,
};

/// Stateful helper for building Parley text layouts from raw font bytes.
struct TextLayoutEngine {
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<TextBrushRgba8>,
}

impl TextLayoutEngine {
    fn new() -> Self {
        Self {
            font_ctx: parley::FontContext::default(),
            layout_ctx: parley::LayoutContext::new(),
        }
    }

    /// Shape and lay out plain text using the provided font bytes.
    fn layout_plain(
        &mut self,
        text: &str,
        font_bytes: &[u8],
        size_px: f32,
        brush: TextBrushRgba8,
        max_width_px: Option<f32>,
    ) -> ExportResult<parley::Layout<TextBrushRgba8>> {
        if !size_px.is_finite() || size_px <= 0.0 {
            return Err(ExportError::validation(
                "text size_px must be finite and > 0",
            ));
        }

        let families = self
            .font_ctx
            .collection
            .register_fonts(parley::fontique::Blob::from(font_bytes.to_vec()), None);
        let family_id = families
            .first()
            .map(|(id, _)| *id)
            .ok_or_else(|| ExportError::draw("no font families registered from font bytes"))?;
        let family_name = self
            .font_ctx
            .collection
            .family_name(family_id)
            .ok_or_else(|| ExportError::draw("registered font family has no name"))?
            .to_string();

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(family_name)),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_px));
        builder.push_default(parley::style::StyleProperty::Brush(brush));

        let mut layout: parley::Layout<TextBrushRgba8> = builder.build(text);
        if let Some(w) = max_width_px {
            layout.break_all_lines(Some(w));
            layout.align(
                Some(w),
                parley::Alignment::Start,
                parley::AlignmentOptions::default(),
            );
        } else {
            layout.break_all_lines(None);
        }

        Ok(layout)
    }
}

/// Direct-drawing fallback strategy.
pub struct ManualStrategy {
    text_engine: TextLayoutEngine,
    font_bytes: Option<Vec<u8>>,
    font: Option<vello_cpu::peniko::FontData>,
}

impl ManualStrategy {
    /// Create the strategy. `font_bytes` enables text layers; shapes work
    /// without it.
    pub fn new(font_bytes: Option<Vec<u8>>) -> Self {
        let font = font_bytes.as_ref().map(|bytes| {
            vello_cpu::peniko::FontData::new(vello_cpu::peniko::Blob::from(bytes.clone()), 0)
        });
        Self {
            text_engine: TextLayoutEngine::new(),
            font_bytes,
            font,
        }
    }

    fn draw_text(
        &mut self,
        ctx: &mut vello_cpu::RenderContext,
        text: &str,
        size_px: f32,
        brush: TextBrushRgba8,
        max_width_px: Option<f32>,
        // Anchor: for right-aligned text this is the right edge.
        anchor_x: f64,
        anchor_y: f64,
        right_align: bool,
    ) -> ExportResult<()> {
        let (Some(bytes), Some(font)) = (self.font_bytes.as_ref(), self.font.as_ref()) else {
            return Err(ExportError::draw(
                "no font bytes configured for manual text drawing",
            ));
        };

        let layout = self
            .text_engine
            .layout_plain(text, bytes, size_px, brush, max_width_px)?;

        let x0 = if right_align {
            anchor_x - f64::from(layout.width())
        } else {
            anchor_x
        };
        ctx.set_transform(vello_cpu::kurbo::Affine::translate((x0, anchor_y)));

        for line in layout.lines() {
            for item in line.items() {
                let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                    continue;
                };
                let b = run.style().brush;
                ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(b.r, b.g, b.b, b.a));
                let glyphs = run.glyphs().map(|g| vello_cpu::Glyph {
                    id: g.id,
                    x: g.x,
                    y: g.y,
                });
                ctx.glyph_run(font)
                    .font_size(run.run().font_size())
                    .fill_glyphs(glyphs);
            }
        }
        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        Ok(())
    }
}

impl CompositionStrategy for ManualStrategy {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn draw_overlay(
        &mut self,
        frame: &mut FrameRgba,
        layout: &OverlayLayout,
        data: &OverlayData,
    ) -> ExportResult<()> {
        let w: u16 = frame
            .width
            .try_into()
            .map_err(|_| ExportError::validation("frame width exceeds u16"))?;
        let h: u16 = frame
            .height
            .try_into()
            .map_err(|_| ExportError::validation("frame height exceeds u16"))?;

        let mut ctx = vello_cpu::RenderContext::new(w, h);
        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);

        // Elevation bar background and traveled fill.
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(255, 255, 255, 90));
        ctx.fill_path(&rounded_rect_path(layout.bar, layout.bar.height() / 2.0));
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(255, 74, 45, 255));
        ctx.fill_path(&rounded_rect_path(
            layout.bar_fill,
            layout.bar_fill.height() / 2.0,
        ));

        // Position marker: outline ring under a white disc.
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(255, 74, 45, 255));
        ctx.fill_path(&circle_path(
            layout.marker_center,
            layout.marker_radius + 2.0,
        ));
        ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(255, 255, 255, 255));
        ctx.fill_path(&circle_path(layout.marker_center, layout.marker_radius));

        // Annotation callout box.
        if let Some(b) = layout.annotation_box {
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(255, 255, 255, 235));
            ctx.fill_path(&rounded_rect_path(b, 8.0));
        }

        // Text layers degrade independently of shapes.
        if !data.stats_text.is_empty() {
            let res = self.draw_text(
                &mut ctx,
                &data.stats_text,
                layout.stats_font_px as f32,
                WHITE,
                None,
                layout.stats_anchor.x,
                layout.padding,
                true,
            );
            if let Err(e) = res {
                tracing::warn!(error = %e, "skipping stats text layer");
            }
        }
        if let (Some(b), Some(ann)) = (layout.annotation_box, data.annotation.as_ref()) {
            let pad = layout.annotation_font_px;
            let text = format!("{}\n{}", ann.title, ann.description);
            let res = self.draw_text(
                &mut ctx,
                &text,
                layout.annotation_font_px as f32,
                INK,
                Some((b.width() - 2.0 * pad) as f32),
                b.x0 + pad,
                b.y0 + pad * 0.5,
                false,
            );
            if let Err(e) = res {
                tracing::warn!(error = %e, "skipping annotation text layer");
            }
        }

        ctx.flush();
        let mut pixmap = vello_cpu::Pixmap::new(w, h);
        ctx.render_to_pixmap(&mut pixmap);

        over_blit(
            &mut frame.data,
            frame.width,
            frame.height,
            pixmap.data_as_u8_slice(),
            frame.width,
            frame.height,
            0,
            0,
        );
        Ok(())
    }
}

fn circle_path(center: kurbo::Point, radius: f64) -> vello_cpu::kurbo::BezPath {
    use kurbo::Shape;
    let c = kurbo::Circle::new(center, radius.max(0.5));
    let mut p = vello_cpu::kurbo::BezPath::new();
    for el in c.path_elements(0.1) {
        p.push(convert_el(el));
    }
    p
}

fn rounded_rect_path(rect: kurbo::Rect, radius: f64) -> vello_cpu::kurbo::BezPath {
    use kurbo::Shape;
    let rr = kurbo::RoundedRect::from_rect(rect, radius.max(0.0));
    let mut p = vello_cpu::kurbo::BezPath::new();
    for el in rr.path_elements(0.1) {
        p.push(convert_el(el));
    }
    p
}

fn convert_el(el: kurbo::PathEl) -> vello_cpu::kurbo::PathEl {
    use kurbo::PathEl;

    let pt = |p: kurbo::Point| vello_cpu::kurbo::Point::new(p.x, p.y);
    match el {
        PathEl::MoveTo(p) => vello_cpu::kurbo::PathEl::MoveTo(pt(p)),
        PathEl::LineTo(p) => vello_cpu::kurbo::PathEl::LineTo(pt(p)),
        PathEl::QuadTo(p1, p2) => vello_cpu::kurbo::PathEl::QuadTo(pt(p1), pt(p2)),
        PathEl::CurveTo(p1, p2, p3) => vello_cpu::kurbo::PathEl::CurveTo(pt(p1), pt(p2), pt(p3)),
        PathEl::ClosePath => vello_cpu::kurbo::PathEl::ClosePath,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::OverlayData;

    fn overlay(progress: f64) -> OverlayData {
        OverlayData {
            stats_text: String::new(),
            progress_fraction: progress,
            annotation: None,
        }
    }

    #[test]
    fn shapes_draw_without_font_bytes() {
        let mut strategy = ManualStrategy::new(None);
        let data = overlay(0.5);
        let layout = OverlayLayout::compute(320, 180, &data);
        let mut frame = FrameRgba::black(320, 180);
        strategy.draw_overlay(&mut frame, &layout, &data).unwrap();

        // The marker disc must have produced non-black pixels near its center.
        let cx = layout.marker_center.x as usize;
        let cy = layout.marker_center.y as usize;
        let o = (cy * 320 + cx) * 4;
        assert_ne!(&frame.data[o..o + 3], &[0, 0, 0]);
    }

    #[test]
    fn marker_visible_at_progress_extremes() {
        for progress in [0.0, 0.5, 1.0] {
            let mut strategy = ManualStrategy::new(None);
            let data = overlay(progress);
            let layout = OverlayLayout::compute(320, 180, &data);
            let mut frame = FrameRgba::black(320, 180);
            strategy.draw_overlay(&mut frame, &layout, &data).unwrap();

            let cx = layout.marker_center.x as usize;
            let cy = layout.marker_center.y as usize;
            let o = (cy.min(179) * 320 + cx.min(319)) * 4;
            assert_ne!(
                &frame.data[o..o + 3],
                &[0, 0, 0],
                "marker invisible at progress {progress}"
            );
        }
    }

    #[test]
    fn text_layer_failure_does_not_fail_the_frame() {
        let mut strategy = ManualStrategy::new(None);
        let data = OverlayData {
            stats_text: "4.2 km".to_owned(),
            progress_fraction: 0.3,
            annotation: None,
        };
        let layout = OverlayLayout::compute(320, 180, &data);
        let mut frame = FrameRgba::black(320, 180);
        assert!(strategy.draw_overlay(&mut frame, &layout, &data).is_ok());
    }
}
