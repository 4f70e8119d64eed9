//! Overlay geometry shared by both composition strategies.
//!
//! Both strategies draw the same boxes; computing the layout once keeps their
//! output aligned and gives the marker-visibility clamp a single home.

use kurbo::{Point, Rect};

use crate::scene::OverlayData;

/// Resolved pixel geometry for one overlay pass.
#[derive(Clone, Debug)]
pub struct OverlayLayout {
    /// Uniform edge padding.
    pub padding: f64,
    /// Font size for the stats block.
    pub stats_font_px: f64,
    /// Right-aligned stats text anchor (right edge x, first baseline y).
    pub stats_anchor: Point,
    /// Elevation bar background.
    pub bar: Rect,
    /// Filled (traveled) portion of the bar; width clamped to stay visible.
    pub bar_fill: Rect,
    /// Circular position marker center.
    pub marker_center: Point,
    /// Marker radius.
    pub marker_radius: f64,
    /// Logo watermark slot, top-left.
    pub watermark: Rect,
    /// Annotation callout box, present only when an annotation is active.
    pub annotation_box: Option<Rect>,
    /// Font size for annotation text.
    pub annotation_font_px: f64,
}

impl OverlayLayout {
    /// Compute the layout for a `width`x`height` frame.
    pub fn compute(width: u32, height: u32, data: &OverlayData) -> Self {
        let w = f64::from(width);
        let h = f64::from(height);
        let padding = (h * 0.03).clamp(12.0, 40.0);
        let stats_font_px = (h * 0.032).clamp(14.0, 40.0);

        let bar_h = (h * 0.012).clamp(4.0, 12.0);
        let bar = Rect::new(padding, h - padding - bar_h, w - padding, h - padding);

        let progress = data.progress_fraction.clamp(0.0, 1.0);
        // Even at progress 0 the fill must stay visible.
        let fill_w = (progress * bar.width()).max(2.0);
        let bar_fill = Rect::new(bar.x0, bar.y0, bar.x0 + fill_w, bar.y1);

        let marker_radius = (bar_h * 1.2).clamp(5.0, 14.0);
        // The marker rides the fill edge but never leaves the canvas.
        let cx = (bar.x0 + progress * bar.width()).clamp(marker_radius, w - marker_radius);
        let marker_center = Point::new(cx, bar.center().y);

        let wm_h = (h * 0.06).clamp(24.0, 64.0);
        let watermark = Rect::new(padding, padding, padding + wm_h * 2.6, padding + wm_h);

        let annotation_font_px = (stats_font_px * 0.8).max(12.0);
        let annotation_box = data.annotation.as_ref().map(|_| {
            let max_w = (w * 0.55).min(480.0);
            let box_h = (annotation_font_px * 4.2).min(h * 0.25);
            let x0 = (w - max_w) / 2.0;
            let y1 = bar.y0 - padding;
            Rect::new(x0, y1 - box_h, x0 + max_w, y1)
        });

        Self {
            padding,
            stats_font_px,
            stats_anchor: Point::new(w - padding, padding + stats_font_px),
            bar,
            bar_fill,
            marker_center,
            marker_radius,
            watermark,
            annotation_box,
            annotation_font_px,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Annotation;

    fn data(progress: f64) -> OverlayData {
        OverlayData {
            stats_text: "1.0 km".to_owned(),
            progress_fraction: progress,
            annotation: None,
        }
    }

    #[test]
    fn marker_never_degenerates_at_progress_extremes() {
        for progress in [0.0, 0.5, 1.0] {
            let layout = OverlayLayout::compute(1280, 720, &data(progress));
            assert!(layout.bar_fill.width() >= 2.0, "progress {progress}");
            assert!(layout.marker_radius > 0.0);
            let cx = layout.marker_center.x;
            assert!(
                cx - layout.marker_radius >= 0.0 && cx + layout.marker_radius <= 1280.0,
                "marker off-canvas at progress {progress}: cx={cx}"
            );
        }
    }

    #[test]
    fn out_of_range_progress_is_clamped() {
        let layout = OverlayLayout::compute(1280, 720, &data(1.7));
        assert!(layout.bar_fill.x1 <= layout.bar.x1 + 1e-9);
        let layout = OverlayLayout::compute(1280, 720, &data(-0.3));
        assert!(layout.bar_fill.width() >= 2.0);
    }

    #[test]
    fn annotation_box_is_bounded_and_above_bar() {
        let mut d = data(0.5);
        d.annotation = Some(Annotation {
            title: "t".to_owned(),
            description: "d".to_owned(),
        });
        let layout = OverlayLayout::compute(1920, 1080, &d);
        let b = layout.annotation_box.unwrap();
        assert!(b.width() <= 480.0 + 1e-9);
        assert!(b.y1 <= layout.bar.y0);
        assert!(b.height() <= 1080.0 * 0.25 + 1e-9);
    }

    #[test]
    fn layout_scales_with_frame_size() {
        let small = OverlayLayout::compute(320, 180, &data(0.5));
        let large = OverlayLayout::compute(2560, 1440, &data(0.5));
        assert!(large.stats_font_px > small.stats_font_px);
        assert!(large.padding >= small.padding);
    }
}
