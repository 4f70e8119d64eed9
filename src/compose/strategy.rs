use crate::compose::FrameRgba;
use crate::compose::overlay::OverlayLayout;
use crate::foundation::error::ExportResult;
use crate::scene::OverlayData;

/// One way of drawing the overlay block onto a frame.
///
/// The compositor tries strategies in order and falls back on the first
/// failure; a strategy that succeeds partially should skip the failing layer
/// itself and still return `Ok`. The logo watermark is never drawn by a
/// strategy: the whole-layout path cannot reliably rasterize dynamically
/// loaded vector assets, so the compositor re-draws it last in every case.
pub trait CompositionStrategy {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Draw stats text, elevation bar with marker, and the active annotation
    /// over `frame`.
    fn draw_overlay(
        &mut self,
        frame: &mut FrameRgba,
        layout: &OverlayLayout,
        data: &OverlayData,
    ) -> ExportResult<()>;
}
