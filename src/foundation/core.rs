use crate::foundation::error::{ExportError, ExportResult};
use crate::foundation::math::even_floor;

/// Absolute 0-based frame index in output-timeline space.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

/// The fixed output frame rate of every export.
pub const OUTPUT_FPS: Fps = Fps { num: 30, den: 1 };

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> ExportResult<Self> {
        if den == 0 {
            return Err(ExportError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(ExportError::validation("Fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in milliseconds.
    pub fn frame_interval_ms(self) -> f64 {
        1000.0 * f64::from(self.den) / f64::from(self.num)
    }
}

/// Available on-screen viewport, in physical pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Viewport {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// The three supported target aspect ratios.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatio {
    /// 16:9 landscape.
    Wide,
    /// 1:1 square.
    Square,
    /// 9:16 portrait.
    Tall,
}

impl AspectRatio {
    /// Width over height.
    pub fn ratio(self) -> f64 {
        match self {
            AspectRatio::Wide => 16.0 / 9.0,
            AspectRatio::Square => 1.0,
            AspectRatio::Tall => 9.0 / 16.0,
        }
    }

    /// Human-readable label, e.g. `16:9`.
    pub fn label(self) -> &'static str {
        match self {
            AspectRatio::Wide => "16:9",
            AspectRatio::Square => "1:1",
            AspectRatio::Tall => "9:16",
        }
    }
}

/// Rough device capability band used to bound output resolution and bitrate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceTier {
    /// Area capped at 720p.
    Low,
    /// Area capped at 1080p.
    Mid,
    /// Area capped at 1440p.
    High,
}

impl DeviceTier {
    /// Heuristic tier from available CPU parallelism.
    pub fn detect() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if cores < 4 {
            DeviceTier::Low
        } else if cores < 8 {
            DeviceTier::Mid
        } else {
            DeviceTier::High
        }
    }

    fn max_area(self) -> u64 {
        match self {
            DeviceTier::Low => 1280 * 720,
            DeviceTier::Mid => 1920 * 1080,
            DeviceTier::High => 2560 * 1440,
        }
    }

    fn bits_per_pixel(self) -> f64 {
        match self {
            DeviceTier::Low => 0.08,
            DeviceTier::Mid => 0.10,
            DeviceTier::High => 0.12,
        }
    }
}

/// Output recording geometry, derived once per session.
///
/// `width` and `height` are always even (yuv420p encoders require it) and their
/// area never exceeds the device tier's cap.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecordingDimensions {
    /// Output width in pixels (even).
    pub width: u32,
    /// Output height in pixels (even).
    pub height: u32,
    /// Device pixel density of the capture surface.
    pub pixel_density: f64,
    /// Target video bitrate in bits per second.
    pub bitrate: u64,
    /// Output frame rate, fixed at 30.
    pub fps: Fps,
}

impl RecordingDimensions {
    /// Derive output dimensions for `ratio` from the available viewport.
    ///
    /// The largest rectangle of the requested ratio that fits the viewport is
    /// taken, then clamped to the tier's area cap and rounded down to even.
    pub fn derive(
        viewport: Viewport,
        ratio: AspectRatio,
        pixel_density: f64,
        tier: DeviceTier,
    ) -> ExportResult<Self> {
        if viewport.width < 100 || viewport.height < 100 {
            return Err(ExportError::validation(format!(
                "viewport {}x{} is too small to record (min 100x100)",
                viewport.width, viewport.height
            )));
        }
        if !pixel_density.is_finite() || pixel_density <= 0.0 {
            return Err(ExportError::validation(
                "pixel_density must be finite and > 0",
            ));
        }

        let r = ratio.ratio();
        let vw = f64::from(viewport.width);
        let vh = f64::from(viewport.height);

        let mut w = vw.min(vh * r);
        let mut h = w / r;

        let cap = tier.max_area() as f64;
        let area = w * h;
        if area > cap {
            let scale = (cap / area).sqrt();
            w *= scale;
            h *= scale;
        }

        let width = even_floor(w.floor() as u32);
        let height = even_floor(h.floor() as u32);

        let bitrate =
            (f64::from(width) * f64::from(height) * OUTPUT_FPS.as_f64() * tier.bits_per_pixel())
                .round() as u64;

        Ok(Self {
            width,
            height,
            pixel_density,
            bitrate,
            fps: OUTPUT_FPS,
        })
    }

    /// Pixel area of one frame.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_ratio_clamps_to_smaller_viewport_dimension() {
        let dims = RecordingDimensions::derive(
            Viewport {
                width: 1200,
                height: 900,
            },
            AspectRatio::Square,
            1.0,
            DeviceTier::High,
        )
        .unwrap();
        assert_eq!((dims.width, dims.height), (900, 900));
    }

    #[test]
    fn dimensions_are_even_and_ratio_holds_within_1_percent() {
        let viewports = [
            (100u32, 100u32),
            (101, 101),
            (1200, 900),
            (1366, 768),
            (3840, 2160),
            (799, 1333),
        ];
        for ratio in [AspectRatio::Wide, AspectRatio::Square, AspectRatio::Tall] {
            for (vw, vh) in viewports {
                let dims = RecordingDimensions::derive(
                    Viewport {
                        width: vw,
                        height: vh,
                    },
                    ratio,
                    1.0,
                    DeviceTier::Mid,
                )
                .unwrap();
                assert_eq!(dims.width % 2, 0, "{ratio:?} {vw}x{vh}");
                assert_eq!(dims.height % 2, 0, "{ratio:?} {vw}x{vh}");
                let got = f64::from(dims.width) / f64::from(dims.height);
                let want = ratio.ratio();
                assert!(
                    (got - want).abs() / want < 0.01,
                    "{ratio:?} {vw}x{vh}: got ratio {got}, want {want}"
                );
            }
        }
    }

    #[test]
    fn area_respects_tier_cap() {
        let dims = RecordingDimensions::derive(
            Viewport {
                width: 3840,
                height: 2160,
            },
            AspectRatio::Wide,
            1.0,
            DeviceTier::Low,
        )
        .unwrap();
        assert!(dims.area() <= 1280 * 720);
    }

    #[test]
    fn tiny_viewport_is_rejected() {
        let err = RecordingDimensions::derive(
            Viewport {
                width: 99,
                height: 500,
            },
            AspectRatio::Wide,
            1.0,
            DeviceTier::Mid,
        )
        .unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn fps_rejects_zero_terms() {
        assert!(Fps::new(0, 1).is_err());
        assert!(Fps::new(30, 0).is_err());
        assert!((Fps::new(30, 1).unwrap().frame_interval_ms() - 33.333).abs() < 0.01);
    }

    #[test]
    fn bitrate_scales_with_area() {
        let small = RecordingDimensions::derive(
            Viewport {
                width: 640,
                height: 360,
            },
            AspectRatio::Wide,
            1.0,
            DeviceTier::Mid,
        )
        .unwrap();
        let large = RecordingDimensions::derive(
            Viewport {
                width: 1920,
                height: 1080,
            },
            AspectRatio::Wide,
            1.0,
            DeviceTier::Mid,
        )
        .unwrap();
        assert!(large.bitrate > small.bitrate);
    }
}
