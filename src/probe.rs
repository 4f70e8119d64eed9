//! Read-only capability probing for the encode path.
//!
//! Probing never mutates the environment. The session runs it once during
//! preparation and keeps the resulting [`CapabilityReport`] for codec selection
//! and mid-session fallback.

use std::process::{Command, Stdio};

/// File-level container wrapping the encoded bitstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    /// MP4 with `+faststart`, the widely-compatible streaming container.
    Mp4,
    /// WebM, used when the build carries VP9 but no H.264 encoder.
    WebM,
}

impl ContainerFormat {
    /// Output filename extension.
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::WebM => "webm",
        }
    }

    /// Standard media type for the finished file.
    pub fn media_type(self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "video/mp4",
            ContainerFormat::WebM => "video/webm",
        }
    }
}

/// Ordered quality band of a codec candidate.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Low,
    Medium,
    High,
    Highest,
}

/// One container/encoder combination, immutable once probed.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct CodecDescriptor {
    /// Container family for the output file.
    pub container: ContainerFormat,
    /// ffmpeg encoder name, e.g. `libx264`.
    pub encoder: &'static str,
    /// Quality band used for ranking and fallback ordering.
    pub tier: QualityTier,
    /// Whether the encoder is a hardware path.
    pub hardware: bool,
}

impl CodecDescriptor {
    fn new(
        container: ContainerFormat,
        encoder: &'static str,
        tier: QualityTier,
        hardware: bool,
    ) -> Self {
        Self {
            container,
            encoder,
            tier,
            hardware,
        }
    }
}

/// Result of probing: supported candidates ranked best-first, plus environment
/// facts and human-readable degradation notices.
#[derive(Clone, Debug)]
pub struct CapabilityReport {
    /// Supported codec candidates, best first.
    pub candidates: Vec<CodecDescriptor>,
    /// Whether a hardware encoder path was detected.
    pub hardware_encoder: bool,
    /// Whether the whole-layout SVG rasterization facility can resolve text.
    pub layout_raster_available: bool,
    /// Whether `ffmpeg` could be invoked at all.
    pub ffmpeg_available: bool,
    /// Non-fatal degradation notices, suitable for the UI.
    pub recommendations: Vec<String>,
}

impl CapabilityReport {
    /// Best supported codec, if any.
    pub fn best(&self) -> Option<&CodecDescriptor> {
        self.candidates.first()
    }

    /// Next-best supported codec strictly below `failed` in the ranking.
    ///
    /// Used for the one-shot fallback restart after a mid-session encoder
    /// failure.
    pub fn fallback_after(&self, failed: &CodecDescriptor) -> Option<&CodecDescriptor> {
        let pos = self.candidates.iter().position(|c| c == failed)?;
        self.candidates.get(pos + 1)
    }
}

/// The lowest-common-denominator codec: `mpeg4` in MP4, compiled into every
/// ffmpeg build. Used when probing reports nothing better.
pub fn default_codec() -> CodecDescriptor {
    CodecDescriptor::new(ContainerFormat::Mp4, "mpeg4", QualityTier::Low, false)
}

/// Hardware HEVC encoders checked in priority order.
const HEVC_HARDWARE: &[&str] = &["hevc_videotoolbox", "hevc_nvenc", "hevc_qsv", "hevc_vaapi"];

/// Rank codec candidates from `ffmpeg -hide_banner -encoders` output.
///
/// `mpeg4` is compiled into every ffmpeg build and is always appended as the
/// lowest-common-denominator path, so the list is never empty.
pub fn rank_candidates(encoders_output: &str) -> Vec<CodecDescriptor> {
    let mut out = Vec::new();

    for name in HEVC_HARDWARE {
        if encoders_output.contains(name) {
            out.push(CodecDescriptor::new(
                ContainerFormat::Mp4,
                name,
                QualityTier::Highest,
                true,
            ));
            break;
        }
    }
    if encoders_output.contains("libx264") {
        out.push(CodecDescriptor::new(
            ContainerFormat::Mp4,
            "libx264",
            QualityTier::High,
            false,
        ));
    }
    if encoders_output.contains("libvpx-vp9") {
        out.push(CodecDescriptor::new(
            ContainerFormat::WebM,
            "libvpx-vp9",
            QualityTier::Medium,
            false,
        ));
    }
    out.push(CodecDescriptor::new(
        ContainerFormat::Mp4,
        "mpeg4",
        QualityTier::Low,
        false,
    ));

    out
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn list_encoders() -> Option<String> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .ok()?;
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn layout_raster_available() -> bool {
    // The whole-layout strategy renders overlay text through usvg; without any
    // resolvable font face it degrades to the manual strategy.
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    db.faces().next().is_some()
}

/// Inspect the runtime for encoding capability.
pub fn probe() -> CapabilityReport {
    let ffmpeg_available = is_ffmpeg_on_path();
    let mut recommendations = Vec::new();

    let candidates = if ffmpeg_available {
        match list_encoders() {
            Some(listing) => rank_candidates(&listing),
            None => {
                recommendations
                    .push("could not list ffmpeg encoders; assuming baseline mpeg4 only".to_owned());
                rank_candidates("")
            }
        }
    } else {
        recommendations.push(
            "ffmpeg was not found on PATH; video encoding is unavailable on this device".to_owned(),
        );
        Vec::new()
    };

    let hardware_encoder = candidates.iter().any(|c| c.hardware);
    if ffmpeg_available && !hardware_encoder {
        recommendations
            .push("no hardware encoder detected; falling back to software encoding".to_owned());
    }
    if ffmpeg_available && !candidates.iter().any(|c| c.encoder == "libx264") {
        recommendations.push(
            "libx264 is not available in this ffmpeg build; output quality may be reduced"
                .to_owned(),
        );
    }

    let layout_raster = layout_raster_available();
    if !layout_raster {
        recommendations.push(
            "no system fonts available for layout rasterization; using manual overlay drawing"
                .to_owned(),
        );
    }

    CapabilityReport {
        candidates,
        hardware_encoder,
        layout_raster_available: layout_raster,
        ffmpeg_available,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_listing_still_yields_baseline_mpeg4() {
        let ranked = rank_candidates("");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].encoder, "mpeg4");
        assert_eq!(ranked[0].tier, QualityTier::Low);
        assert_eq!(ranked[0].container, ContainerFormat::Mp4);
    }

    #[test]
    fn full_listing_ranks_hardware_hevc_first() {
        let listing = "hevc_nvenc\nlibx264\nlibvpx-vp9\nmpeg4";
        let ranked = rank_candidates(listing);
        assert_eq!(ranked[0].encoder, "hevc_nvenc");
        assert!(ranked[0].hardware);
        assert_eq!(ranked[0].tier, QualityTier::Highest);
        let tiers: Vec<QualityTier> = ranked.iter().map(|c| c.tier).collect();
        let mut sorted = tiers.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(tiers, sorted, "candidates must be ranked best-first");
    }

    #[test]
    fn only_one_hardware_encoder_is_kept() {
        let listing = "hevc_videotoolbox hevc_nvenc libx264";
        let ranked = rank_candidates(listing);
        assert_eq!(ranked.iter().filter(|c| c.hardware).count(), 1);
        assert_eq!(ranked[0].encoder, "hevc_videotoolbox");
    }

    #[test]
    fn fallback_after_walks_the_ranking() {
        let ranked = rank_candidates("libx264 libvpx-vp9");
        let report = CapabilityReport {
            candidates: ranked,
            hardware_encoder: false,
            layout_raster_available: true,
            ffmpeg_available: true,
            recommendations: Vec::new(),
        };
        let best = report.best().cloned().unwrap();
        assert_eq!(best.encoder, "libx264");
        let next = report.fallback_after(&best).cloned().unwrap();
        assert_eq!(next.encoder, "libvpx-vp9");
        let last = report.fallback_after(&next).cloned().unwrap();
        assert_eq!(last.encoder, "mpeg4");
        assert!(report.fallback_after(&last).is_none());
    }

    #[test]
    fn container_metadata_is_consistent() {
        assert_eq!(ContainerFormat::Mp4.extension(), "mp4");
        assert_eq!(ContainerFormat::Mp4.media_type(), "video/mp4");
        assert_eq!(ContainerFormat::WebM.extension(), "webm");
        assert_eq!(ContainerFormat::WebM.media_type(), "video/webm");
    }
}
