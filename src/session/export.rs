//! The export session: state machine and orchestrator.
//!
//! A session validates prerequisites, prepares the environment, runs the
//! selected pipeline, and guarantees teardown (chrome restored, playback rate
//! back to default, buffers released) on every terminal path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;

use crate::capture::{CancelToken, CaptureScheduler, CaptureTuning, TickSource};
use crate::compose::{CompositorOptions, FrameCompositor};
use crate::encode::streamer::SinkFactory;
use crate::encode::{EncodeStreamer, EncodedFile, FfmpegSink, FfmpegSinkOpts, FrameSink};
use crate::foundation::core::{AspectRatio, DeviceTier, RecordingDimensions};
use crate::foundation::error::{ExportError, ExportResult};
use crate::probe::{self, CapabilityReport, CodecDescriptor, QualityTier};
use crate::scene::{PlaybackRateLease, SharedScene, lock_scene};
use crate::session::progress::{ExportOutcome, ProgressReporter, StatusSink};

/// Export pipeline selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportMode {
    /// Record while the animation plays live, encoding as frames arrive.
    SinglePass,
    /// Capture the full frame buffer first, then encode it (higher quality).
    TwoPhase,
    /// Prepare the environment for an external screen recorder and wait for an
    /// explicit exit signal; produces no file.
    ManualGuide,
}

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Validating,
    Preparing,
    Capturing,
    Encoding,
    Recording,
    Finalizing,
    Completed,
    Cancelled,
    Failed,
}

/// UI chrome collaborator. All methods are best-effort notifications.
pub trait UiHost: Send {
    /// Hide buttons/panels before capture.
    fn hide_chrome(&mut self) {}
    /// Restore chrome; must be safe to call more than once.
    fn restore_chrome(&mut self) {}
    /// Outline the region an external recorder should capture (manual guide).
    fn highlight_capture_region(&mut self, _dims: &RecordingDimensions) {}
    /// Remove the capture-region highlight.
    fn clear_capture_highlight(&mut self) {}
}

/// Host that ignores all chrome commands.
#[derive(Default)]
pub struct NullUiHost;

impl UiHost for NullUiHost {}

/// Session configuration from the start-export command.
#[derive(Clone, Debug)]
pub struct ExportOptions {
    /// Pipeline mode.
    pub mode: ExportMode,
    /// Target aspect ratio.
    pub aspect_ratio: AspectRatio,
    /// Directory the output file is written to.
    pub output_dir: PathBuf,
    /// Output filename prefix; the timestamp and extension are appended.
    pub file_prefix: String,
    /// Overwrite an existing output file.
    pub overwrite: bool,
    /// Device pixel density of the capture surface.
    pub pixel_density: f64,
    /// Capture tuning knobs.
    pub tuning: CaptureTuning,
    /// Maximum ticks to wait for scene readiness before proceeding anyway.
    pub readiness_retry_budget: u32,
    /// Logo watermark SVG; `None` uses the built-in mark.
    pub logo_svg: Option<String>,
    /// Font file for manual-strategy text drawing.
    pub font_path: Option<PathBuf>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            mode: ExportMode::TwoPhase,
            aspect_ratio: AspectRatio::Wide,
            output_dir: PathBuf::from("."),
            file_prefix: "trailcast".to_owned(),
            overwrite: true,
            pixel_density: 1.0,
            tuning: CaptureTuning::default(),
            readiness_retry_budget: 120,
            logo_svg: None,
            font_path: None,
        }
    }
}

/// Sink factory the session owns (injectable for tests).
pub type OwnedSinkFactory =
    Box<dyn FnMut(&CodecDescriptor) -> ExportResult<Box<dyn FrameSink>> + Send>;

// The animation clock and UI chrome are process-wide shared state; at most one
// session may own them at a time.
static ACTIVE_SESSION: AtomicBool = AtomicBool::new(false);

struct SessionGuard;

impl SessionGuard {
    fn acquire() -> ExportResult<Self> {
        if ACTIVE_SESSION
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExportError::prerequisite(
                "another export session is already active",
            ));
        }
        Ok(Self)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        ACTIVE_SESSION.store(false, Ordering::SeqCst);
    }
}

/// One export run over a shared scene.
pub struct ExportSession {
    scene: SharedScene,
    opts: ExportOptions,
    state: SessionState,
    report_override: Option<CapabilityReport>,
    sink_factory_override: Option<OwnedSinkFactory>,
}

impl ExportSession {
    /// Create a session for the given scene and options.
    pub fn new(scene: SharedScene, opts: ExportOptions) -> Self {
        Self {
            scene,
            opts,
            state: SessionState::Idle,
            report_override: None,
            sink_factory_override: None,
        }
    }

    /// Inject a pre-built capability report instead of probing the runtime.
    pub fn with_capability_report(mut self, report: CapabilityReport) -> Self {
        self.report_override = Some(report);
        self
    }

    /// Inject a sink factory instead of the default ffmpeg sink.
    pub fn with_sink_factory(mut self, factory: OwnedSinkFactory) -> Self {
        self.sink_factory_override = Some(factory);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to a terminal outcome.
    ///
    /// Teardown (chrome restoration, playback-rate release, buffer drop) runs
    /// on every path out of the pipeline, including cancellation and failure.
    pub fn run(
        &mut self,
        ui: &mut dyn UiHost,
        status: &mut dyn StatusSink,
        ticks: &mut dyn TickSource,
        cancel: &CancelToken,
    ) -> ExportOutcome {
        let result = {
            let mut reporter = ProgressReporter::new(status);
            self.run_inner(ui, &mut reporter, ticks, cancel)
        };

        self.teardown(ui);

        let outcome = match result {
            Ok(file) => {
                self.state = SessionState::Completed;
                ExportOutcome::Completed { file }
            }
            Err(ExportError::Cancelled) => {
                self.state = SessionState::Cancelled;
                ExportOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(error = %e, "export failed");
                self.state = SessionState::Failed;
                ExportOutcome::Failed {
                    message: e.to_string(),
                }
            }
        };
        status.on_outcome(&outcome);
        outcome
    }

    /// Restore every piece of shared state the session may have touched.
    ///
    /// Idempotent: the chrome contract allows repeated restoration, the
    /// playback-rate lease has already been dropped by the time this runs, and
    /// the frame buffer is scoped to the pipeline.
    fn teardown(&mut self, ui: &mut dyn UiHost) {
        ui.clear_capture_highlight();
        ui.restore_chrome();
    }

    fn run_inner(
        &mut self,
        ui: &mut dyn UiHost,
        reporter: &mut ProgressReporter<'_>,
        ticks: &mut dyn TickSource,
        cancel: &CancelToken,
    ) -> ExportResult<Option<EncodedFile>> {
        // Validating: nothing is allocated before these checks pass.
        self.state = SessionState::Validating;
        reporter.report(2, "validating export prerequisites");
        self.opts.tuning.validate()?;
        let _guard = SessionGuard::acquire()?;

        let viewport = lock_scene(&self.scene).viewport();
        if viewport.width < 100 || viewport.height < 100 {
            return Err(ExportError::prerequisite(
                "no drawable scene is loaded (viewport too small)",
            ));
        }

        let report = match self.report_override.take() {
            Some(r) => r,
            None => probe::probe(),
        };
        if self.opts.mode != ExportMode::ManualGuide && !report.ffmpeg_available {
            return Err(ExportError::prerequisite(
                "this device has no video encoding capability (ffmpeg not found)",
            ));
        }

        // Preparing: degradations are reported, only the viewport resize is
        // fatal.
        self.state = SessionState::Preparing;
        reporter.report(5, "preparing scene for capture");
        ui.hide_chrome();

        let tier = DeviceTier::detect();
        let dims = RecordingDimensions::derive(
            viewport,
            self.opts.aspect_ratio,
            self.opts.pixel_density,
            tier,
        )?;
        lock_scene(&self.scene).resize_viewport(dims.width, dims.height)?;

        for rec in &report.recommendations {
            reporter.notice(rec);
        }

        self.await_readiness(reporter, ticks, cancel)?;

        if let Err(e) = lock_scene(&self.scene).preload_background() {
            tracing::warn!(error = %e, "background preload failed");
            reporter.notice("background imagery preload failed; export continues");
        }
        reporter.report(12, "environment ready");

        // Codec and mode resolution. With no supported codec at all, drop to
        // the lowest-common-denominator path instead of failing outright.
        let mut mode = self.opts.mode;
        let codec = match report.best() {
            Some(c) => c.clone(),
            None => {
                if mode == ExportMode::TwoPhase {
                    mode = ExportMode::SinglePass;
                }
                reporter
                    .notice("no supported codec detected; using default container in single-pass");
                probe::default_codec()
            }
        };
        if codec.tier < QualityTier::High {
            reporter.notice(&format!(
                "preferred codec unavailable; exporting {} with {}",
                codec.container.extension(),
                codec.encoder
            ));
        }

        let font_bytes = self.load_font_bytes();
        let mut compositor = FrameCompositor::new(
            &dims,
            CompositorOptions {
                logo_svg: self.opts.logo_svg.clone(),
                font_bytes,
                prefer_layout_strategy: report.layout_raster_available,
            },
        );

        if mode == ExportMode::ManualGuide {
            return self.run_manual_guide(ui, reporter, ticks, cancel, &dims);
        }

        // Output naming is fixed now; only the extension follows the codec a
        // fallback may switch to.
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let out_dir = self.opts.output_dir.clone();
        let prefix = self.opts.file_prefix.clone();
        let overwrite = self.opts.overwrite;
        let stamp_for_factory = stamp.clone();
        let mut default_factory = move |codec: &CodecDescriptor| -> ExportResult<Box<dyn FrameSink>> {
            let path = out_dir.join(format!(
                "{prefix}_{stamp_for_factory}.{}",
                codec.container.extension()
            ));
            let mut opts = FfmpegSinkOpts::new(path);
            opts.overwrite = overwrite;
            Ok(Box::new(FfmpegSink::new(opts)))
        };
        let factory: &mut SinkFactory<'_> = match self.sink_factory_override.as_mut() {
            Some(f) => f.as_mut(),
            None => &mut default_factory,
        };

        let streamer = EncodeStreamer::new(report);
        let stats = match mode {
            ExportMode::SinglePass => {
                self.state = SessionState::Recording;
                reporter.report(15, "recording");

                // Live mode plays for the viewer: real-time rate, no
                // oversampling.
                let mut live_tuning = self.opts.tuning.clone();
                live_tuning.quality_multiplier = 1;
                let scheduler = CaptureScheduler::new(live_tuning)?;
                let _lease = PlaybackRateLease::acquire(self.scene.clone(), 1.0)?;

                let (stats, _reason) = streamer.record_live(
                    &scheduler,
                    &self.scene,
                    &mut compositor,
                    ticks,
                    &dims,
                    &codec,
                    factory,
                    cancel,
                    |done, target| {
                        let pct = 15 + done.saturating_mul(80) / target.max(1);
                        reporter.report(pct.min(95) as u8, "recording");
                    },
                )?;
                stats
            }
            ExportMode::TwoPhase => {
                self.state = SessionState::Capturing;
                reporter.report(15, "capturing frames");

                let scheduler = CaptureScheduler::new(self.opts.tuning.clone())?;
                let frames = {
                    let _lease = PlaybackRateLease::acquire(
                        self.scene.clone(),
                        self.opts.tuning.playback_rate,
                    )?;
                    scheduler
                        .run(&self.scene, &mut compositor, ticks, cancel, |done, target| {
                            let pct = 15 + done.saturating_mul(55) / target.max(1);
                            reporter.report(pct.min(70) as u8, "capturing frames");
                        })?
                        .frames
                };
                if frames.is_empty() {
                    return Err(ExportError::capture("no frames were captured"));
                }

                self.state = SessionState::Encoding;
                reporter.report(70, "encoding video");
                let total = frames.len() as u64;
                let stats = streamer.encode_frames(
                    &frames,
                    &dims,
                    &codec,
                    factory,
                    cancel,
                    |done, _| {
                        let pct = 70 + done.saturating_mul(25) / total.max(1);
                        reporter.report(pct.min(95) as u8, "encoding video");
                    },
                )?;
                // The buffer is the session's peak memory; release it the
                // moment encoding is done.
                drop(frames);
                stats
            }
            ExportMode::ManualGuide => {
                return Err(ExportError::validation(
                    "manual guide handled before encoding",
                ));
            }
        };

        // Finalizing.
        self.state = SessionState::Finalizing;
        reporter.report(97, "finalizing output");
        let out_path = self.opts.output_dir.join(format!(
            "{}_{stamp}.{}",
            self.opts.file_prefix,
            stats.codec.container.extension()
        ));
        let size_bytes = std::fs::metadata(&out_path).map(|m| m.len()).unwrap_or(0);
        tracing::info!(
            path = %out_path.display(),
            size_bytes,
            frames = stats.frames_submitted,
            codec = stats.codec.encoder,
            fallback = stats.fallback_used,
            "export finished"
        );
        reporter.report(100, "export complete");

        Ok(Some(EncodedFile {
            path: out_path,
            media_type: stats.codec.container.media_type(),
            size_bytes,
        }))
    }

    /// Manual-guide mode: environment prep only, then wait for the explicit
    /// exit signal. The user's external recorder owns the artifact.
    fn run_manual_guide(
        &mut self,
        ui: &mut dyn UiHost,
        reporter: &mut ProgressReporter<'_>,
        ticks: &mut dyn TickSource,
        cancel: &CancelToken,
        dims: &RecordingDimensions,
    ) -> ExportResult<Option<EncodedFile>> {
        reporter.report(20, "manual guide active; stop with cancel when finished");
        ui.highlight_capture_region(dims);

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if ticks.next_tick().is_none() {
                break;
            }
        }

        ui.clear_capture_highlight();
        reporter.report(100, "manual guide finished");
        Ok(None)
    }

    /// Wait for scene readiness with a single bounded retry budget.
    ///
    /// Exhausting the budget is a soft stop: capture proceeds with whatever
    /// the scene can draw.
    fn await_readiness(
        &mut self,
        reporter: &mut ProgressReporter<'_>,
        ticks: &mut dyn TickSource,
        cancel: &CancelToken,
    ) -> ExportResult<()> {
        let budget = self.opts.readiness_retry_budget;
        let mut waited = 0u32;
        while !lock_scene(&self.scene).is_ready() {
            if cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            if waited >= budget {
                tracing::warn!(budget, "scene readiness retry budget exhausted");
                reporter.notice("scene was not fully ready in time; export continues");
                break;
            }
            if ticks.next_tick().is_none() {
                break;
            }
            waited += 1;
        }
        Ok(())
    }

    fn load_font_bytes(&self) -> Option<Vec<u8>> {
        let path = self.opts.font_path.as_ref()?;
        match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "overlay font not readable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ManualTicker;
    use crate::scene::ScriptedScene;
    use crate::session::progress::NullStatusSink;
    use std::sync::Mutex;

    // The guard is process-global; keep these tests from racing each other.
    static GUARD_LOCK: Mutex<()> = Mutex::new(());

    fn guard_lock() -> std::sync::MutexGuard<'static, ()> {
        match GUARD_LOCK.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }

    #[test]
    fn session_guard_is_exclusive_and_released_on_drop() {
        let _lock = guard_lock();
        let first = SessionGuard::acquire().unwrap();
        assert!(SessionGuard::acquire().is_err());
        drop(first);
        let second = SessionGuard::acquire().unwrap();
        drop(second);
    }

    #[test]
    fn tiny_viewport_fails_validation_as_prerequisite() {
        let _lock = guard_lock();
        let scene = ScriptedScene::new(50, 50, 1_000.0).into_shared();
        let mut session = ExportSession::new(scene, ExportOptions::default());
        let outcome = session.run(
            &mut NullUiHost,
            &mut NullStatusSink,
            &mut ManualTicker::uniform(16.0, 10),
            &CancelToken::new(),
        );
        match outcome {
            ExportOutcome::Failed { message } => {
                assert!(message.contains("prerequisite"), "{message}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Failed);
    }
}
