//! Phase 1: drive the animation and sample composited frames.
//!
//! The central design decision is rate decoupling: the animation is played at a
//! capture-time multiplier so real capture wall-time stays tractable, while
//! frames are sampled uniformly in *animation-logical* time. The video's
//! logical duration is therefore independent of how fast the scene visibly
//! plays during capture.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::compose::{FrameCompositor, FrameRgba};
use crate::foundation::core::{FrameIndex, OUTPUT_FPS};
use crate::foundation::error::{ExportError, ExportResult};
use crate::scene::{SharedScene, lock_scene};

/// Cooperative cancellation flag, checked at the top of every capture tick and
/// every encode step.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Source of host refresh ticks (the per-display-refresh callback analog).
///
/// Each call blocks until the next tick and returns the wall milliseconds since
/// the previous one; `None` means the host stopped ticking.
pub trait TickSource: Send {
    /// Wait for the next tick.
    fn next_tick(&mut self) -> Option<f64>;
}

/// Wall-clock ticker for headless use, approximating a display refresh.
pub struct IntervalTicker {
    interval: Duration,
}

impl IntervalTicker {
    /// Tick at `hz` per second.
    pub fn new(hz: u32) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / f64::from(hz.max(1))),
        }
    }
}

impl TickSource for IntervalTicker {
    fn next_tick(&mut self) -> Option<f64> {
        std::thread::sleep(self.interval);
        Some(self.interval.as_secs_f64() * 1000.0)
    }
}

/// Scripted ticker for deterministic tests.
pub struct ManualTicker {
    dts: std::collections::VecDeque<f64>,
}

impl ManualTicker {
    /// Tick `count` times with a fixed `dt_ms`.
    pub fn uniform(dt_ms: f64, count: usize) -> Self {
        Self {
            dts: std::iter::repeat_n(dt_ms, count).collect(),
        }
    }
}

impl TickSource for ManualTicker {
    fn next_tick(&mut self) -> Option<f64> {
        self.dts.pop_front()
    }
}

/// Capture tuning knobs.
///
/// The termination thresholds are empirical, not derived from a timing model;
/// they are configuration precisely so deployments can recalibrate them against
/// their own track corpus.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CaptureTuning {
    /// Animation playback multiplier during capture.
    ///
    /// At 60 Hz host ticks and 30 fps output, one output frame interval spans
    /// two ticks; a 2x rate means every tick advances the animation by exactly
    /// one frame interval, so capture keeps up without dropping logical frames
    /// while halving the capture wall time.
    pub playback_rate: f64,
    /// Stop when animation-reported progress reaches this value.
    pub progress_threshold: f64,
    /// Stop when this fraction of the expected frame count is captured.
    pub expected_frames_ratio: f64,
    /// Nominal animation duration used to estimate the expected frame count.
    pub nominal_duration_ms: u64,
    /// Hard cap on total capture wall time.
    pub safety_timeout_secs: u64,
    /// Oversampling factor for the high-quality two-phase capture (1 = off).
    pub quality_multiplier: u32,
}

impl Default for CaptureTuning {
    fn default() -> Self {
        Self {
            playback_rate: 2.0,
            progress_threshold: 0.99,
            expected_frames_ratio: 0.85,
            nominal_duration_ms: 30_000,
            safety_timeout_secs: 600,
            quality_multiplier: 2,
        }
    }
}

impl CaptureTuning {
    /// Expected frame count for the nominal duration at the output frame rate.
    pub fn expected_frames(&self) -> u64 {
        ((self.nominal_duration_ms as f64 / 1000.0) * OUTPUT_FPS.as_f64()).round() as u64
    }

    fn frame_target(&self) -> u64 {
        ((self.expected_frames() as f64) * self.expected_frames_ratio).ceil() as u64
    }

    pub(crate) fn validate(&self) -> ExportResult<()> {
        if !self.playback_rate.is_finite() || self.playback_rate <= 0.0 {
            return Err(ExportError::validation("playback_rate must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.progress_threshold) {
            return Err(ExportError::validation(
                "progress_threshold must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.expected_frames_ratio) {
            return Err(ExportError::validation(
                "expected_frames_ratio must be within [0, 1]",
            ));
        }
        if self.nominal_duration_ms == 0 {
            return Err(ExportError::validation("nominal_duration_ms must be > 0"));
        }
        Ok(())
    }
}

/// One captured frame. The raster is exclusively owned until handed to the
/// encoder.
#[derive(Clone, Debug)]
pub struct CapturedFrame {
    /// Monotonic zero-based frame index.
    pub index: FrameIndex,
    /// Logical capture time (video-timeline milliseconds, not wall-clock).
    pub timestamp_ms: u64,
    /// The composited raster.
    pub raster: FrameRgba,
}

/// Why capture stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Animation progress crossed the threshold.
    ProgressComplete,
    /// The estimated frame target was reached first.
    FrameTarget,
    /// The safety timeout tripped; frames gathered so far are kept.
    SafetyTimeout,
    /// The host stopped ticking; treated like a timeout soft-stop.
    TicksEnded,
}

/// Ordered capture result.
#[derive(Debug)]
pub struct CaptureOutcome {
    /// Frames in strictly increasing index order.
    pub frames: Vec<CapturedFrame>,
    /// Which termination condition fired.
    pub reason: StopReason,
}

/// Drives the animation and samples frames on the tick cadence.
pub struct CaptureScheduler {
    tuning: CaptureTuning,
}

impl CaptureScheduler {
    /// Create a scheduler with validated tuning.
    pub fn new(tuning: CaptureTuning) -> ExportResult<Self> {
        tuning.validate()?;
        Ok(Self { tuning })
    }

    /// Run the capture loop, collecting the ordered frame buffer (two-phase
    /// mode).
    ///
    /// The caller owns playback-rate setup (via `PlaybackRateLease`);
    /// this method only issues transport commands.
    pub fn run(
        &self,
        scene: &SharedScene,
        compositor: &mut FrameCompositor,
        ticks: &mut dyn TickSource,
        cancel: &CancelToken,
        mut on_frame: impl FnMut(u64, u64),
    ) -> ExportResult<CaptureOutcome> {
        let mut frames: Vec<CapturedFrame> = Vec::new();
        let reason = self.run_streaming(scene, compositor, ticks, cancel, |frame, target| {
            frames.push(frame);
            on_frame(frames.len() as u64, target);
            Ok(())
        })?;
        Ok(CaptureOutcome { frames, reason })
    }

    /// Run the capture loop, handing each frame to `emit` as it is produced
    /// (single-pass mode feeds the encoder sink directly).
    ///
    /// Neither termination signal alone is reliable: progress reporting can
    /// stall near completion and the frame estimate can be wrong for unusually
    /// long or short tracks, so whichever fires first wins.
    pub fn run_streaming(
        &self,
        scene: &SharedScene,
        compositor: &mut FrameCompositor,
        ticks: &mut dyn TickSource,
        cancel: &CancelToken,
        mut emit: impl FnMut(CapturedFrame, u64) -> ExportResult<()>,
    ) -> ExportResult<StopReason> {
        let frame_interval_ms = OUTPUT_FPS.frame_interval_ms();
        let frame_target = self.tuning.frame_target().max(1);
        let timeout_ms = self.tuning.safety_timeout_secs as f64 * 1000.0;
        let oversample = self.tuning.quality_multiplier;

        {
            let mut guard = lock_scene(scene);
            guard.reset();
            guard.play();
        }

        let mut captured = 0u64;
        let mut wall_elapsed_ms = 0.0f64;
        // Animation-logical time since the last captured frame.
        let mut pending_logical_ms = frame_interval_ms; // capture frame 0 immediately

        let result = (|| -> ExportResult<StopReason> {
            loop {
                if cancel.is_cancelled() {
                    return Err(ExportError::Cancelled);
                }

                let Some(dt_ms) = ticks.next_tick() else {
                    tracing::warn!(
                        captured,
                        "tick source ended before capture completed; keeping partial frames"
                    );
                    return Ok(StopReason::TicksEnded);
                };

                wall_elapsed_ms += dt_ms;
                if wall_elapsed_ms > timeout_ms {
                    tracing::warn!(
                        captured,
                        elapsed_secs = wall_elapsed_ms / 1000.0,
                        "capture safety timeout tripped; keeping partial frames"
                    );
                    return Ok(StopReason::SafetyTimeout);
                }

                let rate = {
                    let mut guard = lock_scene(scene);
                    guard.advance(dt_ms);
                    guard.playback_rate()
                };
                pending_logical_ms += dt_ms * rate;

                if pending_logical_ms >= frame_interval_ms {
                    // One frame per tick; a burst of backlog is folded into
                    // the next ticks rather than captured as duplicates.
                    pending_logical_ms =
                        (pending_logical_ms - frame_interval_ms).min(frame_interval_ms);

                    let index = FrameIndex(captured);
                    let raster = {
                        let mut guard = lock_scene(scene);
                        let snapshot = guard.snapshot()?;
                        let overlay = guard.overlay();
                        drop(guard);
                        if oversample > 1 {
                            compositor.composite_oversampled(&snapshot, &overlay, oversample)?
                        } else {
                            compositor.composite(&snapshot, &overlay)?
                        }
                    };
                    emit(
                        CapturedFrame {
                            index,
                            timestamp_ms: (index.0 as f64 * frame_interval_ms).round() as u64,
                            raster,
                        },
                        frame_target,
                    )?;
                    captured += 1;
                }

                let progress = lock_scene(scene).progress();
                if progress >= self.tuning.progress_threshold {
                    return Ok(StopReason::ProgressComplete);
                }
                if captured >= frame_target {
                    return Ok(StopReason::FrameTarget);
                }
            }
        })();

        // The scene is paused on every exit, including error paths.
        lock_scene(scene).pause();
        let reason = result?;
        tracing::info!(frames = captured, ?reason, "capture finished");
        Ok(reason)
    }
}
