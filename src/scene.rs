//! Boundary to the external map/animation engine.
//!
//! The engine owns the live visual scene and its animation clock. The pipeline
//! only needs a drawable snapshot, a progress query, transport commands, and a
//! playback-rate setter; everything else about the engine is opaque.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::foundation::core::Viewport;
use crate::foundation::error::{ExportError, ExportResult};

/// One drawable snapshot of the scene, premultiplied RGBA8.
#[derive(Clone, Debug)]
pub struct SceneSnapshot {
    /// Snapshot width in pixels.
    pub width: u32,
    /// Snapshot height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major, premultiplied alpha.
    pub rgba8_premul: Vec<u8>,
}

/// Per-tick overlay values supplied by the orchestrator.
///
/// The compositor has no knowledge of where these come from; the session reads
/// them from the scene each tick and hands them over as plain data.
#[derive(Clone, Debug, Default)]
pub struct OverlayData {
    /// Live statistics block, one line per entry, drawn right-aligned.
    pub stats_text: String,
    /// Replay progress in `[0, 1]`, drives the elevation-bar marker.
    pub progress_fraction: f64,
    /// Active annotation callout, if any.
    pub annotation: Option<Annotation>,
}

/// A callout attached to the current track position.
#[derive(Clone, Debug)]
pub struct Annotation {
    /// Short title line.
    pub title: String,
    /// Longer description, clipped to the callout box.
    pub description: String,
}

/// Contract the map/animation engine must implement.
///
/// `advance` exists for engines whose clock is driven by the host's per-refresh
/// callback; engines with an internal wall-clock may ignore it.
pub trait SceneSource: Send {
    /// Whether the scene has loaded enough to be drawable.
    fn is_ready(&self) -> bool;

    /// Current viewport size of the scene surface.
    fn viewport(&self) -> Viewport;

    /// Resize the scene surface to match the chosen recording aspect ratio.
    fn resize_viewport(&mut self, width: u32, height: u32) -> ExportResult<()>;

    /// Preload background imagery for the visible bounds. Best-effort.
    fn preload_background(&mut self) -> ExportResult<()> {
        Ok(())
    }

    /// Render the current animation state into a raster snapshot.
    fn snapshot(&mut self) -> ExportResult<SceneSnapshot>;

    /// Animation progress in `[0, 1]`.
    fn progress(&self) -> f64;

    /// Overlay values for the current animation state.
    fn overlay(&self) -> OverlayData;

    /// Start animation playback.
    fn play(&mut self);

    /// Pause animation playback.
    fn pause(&mut self);

    /// Rewind the animation to the start.
    fn reset(&mut self);

    /// Current playback-rate multiplier (1.0 is real time).
    fn playback_rate(&self) -> f64;

    /// Set the playback-rate multiplier.
    fn set_playback_rate(&mut self, rate: f64);

    /// Advance the animation clock by `dt_ms` wall milliseconds.
    fn advance(&mut self, dt_ms: f64);
}

/// Shared handle to the scene, usable from the session and the lease guard.
pub type SharedScene = Arc<Mutex<dyn SceneSource>>;

/// Lock the scene, recovering the guard from a poisoned mutex.
///
/// A panic while holding the scene lock must not wedge teardown.
pub fn lock_scene(scene: &SharedScene) -> MutexGuard<'_, dyn SceneSource + 'static> {
    match scene.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Scoped ownership of the scene's playback rate.
///
/// The animation clock is shared state; an export changes its rate for the whole
/// session and must restore the default on every exit path, including panics.
/// Dropping the lease restores the rate that was active at acquisition.
pub struct PlaybackRateLease {
    scene: SharedScene,
    restore_rate: f64,
}

impl PlaybackRateLease {
    /// Acquire the lease and set the capture-time playback rate.
    pub fn acquire(scene: SharedScene, rate: f64) -> ExportResult<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ExportError::validation(
                "playback rate must be finite and > 0",
            ));
        }
        let restore_rate = {
            let mut guard = lock_scene(&scene);
            let prev = guard.playback_rate();
            guard.set_playback_rate(rate);
            prev
        };
        Ok(Self {
            scene,
            restore_rate,
        })
    }
}

impl Drop for PlaybackRateLease {
    fn drop(&mut self) {
        let mut guard = lock_scene(&self.scene);
        guard.set_playback_rate(self.restore_rate);
        tracing::debug!(rate = self.restore_rate, "playback rate restored");
    }
}

/// Deterministic synthetic replay scene for tests and the demo CLI.
///
/// Draws a sky/ground gradient with an animated track dot. Real deployments
/// bind `SceneSource` to the actual map engine; this stand-in exists so the
/// pipeline can be exercised end-to-end without one.
pub struct ScriptedScene {
    width: u32,
    height: u32,
    /// Nominal replay duration at 1x playback.
    nominal_duration_ms: f64,
    elapsed_logical_ms: f64,
    rate: f64,
    playing: bool,
    ready: bool,
}

impl ScriptedScene {
    /// Create a scene with the given surface size and replay duration.
    pub fn new(width: u32, height: u32, nominal_duration_ms: f64) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            nominal_duration_ms: nominal_duration_ms.max(1.0),
            elapsed_logical_ms: 0.0,
            rate: 1.0,
            playing: false,
            ready: true,
        }
    }

    /// Mark the scene not-ready for `is_ready` until `set_ready` is called.
    pub fn with_delayed_readiness(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Flip the readiness flag.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Wrap into the shared handle the session consumes.
    pub fn into_shared(self) -> SharedScene {
        Arc::new(Mutex::new(self))
    }

    fn track_point(&self, t: f64) -> (f64, f64) {
        // A gentle S-curve across the frame.
        let x = t;
        let y = 0.55 + 0.25 * (t * std::f64::consts::TAU).sin() * (1.0 - t * 0.5);
        (x, y)
    }
}

impl SceneSource for ScriptedScene {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn viewport(&self) -> Viewport {
        Viewport {
            width: self.width,
            height: self.height,
        }
    }

    fn resize_viewport(&mut self, width: u32, height: u32) -> ExportResult<()> {
        if width == 0 || height == 0 {
            return Err(ExportError::validation(
                "viewport dimensions must be non-zero",
            ));
        }
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn snapshot(&mut self) -> ExportResult<SceneSnapshot> {
        let w = self.width as usize;
        let h = self.height as usize;
        let mut data = vec![0u8; w * h * 4];

        for y in 0..h {
            let t = y as f64 / h.max(1) as f64;
            let (r, g, b) = if t < 0.6 {
                let k = t / 0.6;
                (
                    (40.0 + 30.0 * k) as u8,
                    (70.0 + 60.0 * k) as u8,
                    (120.0 + 80.0 * k) as u8,
                )
            } else {
                let k = (t - 0.6) / 0.4;
                (
                    (60.0 + 20.0 * k) as u8,
                    (110.0 - 30.0 * k) as u8,
                    (60.0 - 20.0 * k) as u8,
                )
            };
            for x in 0..w {
                let o = (y * w + x) * 4;
                data[o] = r;
                data[o + 1] = g;
                data[o + 2] = b;
                data[o + 3] = 255;
            }
        }

        // Traveled portion of the track, then the position dot on top.
        let progress = self.progress();
        let steps = (w / 2).max(16);
        for i in 0..steps {
            let t = progress * (i as f64 / steps as f64);
            let (px, py) = self.track_point(t);
            let cx = (px * (w as f64 - 1.0)) as usize;
            let cy = (py * (h as f64 - 1.0)) as usize;
            let o = (cy.min(h - 1) * w + cx.min(w - 1)) * 4;
            data[o] = 230;
            data[o + 1] = 60;
            data[o + 2] = 40;
        }
        let (px, py) = self.track_point(progress);
        let cx = (px * (w as f64 - 1.0)) as i64;
        let cy = (py * (h as f64 - 1.0)) as i64;
        for dy in -2i64..=2 {
            for dx in -2i64..=2 {
                if dx * dx + dy * dy > 5 {
                    continue;
                }
                let x = cx + dx;
                let y = cy + dy;
                if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
                    continue;
                }
                let o = (y as usize * w + x as usize) * 4;
                data[o] = 255;
                data[o + 1] = 255;
                data[o + 2] = 255;
            }
        }

        Ok(SceneSnapshot {
            width: self.width,
            height: self.height,
            rgba8_premul: data,
        })
    }

    fn progress(&self) -> f64 {
        (self.elapsed_logical_ms / self.nominal_duration_ms).clamp(0.0, 1.0)
    }

    fn overlay(&self) -> OverlayData {
        let progress = self.progress();
        let km = 12.4 * progress;
        let ascent = (380.0 * progress) as u32;
        OverlayData {
            stats_text: format!("{km:.1} km\n{ascent} m ascent"),
            progress_fraction: progress,
            annotation: if (0.45..0.55).contains(&progress) {
                Some(Annotation {
                    title: "Summit".to_owned(),
                    description: "Highest point of the route".to_owned(),
                })
            } else {
                None
            },
        }
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn reset(&mut self) {
        self.elapsed_logical_ms = 0.0;
        self.playing = false;
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    fn advance(&mut self, dt_ms: f64) {
        if self.playing {
            self.elapsed_logical_ms += dt_ms * self.rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_restores_previous_rate_on_drop() {
        let scene = ScriptedScene::new(320, 180, 1000.0).into_shared();
        lock_scene(&scene).set_playback_rate(1.0);
        {
            let _lease = PlaybackRateLease::acquire(scene.clone(), 8.0).unwrap();
            assert_eq!(lock_scene(&scene).playback_rate(), 8.0);
        }
        assert_eq!(lock_scene(&scene).playback_rate(), 1.0);
    }

    #[test]
    fn lease_rejects_non_positive_rate() {
        let scene = ScriptedScene::new(320, 180, 1000.0).into_shared();
        assert!(PlaybackRateLease::acquire(scene.clone(), 0.0).is_err());
        assert!(PlaybackRateLease::acquire(scene, f64::NAN).is_err());
    }

    #[test]
    fn scripted_scene_progress_tracks_rate() {
        let mut scene = ScriptedScene::new(320, 180, 1000.0);
        scene.play();
        scene.set_playback_rate(2.0);
        scene.advance(250.0);
        assert!((scene.progress() - 0.5).abs() < 1e-9);
        scene.advance(1000.0);
        assert_eq!(scene.progress(), 1.0);
    }

    #[test]
    fn scripted_scene_snapshot_matches_viewport() {
        let mut scene = ScriptedScene::new(64, 48, 1000.0);
        let snap = scene.snapshot().unwrap();
        assert_eq!(snap.width, 64);
        assert_eq!(snap.height, 48);
        assert_eq!(snap.rgba8_premul.len(), 64 * 48 * 4);
    }
}
