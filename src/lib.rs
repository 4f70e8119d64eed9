//! Trailcast renders an animated track replay over a map scene and exports a
//! deterministic, frame-accurate video of it.
//!
//! The hard part is not the animation: it is turning a live, interactive,
//! multi-layer scene into a video file while the scene is driven by a
//! real-time clock. The crate owns that capture → composite → encode pipeline:
//!
//! - probe the runtime for encoder capability ([`probe`])
//! - drive the animation at a rate decoupled from wall-clock time
//!   ([`CaptureScheduler`])
//! - layer base scene, live stats, elevation bar, watermark, and annotation
//!   into one raster per frame ([`FrameCompositor`])
//! - stream frames into `ffmpeg` at a fixed 30 fps ([`EncodeStreamer`])
//! - orchestrate the whole lifecycle with guaranteed teardown
//!   ([`ExportSession`])
//!
//! The map engine and the UI are external collaborators reached through the
//! [`SceneSource`], [`UiHost`], and [`StatusSink`] traits.
#![forbid(unsafe_code)]

pub mod capture;
pub mod compose;
mod foundation;
pub mod probe;
pub mod scene;
pub mod session;

/// Encoding sinks and the encode streamer.
pub mod encode;

pub use crate::foundation::core::{
    AspectRatio, DeviceTier, Fps, FrameIndex, OUTPUT_FPS, RecordingDimensions, Viewport,
};
pub use crate::foundation::error::{ExportError, ExportResult};

pub use crate::capture::{
    CancelToken, CaptureOutcome, CaptureScheduler, CaptureTuning, CapturedFrame, IntervalTicker,
    ManualTicker, StopReason, TickSource,
};
pub use crate::compose::{CompositorOptions, FrameCompositor, FrameRgba};
pub use crate::encode::{
    EncodeStreamer, EncodedFile, FfmpegSink, FfmpegSinkOpts, FrameSink, InMemorySink, SinkConfig,
};
pub use crate::probe::{CapabilityReport, CodecDescriptor, ContainerFormat, QualityTier};
pub use crate::scene::{
    Annotation, OverlayData, PlaybackRateLease, SceneSnapshot, SceneSource, ScriptedScene,
    SharedScene,
};
pub use crate::session::{
    ExportMode, ExportOptions, ExportOutcome, ExportSession, NullStatusSink, NullUiHost,
    OwnedSinkFactory, Progress, SessionState, StatusSink, UiHost,
};
