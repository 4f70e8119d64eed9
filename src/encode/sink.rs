use crate::compose::FrameRgba;
use crate::foundation::core::{FrameIndex, Fps};
use crate::foundation::error::ExportResult;
use crate::probe::CodecDescriptor;

/// Configuration provided to a [`FrameSink`] before any frame is pushed.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Output width in pixels (even).
    pub width: u32,
    /// Output height in pixels (even).
    pub height: u32,
    /// Output frames-per-second; the container's fixed frame interval.
    pub fps: Fps,
    /// Negotiated codec/container combination.
    pub codec: CodecDescriptor,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
}

/// Sink contract for consuming composited frames.
///
/// Ordering contract: `push_frame` is called in strictly increasing
/// `FrameIndex` order. Out-of-order submission would corrupt the output
/// container and is rejected by every implementation.
pub trait FrameSink: Send {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> ExportResult<()>;
    /// Push one frame in strictly increasing index order.
    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> ExportResult<()>;
    /// Called once after the last frame; finalizes the container.
    fn end(&mut self) -> ExportResult<()>;
}

/// In-memory sink for tests and debugging.
#[derive(Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    /// Frames in submission order.
    pub frames: Vec<(FrameIndex, FrameRgba)>,
    ended: bool,
}

impl InMemorySink {
    /// Create a new in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the sink configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg.clone()
    }

    /// Whether `end` completed.
    pub fn ended(&self) -> bool {
        self.ended
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> ExportResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        self.ended = false;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> ExportResult<()> {
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> ExportResult<()> {
        self.ended = true;
        Ok(())
    }
}
