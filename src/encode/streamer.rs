//! Feeds captured (or live) frames to a sink, with one-shot codec fallback.
//!
//! A sink that fails mid-stream is abandoned entirely and a fresh sink is
//! started from frame zero with the next-best codec. Encoded output from two
//! different encoder instances is never spliced together.

use std::path::PathBuf;

use crate::capture::{CancelToken, CaptureScheduler, CapturedFrame, StopReason, TickSource};
use crate::compose::FrameCompositor;
use crate::encode::sink::{FrameSink, SinkConfig};
use crate::foundation::core::RecordingDimensions;
use crate::foundation::error::{ExportError, ExportResult};
use crate::probe::{CapabilityReport, CodecDescriptor};
use crate::scene::SharedScene;

/// The finished export artifact.
#[derive(Clone, Debug)]
pub struct EncodedFile {
    /// Where the container was written.
    pub path: PathBuf,
    /// Standard media type of the container.
    pub media_type: &'static str,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// What an encode pass did.
#[derive(Clone, Debug)]
pub struct EncodeStats {
    /// Frames submitted to the (final) sink.
    pub frames_submitted: u64,
    /// Codec the final sink was configured with.
    pub codec: CodecDescriptor,
    /// Whether the fallback restart was taken.
    pub fallback_used: bool,
}

/// Builds a fresh sink for a codec; called once per encode attempt.
pub type SinkFactory<'a> =
    dyn FnMut(&CodecDescriptor) -> ExportResult<Box<dyn FrameSink>> + Send + 'a;

/// Orchestrates frame submission for both export modes.
pub struct EncodeStreamer {
    report: CapabilityReport,
}

impl EncodeStreamer {
    /// Create a streamer that consults `report` for fallback codecs.
    pub fn new(report: CapabilityReport) -> Self {
        Self { report }
    }

    /// Two-phase mode: submit an ordered frame buffer to the sink.
    ///
    /// Submission order is the buffer order; the container's fixed input frame
    /// rate gives every frame the exact 1/30 s interval regardless of how long
    /// its capture or compositing took.
    pub fn encode_frames(
        &self,
        frames: &[CapturedFrame],
        dims: &RecordingDimensions,
        codec: &CodecDescriptor,
        make_sink: &mut SinkFactory<'_>,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(u64, u64),
    ) -> ExportResult<EncodeStats> {
        if frames.is_empty() {
            return Err(ExportError::validation("no frames to encode"));
        }
        for pair in frames.windows(2) {
            if pair[1].index.0 <= pair[0].index.0 {
                return Err(ExportError::validation(
                    "captured frame buffer is not in strictly increasing index order",
                ));
            }
        }

        let mut current = codec.clone();
        let mut fallback_used = false;
        loop {
            let attempt = submit_buffer(frames, dims, &current, make_sink, cancel, &mut on_progress);
            match attempt {
                Ok(()) => {
                    return Ok(EncodeStats {
                        frames_submitted: frames.len() as u64,
                        codec: current,
                        fallback_used,
                    });
                }
                Err(ExportError::Cancelled) => return Err(ExportError::Cancelled),
                Err(e) => {
                    current = self.next_codec_or_bail(&current, fallback_used, e)?;
                    fallback_used = true;
                }
            }
        }
    }

    /// Single-pass mode: capture and encode in one concurrent loop.
    ///
    /// The scheduler resets and replays the animation on every attempt, so a
    /// fallback restart re-records from frame zero just like the two-phase
    /// path.
    pub fn record_live(
        &self,
        scheduler: &CaptureScheduler,
        scene: &SharedScene,
        compositor: &mut FrameCompositor,
        ticks: &mut dyn TickSource,
        dims: &RecordingDimensions,
        codec: &CodecDescriptor,
        make_sink: &mut SinkFactory<'_>,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(u64, u64),
    ) -> ExportResult<(EncodeStats, StopReason)> {
        let mut current = codec.clone();
        let mut fallback_used = false;
        loop {
            let mut sink = make_sink(&current)?;
            let attempt = (|| -> ExportResult<(u64, StopReason)> {
                sink.begin(sink_config(dims, &current))?;
                let mut submitted = 0u64;
                let reason = scheduler.run_streaming(
                    scene,
                    compositor,
                    ticks,
                    cancel,
                    |frame, target| {
                        sink.push_frame(frame.index, &frame.raster)?;
                        submitted += 1;
                        on_progress(submitted, target);
                        Ok(())
                    },
                )?;
                sink.end()?;
                Ok((submitted, reason))
            })();

            match attempt {
                Ok((submitted, reason)) => {
                    return Ok((
                        EncodeStats {
                            frames_submitted: submitted,
                            codec: current,
                            fallback_used,
                        },
                        reason,
                    ));
                }
                Err(ExportError::Cancelled) => return Err(ExportError::Cancelled),
                Err(e) => {
                    current = self.next_codec_or_bail(&current, fallback_used, e)?;
                    fallback_used = true;
                }
            }
        }
    }

    fn next_codec_or_bail(
        &self,
        failed: &CodecDescriptor,
        fallback_used: bool,
        err: ExportError,
    ) -> ExportResult<CodecDescriptor> {
        if fallback_used {
            // One fallback restart only; a second failure is terminal.
            return Err(err);
        }
        match self.report.fallback_after(failed) {
            Some(next) => {
                tracing::warn!(
                    failed = failed.encoder,
                    fallback = next.encoder,
                    error = %err,
                    "encoder failed; restarting from frame zero with fallback codec"
                );
                Ok(next.clone())
            }
            None => Err(err),
        }
    }
}

fn sink_config(dims: &RecordingDimensions, codec: &CodecDescriptor) -> SinkConfig {
    SinkConfig {
        width: dims.width,
        height: dims.height,
        fps: dims.fps,
        codec: codec.clone(),
        bitrate: dims.bitrate,
    }
}

fn submit_buffer(
    frames: &[CapturedFrame],
    dims: &RecordingDimensions,
    codec: &CodecDescriptor,
    make_sink: &mut SinkFactory<'_>,
    cancel: &CancelToken,
    on_progress: &mut impl FnMut(u64, u64),
) -> ExportResult<()> {
    let mut sink = make_sink(codec)?;
    sink.begin(sink_config(dims, codec))?;

    let total = frames.len() as u64;
    for (i, frame) in frames.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        sink.push_frame(frame.index, &frame.raster)?;
        on_progress(i as u64 + 1, total);
    }
    sink.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::compose::FrameRgba;
    use crate::encode::sink::InMemorySink;
    use crate::foundation::core::{
        AspectRatio, DeviceTier, FrameIndex, RecordingDimensions, Viewport,
    };
    use crate::probe::rank_candidates;

    fn dims() -> RecordingDimensions {
        RecordingDimensions::derive(
            Viewport {
                width: 320,
                height: 180,
            },
            AspectRatio::Wide,
            1.0,
            DeviceTier::Low,
        )
        .unwrap()
    }

    fn report() -> CapabilityReport {
        CapabilityReport {
            candidates: rank_candidates("libx264 libvpx-vp9"),
            hardware_encoder: false,
            layout_raster_available: false,
            ffmpeg_available: true,
            recommendations: Vec::new(),
        }
    }

    fn frames(n: u64) -> Vec<CapturedFrame> {
        let d = dims();
        (0..n)
            .map(|i| CapturedFrame {
                index: FrameIndex(i),
                timestamp_ms: i * 33,
                raster: FrameRgba::black(d.width, d.height),
            })
            .collect()
    }

    /// Sink that fails on the Nth push; shares observed pushes with the test.
    struct FailingSink {
        fail_at: u64,
        pushed: Arc<Mutex<Vec<u64>>>,
        count: u64,
    }

    impl FrameSink for FailingSink {
        fn begin(&mut self, _cfg: SinkConfig) -> ExportResult<()> {
            Ok(())
        }
        fn push_frame(&mut self, idx: FrameIndex, _frame: &FrameRgba) -> ExportResult<()> {
            if self.count == self.fail_at {
                return Err(ExportError::encode("synthetic encoder failure"));
            }
            self.count += 1;
            match self.pushed.lock() {
                Ok(mut v) => v.push(idx.0),
                Err(p) => p.into_inner().push(idx.0),
            }
            Ok(())
        }
        fn end(&mut self) -> ExportResult<()> {
            Ok(())
        }
    }

    #[test]
    fn happy_path_submits_all_frames_in_order() {
        let streamer = EncodeStreamer::new(report());
        let buf = frames(10);
        let rep = report();
        let best = rep.best().cloned().unwrap();

        let pushed = Arc::new(Mutex::new(Vec::<u64>::new()));
        let pushed_ref = pushed.clone();
        let mut factory = move |_codec: &CodecDescriptor| -> ExportResult<Box<dyn FrameSink>> {
            let pushed = pushed_ref.clone();
            struct Recorder {
                inner: InMemorySink,
                pushed: Arc<Mutex<Vec<u64>>>,
            }
            impl FrameSink for Recorder {
                fn begin(&mut self, cfg: SinkConfig) -> ExportResult<()> {
                    self.inner.begin(cfg)
                }
                fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> ExportResult<()> {
                    match self.pushed.lock() {
                        Ok(mut v) => v.push(idx.0),
                        Err(p) => p.into_inner().push(idx.0),
                    }
                    self.inner.push_frame(idx, frame)
                }
                fn end(&mut self) -> ExportResult<()> {
                    self.inner.end()
                }
            }
            Ok(Box::new(Recorder {
                inner: InMemorySink::new(),
                pushed,
            }))
        };

        let stats = streamer
            .encode_frames(
                &buf,
                &dims(),
                &best,
                &mut factory,
                &CancelToken::new(),
                |_, _| {},
            )
            .unwrap();
        assert_eq!(stats.frames_submitted, 10);
        assert!(!stats.fallback_used);
        let order = match pushed.lock() {
            Ok(v) => v.clone(),
            Err(p) => p.into_inner().clone(),
        };
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn encoder_failure_restarts_from_frame_zero_with_fallback() {
        let streamer = EncodeStreamer::new(report());
        let buf = frames(180);
        let rep = report();
        let best = rep.best().cloned().unwrap();

        let pushed = Arc::new(Mutex::new(Vec::<u64>::new()));
        let pushed_ref = pushed.clone();
        let mut first = true;
        let mut codecs_seen = Vec::new();
        let mut factory = |codec: &CodecDescriptor| -> ExportResult<Box<dyn FrameSink>> {
            codecs_seen.push(codec.encoder);
            if first {
                first = false;
                Ok(Box::new(FailingSink {
                    fail_at: 50,
                    pushed: pushed_ref.clone(),
                    count: 0,
                }))
            } else {
                Ok(Box::new(FailingSink {
                    fail_at: u64::MAX,
                    pushed: pushed_ref.clone(),
                    count: 0,
                }))
            }
        };

        let stats = streamer
            .encode_frames(
                &buf,
                &dims(),
                &best,
                &mut factory,
                &CancelToken::new(),
                |_, _| {},
            )
            .unwrap();
        assert!(stats.fallback_used);
        assert_eq!(stats.frames_submitted, 180);
        assert_eq!(stats.codec.encoder, "libvpx-vp9");

        let order = match pushed.lock() {
            Ok(v) => v.clone(),
            Err(p) => p.into_inner().clone(),
        };
        // First attempt pushed 0..50, then the fallback sink restarted at 0:
        // the two runs are never interleaved.
        assert_eq!(&order[..50], (0..50).collect::<Vec<_>>().as_slice());
        assert_eq!(&order[50..], (0..180).collect::<Vec<_>>().as_slice());
        assert_eq!(codecs_seen, vec!["libx264", "libvpx-vp9"]);
    }

    #[test]
    fn second_failure_is_terminal() {
        let streamer = EncodeStreamer::new(report());
        let buf = frames(10);
        let rep = report();
        let best = rep.best().cloned().unwrap();

        let pushed = Arc::new(Mutex::new(Vec::<u64>::new()));
        let mut factory = |_codec: &CodecDescriptor| -> ExportResult<Box<dyn FrameSink>> {
            Ok(Box::new(FailingSink {
                fail_at: 2,
                pushed: pushed.clone(),
                count: 0,
            }))
        };

        let err = streamer
            .encode_frames(
                &buf,
                &dims(),
                &best,
                &mut factory,
                &CancelToken::new(),
                |_, _| {},
            )
            .unwrap_err();
        assert!(err.to_string().contains("synthetic encoder failure"));
    }

    #[test]
    fn cancellation_mid_encode_is_not_retried() {
        let streamer = EncodeStreamer::new(report());
        let buf = frames(10);
        let rep = report();
        let best = rep.best().cloned().unwrap();

        let cancel = CancelToken::new();
        let mut factory = |_codec: &CodecDescriptor| -> ExportResult<Box<dyn FrameSink>> {
            Ok(Box::new(InMemorySink::new()))
        };

        let mut seen = 0u64;
        let cancel_inner = cancel.clone();
        let err = streamer
            .encode_frames(&buf, &dims(), &best, &mut factory, &cancel, |done, _| {
                seen = done;
                if done == 4 {
                    cancel_inner.cancel();
                }
            })
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(seen, 4);
    }

    #[test]
    fn unordered_buffer_is_rejected() {
        let streamer = EncodeStreamer::new(report());
        let mut buf = frames(3);
        buf.swap(0, 2);
        let rep = report();
        let best = rep.best().cloned().unwrap();
        let mut factory = |_codec: &CodecDescriptor| -> ExportResult<Box<dyn FrameSink>> {
            Ok(Box::new(InMemorySink::new()))
        };
        assert!(
            streamer
                .encode_frames(
                    &buf,
                    &dims(),
                    &best,
                    &mut factory,
                    &CancelToken::new(),
                    |_, _| {},
                )
                .is_err()
        );
    }
}
