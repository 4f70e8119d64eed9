//! Encoding: frame sinks and the encode streamer.
//!
//! Sinks consume composited frames in strictly increasing index order; the
//! streamer owns codec fallback and feeds sinks for both export modes.

pub mod ffmpeg;
pub mod sink;
pub mod streamer;

pub use ffmpeg::{FfmpegSink, FfmpegSinkOpts};
pub use sink::{FrameSink, InMemorySink, SinkConfig};
pub use streamer::{EncodeStats, EncodeStreamer, EncodedFile};
