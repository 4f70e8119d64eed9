//! Export session: orchestration, progress reporting, lifecycle.

pub mod export;
pub mod progress;

pub use export::{
    ExportMode, ExportOptions, ExportSession, NullUiHost, OwnedSinkFactory, SessionState, UiHost,
};
pub use progress::{ExportOutcome, NullStatusSink, Progress, StatusSink};
