use crate::encode::EncodedFile;

/// UI-facing progress snapshot; the only session state the UI reads.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Progress {
    /// 0–100, monotonically non-decreasing within a session.
    pub percent: u8,
    /// Short status line for the progress display.
    pub message: String,
}

/// Terminal result of an export session.
#[derive(Debug)]
pub enum ExportOutcome {
    /// The session finished. `file` is `None` for the manual-guide mode, which
    /// leaves recording to an external tool.
    Completed {
        /// The finished artifact, when the session produced one.
        file: Option<EncodedFile>,
    },
    /// The user cancelled; no output was produced.
    Cancelled,
    /// The session failed terminally.
    Failed {
        /// Human-readable failure reason.
        message: String,
    },
}

/// Receiver for progress and outcome events (the UI collaborator).
pub trait StatusSink: Send {
    /// Progress update; `progress.percent` never decreases.
    fn on_progress(&mut self, _progress: &Progress) {}

    /// Non-fatal degradation notice (e.g. codec fallback).
    fn on_notice(&mut self, _notice: &str) {}

    /// Terminal outcome; emitted exactly once.
    fn on_outcome(&mut self, _outcome: &ExportOutcome) {}
}

/// Sink that ignores everything.
#[derive(Default)]
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {}

/// Enforces monotonic progress over a raw [`StatusSink`].
pub(crate) struct ProgressReporter<'a> {
    sink: &'a mut dyn StatusSink,
    last_percent: u8,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn new(sink: &'a mut dyn StatusSink) -> Self {
        Self {
            sink,
            last_percent: 0,
        }
    }

    /// Report progress; a percent lower than anything already reported is
    /// lifted to the previous value so the bar never moves backwards.
    pub(crate) fn report(&mut self, percent: u8, message: impl Into<String>) {
        let percent = percent.min(100).max(self.last_percent);
        self.last_percent = percent;
        self.sink.on_progress(&Progress {
            percent,
            message: message.into(),
        });
    }

    pub(crate) fn notice(&mut self, notice: &str) {
        tracing::info!(notice, "capability notice");
        self.sink.on_notice(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        percents: Vec<u8>,
    }

    impl StatusSink for Recorder {
        fn on_progress(&mut self, progress: &Progress) {
            self.percents.push(progress.percent);
        }
    }

    #[test]
    fn percent_is_monotonic_and_capped() {
        let mut rec = Recorder::default();
        {
            let mut reporter = ProgressReporter::new(&mut rec);
            reporter.report(10, "a");
            reporter.report(5, "b");
            reporter.report(70, "c");
            reporter.report(255, "d");
        }
        assert_eq!(rec.percents, vec![10, 10, 70, 100]);
    }
}
