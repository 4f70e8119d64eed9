/// Crate-wide result alias.
pub type ExportResult<T> = Result<T, ExportError>;

/// Error taxonomy for the export pipeline.
///
/// `Prerequisite` is the only class surfaced before any resource is allocated.
/// `Cancelled` and `Timeout` are not failures in the usual sense: cancellation is
/// honored promptly with full teardown, and a timeout is a soft stop that keeps
/// partial results.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("prerequisite not met: {0}")]
    Prerequisite(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("draw error: {0}")]
    Draw(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("export cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExportError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn prerequisite(msg: impl Into<String>) -> Self {
        Self::Prerequisite(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    pub fn draw(msg: impl Into<String>) -> Self {
        Self::Draw(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Whether this error represents user cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            ExportError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(
            ExportError::prerequisite("x")
                .to_string()
                .contains("prerequisite not met:")
        );
        assert!(
            ExportError::capture("x")
                .to_string()
                .contains("capture error:")
        );
        assert!(ExportError::draw("x").to_string().contains("draw error:"));
        assert!(
            ExportError::encode("x")
                .to_string()
                .contains("encode error:")
        );
    }

    #[test]
    fn cancelled_is_not_conflated_with_failures() {
        assert!(ExportError::Cancelled.is_cancelled());
        assert!(!ExportError::encode("x").is_cancelled());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = ExportError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
