//! Domain error types.

/// A parse error with position information for bar condition and indicator
/// expressions.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for thales.
#[derive(Debug, thiserror::Error)]
pub enum ThalesError {
    #[error("invalid position parameters: {reason}")]
    InvalidPositionParameters { reason: String },

    #[error("position {id} is already closed")]
    PositionAlreadyClosed { id: String },

    #[error("position {id} not found in {partition}")]
    PositionNotFound { id: String, partition: String },

    #[error("refusing to purge live positions of {strategy} without confirmation")]
    LivePurgeRefused { strategy: String },

    #[error("invalid scope name {name:?}: {reason}")]
    InvalidScope { name: String, reason: String },

    #[error("no data available: {reason}")]
    NoDataAvailable { reason: String },

    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("storage error at {path}: {reason}")]
    Storage { path: String, reason: String },

    #[error("invalid policy parameters: {reason}")]
    InvalidPolicyParameters { reason: String },

    #[error("policy {policy} failed: {reason}")]
    Policy { policy: String, reason: String },

    #[error("backtest run already started (state: {state})")]
    RunAlreadyStarted { state: String },

    #[error("invalid bar condition {input:?}: {reason}")]
    InvalidCondition { input: String, reason: String },

    #[error(transparent)]
    IndicatorParse(#[from] ParseError),

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ThalesError {
    /// True for the terminal "series exhausted" condition the runner treats as
    /// a normal end of data.
    pub fn is_no_data(&self) -> bool {
        matches!(self, ThalesError::NoDataAvailable { .. })
    }
}

impl From<&ThalesError> for std::process::ExitCode {
    fn from(err: &ThalesError) -> Self {
        let code: u8 = match err {
            ThalesError::Io(_) | ThalesError::Storage { .. } => 1,
            ThalesError::ConfigParse { .. }
            | ThalesError::ConfigMissing { .. }
            | ThalesError::ConfigInvalid { .. } => 2,
            ThalesError::NoDataAvailable { .. } | ThalesError::DataSource { .. } => 3,
            ThalesError::InvalidPositionParameters { .. }
            | ThalesError::PositionAlreadyClosed { .. }
            | ThalesError::PositionNotFound { .. }
            | ThalesError::LivePurgeRefused { .. }
            | ThalesError::InvalidScope { .. } => 4,
            ThalesError::InvalidPolicyParameters { .. }
            | ThalesError::Policy { .. }
            | ThalesError::RunAlreadyStarted { .. }
            | ThalesError::InvalidCondition { .. }
            | ThalesError::IndicatorParse(_) => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_context_points_at_position() {
        let err = ParseError {
            message: "expected ')'".into(),
            position: 4,
        };
        let rendered = err.display_with_context("SMA(20");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "SMA(20");
        assert_eq!(lines[1], "    ^");
        assert!(lines[2].contains("expected ')'"));
    }

    #[test]
    fn no_data_is_recognised() {
        let err = ThalesError::NoDataAvailable {
            reason: "end of 2020".into(),
        };
        assert!(err.is_no_data());
        let other = ThalesError::DataSource {
            reason: "bad row".into(),
        };
        assert!(!other.is_no_data());
    }

    #[test]
    fn messages_name_the_position() {
        let err = ThalesError::PositionAlreadyClosed { id: "abc".into() };
        assert_eq!(err.to_string(), "position abc is already closed");
    }
}
