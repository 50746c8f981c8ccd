use thiserror::Error;

/// A normalized configuration the Rule Compiler could not turn into a rule.
///
/// Validation is expected to have rejected every such input already, so any
/// of these at compile time points at a validator defect.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The custom sub-compiler rejected the rule string.
    #[error("custom rule {rule:?} failed to compile: {reason}")]
    CustomRule { rule: String, reason: String },

    /// Interval, day, ordinal or weekday set outside the supported range.
    #[error("invalid rule parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;
