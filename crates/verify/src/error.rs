use thiserror::Error;

/// Failures that stop a document run.
///
/// Per-mention problems (unparseable values, missing candidates, scale
/// mismatches, an unreachable matcher) are not errors: they surface as
/// reason codes on the classification instead.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (tolerance out of range, missing endpoint, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A claims or table file violates the input schema. Fatal for its document only.
    #[error("malformed input in {file}: {message}")]
    MalformedInput { file: String, message: String },
    /// IO error (file read, etc.).
    #[error("IO error: {0}")]
    Io(String),
}

impl VerifyError {
    pub fn malformed(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedInput {
            file: file.into(),
            message: message.into(),
        }
    }

    /// True when the error only invalidates the document it came from.
    pub fn is_document_local(&self) -> bool {
        matches!(self, Self::MalformedInput { .. } | Self::Io(_))
    }
}
