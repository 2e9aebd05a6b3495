use std::fmt;

/// Failure of an external collaborator (manifest lookup, vector search,
/// availability oracle, history query, ...).
///
/// These never propagate to the host: every call site decides on a fallback
/// through [`RecoverExt::or_fallback`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{collaborator}: {message}")]
pub struct RecoverableError {
    pub collaborator: String,
    pub message: String,
}

impl RecoverableError {
    pub fn new(collaborator: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            collaborator: collaborator.into(),
            message: message.to_string(),
        }
    }
}

pub type Recoverable<T> = Result<T, RecoverableError>;

pub trait RecoverExt<T> {
    /// Log the error at `warn` and substitute `fallback`.
    fn or_fallback(self, context: &str, fallback: T) -> T;
}

impl<T> RecoverExt<T> for Recoverable<T> {
    fn or_fallback(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(
                    collaborator = %err.collaborator,
                    error = %err.message,
                    context,
                    "external collaborator failed; using fallback"
                );
                fallback
            }
        }
    }
}
