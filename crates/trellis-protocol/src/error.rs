use thiserror::Error;

/// A request or value could not be constructed from the given arguments.
///
/// Always the caller's fault; never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid argument `{name}`: {reason}")]
pub struct InvalidArgument {
    pub name: String,
    pub reason: String,
}

impl InvalidArgument {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
