use std::fmt;

/// Failures raised at the engine's component seams.
///
/// None of these ever reach a caller of the decision engine: each one maps
/// onto a fixed fallback (fail closed, fail open, or continue in memory).
#[derive(Debug, Clone, PartialEq)]
pub enum GuardError {
    /// The input could not be parsed as a URL. Fails closed.
    InvalidUrl { input: String, reason: String },
    /// The reputation service was unreachable or answered with an error. Fails open.
    NetworkFailure { message: String },
    /// The persistence collaborator could not read or write a key.
    StorageFailure { key: String, message: String },
    /// Stored learner maps could not be decoded. Reset to empty.
    LearnerDataCorruption { message: String },
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::InvalidUrl { input, reason } => {
                write!(f, "Invalid URL '{}': {}", input, reason)
            }
            GuardError::NetworkFailure { message } => {
                write!(f, "Reputation lookup failed: {}", message)
            }
            GuardError::StorageFailure { key, message } => {
                write!(f, "Storage failure for key '{}': {}", key, message)
            }
            GuardError::LearnerDataCorruption { message } => {
                write!(f, "Learner data corrupted: {}", message)
            }
        }
    }
}

impl std::error::Error for GuardError {}

impl From<reqwest::Error> for GuardError {
    fn from(e: reqwest::Error) -> Self {
        GuardError::NetworkFailure {
            message: e.to_string(),
        }
    }
}
