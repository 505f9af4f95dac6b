//! Crate-level error handling
//!
//! The allocation fast path never returns errors: allocation failure is a
//! `None`, free failure is logged. [`AllocatorError`] covers everything around
//! it, configuration parsing and validation plus runtime setup done by callers
//! (the probe binary, test fixtures).

pub use thiserror;

use crate::backend::hip_backend::error::HipError;

/// Unified error type for configuration and setup
#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    /// Device runtime call failed
    #[error("HIP error: {0}")]
    Hip(#[from] HipError),

    /// Environment variable holds a value that cannot be parsed
    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidEnvVar {
        name: String,
        value: String,
        reason: String,
    },

    /// Configuration is well-formed but unusable
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl AllocatorError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            AllocatorError::InvalidEnvVar { .. } | AllocatorError::InvalidConfiguration(_) => {
                ErrorCategory::User
            }
            AllocatorError::Hip(err) if err.is_recoverable() => ErrorCategory::Recoverable,
            AllocatorError::Hip(_) => ErrorCategory::Internal,
        }
    }

    /// Whether retrying the failed operation may succeed
    pub fn is_recoverable(&self) -> bool {
        self.category() == ErrorCategory::Recoverable
    }
}

/// Broad error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caused by user input or configuration; fix the input
    User,
    /// Temporary condition; retrying may help
    Recoverable,
    /// Driver failure or bug
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "user"),
            ErrorCategory::Recoverable => write!(f, "recoverable"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}

/// Result alias for configuration and setup
pub type AllocatorResult<T> = Result<T, AllocatorError>;
