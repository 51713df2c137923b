//! Container runtime error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

/// Errors raised while talking to the container runtime
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error("invalid runtime host configuration {host}: {message}")]
    InvalidHost { host: String, message: String },

    #[error("failed to connect to container runtime: {message}")]
    Connection { message: String },

    #[error("tunnel to {host} failed: {message}")]
    Tunnel { host: String, message: String },

    #[error("container runtime did not answer ping: {message}")]
    Unreachable { message: String },

    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },
}

impl RuntimeError {
    /// Create an operation error tagged with the runtime call that failed
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl UserFacingError for RuntimeError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidHost { .. } => Some("Fix the DOCKER_HOST environment variable."),
            Self::Connection { .. } | Self::Unreachable { .. } => {
                Some("Ensure the container runtime is running and reachable.")
            }
            Self::Tunnel { .. } => {
                Some("Check that `ssh` can log in to the remote host without a prompt.")
            }
            Self::Operation { .. } => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Unreachable { .. } | Self::Tunnel { .. }
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::InvalidHost { .. } => "runtime.invalid_host",
            Self::Connection { .. } => "runtime.connection",
            Self::Tunnel { .. } => "runtime.tunnel",
            Self::Unreachable { .. } => "runtime.unreachable",
            Self::Operation { .. } => "runtime.operation",
        };
        Some(code)
    }
}
