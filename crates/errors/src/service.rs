//! Build service error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("failed to resolve dependencies: {message}")]
    ResolveFailed { message: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
}

impl UserFacingError for ServiceError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Bind { .. } => Some("Choose a free listen address with --addr."),
            Self::ResolveFailed { .. } => Some("Check the requested extension names."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Bind { .. } => "service.bind",
            Self::BadRequest { .. } => "service.bad_request",
            Self::ResolveFailed { .. } => "service.resolve_failed",
            Self::Protocol { .. } => "service.protocol",
            Self::Timeout { .. } => "service.timeout",
        };
        Some(code)
    }
}
