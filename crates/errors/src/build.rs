//! Build orchestration error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("no usable builder found (tried: {tried})")]
    NoUsableBuilder { tried: String },

    #[error("artifact extraction failed: {message}")]
    ExtractionFailed { message: String },

    #[error("invalid module specification: {input}")]
    InvalidModule { input: String },

    #[error("invalid platform: {input}")]
    InvalidPlatform { input: String },
}

impl UserFacingError for BuildError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NoUsableBuilder { .. } => {
                Some("Start a container runtime (for example Docker) or select another builder.")
            }
            Self::InvalidModule { .. } => Some("Use the form <name>@<tag>, for example k6@v0.49.0."),
            Self::InvalidPlatform { .. } => Some("Use the form <os>/<arch>, for example linux/amd64."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::ExtractionFailed { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NoUsableBuilder { .. } => "build.no_usable_builder",
            Self::ExtractionFailed { .. } => "build.extraction_failed",
            Self::InvalidModule { .. } => "build.invalid_module",
            Self::InvalidPlatform { .. } => "build.invalid_platform",
        };
        Some(code)
    }
}
