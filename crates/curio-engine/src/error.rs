use std::time::Duration;

use curio_core::errors::ProviderError;
use curio_store::StoreError;
use thiserror::Error;

/// Errors that can end a generation run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("generation aborted")]
    Aborted,

    #[error("stream stalled for {0:?}")]
    StreamStalled(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Client-facing description. Raw provider and store detail stays in the
    /// logs and the generation's error record.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Aborted => "The generation was cancelled.",
            Self::StreamStalled(_) => "The answer stream stalled and was stopped.",
            Self::Provider(_) => "The language model is currently unavailable.",
            Self::Store(_) | Self::Internal(_) => {
                "Something went wrong while generating this answer."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_converts() {
        let err: EngineError = ProviderError::Overloaded.into();
        assert!(matches!(err, EngineError::Provider(_)));
        assert_eq!(err.to_string(), "provider error: provider overloaded");
    }

    #[test]
    fn store_error_converts() {
        let err: EngineError = StoreError::NotFound("generation gen_1".into()).into();
        assert!(matches!(err, EngineError::Store(_)));
    }

    #[test]
    fn user_message_never_leaks_detail() {
        let err: EngineError =
            ProviderError::AuthenticationFailed("key sk-secret rejected".into()).into();
        assert!(!err.user_message().contains("sk-secret"));

        let err = EngineError::Internal("column frames.payload corrupt".into());
        assert!(!err.user_message().contains("frames.payload"));
    }
}
