use thiserror::Error;

use crate::api::{ApiError, FallbackMessages};

/// Failures that reach the caller of the orchestrator. Transient poll
/// failures and cancellations never show up here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("No destination selected")]
    NoSelection,

    #[error("{message}")]
    StartFailed { message: String },

    #[error("{message}")]
    Fatal { message: String, attempts: u32 },
}

impl SearchError {
    pub fn start_failed(err: &ApiError, messages: &FallbackMessages) -> Self {
        let message = err
            .server_message()
            .unwrap_or(&messages.start_failed)
            .to_string();
        SearchError::StartFailed { message }
    }

    pub fn fatal(err: &ApiError, attempts: u32, messages: &FallbackMessages) -> Self {
        let message = match err {
            ApiError::Http { payload, .. } => payload
                .message
                .clone()
                .unwrap_or_else(|| messages.poll_failed.clone()),
            ApiError::Network(_) => messages.network_failed.clone(),
            ApiError::Cancelled => messages.search_failed.clone(),
        };
        SearchError::Fatal { message, attempts }
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }
}
