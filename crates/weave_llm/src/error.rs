//! Failure modes of talking to the local LLM endpoint.

use thiserror::Error;

/// Everything that can go wrong calling out to the chat model.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The endpoint refused the connection or could not be reached at all.
    #[error("llm endpoint unreachable at {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint responded, but not with success (model not pulled, bad request, etc).
    #[error("llm endpoint returned {status}: {body}")]
    NotAvailable { status: u16, body: String },

    /// No further output arrived within the configured timeout.
    #[error("llm request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A streamed line was not valid JSON, or did not match the expected chat-chunk shape.
    #[error("malformed response from llm endpoint: {0}")]
    MalformedJson(String),

    /// The request was cancelled before completion.
    #[error("llm request cancelled")]
    Cancelled,
}
