/* Copyright 2023- The Binedge, Lda team. All rights reserved.
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *     http://www.apache.org/licenses/LICENSE-2.0
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Weave error handling.
//!
//! Every error the HTTP surface can produce funnels through [`WeaveError`], which classifies
//! each cause into the taxonomy the orchestration backend promises: validation errors and
//! rate-limiting are surfaced directly to the caller; upstream and internal failures are logged
//! in full here and reported to the client as a generic message (the chat and generate handlers
//! prefer an in-stream SSE `error` event over an HTTP error body; see `chat.rs`/`generate.rs`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Abstraction over all errors the HTTP surface can produce. Allows `?` everywhere while keeping
/// the validation/rate-limit/upstream/internal taxonomy at the boundary.
#[derive(Debug, Error)]
pub enum WeaveError {
    /// Client-supplied input failed validation (4xx, message is safe to return verbatim).
    #[error("{0}")]
    Validation(String),

    /// The per-session rate limit was exceeded.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The requested resource does not exist, or the session has no access to it.
    #[error("not found")]
    NotFound,

    /// The session cookie does not authorise access to the requested resource.
    #[error("forbidden")]
    Forbidden,

    /// A required external collaborator (LLM service, compute worker) is unreachable.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An internal failure: codec bugs, I/O failures, anything not attributable to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<weave_protocol::CodecError> for WeaveError {
    fn from(e: weave_protocol::CodecError) -> Self {
        WeaveError::Validation(e.to_string())
    }
}

impl From<weave_compute::ComputeError> for WeaveError {
    fn from(e: weave_compute::ComputeError) -> Self {
        WeaveError::UpstreamUnavailable(e.to_string())
    }
}

impl From<weave_llm::LlmError> for WeaveError {
    fn from(e: weave_llm::LlmError) -> Self {
        WeaveError::UpstreamUnavailable(e.to_string())
    }
}

impl From<weave_core::error::PersistenceError> for WeaveError {
    fn from(e: weave_core::error::PersistenceError) -> Self {
        WeaveError::Internal(e.to_string())
    }
}

impl From<weave_core::error::ImageStoreError> for WeaveError {
    fn from(e: weave_core::error::ImageStoreError) -> Self {
        match e {
            weave_core::error::ImageStoreError::NotFound(_)
            | weave_core::error::ImageStoreError::InvalidId(_) => WeaveError::NotFound,
            weave_core::error::ImageStoreError::TooLarge { .. } => {
                WeaveError::Validation(e.to_string())
            }
            weave_core::error::ImageStoreError::Io { .. } => WeaveError::Internal(e.to_string()),
        }
    }
}

impl From<weave_core::error::ConversationError> for WeaveError {
    fn from(e: weave_core::error::ConversationError) -> Self {
        WeaveError::Internal(e.to_string())
    }
}

impl From<std::io::Error> for WeaveError {
    fn from(e: std::io::Error) -> Self {
        WeaveError::Internal(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl WeaveError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            WeaveError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            WeaveError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate-limited"),
            WeaveError::NotFound => (StatusCode::NOT_FOUND, "not-found"),
            WeaveError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            WeaveError::UpstreamUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "upstream-unavailable")
            }
            WeaveError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }

    /// The message safe to show a caller: validation/rate-limit/not-found/forbidden messages are
    /// specific; upstream and internal failures are logged here in full and replaced with a
    /// generic message, so implementation details never leak to the browser.
    fn public_message(&self) -> String {
        match self {
            WeaveError::Validation(msg) => msg.clone(),
            WeaveError::RateLimited => "too many requests, please slow down".to_owned(),
            WeaveError::NotFound => "not found".to_owned(),
            WeaveError::Forbidden => "forbidden".to_owned(),
            WeaveError::UpstreamUnavailable(_) | WeaveError::Internal(_) => {
                error!(error = %self, "request failed");
                "An error occurred while processing your message".to_owned()
            }
        }
    }
}

impl IntoResponse for WeaveError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorBody {
            error: self.public_message(),
            code,
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_400() {
        let err = WeaveError::Validation("bad width".into());
        assert_eq!(err.status_and_code().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rate_limited_maps_to_429() {
        assert_eq!(
            WeaveError::RateLimited.status_and_code().0,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn upstream_unavailable_maps_to_503_with_generic_message() {
        let err = WeaveError::UpstreamUnavailable("connection refused".into());
        assert_eq!(err.status_and_code().0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.public_message(), "An error occurred while processing your message");
    }

    #[test]
    fn internal_errors_never_leak_details_to_the_client() {
        let err = WeaveError::Internal("disk full at /secret/path".into());
        assert!(!err.public_message().contains("/secret/path"));
    }

    #[test]
    fn image_store_not_found_maps_to_weave_not_found() {
        let err: WeaveError = weave_core::error::ImageStoreError::NotFound(uuid::Uuid::nil()).into();
        assert!(matches!(err, WeaveError::NotFound));
    }
}
