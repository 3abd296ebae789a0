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

//! Route wiring: every handler, bound to its path and method, with the session-cookie and
//! body-size-limit layers applied across the board.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::assets::serve_static;
use crate::handlers::{chat, events, generate, images, index, message_state, new_chat, prompt, ready};
use crate::session_middleware::session_layer;
use crate::state::AppState;

/// Request bodies above this size are rejected before a handler ever sees them.
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(index::index))
        .route("/events", get(events::events))
        .route("/chat", post(chat::chat))
        .route("/prompt", post(prompt::update_prompt))
        .route("/generate", post(generate::generate))
        .route("/new-chat", post(new_chat::new_chat))
        .route("/message/:id/state", get(message_state::message_state))
        .route("/images/:id", get(images::ephemeral_image))
        .route("/sessions/:sid/images/:filename", get(images::session_image))
        .layer(middleware::from_fn(session_layer))
        // routes added after this point are outside the session-cookie layer: static assets and
        // the readiness probe need no session identity.
        .route("/static/*path", get(serve_static))
        .route("/ready", get(ready::ready))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
