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

use axum::extract::{Path, State};
use axum::Extension;
use serde_json::{json, Value};

use crate::error::WeaveError;
use crate::session_middleware::SessionId;
use crate::state::AppState;

/// `GET /message/{id}/state` — the current snapshot for a message, if any.
pub async fn message_state(
    State(state): State<AppState>,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Path(message_id): Path<u64>,
) -> Result<axum::Json<Value>, WeaveError> {
    let session = state.sessions.get_or_create(&session_id);
    let session = session.read().await;
    let message = session
        .conversation
        .get_message(message_id)
        .ok_or(WeaveError::NotFound)?;

    let body = match &message.snapshot {
        Some(snapshot) => json!({
            "message_id": message_id,
            "prompt": snapshot.prompt,
            "steps": snapshot.steps,
            "cfg": snapshot.cfg,
            "seed": snapshot.seed,
            "preview_status": snapshot.preview_status,
            "preview_url": snapshot.preview_url,
        }),
        None => json!({
            "message_id": message_id,
            "prompt": Value::Null,
            "steps": Value::Null,
            "cfg": Value::Null,
            "seed": Value::Null,
            "preview_status": "none",
            "preview_url": Value::Null,
        }),
    };

    Ok(axum::Json(body))
}
