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

use axum::extract::State;
use axum::{Extension, Form};
use serde::Deserialize;
use serde_json::{json, Value};
use weave_core::sse::SseEvent;

use crate::error::WeaveError;
use crate::session_middleware::SessionId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PromptForm {
    #[serde(default)]
    pub prompt: String,
}

/// `POST /prompt` — lets the user directly override the current prompt, independent of the
/// agent. An empty body clears it.
pub async fn update_prompt(
    State(state): State<AppState>,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Form(form): Form<PromptForm>,
) -> Result<axum::Json<Value>, WeaveError> {
    let session = state.sessions.get_or_create(&session_id);
    {
        let mut session = session.write().await;
        session.conversation.update_prompt(form.prompt.clone());
    }
    state.sessions.persist(&session_id).await?;

    let _ = state
        .sse
        .send(&session_id, SseEvent::PromptUpdate { prompt: form.prompt });

    Ok(axum::Json(json!({ "status": "ok" })))
}
