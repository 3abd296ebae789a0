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
use axum::Extension;
use serde_json::{json, Value};

use crate::error::WeaveError;
use crate::session_middleware::SessionId;
use crate::state::AppState;

/// `POST /new-chat` — clears a session's conversation, in memory and on disk.
pub async fn new_chat(
    State(state): State<AppState>,
    Extension(SessionId(session_id)): Extension<SessionId>,
) -> Result<axum::Json<Value>, WeaveError> {
    state.sessions.clear(&session_id).await?;
    Ok(axum::Json(json!({ "status": "ok" })))
}
