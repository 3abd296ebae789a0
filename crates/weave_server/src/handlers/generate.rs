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

//! `POST /generate` — manual, agent-independent image generation.

use axum::extract::State;
use axum::{Extension, Form};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use weave_core::conversation::{GenerationSettings, PreviewStatus};
use weave_core::sse::{GenerationSource, SseEvent};

use crate::error::WeaveError;
use crate::generation::{self, GenerationTarget};
use crate::session_middleware::SessionId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateForm {
    pub prompt: Option<String>,
    pub steps: Option<String>,
    pub cfg: Option<String>,
    pub seed: Option<String>,
    pub message_id: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

fn parse_or<T: std::str::FromStr>(raw: &Option<String>, default: T) -> T {
    raw.as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

pub async fn generate(
    State(state): State<AppState>,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Form(form): Form<GenerateForm>,
) -> Result<axum::Json<Value>, WeaveError> {
    if !state.rate_limiter.allow_generate(&session_id) {
        return Err(WeaveError::RateLimited);
    }

    let session = state.sessions.get_or_create(&session_id);

    let current_settings = session.read().await.settings;
    let prompt = match form.prompt.filter(|p| !p.trim().is_empty()) {
        Some(p) => p,
        None => session.read().await.conversation.current_prompt().to_owned(),
    };
    if prompt.trim().is_empty() {
        return Err(WeaveError::Validation("prompt is required".into()));
    }

    let width = form.width.unwrap_or(state.settings.width);
    let height = form.height.unwrap_or(state.settings.height);
    if !(64..=2048).contains(&width) || width % 64 != 0 || !(64..=2048).contains(&height) || height % 64 != 0 {
        return Err(WeaveError::Validation(format!(
            "width/height must be 64..2048 and a multiple of 64 (got {width}x{height})"
        )));
    }

    let clamp = weave_core::clamp_generation(
        parse_or(&form.steps, current_settings.steps),
        parse_or(&form.cfg, current_settings.cfg),
        parse_or(&form.seed, current_settings.seed),
    );
    let settings = GenerationSettings {
        steps: clamp.steps,
        cfg: clamp.cfg,
        seed: clamp.seed,
    };
    session.write().await.settings = settings;
    state.sessions.persist(&session_id).await?;

    let message_id = form.message_id.filter(|id| *id > 0);
    generation::emit_generation_started(&state, &session_id, GenerationSource::Manual, message_id);

    let target = match message_id {
        Some(message_id) => GenerationTarget::SessionMessage {
            session_id: session_id.clone(),
            message_id,
        },
        None => GenerationTarget::Ephemeral,
    };

    match generation::generate_image(&state, &prompt, settings, width, height, target).await {
        Ok(image) => {
            if let Some(message_id) = message_id {
                let mut session = session.write().await;
                let _ = session.conversation.update_message_preview(
                    message_id,
                    PreviewStatus::Complete,
                    Some(image.url.clone()),
                );
                drop(session);
                state.sessions.persist(&session_id).await?;
            }
            generation::emit_image_ready(&state, &session_id, &image, message_id);
        }
        Err(e) => {
            error!(session_id, error = %e, "manual generation failed");
            let _ = state.sse.send(
                &session_id,
                SseEvent::Error {
                    message: "An error occurred while processing your message".into(),
                },
            );
        }
    }

    // Per the error handling policy, long-running flows always return 200 + {"status":"ok"};
    // failures are reported in-stream via the SSE `error` event above.
    Ok(axum::Json(json!({ "status": "ok" })))
}
