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

//! `generateImage`: the single path both the chat orchestrator and the manual `/generate`
//! endpoint use to turn a prompt and settings into pixels via the compute client, and to land
//! the result in the right image store.

use weave_core::conversation::GenerationSettings;
use weave_core::sse::{GenerationSource, SseEvent};
use weave_protocol::EncodeRequest;
use weave_protocol::response::ImageResult;

use crate::error::WeaveError;
use crate::state::AppState;

/// Truncates `prompt` to the protocol's per-encoder byte limit at a UTF-8 boundary, logging if it
/// had to.
fn truncate_prompt(prompt: &str, max_bytes: usize) -> String {
    if prompt.len() <= max_bytes {
        return prompt.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !prompt.is_char_boundary(end) {
        end -= 1;
    }
    tracing::info!(
        original_len = prompt.len(),
        truncated_len = end,
        "truncated prompt to protocol limit"
    );
    prompt[..end].to_owned()
}

/// Where a generated image landed: the ephemeral in-memory store, or a specific session message
/// on disk.
pub enum GenerationTarget {
    Ephemeral,
    SessionMessage { session_id: String, message_id: u64 },
}

/// The outcome of a generation, with enough information to emit an `image-ready` event.
pub struct GeneratedImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Sends a generation request to the compute client, returning the raw result. This is the slow
/// part of a generation (a compute RPC that can run up to ~120s) and is the half of the work the
/// chat orchestrator runs concurrently with Stage 2 streaming: it only needs a prompt and
/// settings, not a finalized message id.
pub async fn run_compute(
    state: &AppState,
    prompt: &str,
    settings: GenerationSettings,
    width: u32,
    height: u32,
) -> Result<ImageResult, WeaveError> {
    let prompt = truncate_prompt(prompt, weave_protocol::request::MAX_PROMPT_LEN);

    let request = EncodeRequest {
        request_id: 0,
        model_id: 0,
        width,
        height,
        steps: settings.steps,
        cfg: settings.cfg,
        seed: settings.seed,
        prompt,
    };

    Ok(state.compute.generate(request).await?)
}

/// Lands a raw compute result in the store named by `target`. This is the fast, local part of a
/// generation (no network I/O) and is the half that needs a finalized message id, so it runs
/// after the chat orchestrator knows one.
pub fn store_result(state: &AppState, result: ImageResult, target: GenerationTarget) -> Result<GeneratedImage, WeaveError> {
    match target {
        GenerationTarget::Ephemeral => {
            let id = state
                .ephemeral_images
                .store(result.image_bytes, result.width, result.height)?;
            Ok(GeneratedImage {
                url: format!("/images/{id}.png"),
                width: result.width,
                height: result.height,
            })
        }
        GenerationTarget::SessionMessage { session_id, message_id } => {
            state
                .session_images
                .save(&session_id, message_id, &result.image_bytes)?;
            let url = state.session_images.url(&session_id, message_id);
            Ok(GeneratedImage {
                url,
                width: result.width,
                height: result.height,
            })
        }
    }
}

/// Sends a generation request to the compute client and stores the resulting image according to
/// `target` in one call. This is the path the manual `/generate` endpoint uses, where there is no
/// concurrent Stage 2 stream to overlap with; the chat orchestrator instead calls [`run_compute`]
/// and [`store_result`] separately so the compute RPC can run alongside Stage 2.
pub async fn generate_image(
    state: &AppState,
    prompt: &str,
    settings: GenerationSettings,
    width: u32,
    height: u32,
    target: GenerationTarget,
) -> Result<GeneratedImage, WeaveError> {
    let result = run_compute(state, prompt, settings, width, height).await?;
    store_result(state, result, target)
}

/// Emits `generation-started` for the given source, ignoring (but logging) the "no connection"
/// case: a manual or agent-triggered generation proceeds even if nobody is watching the stream
/// right now.
pub fn emit_generation_started(state: &AppState, session_id: &str, source: GenerationSource, message_id: Option<u64>) {
    if let Err(e) = state
        .sse
        .send(session_id, SseEvent::GenerationStarted { source, message_id })
    {
        tracing::debug!(session_id, error = %e, "no SSE listener for generation-started");
    }
}

/// Emits `image-ready`, same no-listener tolerance as [`emit_generation_started`].
pub fn emit_image_ready(state: &AppState, session_id: &str, image: &GeneratedImage, message_id: Option<u64>) {
    if let Err(e) = state.sse.send(
        session_id,
        SseEvent::ImageReady {
            url: image.url.clone(),
            width: image.width,
            height: image.height,
            message_id,
        },
    ) {
        tracing::debug!(session_id, error = %e, "no SSE listener for image-ready");
    }
}
