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

//! `POST /chat` — the two-stage agent turn: a non-streaming extraction call that decides the
//! pending generation's prompt and parameters, followed by a streaming conversational reply.

use axum::extract::State;
use axum::{Extension, Form};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use weave_core::clamp_generation;
use weave_core::conversation::{ContextMessage, GenerationSettings, PreviewStatus, Role};
use weave_core::sse::{GenerationSource, SseEvent};
use weave_llm::{update_generation_tool, ChatMessage, LlmError, ToolCall};

use crate::error::WeaveError;
use crate::generation::{self, GenerationTarget};
use crate::session_middleware::SessionId;
use crate::state::AppState;

const MAX_MESSAGE_BYTES: usize = 10 * 1024;

#[derive(Debug, Deserialize)]
pub struct ChatForm {
    pub message: String,
    pub steps: Option<String>,
    pub cfg: Option<String>,
    pub seed: Option<String>,
}

fn parse_or<T: std::str::FromStr>(raw: &Option<String>, default: T) -> T {
    raw.as_deref().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn to_chat_message(cm: &ContextMessage) -> ChatMessage {
    match cm.role {
        Role::System => ChatMessage::system(cm.content.clone()),
        Role::User => ChatMessage::user(cm.content.clone()),
        Role::Assistant => ChatMessage::assistant(cm.content.clone()),
    }
}

/// Mirrors [`weave_core::conversation::Conversation::build_llm_context`], but against a raw
/// history snapshot and an arbitrary system prompt text (the conversational system prompt is
/// resolved only after extraction, once the pending prompt is known).
fn build_context(system_prompt: impl Into<String>, settings: GenerationSettings, history: &[ContextMessage]) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    if settings.steps != 0 || settings.cfg != 0.0 || settings.seed != 0 {
        messages.push(ChatMessage::system(format!(
            "[Current generation settings: steps={}, cfg={}, seed={}]",
            settings.steps, settings.cfg, settings.seed
        )));
    }
    messages.extend(history.iter().map(to_chat_message));
    messages
}

/// Arguments decoded out of a successful `update_generation` tool call.
#[derive(Default)]
struct ExtractedUpdate {
    prompt: Option<String>,
    steps: Option<u32>,
    cfg: Option<f32>,
    seed: Option<i64>,
    generate_image: bool,
}

fn decode_tool_call(call: &ToolCall) -> Option<ExtractedUpdate> {
    if call.name != "update_generation" {
        return None;
    }
    let args = &call.arguments;
    Some(ExtractedUpdate {
        prompt: args.get("prompt").and_then(Value::as_str).map(str::to_owned),
        steps: args.get("steps").and_then(Value::as_u64).map(|v| v as u32),
        cfg: args.get("cfg").and_then(Value::as_f64).map(|v| v as f32),
        seed: args.get("seed").and_then(Value::as_i64),
        generate_image: args.get("generate_image").and_then(Value::as_bool).unwrap_or(false),
    })
}

/// Runs the non-streaming extraction call once, returning the decoded tool call if the model
/// produced a valid `update_generation` invocation.
async fn try_extract(
    state: &AppState,
    messages: &[ChatMessage],
    cancel: &CancellationToken,
) -> Option<ExtractedUpdate> {
    let tools = [update_generation_tool()];
    let result = state
        .llm
        .chat(&state.settings.ollama_model, state.settings.llm_seed, messages, &tools, |_| Ok(()), cancel)
        .await;

    match result {
        Ok(result) => result.tool_call.as_ref().and_then(decode_tool_call),
        Err(e) => {
            warn!(error = %e, "extraction call failed");
            None
        }
    }
}

pub async fn chat(
    State(state): State<AppState>,
    Extension(SessionId(session_id)): Extension<SessionId>,
    Form(form): Form<ChatForm>,
) -> Result<axum::Json<Value>, WeaveError> {
    if !state.rate_limiter.allow_chat(&session_id) {
        return Err(WeaveError::RateLimited);
    }

    let message = form.message.trim().to_owned();
    if message.is_empty() {
        return Err(WeaveError::Validation("message must not be empty".into()));
    }
    if message.len() > MAX_MESSAGE_BYTES {
        return Err(WeaveError::Validation(format!(
            "message exceeds the {MAX_MESSAGE_BYTES}-byte limit"
        )));
    }

    let session = state.sessions.get_or_create(&session_id);
    let (history, cur_settings, cur_prompt) = {
        let session = session.read().await;
        let history: Vec<ContextMessage> = session
            .conversation
            .get_history()
            .iter()
            .map(|m| ContextMessage { role: m.role, content: m.content.clone() })
            .collect();
        (history, session.settings, session.conversation.current_prompt().to_owned())
    };

    let form_steps = parse_or(&form.steps, cur_settings.steps);
    let form_cfg = parse_or(&form.cfg, cur_settings.cfg);
    let form_seed = parse_or(&form.seed, cur_settings.seed);

    let cancel = CancellationToken::new();

    let _ = state.sse.send(&session_id, SseEvent::AgentThinking { started: false, expanded: false });

    let mut extraction_messages = build_context(&*state.agent_tools_prompt, cur_settings, &history);
    extraction_messages.push(ChatMessage::user(message.clone()));

    let mut extracted = try_extract(&state, &extraction_messages, &cancel).await;
    if extracted.is_none() {
        let _ = state.sse.send(&session_id, SseEvent::AgentRetry { attempt: 1 });
        let compacted = weave_core::compaction::compact_for_retry(&history);
        let retry_messages = vec![
            ChatMessage::system(&*state.agent_tools_prompt),
            to_chat_message(&compacted),
            ChatMessage::user(message.clone()),
        ];
        extracted = try_extract(&state, &retry_messages, &cancel).await;
    }
    let Some(extracted) = extracted else {
        warn!(session_id, "extraction failed twice; clearing conversation and starting fresh");
        {
            let mut session = session.write().await;
            session.conversation.clear();
        }
        state.sessions.persist(&session_id).await?;
        let _ = state.sse.send(
            &session_id,
            SseEvent::Error { message: "I'm having trouble; starting fresh".into() },
        );
        return Ok(axum::Json(json!({ "status": "ok" })));
    };

    let clamp = clamp_generation(
        extracted.steps.unwrap_or(form_steps),
        extracted.cfg.unwrap_or(form_cfg),
        extracted.seed.unwrap_or(form_seed),
    );
    let new_settings = GenerationSettings { steps: clamp.steps, cfg: clamp.cfg, seed: clamp.seed };
    let resolved_prompt = extracted.prompt.clone().unwrap_or_else(|| cur_prompt.clone());

    let agent_prompt_text = state.agent_prompt.replace("{prompt}", &resolved_prompt);
    let mut conversation_messages = build_context(agent_prompt_text, new_settings, &history);
    conversation_messages.push(ChatMessage::user(message.clone()));

    // Kick off the compute RPC now, alongside Stage 2's streaming reply, so its latency is hidden
    // behind the token stream instead of paid afterwards. It only needs the resolved prompt and
    // settings, not a finalized message id — landing the result in the right store happens once
    // the assistant message (and its id) exists, after Stage 2 finishes.
    let wants_generation = extracted.generate_image && !resolved_prompt.trim().is_empty();
    let compute_task = wants_generation.then(|| {
        let state = state.clone();
        let prompt = resolved_prompt.clone();
        tokio::spawn(async move {
            generation::run_compute(&state, &prompt, new_settings, state.settings.width, state.settings.height).await
        })
    });

    let _ = state.sse.send(&session_id, SseEvent::AgentThinking { started: true, expanded: true });

    let mut on_token = {
        let state = state.clone();
        let session_id = session_id.clone();
        move |token: &str| -> Result<(), LlmError> {
            state
                .sse
                .send(&session_id, SseEvent::AgentToken { token: token.to_owned() })
                .map_err(|_| LlmError::Cancelled)
        }
    };

    let mut reply = state
        .llm
        .chat(&state.settings.ollama_model, state.settings.llm_seed, &conversation_messages, &[], &mut on_token, &cancel)
        .await;

    if reply.is_err() {
        let _ = state.sse.send(&session_id, SseEvent::AgentRetry { attempt: 1 });
        reply = state
            .llm
            .chat(&state.settings.ollama_model, state.settings.llm_seed, &conversation_messages, &[], &mut on_token, &cancel)
            .await;
    }

    let mut response_text = match reply {
        Ok(result) => result.response,
        Err(e) => {
            error!(session_id, error = %e, "conversational reply failed twice");
            let apology = "Sorry, I ran into a problem generating a response. Please try again.";
            let _ = state.sse.send(&session_id, SseEvent::AgentToken { token: apology.to_owned() });
            apology.to_owned()
        }
    };

    if clamp.is_clamped() {
        let note = format!(
            "\n\n_Note: {}._",
            clamp.clamped.iter().map(|c| c.message.clone()).collect::<Vec<_>>().join("; ")
        );
        let _ = state.sse.send(&session_id, SseEvent::AgentToken { token: note.clone() });
        response_text.push_str(&note);
    }

    if !resolved_prompt.trim().is_empty() {
        let _ = state.sse.send(&session_id, SseEvent::PromptUpdate { prompt: resolved_prompt.clone() });
        let _ = state.sse.send(&session_id, SseEvent::ResolvedPrompt { prompt: resolved_prompt.clone() });
    }
    let _ = state.sse.send(
        &session_id,
        SseEvent::SettingsUpdate {
            steps: new_settings.steps,
            cfg: new_settings.cfg,
            seed: new_settings.seed,
            width: None,
            height: None,
        },
    );

    let wants_snapshot = extracted.generate_image || extracted.prompt.is_some();
    let snapshot_prompt = wants_snapshot.then(|| resolved_prompt.clone());
    let snapshot_settings = wants_snapshot.then_some(new_settings);

    let (assistant_id, has_snapshot) = {
        let mut session = session.write().await;
        session.settings = new_settings;
        session.conversation.add_user_message(message);
        let assistant_id = session
            .conversation
            .add_assistant_message(response_text, snapshot_prompt, snapshot_settings);
        let has_snapshot = session
            .conversation
            .get_message(assistant_id)
            .map(|m| m.snapshot.is_some())
            .unwrap_or(false);
        (assistant_id, has_snapshot)
    };
    state.sessions.persist(&session_id).await?;

    if let Some(compute_task) = compute_task {
        generation::emit_generation_started(&state, &session_id, GenerationSource::Agent, Some(assistant_id));
        {
            let mut session = session.write().await;
            let _ = session.conversation.update_message_preview(assistant_id, PreviewStatus::Generating, None);
        }

        // Stage 2 has already finished by the time we get here, so this only waits on whatever
        // tail of the compute RPC outlasted the token stream — joined before `agent-done`.
        let target = GenerationTarget::SessionMessage { session_id: session_id.clone(), message_id: assistant_id };
        let result = match compute_task.await {
            Ok(result) => result.and_then(|image| generation::store_result(&state, image, target)),
            Err(e) => Err(WeaveError::Internal(format!("generation task panicked: {e}"))),
        };

        match result {
            Ok(image) => {
                {
                    let mut session = session.write().await;
                    let _ = session.conversation.update_message_preview(
                        assistant_id,
                        PreviewStatus::Complete,
                        Some(image.url.clone()),
                    );
                }
                state.sessions.persist(&session_id).await?;
                generation::emit_image_ready(&state, &session_id, &image, Some(assistant_id));
            }
            Err(e) => {
                error!(session_id, error = %e, "agent-triggered generation failed");
                let _ = state.sse.send(
                    &session_id,
                    SseEvent::Error { message: "An error occurred while processing your message".into() },
                );
            }
        }
    }

    let _ = state.sse.send(&session_id, SseEvent::AgentDone { message_id: assistant_id, has_snapshot });

    Ok(axum::Json(json!({ "status": "ok" })))
}
