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

//! The per-session conversation: an append-only message history plus the generation state the
//! chat orchestrator threads through it.

use serde::{Deserialize, Serialize};

use crate::error::ConversationError;

/// Who said a given message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// How far along a snapshot's image preview is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewStatus {
    None,
    Generating,
    Complete,
}

/// The (prompt, steps, cfg, seed) state captured on an assistant message that changed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub prompt: String,
    pub steps: u32,
    pub cfg: f32,
    pub seed: i64,
    pub preview_status: PreviewStatus,
    pub preview_url: Option<String>,
}

/// Per-session generation parameters. Defaults come from startup config; either a user form
/// submission or the agent's `update_generation` tool call can change them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub steps: u32,
    pub cfg: f32,
    pub seed: i64,
}

/// A single turn in the conversation. Ids are strictly increasing within a session and never
/// reused, even across `clear()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub content: String,
    pub snapshot: Option<Snapshot>,
}

/// A message handed to the LLM client, stripped of everything but role and content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

/// The mutable conversation state for one session: message history, the currently-proposed
/// prompt, and whether the user has overridden it since the last assistant turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    next_id: u64,
    current_prompt: String,
    prompt_edited: bool,
    last_state: Option<(String, GenerationSettings)>,
}

impl Conversation {
    pub fn new() -> Self {
        Conversation {
            messages: Vec::new(),
            next_id: 1,
            current_prompt: String::new(),
            prompt_edited: false,
            last_state: None,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) -> u64 {
        let id = self.allocate_id();
        self.messages.push(Message {
            id,
            role: Role::User,
            content: content.into(),
            snapshot: None,
        });
        id
    }

    /// Appends an assistant message. When `prompt` and `settings` are both present and differ
    /// from the last recorded (prompt, settings) pair, attaches a fresh [`Snapshot`] with
    /// `preview_status = None` and updates `current_prompt`.
    pub fn add_assistant_message(
        &mut self,
        content: impl Into<String>,
        prompt: Option<String>,
        settings: Option<GenerationSettings>,
    ) -> u64 {
        let id = self.allocate_id();

        let mut snapshot = None;
        if let (Some(prompt), Some(settings)) = (&prompt, settings) {
            let differs = self
                .last_state
                .as_ref()
                .map(|(p, s)| p != prompt || *s != settings)
                .unwrap_or(true);
            if differs {
                snapshot = Some(Snapshot {
                    prompt: prompt.clone(),
                    steps: settings.steps,
                    cfg: settings.cfg,
                    seed: settings.seed,
                    preview_status: PreviewStatus::None,
                    preview_url: None,
                });
                self.last_state = Some((prompt.clone(), settings));
            }
        }

        if let Some(prompt) = prompt {
            self.current_prompt = prompt;
        }

        self.messages.push(Message {
            id,
            role: Role::Assistant,
            content: content.into(),
            snapshot,
        });
        id
    }

    /// Sets the current prompt. Raises the edited flag only when the text actually changed, so
    /// resubmitting the same prompt is a no-op.
    pub fn update_prompt(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.current_prompt {
            self.current_prompt = text;
            self.prompt_edited = true;
        }
    }

    /// If the edited flag is set, injects a system message recording the override and clears the
    /// flag. Calling this twice in a row without an intervening `update_prompt` is a no-op the
    /// second time, so it never injects more than one message per prompt change.
    pub fn notify_prompt_edited(&mut self) {
        if !self.prompt_edited {
            return;
        }
        let id = self.allocate_id();
        self.messages.push(Message {
            id,
            role: Role::System,
            content: format!("[user edited prompt to: \"{}\"]", self.current_prompt),
            snapshot: None,
        });
        self.prompt_edited = false;
    }

    /// Builds the message list to send the LLM client: the system prompt, an optional settings
    /// preamble (present iff at least one of steps/cfg/seed is non-zero), then the recorded
    /// history. The caller appends the fresh user turn before sending.
    pub fn build_llm_context(
        &self,
        system_prompt: &str,
        cur_steps: u32,
        cur_cfg: f32,
        cur_seed: i64,
    ) -> Vec<ContextMessage> {
        let mut context = Vec::with_capacity(self.messages.len() + 2);
        context.push(ContextMessage {
            role: Role::System,
            content: system_prompt.to_owned(),
        });

        if cur_steps != 0 || cur_cfg != 0.0 || cur_seed != 0 {
            context.push(ContextMessage {
                role: Role::System,
                content: format!(
                    "[Current generation settings: steps={cur_steps}, cfg={cur_cfg}, seed={cur_seed}]"
                ),
            });
        }

        context.extend(self.messages.iter().map(|m| ContextMessage {
            role: m.role,
            content: m.content.clone(),
        }));
        context
    }

    pub fn update_message_preview(
        &mut self,
        id: u64,
        status: PreviewStatus,
        url: Option<String>,
    ) -> Result<(), ConversationError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(ConversationError::MessageNotFound(id))?;
        let snapshot = message
            .snapshot
            .as_mut()
            .ok_or(ConversationError::MessageNotFound(id))?;
        snapshot.preview_status = status;
        snapshot.preview_url = url;
        Ok(())
    }

    pub fn get_message(&self, id: u64) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn get_history(&self) -> &[Message] {
        &self.messages
    }

    pub fn current_prompt(&self) -> &str {
        &self.current_prompt
    }

    pub fn next_message_id(&self) -> u64 {
        self.next_id
    }

    /// Restores `next_id` after rehydrating from disk, so freshly-allocated ids never collide
    /// with what was persisted.
    pub fn set_next_message_id(&mut self, next_id: u64) {
        self.next_id = next_id;
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.current_prompt.clear();
        self.prompt_edited = false;
        self.last_state = None;
        // next_id is never reset: ids must never be reused, even across a clear.
    }
}
