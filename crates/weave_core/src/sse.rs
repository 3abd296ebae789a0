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

//! The SSE event vocabulary and the broker that enforces "at most one live connection per
//! session". Wire formatting (`event: ...` / `data: ...` framing) is `weave_server`'s concern;
//! this module only deals in typed events and their JSON payloads.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// How the image generation behind a `generation-started` event was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationSource {
    Manual,
    Agent,
}

/// Every event the chat orchestrator (or the manual generate endpoint) can push to a session's
/// SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Connected { session: String },
    AgentThinking { started: bool, expanded: bool },
    AgentToken { token: String },
    AgentRetry { attempt: u32 },
    AgentDone { message_id: u64, has_snapshot: bool },
    PromptUpdate { prompt: String },
    ResolvedPrompt { prompt: String },
    SettingsUpdate {
        steps: u32,
        cfg: f32,
        seed: i64,
        width: Option<u32>,
        height: Option<u32>,
    },
    GenerationStarted {
        source: GenerationSource,
        message_id: Option<u64>,
    },
    ImageReady {
        url: String,
        width: u32,
        height: u32,
        message_id: Option<u64>,
    },
    Error { message: String },
}

impl SseEvent {
    /// The SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            SseEvent::Connected { .. } => "connected",
            SseEvent::AgentThinking { .. } => "agent-thinking",
            SseEvent::AgentToken { .. } => "agent-token",
            SseEvent::AgentRetry { .. } => "agent-retry",
            SseEvent::AgentDone { .. } => "agent-done",
            SseEvent::PromptUpdate { .. } => "prompt-update",
            SseEvent::ResolvedPrompt { .. } => "resolved-prompt",
            SseEvent::SettingsUpdate { .. } => "settings-update",
            SseEvent::GenerationStarted { .. } => "generation-started",
            SseEvent::ImageReady { .. } => "image-ready",
            SseEvent::Error { .. } => "error",
        }
    }

    /// The JSON `data:` payload.
    pub fn data(&self) -> Value {
        match self {
            SseEvent::Connected { session } => serde_json::json!({ "session": session }),
            SseEvent::AgentThinking { started, expanded } => {
                serde_json::json!({ "started": started, "expanded": expanded })
            }
            SseEvent::AgentToken { token } => serde_json::json!({ "token": token }),
            SseEvent::AgentRetry { attempt } => serde_json::json!({ "attempt": attempt }),
            SseEvent::AgentDone { message_id, has_snapshot } => {
                serde_json::json!({ "done": true, "message_id": message_id, "has_snapshot": has_snapshot })
            }
            SseEvent::PromptUpdate { prompt } => serde_json::json!({ "prompt": prompt }),
            SseEvent::ResolvedPrompt { prompt } => serde_json::json!({ "prompt": prompt }),
            SseEvent::SettingsUpdate { steps, cfg, seed, width, height } => {
                serde_json::json!({ "steps": steps, "cfg": cfg, "seed": seed, "width": width, "height": height })
            }
            SseEvent::GenerationStarted { source, message_id } => {
                serde_json::json!({ "source": source, "message_id": message_id })
            }
            SseEvent::ImageReady { url, width, height, message_id } => {
                serde_json::json!({ "url": url, "width": width, "height": height, "message_id": message_id })
            }
            SseEvent::Error { message } => serde_json::json!({ "message": message }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SseError {
    #[error("no SSE connection registered for this session")]
    NotConnected,
}

/// How long `register` polls for a superseded connection's registration to clear, when a second
/// connection for the same session arrives.
const SUPERSEDE_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Registration {
    sender: mpsc::Sender<SseEvent>,
}

/// Tracks at most one live SSE connection per session id, and dispatches events to it.
#[derive(Default)]
pub struct SseBroker {
    connections: DashMap<String, Registration>,
}

/// Deregisters the held connection when the SSE handler's task ends, whether by client
/// disconnect, server shutdown, or being superseded.
pub struct ConnectionGuard {
    broker: Arc<SseBroker>,
    session_id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.broker.connections.remove(&self.session_id);
    }
}

impl SseBroker {
    pub fn new() -> Self {
        SseBroker::default()
    }

    /// Registers the calling task as the live connection for `session_id`. If another connection
    /// is already registered, blocks (without displacing it) until that registration clears, per
    /// the "first registration wins" policy — a second connection for the same session does not
    /// receive events until the first is gone.
    pub async fn register(self: &Arc<Self>, session_id: String) -> (mpsc::Receiver<SseEvent>, ConnectionGuard) {
        loop {
            match self.connections.entry(session_id.clone()) {
                Entry::Vacant(entry) => {
                    let (tx, rx) = mpsc::channel(32);
                    let _ = tx.try_send(SseEvent::Connected {
                        session: session_id.clone(),
                    });
                    entry.insert(Registration { sender: tx });
                    return (
                        rx,
                        ConnectionGuard {
                            broker: Arc::clone(self),
                            session_id,
                        },
                    );
                }
                Entry::Occupied(_) => {
                    tokio::time::sleep(SUPERSEDE_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Sends `event` to the registered connection for `session_id`. Never buffers: if there is no
    /// registered connection (or it has gone away), returns [`SseError::NotConnected`] instead of
    /// queuing.
    pub fn send(&self, session_id: &str, event: SseEvent) -> Result<(), SseError> {
        let registration = self.connections.get(session_id).ok_or(SseError::NotConnected)?;
        registration.sender.try_send(event).map_err(|_| SseError::NotConnected)
    }

    pub fn is_connected(&self, session_id: &str) -> bool {
        self.connections.contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_without_registration_fails() {
        let broker = SseBroker::new();
        assert_eq!(
            broker.send("nobody", SseEvent::AgentToken { token: "hi".into() }),
            Err(SseError::NotConnected)
        );
    }

    #[tokio::test]
    async fn registration_receives_connected_then_preserves_order() {
        let broker = Arc::new(SseBroker::new());
        let (mut rx, _guard) = broker.register("s1".into()).await;

        let connected = rx.recv().await.unwrap();
        assert_eq!(connected.event_name(), "connected");

        broker.send("s1", SseEvent::AgentToken { token: "a".into() }).unwrap();
        broker.send("s1", SseEvent::AgentToken { token: "b".into() }).unwrap();

        assert_eq!(rx.recv().await.unwrap(), SseEvent::AgentToken { token: "a".into() });
        assert_eq!(rx.recv().await.unwrap(), SseEvent::AgentToken { token: "b".into() });
    }

    #[tokio::test]
    async fn dropping_guard_frees_the_session_for_a_new_registration() {
        let broker = Arc::new(SseBroker::new());
        let (_rx, guard) = broker.register("s1".into()).await;
        assert!(broker.is_connected("s1"));
        drop(guard);
        assert!(!broker.is_connected("s1"));
    }

    #[tokio::test]
    async fn second_registration_blocks_until_first_is_dropped() {
        let broker = Arc::new(SseBroker::new());
        let (_rx, guard) = broker.register("s1".into()).await;

        let broker_clone = Arc::clone(&broker);
        let second = tokio::spawn(async move { broker_clone.register("s1".into()).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        drop(guard);
        let (_rx2, _guard2) = second.await.unwrap();
    }
}
