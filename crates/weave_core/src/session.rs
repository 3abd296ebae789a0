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

//! The session registry: a process-wide map from session id to the session's conversation and
//! generation settings, rehydrated from disk on first access.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::info;

use crate::conversation::{Conversation, GenerationSettings};
use crate::error::PersistenceError;
use crate::persistence;

/// A browser identity, bound to a persistent on-disk conversation. Never garbage collected at
/// runtime; only cleared by explicit user action (`POST /new-chat`).
pub struct Session {
    pub id: String,
    pub conversation: Conversation,
    pub settings: GenerationSettings,
    pub created_at: OffsetDateTime,
}

impl Session {
    fn new(id: String, settings: GenerationSettings) -> Self {
        Session {
            id,
            conversation: Conversation::new(),
            settings,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Maps session id to session, each guarded by its own lock so unrelated sessions never
/// contend with each other.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<RwLock<Session>>>,
    sessions_root: PathBuf,
    default_settings: GenerationSettings,
}

impl SessionRegistry {
    pub fn new(sessions_root: PathBuf, default_settings: GenerationSettings) -> Self {
        SessionRegistry {
            sessions: DashMap::new(),
            sessions_root,
            default_settings,
        }
    }

    /// Returns the session for `session_id`, rehydrating it from disk on first access within
    /// this process. A missing or corrupt conversation file yields an empty session rather than
    /// failing the request.
    pub fn get_or_create(&self, session_id: &str) -> Arc<RwLock<Session>> {
        if let Some(existing) = self.sessions.get(session_id) {
            return Arc::clone(&existing);
        }

        let mut session = Session::new(session_id.to_owned(), self.default_settings);
        if let Some(conversation) = persistence::load(&self.sessions_root, session_id) {
            info!(session_id, "rehydrated session from disk");
            session.conversation = conversation;
        }

        let session = Arc::new(RwLock::new(session));
        self.sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| Arc::clone(&session));
        Arc::clone(self.sessions.get(session_id).unwrap().value())
    }

    /// Persists a session's current conversation to disk.
    pub async fn persist(&self, session_id: &str) -> Result<(), PersistenceError> {
        let session = self.get_or_create(session_id);
        let session = session.read().await;
        persistence::save(&self.sessions_root, session_id, &session.conversation)
    }

    /// Clears a session's conversation in memory and on disk.
    pub async fn clear(&self, session_id: &str) -> Result<(), PersistenceError> {
        let session = self.get_or_create(session_id);
        {
            let mut session = session.write().await;
            session.conversation.clear();
        }
        self.persist(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GenerationSettings {
        GenerationSettings { steps: 20, cfg: 3.5, seed: -1 }
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_session_on_repeat_access() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_owned(), settings());

        let a = registry.get_or_create("s1");
        {
            let mut a = a.write().await;
            a.conversation.add_user_message("hi");
        }
        let b = registry.get_or_create("s1");
        let b = b.read().await;
        assert_eq!(b.conversation.get_history().len(), 1);
    }

    #[tokio::test]
    async fn persist_and_rehydrate_round_trips_across_registries() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = SessionRegistry::new(dir.path().to_owned(), settings());
            let session = registry.get_or_create("s1");
            session.write().await.conversation.add_user_message("hello");
            registry.persist("s1").await.unwrap();
        }

        let registry = SessionRegistry::new(dir.path().to_owned(), settings());
        let session = registry.get_or_create("s1");
        let session = session.read().await;
        assert_eq!(session.conversation.get_history().len(), 1);
    }

    #[tokio::test]
    async fn clear_empties_history_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_owned(), settings());
        let session = registry.get_or_create("s1");
        session.write().await.conversation.add_user_message("hello");
        registry.persist("s1").await.unwrap();

        registry.clear("s1").await.unwrap();
        let session = registry.get_or_create("s1");
        assert!(session.read().await.conversation.get_history().is_empty());
    }
}
