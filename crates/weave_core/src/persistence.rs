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

//! Reading and writing `{sessions_root}/{session_id}/conversation.json`.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::conversation::Conversation;
use crate::error::PersistenceError;

fn conversation_path(sessions_root: &Path, session_id: &str) -> PathBuf {
    sessions_root.join(session_id).join("conversation.json")
}

/// Loads a session's conversation from disk. A missing or corrupt file is not fatal: it is
/// logged and treated as if the session were brand new, so a single bad file never blocks
/// startup.
pub fn load(sessions_root: &Path, session_id: &str) -> Option<Conversation> {
    let path = conversation_path(sessions_root, session_id);
    let contents = match std::fs::read(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(session_id, path = %path.display(), error = %e, "failed to read conversation file, starting empty");
            return None;
        }
    };

    match serde_json::from_slice::<Conversation>(&contents) {
        Ok(conversation) => Some(conversation),
        Err(e) => {
            warn!(session_id, path = %path.display(), error = %e, "conversation file is corrupt, starting empty");
            None
        }
    }
}

/// Writes a session's conversation to disk, creating `{session_id}/` with owner-only
/// permissions if needed.
pub fn save(sessions_root: &Path, session_id: &str, conversation: &Conversation) -> Result<(), PersistenceError> {
    let path = conversation_path(sessions_root, session_id);
    let dir = path.parent().expect("conversation path always has a parent");
    std::fs::create_dir_all(dir).map_err(|source| PersistenceError::Write {
        path: dir.to_owned(),
        source,
    })?;
    set_owner_only_dir_permissions(dir)?;

    let json = serde_json::to_vec_pretty(conversation).expect("Conversation always serializes");
    std::fs::write(&path, json).map_err(|source| PersistenceError::Write { path, source })
}

#[cfg(unix)]
fn set_owner_only_dir_permissions(dir: &Path) -> Result<(), PersistenceError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(|source| {
        PersistenceError::Write {
            path: dir.to_owned(),
            source,
        }
    })
}
