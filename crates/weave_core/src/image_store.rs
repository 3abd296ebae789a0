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

//! Image storage: an ephemeral in-memory store for ad hoc generations, and a per-session
//! on-disk store for images tied to a specific conversation message.

use std::path::{Path, PathBuf};
use std::time::Duration;

use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ImageStoreError;

/// Maximum size of a single stored image, ephemeral or on-disk.
pub const MAX_IMAGE_BYTES: usize = 32 * 1024 * 1024;

/// Ephemeral store capacity; beyond this, least-recently-used entries are evicted.
pub const EPHEMERAL_CAPACITY: usize = 100;

/// Ephemeral entries older than this are swept regardless of capacity.
pub const EPHEMERAL_TTL: time::Duration = time::Duration::seconds(60 * 60);

/// Interval between ephemeral-store sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

struct StoredImage {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    created_at: OffsetDateTime,
    last_access_at: OffsetDateTime,
}

/// An in-memory LRU+TTL cache for images not tied to any particular session message (manual
/// generations with no `message_id`).
#[derive(Default)]
pub struct EphemeralImageStore {
    entries: DashMap<Uuid, StoredImage>,
}

impl EphemeralImageStore {
    pub fn new() -> Self {
        EphemeralImageStore::default()
    }

    pub fn store(&self, bytes: Vec<u8>, width: u32, height: u32) -> Result<Uuid, ImageStoreError> {
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ImageStoreError::TooLarge {
                size: bytes.len(),
                limit: MAX_IMAGE_BYTES,
            });
        }
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        self.entries.insert(
            id,
            StoredImage {
                bytes,
                width,
                height,
                created_at: now,
                last_access_at: now,
            },
        );
        self.evict_over_capacity();
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<(Vec<u8>, u32, u32), ImageStoreError> {
        let mut entry = self.entries.get_mut(&id).ok_or(ImageStoreError::NotFound(id))?;
        entry.last_access_at = OffsetDateTime::now_utc();
        Ok((entry.bytes.clone(), entry.width, entry.height))
    }

    /// Drops entries older than [`EPHEMERAL_TTL`], then trims to [`EPHEMERAL_CAPACITY`] by
    /// least-recently-accessed if still over capacity.
    pub fn sweep(&self) {
        let now = OffsetDateTime::now_utc();
        let stale: Vec<Uuid> = self
            .entries
            .iter()
            .filter(|entry| now - entry.created_at > EPHEMERAL_TTL)
            .map(|entry| *entry.key())
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "swept expired ephemeral images");
        }

        self.evict_over_capacity();
    }

    fn evict_over_capacity(&self) {
        if self.entries.len() <= EPHEMERAL_CAPACITY {
            return;
        }
        let mut by_access: Vec<(Uuid, OffsetDateTime)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.last_access_at))
            .collect();
        by_access.sort_by_key(|(_, accessed)| *accessed);
        let overflow = self.entries.len() - EPHEMERAL_CAPACITY;
        for (id, _) in by_access.into_iter().take(overflow) {
            self.entries.remove(&id);
        }
    }
}

/// Runs [`EphemeralImageStore::sweep`] on [`SWEEP_INTERVAL`] until `cancelled` resolves.
pub async fn run_sweeper(
    store: std::sync::Arc<EphemeralImageStore>,
    cancelled: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(cancelled);
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => store.sweep(),
            _ = &mut cancelled => {
                info!("ephemeral image sweeper shutting down");
                break;
            }
        }
    }
}

/// Per-session on-disk image storage: `{sessions_root}/{session_id}/images/{message_id}.png`.
pub struct SessionImageStore {
    sessions_root: PathBuf,
}

impl SessionImageStore {
    pub fn new(sessions_root: PathBuf) -> Self {
        SessionImageStore { sessions_root }
    }

    fn image_path(&self, session_id: &str, message_id: u64) -> PathBuf {
        self.sessions_root
            .join(session_id)
            .join("images")
            .join(format!("{message_id}.png"))
    }

    /// Writes the image, creating `{session_id}/images/` with owner-only permissions if needed.
    /// Overwrites an existing file for the same message id (regeneration).
    pub fn save(&self, session_id: &str, message_id: u64, bytes: &[u8]) -> Result<(), ImageStoreError> {
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ImageStoreError::TooLarge {
                size: bytes.len(),
                limit: MAX_IMAGE_BYTES,
            });
        }
        let path = self.image_path(session_id, message_id);
        let dir = path.parent().expect("image path always has a parent");
        std::fs::create_dir_all(dir).map_err(|source| ImageStoreError::Io {
            path: dir.to_owned(),
            source,
        })?;
        set_owner_only_dir_permissions(dir)?;
        std::fs::write(&path, bytes).map_err(|source| ImageStoreError::Io {
            path: path.clone(),
            source,
        })
    }

    pub fn load(&self, session_id: &str, message_id: u64) -> Result<Vec<u8>, ImageStoreError> {
        let path = self.image_path(session_id, message_id);
        std::fs::read(&path).map_err(|source| ImageStoreError::Io { path, source })
    }

    /// The public URL at which this image is served.
    pub fn url(&self, session_id: &str, message_id: u64) -> String {
        format!("/sessions/{session_id}/images/{message_id}.png")
    }

    pub fn exists(&self, session_id: &str, message_id: u64) -> bool {
        self.image_path(session_id, message_id).exists()
    }
}

#[cfg(unix)]
fn set_owner_only_dir_permissions(dir: &Path) -> Result<(), ImageStoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).map_err(|source| {
        ImageStoreError::Io {
            path: dir.to_owned(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_get_round_trips() {
        let store = EphemeralImageStore::new();
        let id = store.store(vec![1, 2, 3], 64, 64).unwrap();
        let (bytes, width, height) = store.get(id).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!((width, height), (64, 64));
    }

    #[test]
    fn get_unknown_id_fails_not_found() {
        let store = EphemeralImageStore::new();
        assert!(matches!(
            store.get(Uuid::new_v4()),
            Err(ImageStoreError::NotFound(_))
        ));
    }

    #[test]
    fn store_rejects_oversized_image() {
        let store = EphemeralImageStore::new();
        let huge = vec![0u8; MAX_IMAGE_BYTES + 1];
        assert!(matches!(
            store.store(huge, 1, 1),
            Err(ImageStoreError::TooLarge { .. })
        ));
    }

    #[test]
    fn evicts_lru_entries_over_capacity() {
        let store = EphemeralImageStore::new();
        let mut ids = Vec::new();
        for i in 0..EPHEMERAL_CAPACITY + 5 {
            ids.push(store.store(vec![i as u8], 1, 1).unwrap());
        }
        assert_eq!(store.entries.len(), EPHEMERAL_CAPACITY);
        // the earliest-inserted entries, never touched again, should be the ones evicted
        assert!(store.get(ids[0]).is_err());
        assert!(store.get(*ids.last().unwrap()).is_ok());
    }

    #[test]
    fn on_disk_store_saves_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionImageStore::new(dir.path().to_owned());
        store.save("abc123", 7, b"png-bytes").unwrap();
        assert_eq!(store.load("abc123", 7).unwrap(), b"png-bytes");
        assert_eq!(store.url("abc123", 7), "/sessions/abc123/images/7.png");
    }

    #[test]
    fn on_disk_store_allows_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionImageStore::new(dir.path().to_owned());
        store.save("abc123", 7, b"first").unwrap();
        store.save("abc123", 7, b"second").unwrap();
        assert_eq!(store.load("abc123", 7).unwrap(), b"second");
    }

    #[test]
    fn on_disk_store_missing_image_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionImageStore::new(dir.path().to_owned());
        assert!(store.load("nope", 1).is_err());
    }
}
