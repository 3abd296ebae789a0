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

//! Per-session, per-endpoint-class token buckets for `/chat` and `/generate`.

use std::time::Duration;

use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::{debug, info};

/// Chat bucket capacity, refilled every [`REFILL_INTERVAL`].
pub const CHAT_CAPACITY: u32 = 30;
/// Generate bucket capacity, refilled every [`REFILL_INTERVAL`].
pub const GENERATE_CAPACITY: u32 = 5;
/// How often a bucket refills to full capacity.
pub const REFILL_INTERVAL: time::Duration = time::Duration::seconds(60);
/// A bucket untouched for this long is dropped by the sweeper.
pub const BUCKET_MAX_AGE: time::Duration = time::Duration::seconds(60 * 60);
/// Interval between sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

struct Bucket {
    tokens: u32,
    capacity: u32,
    last_refill: OffsetDateTime,
    last_access: OffsetDateTime,
}

impl Bucket {
    fn new(capacity: u32) -> Self {
        let now = OffsetDateTime::now_utc();
        Bucket {
            tokens: capacity,
            capacity,
            last_refill: now,
            last_access: now,
        }
    }

    fn take(&mut self) -> bool {
        let now = OffsetDateTime::now_utc();
        if now - self.last_refill >= REFILL_INTERVAL {
            self.tokens = self.capacity;
            self.last_refill = now;
        }
        self.last_access = now;
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }
}

/// Two independent token-bucket pools, keyed by session id: one for `/chat`, one for
/// `/generate`.
#[derive(Default)]
pub struct RateLimiter {
    chat: DashMap<String, Bucket>,
    generate: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter::default()
    }

    pub fn allow_chat(&self, session_id: &str) -> bool {
        self.chat
            .entry(session_id.to_owned())
            .or_insert_with(|| Bucket::new(CHAT_CAPACITY))
            .take()
    }

    pub fn allow_generate(&self, session_id: &str) -> bool {
        self.generate
            .entry(session_id.to_owned())
            .or_insert_with(|| Bucket::new(GENERATE_CAPACITY))
            .take()
    }

    /// Drops buckets that haven't been touched in [`BUCKET_MAX_AGE`].
    pub fn sweep(&self) {
        let now = OffsetDateTime::now_utc();
        let mut dropped = 0;
        for map in [&self.chat, &self.generate] {
            let stale: Vec<String> = map
                .iter()
                .filter(|entry| now - entry.last_access > BUCKET_MAX_AGE)
                .map(|entry| entry.key().clone())
                .collect();
            dropped += stale.len();
            for key in stale {
                map.remove(&key);
            }
        }
        if dropped > 0 {
            debug!(dropped, "swept idle rate limit buckets");
        }
    }
}

/// Runs [`RateLimiter::sweep`] on [`SWEEP_INTERVAL`] until `cancelled` resolves.
pub async fn run_sweeper(
    limiter: std::sync::Arc<RateLimiter>,
    cancelled: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(cancelled);
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => limiter.sweep(),
            _ = &mut cancelled => {
                info!("rate limiter sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausting_bucket_then_refusing_nth_plus_one_call() {
        let limiter = RateLimiter::new();
        for _ in 0..GENERATE_CAPACITY {
            assert!(limiter.allow_generate("s1"));
        }
        assert!(!limiter.allow_generate("s1"));
    }

    #[test]
    fn buckets_are_independent_per_session() {
        let limiter = RateLimiter::new();
        for _ in 0..GENERATE_CAPACITY {
            assert!(limiter.allow_generate("s1"));
        }
        assert!(!limiter.allow_generate("s1"));
        assert!(limiter.allow_generate("s2"));
    }

    #[test]
    fn chat_and_generate_buckets_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..GENERATE_CAPACITY {
            assert!(limiter.allow_generate("s1"));
        }
        assert!(limiter.allow_chat("s1"));
    }

    #[test]
    fn refill_after_interval_allows_again() {
        let mut bucket = Bucket::new(1);
        assert!(bucket.take());
        assert!(!bucket.take());
        bucket.last_refill -= REFILL_INTERVAL;
        assert!(bucket.take());
    }

    #[test]
    fn sweep_drops_buckets_idle_past_max_age() {
        let limiter = RateLimiter::new();
        limiter.allow_chat("stale");
        limiter.chat.get_mut("stale").unwrap().last_access -= BUCKET_MAX_AGE + time::Duration::seconds(1);
        limiter.sweep();
        assert_eq!(limiter.chat.len(), 0);
    }
}
