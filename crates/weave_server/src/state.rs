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

//! The process-wide singletons every handler shares, wired together once at startup.

use std::sync::Arc;

use weave_compute::ComputeClient;
use weave_core::image_store::{EphemeralImageStore, SessionImageStore};
use weave_core::rate_limiter::RateLimiter;
use weave_core::session::SessionRegistry;
use weave_core::sse::SseBroker;
use weave_core::WeaveSettings;
use weave_llm::LlmClient;

/// Shared application state, cloned cheaply into every handler (every field is an `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<WeaveSettings>,
    pub sessions: Arc<SessionRegistry>,
    pub sse: Arc<SseBroker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ephemeral_images: Arc<EphemeralImageStore>,
    pub session_images: Arc<SessionImageStore>,
    pub compute: Arc<ComputeClient>,
    pub llm: Arc<LlmClient>,
    pub agent_prompt: Arc<str>,
    pub agent_tools_prompt: Arc<str>,
}
