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

//! The shared domain model every other Weave crate builds on: sessions, conversations,
//! persistence, image stores, the rate limiter, the SSE event vocabulary, and the generation
//! clamping and context-compaction rules the chat orchestrator relies on.

pub mod clamp;
pub mod compaction;
pub mod conversation;
pub mod error;
pub mod image_store;
pub mod persistence;
pub mod rate_limiter;
pub mod session;
pub mod settings;
pub mod sse;

pub use clamp::{clamp_generation, GenerationClamp};
pub use conversation::{Conversation, GenerationSettings, Message, Role};
pub use session::{Session, SessionRegistry};
pub use settings::WeaveSettings;
pub use sse::{SseBroker, SseEvent};
