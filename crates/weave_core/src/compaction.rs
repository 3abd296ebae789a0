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

//! Rule-based context compaction, used when Stage 1 extraction returns a malformed tool call and
//! the orchestrator retries with a trimmed-down history.
//!
//! Deliberately not LLM-based: a compaction step that itself calls the model risks compounding
//! the original failure.

use crate::conversation::{ContextMessage, Role};

const MAX_SUMMARY_LEN: usize = 200;

const FILLER_WORDS: &[&str] = &[
    "please", "just", "really", "very", "basically", "actually", "like", "um", "uh", "kind of",
    "sort of", "i guess", "maybe", "perhaps",
];

/// Concatenates every user message's content, strips filler words, and caps the result at
/// [`MAX_SUMMARY_LEN`] bytes (never splitting inside a UTF-8 character).
fn summarize_user_messages(messages: &[ContextMessage]) -> String {
    let joined = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    let mut words: Vec<&str> = joined.split_whitespace().collect();
    words.retain(|w| {
        let lower = w.to_lowercase();
        !FILLER_WORDS.contains(&lower.as_str())
    });
    let stripped = words.join(" ");

    if stripped.len() <= MAX_SUMMARY_LEN {
        return stripped;
    }
    let mut end = MAX_SUMMARY_LEN;
    while end > 0 && !stripped.is_char_boundary(end) {
        end -= 1;
    }
    stripped[..end].to_owned()
}

/// Replaces the conversation's history with a single system message summarising what the user
/// has asked for, and asking for a valid `update_generation` tool call.
pub fn compact_for_retry(messages: &[ContextMessage]) -> ContextMessage {
    let summary = summarize_user_messages(messages);
    ContextMessage {
        role: Role::System,
        content: format!(
            "The user has been asking for: \"{summary}\". Call update_generation with a valid prompt and parameters."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(content: &str) -> ContextMessage {
        ContextMessage {
            role: Role::User,
            content: content.to_owned(),
        }
    }

    #[test]
    fn strips_filler_words() {
        let messages = vec![user("please just draw me a really cool cat")];
        let summary = summarize_user_messages(&messages);
        assert_eq!(summary, "draw me a cool cat");
    }

    #[test]
    fn ignores_non_user_messages() {
        let messages = vec![
            ContextMessage {
                role: Role::System,
                content: "system preamble".into(),
            },
            user("a cat"),
            ContextMessage {
                role: Role::Assistant,
                content: "sure thing".into(),
            },
        ];
        assert_eq!(summarize_user_messages(&messages), "a cat");
    }

    #[test]
    fn caps_at_200_bytes_on_a_char_boundary() {
        let long = "é".repeat(300);
        let messages = vec![user(&long)];
        let summary = summarize_user_messages(&messages);
        assert!(summary.len() <= MAX_SUMMARY_LEN);
        assert!(summary.is_char_boundary(summary.len()));
    }

    #[test]
    fn compact_for_retry_asks_for_a_valid_tool_call() {
        let messages = vec![user("a dancing cat")];
        let retry_message = compact_for_retry(&messages);
        assert_eq!(retry_message.role, Role::System);
        assert!(retry_message.content.contains("a dancing cat"));
        assert!(retry_message.content.contains("update_generation"));
    }
}
