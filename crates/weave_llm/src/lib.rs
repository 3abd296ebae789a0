//! A streaming chat client for Weave's local LLM endpoint, plus the tool schema the agent prompt
//! uses to drive image generation.

pub mod client;
pub mod error;

pub use client::{update_generation_tool, ChatMessage, ChatResult, LlmClient, ToolCall, ToolDefinition};
pub use error::LlmError;
