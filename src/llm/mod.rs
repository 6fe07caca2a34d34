//! Oracle abstraction: a stateless text-completion capability.
//!
//! The agent loop only ever asks "given this conversation, what comes next?"
//! and receives plain text back. Hosted models, local models and test stubs
//! all implement [`LlmClient`].

mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use openai::OpenAiClient;

/// Who authored a message in the conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Output of a tool execution fed back to the oracle
    Tool,
}

/// A single conversation entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Could not decode provider response: {0}")]
    Decode(String),

    #[error("Provider returned an empty completion")]
    EmptyResponse,
}

/// Text-completion oracle consulted by the agent loop.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Produce the next assistant message for the given conversation.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}
