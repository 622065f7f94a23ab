//! Schema linking: turn a natural-language question into guarded SQL.
//!
//! The linker builds a ladder of prompt variants (focused context first,
//! full schema later), asks a language model for SQL, checks the answer
//! against the value similarity index and the guard, and executes it
//! read-only. Every rejection becomes a corrective message for the next,
//! broader attempt; nothing ever runs unguarded.
//!
//! The model and the embedding service sit behind the [`LlmClient`] and
//! [`Embedder`] traits so tests drive the whole loop with fakes. A real
//! OpenAI-backed pair lives in [`providers`] behind the `openai` feature.

pub mod orchestrator;
pub mod variants;

#[cfg(feature = "openai")]
pub mod providers;

pub use orchestrator::{LinkError, LinkOutcome, LinkerConfig, SchemaLinker};
pub use variants::{PromptVariant, PromptVariantBuilder, VariantKnobs};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Assistant,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::Assistant => write!(f, "assistant"),
            Role::User => write!(f, "user"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Chat-completion seam. Implementations return the raw model text; fence
/// stripping and SQL validation happen in the orchestrator.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> anyhow::Result<String>;
}

/// Text-embedding seam for focused-schema ranking. Failures are
/// survivable; the variant builder falls back to static ordering.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}
