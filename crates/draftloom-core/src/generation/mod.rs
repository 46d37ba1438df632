//! Text generation: the boundary to the external generation service.
//!
//! The orchestrator only sees [`TextGenerator`]. [`HttpTextGenerator`] talks
//! to Anthropic- or OpenAI-compatible HTTP APIs; tests plug in scripted
//! in-process implementations.

mod http;
pub mod prompts;

pub use http::HttpTextGenerator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationCallError;

/// What a request is for. Lets providers and test doubles tell calls apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Requirements and scoring-criteria analysis feeding the outline.
    Analysis,
    Outline,
    Leaf,
    ParentSummary,
    Differentiate,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Outline => "outline",
            Self::Leaf => "leaf",
            Self::ParentSummary => "parent_summary",
            Self::Differentiate => "differentiate",
        }
    }
}

/// A fully rendered request for the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    pub kind: RequestKind,
    /// Title of the section being written; empty for analysis and outline requests.
    pub title: String,
    /// Root-to-node titles, the section itself included.
    pub path: Vec<String>,
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce text for one request. One call, no retries.
    async fn generate(&self, ctx: &PromptContext) -> Result<String, GenerationCallError>;

    /// Short identifier for logs.
    fn name(&self) -> &str;
}
