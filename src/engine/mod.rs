//! Generative answer engine capability.
//!
//! The pipeline only needs one thing from an engine: answer a prompt, optionally
//! grounded in live web search, and report which sources backed the answer.

mod gemini;
pub(crate) mod output;

pub use gemini::{GeminiClient, DEFAULT_GEMINI_MODEL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    pub prompt: String,
    pub grounded: bool,
}

impl EngineRequest {
    pub fn grounded(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            grounded: true,
        }
    }

    pub fn plain(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            grounded: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineResponse {
    pub text: String,
    pub grounding: Option<Grounding>,
}

impl EngineResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            grounding: None,
        }
    }
}

/// Source attribution attached to a grounded answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Grounding {
    pub web_search_queries: Vec<String>,
    pub sources: Vec<GroundingSource>,
    pub supports: Vec<GroundingSupport>,
}

/// One retrieved source. `uri` is frequently a redirect wrapper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: Option<String>,
    pub uri: Option<String>,
}

/// A span of the answer text and the sources backing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingSupport {
    pub text: String,
    pub start_index: usize,
    pub end_index: usize,
    pub source_indices: Vec<usize>,
}

#[async_trait]
pub trait AnswerEngine: Send + Sync {
    async fn generate(&self, request: EngineRequest) -> Result<EngineResponse, EngineError>;
}
