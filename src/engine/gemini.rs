use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{AnswerEngine, EngineRequest, EngineResponse, Grounding, GroundingSource, GroundingSupport};
use crate::error::EngineError;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` client with optional Google Search grounding.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(EngineError::Config("API key is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
        })
    }

    /// Reads the key from the first set variable among `vars`.
    pub fn from_env(vars: &[&str], timeout: Duration) -> Result<Self, EngineError> {
        let key = vars
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                EngineError::Config(format!("missing API key, set one of: {}", vars.join(", ")))
            })?;
        Self::new(key, timeout)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(request: &EngineRequest) -> Value {
        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }]
            }]
        });
        if request.grounded {
            body["tools"] = json!([{ "google_search": {} }]);
        }
        body
    }
}

#[async_trait]
impl AnswerEngine for GeminiClient {
    async fn generate(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let started = std::time::Instant::now();
        let timeout_ms = self.timeout.as_millis() as u64;
        let endpoint = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(&request))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "gemini request failed");
                EngineError::from_reqwest(e, timeout_ms)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_error_message(&body);
            warn!(status = status.as_u16(), error = %message, "gemini API error");
            if status.as_u16() == 429 {
                return Err(EngineError::RateLimited(message));
            }
            return Err(EngineError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let raw: RawResponse = response
            .json()
            .await
            .map_err(|e| EngineError::from_reqwest(e, timeout_ms))?;
        let decoded = decode_response(raw)?;

        debug!(
            model = %self.model,
            grounded = request.grounded,
            sources = decoded.grounding.as_ref().map(|g| g.sources.len()).unwrap_or(0),
            duration_ms = started.elapsed().as_millis() as u64,
            "gemini generateContent"
        );
        Ok(decoded)
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(300).collect())
}

fn decode_response(raw: RawResponse) -> Result<EngineResponse, EngineError> {
    let Some(candidate) = raw.candidates.into_iter().next() else {
        let reason = raw
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(EngineError::Parse(format!("empty response: {reason}")));
    };

    let text = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let grounding = candidate.grounding_metadata.map(|meta| Grounding {
        web_search_queries: meta.web_search_queries,
        sources: meta
            .grounding_chunks
            .into_iter()
            .map(|chunk| {
                let web = chunk.web.unwrap_or_default();
                GroundingSource {
                    title: web.title,
                    uri: web.uri,
                }
            })
            .collect(),
        supports: meta
            .grounding_supports
            .into_iter()
            .map(|support| {
                let segment = support.segment.unwrap_or_default();
                GroundingSupport {
                    text: segment.text.unwrap_or_default(),
                    start_index: segment.start_index.unwrap_or(0),
                    end_index: segment.end_index.unwrap_or(0),
                    source_indices: support.grounding_chunk_indices,
                }
            })
            .collect(),
    });

    Ok(EngineResponse { text, grounding })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    #[serde(default)]
    candidates: Vec<RawCandidate>,
    prompt_feedback: Option<RawPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCandidate {
    content: Option<RawContent>,
    grounding_metadata: Option<RawGroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
struct RawPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroundingMetadata {
    #[serde(default)]
    web_search_queries: Vec<String>,
    #[serde(default)]
    grounding_chunks: Vec<RawChunk>,
    #[serde(default)]
    grounding_supports: Vec<RawSupport>,
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    web: Option<RawWeb>,
}

#[derive(Debug, Default, Deserialize)]
struct RawWeb {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSupport {
    segment: Option<RawSegment>,
    #[serde(default)]
    grounding_chunk_indices: Vec<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSegment {
    start_index: Option<usize>,
    end_index: Option<usize>,
    text: Option<String>,
}
