//! Typed errors for the citation pipeline and the structure analyzer.

use serde::Serialize;
use thiserror::Error;

/// Errors raised by an [`AnswerEngine`](crate::engine::AnswerEngine).
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Missing API key or invalid client settings
    #[error("engine configuration error: {0}")]
    Config(String),

    /// Connection failed before a response arrived
    #[error("engine network error: {0}")]
    Network(String),

    /// The engine call exceeded its time budget
    #[error("engine call timed out after {0} ms")]
    Timeout(u64),

    /// Quota or rate limit hit (HTTP 429)
    #[error("engine rate limited: {0}")]
    RateLimited(String),

    /// Non-success response from the engine API
    #[error("engine API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body could not be decoded
    #[error("engine response parse error: {0}")]
    Parse(String),
}

impl EngineError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            EngineError::Timeout(timeout_ms)
        } else if err.is_decode() {
            EngineError::Parse(err.to_string())
        } else {
            EngineError::Network(err.to_string())
        }
    }
}

/// Why a submission was refused before any job state changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL cannot be empty")]
    EmptyUrl,

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("numOfQueries must be between {min} and {max}, got {got}")]
    QueryCount { got: usize, min: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("analysis is already running")]
    Busy,
}

/// Fatal query generation failure; moves the job to `error`.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("query generation failed: {0}")]
    Engine(#[from] EngineError),

    #[error("engine produced {got} usable queries out of {wanted} after {attempts} attempts")]
    Shortfall {
        wanted: usize,
        got: usize,
        attempts: usize,
    },
}

/// Per-query failure; recorded on the query result, never fatal to the job.
#[derive(Debug, Clone, Error)]
#[error("probe '{query}' failed: {source}")]
pub struct ProbeError {
    pub query: String,
    #[source]
    pub source: EngineError,
}

/// Why a citation link could not be turned into a domain.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionFailure {
    #[error("target blocked automated client (HTTP {status})")]
    Blocked { status: u16 },

    #[error("target answered HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("redirect loop at {url}")]
    RedirectLoop { url: String },

    #[error("more than {max_hops} redirects")]
    TooManyRedirects { max_hops: usize },

    #[error("resolution timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("unusable link: {link}")]
    InvalidLink { link: String },
}

#[derive(Debug, Clone, Error)]
pub enum StructureFetchError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("could not fetch {url}: {message}")]
    Network { url: String, message: String },

    #[error("fetching {url} timed out")]
    Timeout { url: String },

    #[error("{url} answered HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("{url} returned an empty document")]
    EmptyBody { url: String },
}

/// Job results were requested before the job completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("analysis not complete yet (status: {status})")]
pub struct NotReady {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetailError {
    #[error(transparent)]
    NotReady(#[from] NotReady),

    #[error("query not found in analysis results: {0}")]
    UnknownQuery(String),
}
