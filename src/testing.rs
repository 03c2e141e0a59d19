//! Scripted collaborators for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::engine::{AnswerEngine, EngineRequest, EngineResponse};
use crate::error::{EngineError, ResolutionFailure, StructureFetchError};
use crate::pipeline::resolver::{LinkResolver, ResolvedLink};
use crate::structure::fetch::{FetchedPage, PageFetcher};

type Handler = dyn Fn(&EngineRequest) -> Result<EngineResponse, EngineError> + Send + Sync;
type DelayFn = dyn Fn(&EngineRequest) -> Duration + Send + Sync;

pub(crate) struct ScriptedEngine {
    handler: Arc<Handler>,
    delay: Arc<DelayFn>,
    requests: Mutex<Vec<EngineRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedEngine {
    pub(crate) fn new(
        handler: impl Fn(&EngineRequest) -> Result<EngineResponse, EngineError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            delay: Arc::new(|_| Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_by(move |_| delay)
    }

    pub(crate) fn with_delay_by(
        mut self,
        delay: impl Fn(&EngineRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay = Arc::new(delay);
        self
    }

    pub(crate) fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Highest number of overlapping `generate` calls observed.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerEngine for ScriptedEngine {
    async fn generate(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = (self.delay)(&request);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(&request)
    }
}

/// Link resolver backed by a fixed table. Unknown links fail as invalid.
#[derive(Default)]
pub(crate) struct StaticResolver {
    outcomes: HashMap<String, Result<ResolvedLink, ResolutionFailure>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StaticResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_domain(mut self, link: &str, domain: &str) -> Self {
        self.outcomes.insert(
            link.to_string(),
            Ok(ResolvedLink {
                url: format!("https://{domain}/"),
                domain: domain.to_string(),
            }),
        );
        self
    }

    pub(crate) fn with_failure(mut self, link: &str, failure: ResolutionFailure) -> Self {
        self.outcomes.insert(link.to_string(), Err(failure));
        self
    }

    pub(crate) fn calls(&self, link: &str) -> usize {
        self.calls.lock().unwrap().get(link).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LinkResolver for StaticResolver {
    async fn resolve(&self, raw_link: &str) -> Result<ResolvedLink, ResolutionFailure> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(raw_link.to_string())
            .or_default() += 1;
        self.outcomes.get(raw_link).cloned().unwrap_or_else(|| {
            Err(ResolutionFailure::InvalidLink {
                link: raw_link.to_string(),
            })
        })
    }
}

/// Page fetcher serving canned bodies. Unknown URLs answer 404.
#[derive(Default)]
pub(crate) struct StaticFetcher {
    pages: HashMap<String, Result<FetchedPage, StructureFetchError>>,
}

impl StaticFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_html(self, url: &str, html: &str) -> Self {
        self.with_body(url, "text/html", html)
    }

    pub(crate) fn with_text(self, url: &str, text: &str) -> Self {
        self.with_body(url, "text/plain", text)
    }

    pub(crate) fn with_error(mut self, url: &str, error: StructureFetchError) -> Self {
        self.pages.insert(url.to_string(), Err(error));
        self
    }

    fn with_body(mut self, url: &str, content_type: &str, body: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            Ok(FetchedPage {
                final_url: url.to_string(),
                status: 200,
                content_type: content_type.to_string(),
                body: body.to_string(),
            }),
        );
        self
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, StructureFetchError> {
        self.pages.get(url.as_str()).cloned().unwrap_or_else(|| {
            Err(StructureFetchError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
        })
    }
}
