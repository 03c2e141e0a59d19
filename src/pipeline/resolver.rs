use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;
use url::Url;

use crate::error::ResolutionFailure;
use crate::net::{BROWSER_USER_AGENT, browser_headers, domain_of, is_tls_error};

pub const DEFAULT_MAX_HOPS: usize = 8;
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLink {
    pub url: String,
    pub domain: String,
}

#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, raw_link: &str) -> Result<ResolvedLink, ResolutionFailure>;
}

/// Follows redirects one hop at a time so loops, blocks and TLS failures can be
/// told apart instead of collapsing into a generic client error.
#[derive(Clone)]
pub struct HttpRedirectResolver {
    client: reqwest::Client,
    max_hops: usize,
    timeout: Duration,
}

impl HttpRedirectResolver {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(user_agent.unwrap_or(BROWSER_USER_AGENT))
            .default_headers(browser_headers())
            .connect_timeout(timeout)
            .timeout(timeout)
            .pool_max_idle_per_host(8)
            .build()?;
        Ok(Self {
            client,
            max_hops: DEFAULT_MAX_HOPS,
            timeout,
        })
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops.max(1);
        self
    }

    fn timeout_millis(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    async fn follow(&self, raw_link: &str) -> Result<ResolvedLink, ResolutionFailure> {
        let mut current = Url::parse(raw_link.trim())
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| ResolutionFailure::InvalidLink {
                link: raw_link.to_string(),
            })?;
        let mut seen = HashSet::<String>::new();
        let mut hops = 0usize;

        for _ in 0..=self.max_hops {
            if !seen.insert(current.to_string()) {
                return Err(ResolutionFailure::RedirectLoop {
                    url: current.to_string(),
                });
            }

            let response = self.probe(&current).await?;
            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or(ResolutionFailure::HttpStatus {
                        status: status.as_u16(),
                    })?;
                let next = current
                    .join(location)
                    .map_err(|_| ResolutionFailure::InvalidLink {
                        link: location.to_string(),
                    })?;
                debug!(from = %current, to = %next, status = status.as_u16(), "redirect hop");
                current = next;
                hops += 1;
                continue;
            }

            // A redirect already named the destination; its own refusal does not hide it.
            if !status.is_success() && hops > 0 {
                debug!(url = %current, status = status.as_u16(), "destination refused final hop");
                return resolved(&current);
            }
            if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ResolutionFailure::Blocked {
                    status: status.as_u16(),
                });
            }
            if !status.is_success() {
                return Err(ResolutionFailure::HttpStatus {
                    status: status.as_u16(),
                });
            }

            return resolved(&current);
        }

        Err(ResolutionFailure::TooManyRedirects {
            max_hops: self.max_hops,
        })
    }

    /// HEAD first; servers that refuse or block HEAD get the same hop as a GET.
    async fn probe(&self, url: &Url) -> Result<reqwest::Response, ResolutionFailure> {
        let head = self.send(self.client.head(url.clone()), 2).await?;
        if matches!(
            head.status(),
            StatusCode::METHOD_NOT_ALLOWED
                | StatusCode::NOT_IMPLEMENTED
                | StatusCode::FORBIDDEN
                | StatusCode::TOO_MANY_REQUESTS
        ) {
            return self.send(self.client.get(url.clone()), 1).await;
        }
        Ok(head)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        attempts: usize,
    ) -> Result<reqwest::Response, ResolutionFailure> {
        let max_attempts = attempts.max(1);
        let mut last_failure = ResolutionFailure::Network {
            message: "request not sent".to_string(),
        };

        for attempt in 1..=max_attempts {
            let Some(builder) = request.try_clone() else {
                break;
            };
            match builder.send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let retryable = err.is_connect() && !is_tls_error(&err);
                    last_failure = self.classify(err);
                    if !retryable || attempt == max_attempts {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(120 * attempt as u64)).await;
                }
            }
        }

        Err(last_failure)
    }

    fn classify(&self, err: reqwest::Error) -> ResolutionFailure {
        if err.is_timeout() {
            ResolutionFailure::Timeout {
                millis: self.timeout_millis(),
            }
        } else if is_tls_error(&err) {
            ResolutionFailure::Tls {
                message: err.to_string(),
            }
        } else if err.is_redirect() {
            ResolutionFailure::TooManyRedirects {
                max_hops: self.max_hops,
            }
        } else {
            ResolutionFailure::Network {
                message: err.to_string(),
            }
        }
    }
}

fn resolved(url: &Url) -> Result<ResolvedLink, ResolutionFailure> {
    let url = url.to_string();
    let domain = domain_of(&url).ok_or_else(|| ResolutionFailure::InvalidLink { link: url.clone() })?;
    Ok(ResolvedLink { url, domain })
}

#[async_trait]
impl LinkResolver for HttpRedirectResolver {
    async fn resolve(&self, raw_link: &str) -> Result<ResolvedLink, ResolutionFailure> {
        match tokio::time::timeout(self.timeout, self.follow(raw_link)).await {
            Ok(result) => result,
            Err(_) => Err(ResolutionFailure::Timeout {
                millis: self.timeout_millis(),
            }),
        }
    }
}

/// Memoizes outcomes per raw link for the lifetime of one job. Concurrent
/// lookups of the same link share one resolution.
pub struct CachingResolver {
    inner: Arc<dyn LinkResolver>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Result<ResolvedLink, ResolutionFailure>>>>>,
}

impl CachingResolver {
    pub fn new(inner: Arc<dyn LinkResolver>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LinkResolver for CachingResolver {
    async fn resolve(&self, raw_link: &str) -> Result<ResolvedLink, ResolutionFailure> {
        let cell = self
            .cache
            .lock()
            .await
            .entry(raw_link.to_string())
            .or_default()
            .clone();
        cell.get_or_init(|| self.inner.resolve(raw_link))
            .await
            .clone()
    }
}
