use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::StructureFetchError;
use crate::net::{BROWSER_USER_AGENT, browser_headers};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        let mime = self.content_type.to_ascii_lowercase();
        if mime.contains("html") {
            return true;
        }
        let head = self
            .body
            .trim_start()
            .chars()
            .take(256)
            .collect::<String>()
            .to_ascii_lowercase();
        head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<body")
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, StructureFetchError>;
}

#[derive(Clone)]
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent.unwrap_or(BROWSER_USER_AGENT))
            .default_headers(browser_headers())
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, StructureFetchError> {
        let started = std::time::Instant::now();
        let map_err = |err: reqwest::Error| {
            if err.is_timeout() {
                StructureFetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                StructureFetchError::Network {
                    url: url.to_string(),
                    message: err.to_string(),
                }
            }
        };

        let response = self.client.get(url.clone()).send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        if !response.status().is_success() {
            return Err(StructureFetchError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let body = response.text().await.map_err(map_err)?;
        if body.trim().is_empty() {
            return Err(StructureFetchError::EmptyBody {
                url: url.to_string(),
            });
        }

        debug!(
            url = %url,
            final_url = %final_url,
            status,
            bytes = body.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "page fetched"
        );
        Ok(FetchedPage {
            final_url,
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::http::{StatusCode, header};
    use axum::routing::get;

    async fn serve() -> String {
        let app = Router::new()
            .route(
                "/page",
                get(|| async {
                    (
                        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                        "<html><body><h1>Hi</h1></body></html>",
                    )
                }),
            )
            .route(
                "/moved",
                get(|| async { (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/page")]) }),
            )
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route("/blank", get(|| async { "   " }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fetcher() -> HttpPageFetcher {
        HttpPageFetcher::new(Duration::from_secs(5), None).unwrap()
    }

    #[tokio::test]
    async fn follows_redirects_and_reports_final_url() {
        let base = serve().await;
        let url = Url::parse(&format!("{base}/moved")).unwrap();
        let page = fetcher().fetch(&url).await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(page.final_url, format!("{base}/page"));
        assert_eq!(page.content_type, "text/html");
        assert!(page.is_html());
    }

    #[tokio::test]
    async fn non_success_and_empty_pages_fail() {
        let base = serve().await;
        let missing = Url::parse(&format!("{base}/missing")).unwrap();
        assert!(matches!(
            fetcher().fetch(&missing).await,
            Err(StructureFetchError::HttpStatus { status: 404, .. })
        ));
        let blank = Url::parse(&format!("{base}/blank")).unwrap();
        assert!(matches!(
            fetcher().fetch(&blank).await,
            Err(StructureFetchError::EmptyBody { .. })
        ));
    }

    #[test]
    fn sniffs_html_without_content_type() {
        let page = FetchedPage {
            final_url: String::new(),
            status: 200,
            content_type: "unknown".to_string(),
            body: "\n<!DOCTYPE html><html></html>".to_string(),
        };
        assert!(page.is_html());
        let text = FetchedPage {
            body: "# llms.txt\n> about".to_string(),
            content_type: "text/plain".to_string(),
            ..page
        };
        assert!(!text.is_html());
    }
}
