use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::job::{AnswerSegment, Citation, ParseKind, QueryResult};
use super::queries::classify_query;
use super::resolver::{LinkResolver, ResolvedLink};
use crate::engine::{AnswerEngine, EngineRequest, EngineResponse};
use crate::error::{ProbeError, ResolutionFailure};
use crate::net::link_key;

pub const DEFAULT_RESOLVE_CONCURRENCY: usize = 6;

static MARKDOWN_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]\n]+)\]\((https?://[^)\s]+)\)").expect("Failed to compile markdown link regex")
});
static BARE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'`)\]]+"#).expect("Failed to compile URL regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCitation {
    pub title: String,
    pub link: String,
    /// Position of the grounding source this came from, when structured.
    pub source_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CitationParse {
    Structured(Vec<RawCitation>),
    FallbackText(Vec<RawCitation>),
    Unparseable,
}

impl CitationParse {
    pub fn kind(&self) -> ParseKind {
        match self {
            CitationParse::Structured(_) => ParseKind::Structured,
            CitationParse::FallbackText(_) => ParseKind::FallbackText,
            CitationParse::Unparseable => ParseKind::Unparseable,
        }
    }

    pub fn citations(&self) -> &[RawCitation] {
        match self {
            CitationParse::Structured(c) | CitationParse::FallbackText(c) => c,
            CitationParse::Unparseable => &[],
        }
    }
}

/// Grounding metadata first; scraped links from the answer text otherwise.
pub fn parse_citations(response: &EngineResponse) -> CitationParse {
    let structured = structured_citations(response);
    if !structured.is_empty() {
        return CitationParse::Structured(structured);
    }
    let scraped = text_citations(&response.text);
    if !scraped.is_empty() {
        return CitationParse::FallbackText(scraped);
    }
    CitationParse::Unparseable
}

fn structured_citations(response: &EngineResponse) -> Vec<RawCitation> {
    let Some(grounding) = &response.grounding else {
        return Vec::new();
    };

    let referenced = grounding
        .supports
        .iter()
        .flat_map(|s| s.source_indices.iter().copied())
        .collect::<BTreeSet<_>>();
    let keep = |index: usize| grounding.supports.is_empty() || referenced.contains(&index);

    let mut seen = HashSet::new();
    grounding
        .sources
        .iter()
        .enumerate()
        .filter(|(index, _)| keep(*index))
        .filter_map(|(index, source)| {
            let link = source.uri.as_deref()?.trim();
            if link.is_empty() || !seen.insert(link.to_string()) {
                return None;
            }
            let title = source
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(link)
                .to_string();
            Some(RawCitation {
                title,
                link: link.to_string(),
                source_index: Some(index),
            })
        })
        .collect()
}

fn text_citations(text: &str) -> Vec<RawCitation> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for caps in MARKDOWN_LINK_RE.captures_iter(text) {
        let (Some(title), Some(link)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let link = trim_url_tail(link.as_str());
        let Some(key) = link_key(link) else {
            continue;
        };
        if seen.insert(key) {
            out.push(RawCitation {
                title: title.as_str().trim().to_string(),
                link: link.to_string(),
                source_index: None,
            });
        }
    }

    for found in BARE_URL_RE.find_iter(text) {
        let link = trim_url_tail(found.as_str());
        let Some(key) = link_key(link) else {
            continue;
        };
        if !seen.insert(key) {
            continue;
        }
        let title = url::Url::parse(link)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| link.to_string());
        out.push(RawCitation {
            title,
            link: link.to_string(),
            source_index: None,
        });
    }

    out
}

fn trim_url_tail(link: &str) -> &str {
    link.trim_end_matches(['.', ',', ';', ':', '!', '?'])
}

/// Runs one probe query and resolves what the answer cites.
pub struct CitationExtractor {
    engine: Arc<dyn AnswerEngine>,
    resolver: Arc<dyn LinkResolver>,
    resolve_concurrency: usize,
    brand: Option<String>,
}

impl CitationExtractor {
    pub fn new(engine: Arc<dyn AnswerEngine>, resolver: Arc<dyn LinkResolver>) -> Self {
        Self {
            engine,
            resolver,
            resolve_concurrency: DEFAULT_RESOLVE_CONCURRENCY,
            brand: None,
        }
    }

    pub fn with_resolve_concurrency(mut self, concurrency: usize) -> Self {
        self.resolve_concurrency = concurrency.max(1);
        self
    }

    /// Brand label used to classify queries as direct or generic.
    pub fn with_brand(mut self, brand: Option<String>) -> Self {
        self.brand = brand;
        self
    }

    pub async fn extract(&self, query: &str) -> Result<QueryResult, ProbeError> {
        let kind = classify_query(query, self.brand.as_deref());
        let response = self
            .engine
            .generate(EngineRequest::grounded(query))
            .await
            .map_err(|source| ProbeError {
                query: query.to_string(),
                source,
            })?;

        let parse = parse_citations(&response);
        let raw = parse.citations();
        let outcomes = self
            .resolve_all(raw.iter().map(|c| c.link.clone()).collect())
            .await;

        let citations = raw
            .iter()
            .map(|c| {
                let outcome = outcomes.get(&c.link).cloned().unwrap_or_else(|| {
                    Err(ResolutionFailure::Network {
                        message: "resolution task did not finish".to_string(),
                    })
                });
                match outcome {
                    Ok(ResolvedLink { url, domain }) => Citation {
                        title: c.title.clone(),
                        raw_link: c.link.clone(),
                        resolved_domain: Some(domain),
                        resolved_url: Some(url),
                        failure: None,
                    },
                    Err(failure) => Citation {
                        title: c.title.clone(),
                        raw_link: c.link.clone(),
                        resolved_domain: None,
                        resolved_url: None,
                        failure: Some(failure),
                    },
                }
            })
            .collect::<Vec<_>>();

        let segments = segments_for(&response, raw);
        let resolved = citations.iter().filter(|c| c.resolved_domain.is_some()).count();
        debug!(
            query,
            parse = ?parse.kind(),
            citations = citations.len(),
            resolved,
            "probe finished"
        );

        Ok(QueryResult {
            query: query.to_string(),
            kind,
            raw_answer_text: response.text.clone(),
            citations,
            search_queries: response
                .grounding
                .as_ref()
                .map(|g| g.web_search_queries.clone())
                .unwrap_or_default(),
            segments,
            parse: parse.kind(),
            error: None,
        })
    }

    async fn resolve_all(
        &self,
        links: Vec<String>,
    ) -> HashMap<String, Result<ResolvedLink, ResolutionFailure>> {
        let mut queue = VecDeque::new();
        let mut queued = HashSet::new();
        for link in links {
            if queued.insert(link.clone()) {
                queue.push_back(link);
            }
        }

        let mut outcomes = HashMap::new();
        let mut set = JoinSet::new();
        loop {
            while set.len() < self.resolve_concurrency {
                let Some(link) = queue.pop_front() else {
                    break;
                };
                let resolver = self.resolver.clone();
                set.spawn(async move {
                    let outcome = resolver.resolve(&link).await;
                    (link, outcome)
                });
            }

            if set.is_empty() {
                break;
            }

            if let Some(joined) = set.join_next().await {
                match joined {
                    Ok((link, outcome)) => {
                        if let Err(failure) = &outcome {
                            debug!(link = %link, failure = %failure, "citation link unresolved");
                        }
                        outcomes.insert(link, outcome);
                    }
                    Err(err) => warn!(error = %err, "resolution worker failed"),
                }
            }
        }
        outcomes
    }
}

/// Maps grounding supports onto indices of the result's citation list.
fn segments_for(response: &EngineResponse, raw: &[RawCitation]) -> Vec<AnswerSegment> {
    let Some(grounding) = &response.grounding else {
        return Vec::new();
    };
    let by_source = raw
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.source_index.map(|s| (s, i)))
        .collect::<HashMap<_, _>>();

    grounding
        .supports
        .iter()
        .map(|support| AnswerSegment {
            text: support.text.clone(),
            start_index: support.start_index,
            end_index: support.end_index,
            citation_indices: support
                .source_indices
                .iter()
                .filter_map(|s| by_source.get(s).copied())
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Grounding, GroundingSource, GroundingSupport};
    use crate::error::EngineError;
    use crate::pipeline::job::QueryKind;
    use crate::testing::{ScriptedEngine, StaticResolver};

    fn source(title: &str, uri: &str) -> GroundingSource {
        GroundingSource {
            title: Some(title.to_string()),
            uri: Some(uri.to_string()),
        }
    }

    fn grounded(sources: Vec<GroundingSource>, supports: Vec<GroundingSupport>) -> EngineResponse {
        EngineResponse {
            text: "Answer text.".to_string(),
            grounding: Some(Grounding {
                web_search_queries: vec!["search one".to_string()],
                sources,
                supports,
            }),
        }
    }

    fn support(text: &str, indices: Vec<usize>) -> GroundingSupport {
        GroundingSupport {
            text: text.to_string(),
            start_index: 0,
            end_index: text.len(),
            source_indices: indices,
        }
    }

    #[test]
    fn structured_keeps_only_supported_chunks_in_chunk_order() {
        let response = grounded(
            vec![
                source("a.com", "https://r/a"),
                source("b.com", "https://r/b"),
                source("c.com", "https://r/c"),
            ],
            vec![support("x", vec![2]), support("y", vec![0, 2])],
        );
        let parse = parse_citations(&response);
        assert_eq!(parse.kind(), ParseKind::Structured);
        let links = parse.citations().iter().map(|c| c.link.as_str()).collect::<Vec<_>>();
        assert_eq!(links, vec!["https://r/a", "https://r/c"]);
    }

    #[test]
    fn structured_without_supports_keeps_all_web_chunks() {
        let response = grounded(
            vec![
                source("a.com", "https://r/a"),
                GroundingSource::default(),
                source("", "https://r/b"),
            ],
            Vec::new(),
        );
        let parse = parse_citations(&response);
        let citations = parse.citations();
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[1].title, "https://r/b");
    }

    #[test]
    fn falls_back_to_links_in_text() {
        let response = EngineResponse::text(
            "See [Rust Book](https://doc.rust-lang.org/book/) and https://crates.io/crates/tokio. \
             Also https://doc.rust-lang.org/book/#intro again.",
        );
        let parse = parse_citations(&response);
        assert_eq!(parse.kind(), ParseKind::FallbackText);
        let citations = parse.citations();
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].title, "Rust Book");
        assert_eq!(citations[1].link, "https://crates.io/crates/tokio");
        assert_eq!(citations[1].title, "crates.io");
    }

    #[test]
    fn nothing_citable_is_unparseable() {
        let parse = parse_citations(&EngineResponse::text("No sources here."));
        assert_eq!(parse, CitationParse::Unparseable);
        assert!(parse.citations().is_empty());
    }

    #[tokio::test]
    async fn extract_resolves_links_and_keeps_failures() {
        let engine = Arc::new(ScriptedEngine::new(|request| {
            assert!(request.grounded);
            Ok(grounded(
                vec![
                    source("example.org", "https://r/1"),
                    source("blocked.com", "https://r/2"),
                    source("foo.com", "https://r/3"),
                ],
                vec![support("Answer", vec![0, 1]), support("text.", vec![2])],
            ))
        }));
        let resolver = Arc::new(
            StaticResolver::new()
                .with_domain("https://r/1", "example.org")
                .with_failure("https://r/2", ResolutionFailure::Blocked { status: 403 })
                .with_domain("https://r/3", "foo.com"),
        );
        let extractor = CitationExtractor::new(engine, resolver.clone())
            .with_resolve_concurrency(2)
            .with_brand(Some("example".to_string()));

        let result = extractor.extract("what is example").await.unwrap();
        assert_eq!(result.kind, QueryKind::Direct);
        assert_eq!(result.parse, ParseKind::Structured);
        assert_eq!(result.search_queries, vec!["search one"]);
        assert_eq!(result.citations.len(), 3);
        assert_eq!(result.citations[0].resolved_domain.as_deref(), Some("example.org"));
        assert_eq!(result.citations[1].resolved_domain, None);
        assert_eq!(
            result.citations[1].failure,
            Some(ResolutionFailure::Blocked { status: 403 })
        );
        assert_eq!(result.segments[0].citation_indices, vec![0, 1]);
        assert_eq!(result.segments[1].citation_indices, vec![2]);
        assert_eq!(resolver.calls("https://r/1"), 1);
    }

    #[tokio::test]
    async fn engine_error_fails_the_probe() {
        let engine = Arc::new(ScriptedEngine::new(|_| {
            Err(EngineError::RateLimited("slow down".to_string()))
        }));
        let extractor = CitationExtractor::new(engine, Arc::new(StaticResolver::new()));
        let err = extractor.extract("anything").await.unwrap_err();
        assert_eq!(err.query, "anything");
        assert!(matches!(err.source, EngineError::RateLimited(_)));
    }

    #[tokio::test]
    async fn unparseable_answer_is_an_empty_success() {
        let engine = Arc::new(ScriptedEngine::new(|_| Ok(EngineResponse::text("Just prose."))));
        let extractor = CitationExtractor::new(engine, Arc::new(StaticResolver::new()));
        let result = extractor.extract("generic question").await.unwrap();
        assert_eq!(result.parse, ParseKind::Unparseable);
        assert!(result.citations.is_empty());
        assert_eq!(result.kind, QueryKind::Generic);
        assert!(result.error.is_none());
    }
}
