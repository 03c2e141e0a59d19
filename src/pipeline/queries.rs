use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::job::QueryKind;
use crate::engine::output::{first_json_array, strip_code_fences};
use crate::engine::{AnswerEngine, EngineRequest};
use crate::error::GenerationError;
use crate::net::truncate_for_log;
use crate::structure::fetch::PageFetcher;
use crate::structure::page_text;

pub const MIN_QUERIES: usize = 1;
pub const MAX_QUERIES: usize = 50;
const MIN_QUERY_CHARS: usize = 4;

static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"\n]{2,})"|“([^”\n]{2,})”"#).expect("Failed to compile quoted-string regex")
});
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*•]+|\(?\d{1,2}[.):]|\d{1,2}\s*-)\s*").expect("Failed to compile bullet regex")
});

#[derive(Debug, Clone)]
pub struct QueryGeneratorConfig {
    /// Extra engine rounds spent asking for missing queries.
    pub generation_attempts: usize,
    pub content_excerpt_chars: usize,
}

impl Default for QueryGeneratorConfig {
    fn default() -> Self {
        Self {
            generation_attempts: 2,
            content_excerpt_chars: 6000,
        }
    }
}

pub struct QueryGenerator {
    engine: Arc<dyn AnswerEngine>,
    fetcher: Arc<dyn PageFetcher>,
    config: QueryGeneratorConfig,
}

impl QueryGenerator {
    pub fn new(engine: Arc<dyn AnswerEngine>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            engine,
            fetcher,
            config: QueryGeneratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QueryGeneratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Produces exactly `num_queries` (clamped to 1..=50) distinct probe
    /// queries for the site, or fails.
    pub async fn generate(&self, url: &Url, num_queries: usize) -> Result<Vec<String>, GenerationError> {
        let wanted = num_queries.clamp(MIN_QUERIES, MAX_QUERIES);
        let excerpt = self.site_excerpt(url).await;

        let prompt = generation_prompt(url, excerpt.as_deref(), wanted);
        let response = self.engine.generate(EngineRequest::plain(prompt)).await?;

        let mut set = QuerySet::new(wanted);
        set.extend(parse_query_list(&response.text));
        debug!(url = %url, wanted, parsed = set.len(), "initial query batch");

        let mut rounds = 0usize;
        while !set.is_full() && rounds < self.config.generation_attempts {
            rounds += 1;
            let missing = wanted - set.len();
            let prompt = repair_prompt(url, excerpt.as_deref(), set.items(), missing);
            match self.engine.generate(EngineRequest::plain(prompt)).await {
                Ok(response) => {
                    let before = set.len();
                    set.extend(parse_query_list(&response.text));
                    debug!(url = %url, round = rounds, added = set.len() - before, "query repair round");
                }
                Err(err) => warn!(url = %url, round = rounds, error = %err, "query repair round failed"),
            }
        }

        if !set.is_full() {
            return Err(GenerationError::Shortfall {
                wanted,
                got: set.len(),
                attempts: rounds + 1,
            });
        }

        info!(url = %url, count = wanted, "queries generated");
        Ok(set.into_items())
    }

    async fn site_excerpt(&self, url: &Url) -> Option<String> {
        match self.fetcher.fetch(url).await {
            Ok(page) => {
                let text = page_text(&page.body);
                if text.is_empty() {
                    warn!(url = %url, "seed page has no visible text; prompting with URL only");
                    return None;
                }
                Some(text.chars().take(self.config.content_excerpt_chars).collect())
            }
            Err(err) => {
                warn!(url = %url, error = %err, "seed page fetch failed; prompting with URL only");
                None
            }
        }
    }
}

/// Distinct queries in first-seen order, capped at the requested count.
struct QuerySet {
    capacity: usize,
    items: Vec<String>,
    keys: HashSet<String>,
}

impl QuerySet {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Vec::with_capacity(capacity),
            keys: HashSet::new(),
        }
    }

    fn extend(&mut self, candidates: Vec<String>) {
        for candidate in candidates {
            if self.is_full() {
                break;
            }
            if self.keys.insert(dedupe_key(&candidate)) {
                self.items.push(candidate);
            }
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    fn items(&self) -> &[String] {
        &self.items
    }

    fn into_items(self) -> Vec<String> {
        self.items
    }
}

fn dedupe_key(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Tolerant list extraction: JSON array, then quoted strings, then one item
/// per line (or per comma on a single line) with bullets stripped.
pub fn parse_query_list(text: &str) -> Vec<String> {
    let raw = if let Some(items) = first_json_array(text) {
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Object(map) => map.get("query").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
    } else {
        let quoted = QUOTED_RE
            .captures_iter(text)
            .filter_map(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_string())
            .collect::<Vec<_>>();
        if quoted.is_empty() {
            split_plain_list(strip_code_fences(text))
        } else {
            quoted
        }
    };

    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|item| clean_query(&item))
        .filter(|item| item.chars().count() >= MIN_QUERY_CHARS)
        .filter(|item| seen.insert(dedupe_key(item)))
        .collect()
}

fn split_plain_list(text: &str) -> Vec<String> {
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    if lines.len() == 1 {
        return lines[0].split(',').map(str::to_string).collect();
    }
    lines
        .into_iter()
        .filter(|line| !line.ends_with(':'))
        .map(|line| BULLET_RE.replace(line, "").into_owned())
        .collect()
}

fn clean_query(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”' | ',' | '[' | ']'))
        .trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn classify_query(query: &str, brand: Option<&str>) -> QueryKind {
    match brand {
        Some(brand) if !brand.is_empty() && query.to_lowercase().contains(&brand.to_lowercase()) => {
            QueryKind::Direct
        }
        _ => QueryKind::Generic,
    }
}

fn generation_prompt(url: &Url, excerpt: Option<&str>, count: usize) -> String {
    let content = match excerpt {
        Some(text) => format!("WEBSITE CONTENT:\n```\n{text}\n```"),
        None => "The page content could not be retrieved; infer the topic from the URL alone.".to_string(),
    };
    format!(
        "You write realistic search queries that people type into AI assistants and search engines.\n\n\
WEBSITE: {url}\n\n{content}\n\n\
Write {count} distinct queries a real user might ask when looking for information related to this site. Mix:\n\
- the main topics, services and products\n\
- the brand or company name and its variations\n\
- problems users try to solve and how-to questions\n\
- comparisons with alternatives and industry trends\n\
Keep them natural, mostly 2 to 8 words, and vary the phrasing (what, how, why, best, vs).\n\n\
OUTPUT: only a JSON array of exactly {count} double-quoted strings, e.g. [\"query one\", \"query two\"]. \
No commentary, no markdown."
    )
}

fn repair_prompt(url: &Url, excerpt: Option<&str>, existing: &[String], missing: usize) -> String {
    let context = excerpt
        .map(|text| truncate_for_log(text, 1500))
        .unwrap_or_default();
    let existing = serde_json::to_string(existing).unwrap_or_default();
    format!(
        "WEBSITE: {url}\n{context}\n\n\
These search queries already exist: {existing}\n\n\
Give {missing} more realistic search queries about this site, each different from the ones above.\n\
OUTPUT: only a JSON array of exactly {missing} double-quoted strings."
    )
}
