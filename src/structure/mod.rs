//! On-page structure scoring and improvement recommendations.

pub mod fetch;
pub mod metrics;
pub mod recommend;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use scraper::Html;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::engine::{AnswerEngine, EngineRequest};
use crate::error::StructureFetchError;
use crate::net::validate_http_url;

pub use fetch::{DEFAULT_FETCH_TIMEOUT, FetchedPage, HttpPageFetcher, PageFetcher};
pub use metrics::{Issue, LlmTxtStatus, StructureAnalysis, StructureRules};
pub use recommend::{Priority, Recommendation};

const LLM_TXT_PATHS: [&str; 2] = ["/llms.txt", "/llm.txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Engine,
    Rules,
    None,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureReport {
    pub url: String,
    pub final_url: String,
    pub analysis: StructureAnalysis,
    pub recommendations: Vec<Recommendation>,
    pub recommendation_source: RecommendationSource,
    pub analyzed_at: DateTime<Utc>,
}

pub struct StructureAnalyzer {
    fetcher: Arc<dyn PageFetcher>,
    engine: Option<Arc<dyn AnswerEngine>>,
    rules: StructureRules,
    rule_fallback: bool,
}

impl StructureAnalyzer {
    pub fn new(fetcher: Arc<dyn PageFetcher>, engine: Option<Arc<dyn AnswerEngine>>) -> Self {
        Self {
            fetcher,
            engine,
            rules: StructureRules::default(),
            rule_fallback: false,
        }
    }

    pub fn with_rules(mut self, rules: StructureRules) -> Self {
        self.rules = rules;
        self
    }

    /// When the engine yields nothing usable, derive recommendations from the
    /// detected issues instead of returning an empty list.
    pub fn with_rule_fallback(mut self, enabled: bool) -> Self {
        self.rule_fallback = enabled;
        self
    }

    pub async fn analyze(&self, url: &str) -> Result<StructureReport, StructureFetchError> {
        let url = validate_http_url(url)?;
        let started = std::time::Instant::now();

        let page = self.fetcher.fetch(&url).await?;
        let llm_txt = self.probe_llm_txt(&url).await;

        let analysis = metrics::analyze_document(&page.body, &self.rules, llm_txt);
        let sample = page_text(&page.body);

        let (recommendations, recommendation_source) =
            self.recommendations(&url, &analysis, &sample).await;

        info!(
            url = %url,
            score = analysis.score,
            issues = analysis.structural_issues.len(),
            recommendations = recommendations.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "structure analysis finished"
        );

        Ok(StructureReport {
            url: url.to_string(),
            final_url: page.final_url,
            analysis,
            recommendations,
            recommendation_source,
            analyzed_at: Utc::now(),
        })
    }

    async fn probe_llm_txt(&self, url: &Url) -> LlmTxtStatus {
        for path in LLM_TXT_PATHS {
            let Ok(candidate) = url.join(path) else {
                continue;
            };
            match self.fetcher.fetch(&candidate).await {
                Ok(page) if !page.is_html() => {
                    debug!(url = %candidate, "llm.txt found");
                    return LlmTxtStatus {
                        found: true,
                        url: Some(candidate.to_string()),
                    };
                }
                Ok(_) => debug!(url = %candidate, "llm.txt path served HTML"),
                Err(err) => debug!(url = %candidate, error = %err, "llm.txt probe missed"),
            }
        }
        LlmTxtStatus::default()
    }

    async fn recommendations(
        &self,
        url: &Url,
        analysis: &StructureAnalysis,
        sample: &str,
    ) -> (Vec<Recommendation>, RecommendationSource) {
        if let Some(engine) = &self.engine {
            let prompt = recommend::recommendation_prompt(analysis, sample);
            match engine.generate(EngineRequest::plain(prompt)).await {
                Ok(response) => {
                    let parsed = recommend::parse_recommendations(&response.text);
                    if !parsed.is_empty() {
                        return (parsed, RecommendationSource::Engine);
                    }
                    warn!(url = %url, "engine returned no usable recommendations");
                }
                Err(err) => warn!(url = %url, error = %err, "recommendation generation failed"),
            }
        }

        if self.rule_fallback {
            (
                recommend::rule_based_recommendations(analysis),
                RecommendationSource::Rules,
            )
        } else {
            (Vec::new(), RecommendationSource::None)
        }
    }
}

pub(crate) fn page_text(html: &str) -> String {
    metrics::visible_text(&Html::parse_document(html))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineResponse;
    use crate::error::EngineError;
    use crate::testing::{ScriptedEngine, StaticFetcher};

    const PAGE: &str = "<html><head><title>Acme</title></head><body><p>Just text, no headings.</p></body></html>";

    fn fetcher() -> StaticFetcher {
        StaticFetcher::new().with_html("https://acme.test/", PAGE)
    }

    #[tokio::test]
    async fn headingless_page_is_scored_and_engine_recommendations_returned() {
        let engine = ScriptedEngine::new(|_| {
            Ok(EngineResponse::text(
                r#"[{"title":"Add headings","priority":"high","reason":"r","implementation":"i","description":"d"}]"#,
            ))
        });
        let analyzer = StructureAnalyzer::new(Arc::new(fetcher()), Some(Arc::new(engine)));

        let report = analyzer.analyze("https://acme.test/").await.unwrap();
        assert_eq!(report.analysis.heading_structure.total, 0);
        assert!(report.analysis.structural_issues.contains(&Issue::MissingHeadings));
        assert_eq!(report.recommendation_source, RecommendationSource::Engine);
        assert_eq!(report.recommendations[0].title, "Add headings");
    }

    #[tokio::test]
    async fn engine_failure_yields_empty_recommendations_by_default() {
        let engine = ScriptedEngine::new(|_| Err(EngineError::Network("down".to_string())));
        let analyzer = StructureAnalyzer::new(Arc::new(fetcher()), Some(Arc::new(engine)));

        let report = analyzer.analyze("https://acme.test/").await.unwrap();
        assert!(report.recommendations.is_empty());
        assert_eq!(report.recommendation_source, RecommendationSource::None);
        assert!(report.analysis.score < 100);
    }

    #[tokio::test]
    async fn rule_fallback_fills_in_when_enabled() {
        let engine = ScriptedEngine::new(|_| Ok(EngineResponse::text("no json today")));
        let analyzer = StructureAnalyzer::new(Arc::new(fetcher()), Some(Arc::new(engine)))
            .with_rule_fallback(true);

        let report = analyzer.analyze("https://acme.test/").await.unwrap();
        assert_eq!(report.recommendation_source, RecommendationSource::Rules);
        assert!(!report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn llm_txt_probe_checks_both_paths() {
        let fetcher = fetcher().with_text("https://acme.test/llm.txt", "# Acme\n> widgets");
        let analyzer = StructureAnalyzer::new(Arc::new(fetcher), None);

        let report = analyzer.analyze("https://acme.test/").await.unwrap();
        assert!(report.analysis.llm_txt.found);
        assert_eq!(report.analysis.llm_txt.url.as_deref(), Some("https://acme.test/llm.txt"));
        assert!(!report.analysis.structural_issues.contains(&Issue::MissingLlmTxt));
    }

    #[tokio::test]
    async fn fetch_failures_fail_the_request() {
        let analyzer = StructureAnalyzer::new(Arc::new(StaticFetcher::new()), None);
        assert!(matches!(
            analyzer.analyze("https://nowhere.test/").await,
            Err(StructureFetchError::HttpStatus { status: 404, .. })
        ));
        assert!(matches!(
            analyzer.analyze("ftp://nowhere.test/").await,
            Err(StructureFetchError::Invalid(_))
        ));
    }
}
