use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::aggregate::{aggregate, domain_breakdown_by_kind, domain_counts, query_kind_summary};
use super::citations::{CitationExtractor, DEFAULT_RESOLVE_CONCURRENCY};
use super::job::{
    AnalysisJob, AnswerSegment, Citation, DomainCount, DomainKindBreakdown, DomainStat, JobStatus,
    ParseKind, Phase, QueryKind, QueryKindSummary, QueryResult,
};
use super::queries::{MAX_QUERIES, MIN_QUERIES, QueryGenerator, QueryGeneratorConfig, classify_query};
use super::resolver::{CachingResolver, LinkResolver};
use crate::engine::AnswerEngine;
use crate::error::{DetailError, NotReady, SubmitError, ValidationError};
use crate::net::{brand_label, validate_http_url};
use crate::structure::fetch::PageFetcher;

pub const DEFAULT_PROBE_CONCURRENCY: usize = 4;
pub const MAX_PROBE_CONCURRENCY: usize = 16;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub probe_concurrency: usize,
    pub resolve_concurrency: usize,
    pub generation: QueryGeneratorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            resolve_concurrency: DEFAULT_RESOLVE_CONCURRENCY,
            generation: QueryGeneratorConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_probe_concurrency(mut self, concurrency: usize) -> Self {
        self.probe_concurrency = concurrency.clamp(1, MAX_PROBE_CONCURRENCY);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub job_id: Uuid,
    pub url: String,
    pub num_queries: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: JobStatus,
    pub job_id: Option<Uuid>,
    pub url: Option<String>,
    pub phase: Option<Phase>,
    pub num_queries: usize,
    pub completed_probes: usize,
    pub failed_probes: usize,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub job_id: Uuid,
    pub url: String,
    pub queries: Vec<String>,
    pub domain_stats: Vec<DomainStat>,
    pub num_queries: usize,
    pub failed_probes: usize,
    pub query_kinds: QueryKindSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDetail {
    pub query: String,
    pub kind: QueryKind,
    pub raw_answer_text: String,
    pub domains: Vec<DomainCount>,
    pub citations: Vec<Citation>,
    pub segments: Vec<AnswerSegment>,
    pub search_queries: Vec<String>,
    pub parse: ParseKind,
    pub error: Option<String>,
}

/// Current job plus the generation that may still write to it.
#[derive(Default)]
struct Slot {
    generation: u64,
    job: Option<AnalysisJob>,
    cancel: Option<CancellationToken>,
}

struct Shared {
    engine: Arc<dyn AnswerEngine>,
    resolver: Arc<dyn LinkResolver>,
    fetcher: Arc<dyn PageFetcher>,
    config: OrchestratorConfig,
    slot: RwLock<Slot>,
}

impl Shared {
    /// Applies `update` only while `generation` still owns the slot.
    async fn update_job(&self, generation: u64, update: impl FnOnce(&mut AnalysisJob)) -> bool {
        let mut slot = self.slot.write().await;
        if slot.generation != generation {
            return false;
        }
        match slot.job.as_mut() {
            Some(job) if job.generation == generation => {
                update(job);
                true
            }
            _ => false,
        }
    }
}

/// Owns the single citation analysis job and its background task.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<dyn AnswerEngine>,
        resolver: Arc<dyn LinkResolver>,
        fetcher: Arc<dyn PageFetcher>,
        config: OrchestratorConfig,
    ) -> Self {
        let config = OrchestratorConfig {
            probe_concurrency: config.probe_concurrency.clamp(1, MAX_PROBE_CONCURRENCY),
            resolve_concurrency: config.resolve_concurrency.max(1),
            ..config
        };
        Self {
            shared: Arc::new(Shared {
                engine,
                resolver,
                fetcher,
                config,
                slot: RwLock::new(Slot::default()),
            }),
        }
    }

    pub async fn submit_analysis(&self, url: &str, num_queries: usize) -> Result<Accepted, SubmitError> {
        let url = validate_http_url(url)?;
        if !(MIN_QUERIES..=MAX_QUERIES).contains(&num_queries) {
            return Err(ValidationError::QueryCount {
                got: num_queries,
                min: MIN_QUERIES,
                max: MAX_QUERIES,
            }
            .into());
        }

        let mut slot = self.shared.slot.write().await;
        if slot
            .job
            .as_ref()
            .is_some_and(|job| job.status == JobStatus::Analyzing)
        {
            return Err(SubmitError::Busy);
        }

        if let Some(previous) = slot.cancel.take() {
            previous.cancel();
        }
        slot.generation += 1;
        let generation = slot.generation;
        let cancel = CancellationToken::new();
        let job = AnalysisJob::new(generation, url.to_string(), brand_label(&url), num_queries);
        let accepted = Accepted {
            job_id: job.id,
            url: job.url.clone(),
            num_queries,
        };
        slot.job = Some(job);
        slot.cancel = Some(cancel.clone());
        drop(slot);

        info!(job_id = %accepted.job_id, url = %url, num_queries, generation, "analysis submitted");
        tokio::spawn(run_job(self.shared.clone(), generation, url, num_queries, cancel));
        Ok(accepted)
    }

    pub async fn status(&self) -> StatusReport {
        let slot = self.shared.slot.read().await;
        match &slot.job {
            None => StatusReport {
                status: JobStatus::Idle,
                job_id: None,
                url: None,
                phase: None,
                num_queries: 0,
                completed_probes: 0,
                failed_probes: 0,
                error: None,
                created_at: None,
                finished_at: None,
            },
            Some(job) => StatusReport {
                status: job.status,
                job_id: Some(job.id),
                url: Some(job.url.clone()),
                phase: Some(job.phase),
                num_queries: job.num_queries,
                completed_probes: job.completed_probes,
                failed_probes: job.failed_probes,
                error: job.error.clone(),
                created_at: Some(job.created_at),
                finished_at: job.finished_at,
            },
        }
    }

    pub async fn aggregate_results(&self) -> Result<AggregateReport, NotReady> {
        let slot = self.shared.slot.read().await;
        let job = completed(&slot)?;
        Ok(AggregateReport {
            job_id: job.id,
            url: job.url.clone(),
            queries: job.queries.clone(),
            domain_stats: job.aggregate.clone().unwrap_or_default(),
            num_queries: job.num_queries,
            failed_probes: job.failed_probes,
            query_kinds: query_kind_summary(&job.results),
        })
    }

    pub async fn query_detail(&self, query: &str) -> Result<QueryDetail, DetailError> {
        let slot = self.shared.slot.read().await;
        let job = completed(&slot)?;
        let result = job
            .result_for(query)
            .ok_or_else(|| DetailError::UnknownQuery(query.to_string()))?;
        Ok(QueryDetail {
            query: result.query.clone(),
            kind: result.kind,
            raw_answer_text: result.raw_answer_text.clone(),
            domains: domain_counts(result),
            citations: result.citations.clone(),
            segments: result.segments.clone(),
            search_queries: result.search_queries.clone(),
            parse: result.parse,
            error: result.error.clone(),
        })
    }

    pub async fn query_kind_summary(&self) -> Result<QueryKindSummary, NotReady> {
        let slot = self.shared.slot.read().await;
        Ok(query_kind_summary(&completed(&slot)?.results))
    }

    pub async fn domain_breakdown_by_kind(&self) -> Result<Vec<DomainKindBreakdown>, NotReady> {
        let slot = self.shared.slot.read().await;
        let job = completed(&slot)?;
        Ok(domain_breakdown_by_kind(&job.results, job.num_queries))
    }

    /// Drops the current job and abandons its background work.
    pub async fn reset(&self) {
        let mut slot = self.shared.slot.write().await;
        if let Some(cancel) = slot.cancel.take() {
            cancel.cancel();
        }
        if slot.job.take().is_some() {
            slot.generation += 1;
            info!(generation = slot.generation, "analysis reset");
        }
    }
}

fn completed(slot: &Slot) -> Result<&AnalysisJob, NotReady> {
    match &slot.job {
        Some(job) if job.status == JobStatus::Complete => Ok(job),
        Some(job) => Err(NotReady {
            status: job.status.as_str().to_string(),
        }),
        None => Err(NotReady {
            status: JobStatus::Idle.as_str().to_string(),
        }),
    }
}

async fn run_job(
    shared: Arc<Shared>,
    generation: u64,
    url: Url,
    num_queries: usize,
    cancel: CancellationToken,
) {
    let started = std::time::Instant::now();
    let generator = QueryGenerator::new(shared.engine.clone(), shared.fetcher.clone())
        .with_config(shared.config.generation.clone());

    let generated = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(generation, "job cancelled during query generation");
            return;
        }
        generated = generator.generate(&url, num_queries) => generated,
    };

    let queries = match generated {
        Ok(queries) => queries,
        Err(err) => {
            error!(url = %url, error = %err, "query generation failed");
            let message = err.to_string();
            shared
                .update_job(generation, |job| {
                    job.status = JobStatus::Error;
                    job.phase = Phase::Done;
                    job.error = Some(message);
                    job.finished_at = Some(Utc::now());
                })
                .await;
            return;
        }
    };

    let mut brand = None;
    let still_current = shared
        .update_job(generation, |job| {
            job.queries = queries.clone();
            job.phase = Phase::Probing;
            brand = job.brand.clone();
        })
        .await;
    if !still_current {
        return;
    }

    let extractor = Arc::new(
        CitationExtractor::new(
            shared.engine.clone(),
            Arc::new(CachingResolver::new(shared.resolver.clone())),
        )
        .with_resolve_concurrency(shared.config.resolve_concurrency)
        .with_brand(brand.clone()),
    );

    let mut slots: Vec<Option<QueryResult>> = vec![None; queries.len()];
    let mut queue = queries.iter().cloned().enumerate().collect::<VecDeque<_>>();
    let mut set = JoinSet::new();

    loop {
        while set.len() < shared.config.probe_concurrency {
            let Some((index, query)) = queue.pop_front() else {
                break;
            };
            let extractor = extractor.clone();
            set.spawn(async move {
                let outcome = extractor.extract(&query).await;
                (index, query, outcome)
            });
        }

        if set.is_empty() {
            break;
        }

        let joined = tokio::select! {
            _ = cancel.cancelled() => None,
            joined = set.join_next() => joined,
        };
        let Some(joined) = joined else {
            if cancel.is_cancelled() {
                set.abort_all();
                while set.join_next().await.is_some() {}
                debug!(generation, "job cancelled while probing");
                return;
            }
            continue;
        };
        let (index, result) = match joined {
            Ok((index, _, Ok(result))) => (index, result),
            Ok((index, query, Err(err))) => {
                warn!(query = %query, error = %err.source, "probe failed");
                let kind = classify_query(&query, brand.as_deref());
                (index, QueryResult::failed(&query, kind, err.source.to_string()))
            }
            Err(err) => {
                warn!(error = %err, "probe worker failed");
                continue;
            }
        };

        let failed = result.is_failed();
        slots[index] = Some(result);
        shared
            .update_job(generation, |job| {
                job.completed_probes += 1;
                if failed {
                    job.failed_probes += 1;
                }
            })
            .await;
    }

    let results = slots
        .into_iter()
        .zip(queries.iter())
        .map(|(slot, query)| {
            slot.unwrap_or_else(|| {
                QueryResult::failed(
                    query,
                    classify_query(query, brand.as_deref()),
                    "probe task did not complete".to_string(),
                )
            })
        })
        .collect::<Vec<_>>();

    let failed = results.iter().filter(|r| r.is_failed()).count();
    let still_current = shared
        .update_job(generation, |job| record_probe_results(job, results.clone()))
        .await;
    if !still_current {
        return;
    }

    let outcome = if !results.is_empty() && failed == results.len() {
        Err(format!(
            "all {} probes failed; the answer engine looks unreachable ({})",
            results.len(),
            results.iter().find_map(|r| r.error.clone()).unwrap_or_default()
        ))
    } else {
        Ok(aggregate(&results, num_queries))
    };
    let domains = outcome.as_ref().map(Vec::len).unwrap_or(0);

    let applied = shared
        .update_job(generation, |job| finish_job(job, outcome))
        .await;

    if applied {
        info!(
            url = %url,
            generation,
            probes = queries.len(),
            failed,
            domains,
            duration_ms = started.elapsed().as_millis() as u64,
            "analysis finished"
        );
    }
}

/// Stores settled probe results and moves the job into aggregation.
fn record_probe_results(job: &mut AnalysisJob, results: Vec<QueryResult>) {
    job.failed_probes = results.iter().filter(|r| r.is_failed()).count();
    job.completed_probes = results.len();
    job.results = results;
    job.phase = Phase::Aggregating;
}

fn finish_job(job: &mut AnalysisJob, outcome: Result<Vec<DomainStat>, String>) {
    match outcome {
        Ok(stats) => {
            job.aggregate = Some(stats);
            job.status = JobStatus::Complete;
        }
        Err(message) => {
            job.status = JobStatus::Error;
            job.error = Some(message);
        }
    }
    job.phase = Phase::Done;
    job.finished_at = Some(Utc::now());
}
