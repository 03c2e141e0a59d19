use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ResolutionFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Analyzing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
        }
    }
}

/// Coarse progress hint while a job is analyzing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    GeneratingQueries,
    Probing,
    Aggregating,
    Done,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::GeneratingQueries => "generating queries",
            Phase::Probing => "probing",
            Phase::Aggregating => "aggregating",
            Phase::Done => "done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// Names the seed site.
    Direct,
    Generic,
}

/// Which parse produced a probe's citations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseKind {
    Structured,
    FallbackText,
    Unparseable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub title: String,
    pub raw_link: String,
    pub resolved_domain: Option<String>,
    pub resolved_url: Option<String>,
    pub failure: Option<ResolutionFailure>,
}

/// A grounded span of the answer; indices point into the result's citations.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSegment {
    pub text: String,
    pub start_index: usize,
    pub end_index: usize,
    pub citation_indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub query: String,
    pub kind: QueryKind,
    pub raw_answer_text: String,
    pub citations: Vec<Citation>,
    pub search_queries: Vec<String>,
    pub segments: Vec<AnswerSegment>,
    pub parse: ParseKind,
    pub error: Option<String>,
}

impl QueryResult {
    pub(crate) fn failed(query: &str, kind: QueryKind, error: String) -> Self {
        Self {
            query: query.to_string(),
            kind,
            raw_answer_text: String::new(),
            citations: Vec::new(),
            search_queries: Vec::new(),
            segments: Vec::new(),
            parse: ParseKind::Unparseable,
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainStat {
    pub domain: String,
    pub query_count: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainCount {
    pub domain: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainKindBreakdown {
    pub domain: String,
    pub direct: usize,
    pub generic: usize,
    pub total: usize,
    pub direct_percentage: u32,
    pub generic_percentage: u32,
    pub total_percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryKindSummary {
    pub total: usize,
    pub direct: usize,
    pub generic: usize,
    pub direct_percentage: f64,
    pub generic_percentage: f64,
}

/// The one job the orchestrator owns.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub generation: u64,
    pub url: String,
    pub brand: Option<String>,
    pub num_queries: usize,
    pub status: JobStatus,
    pub phase: Phase,
    pub queries: Vec<String>,
    pub results: Vec<QueryResult>,
    pub aggregate: Option<Vec<DomainStat>>,
    pub error: Option<String>,
    pub completed_probes: usize,
    pub failed_probes: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub(crate) fn new(generation: u64, url: String, brand: Option<String>, num_queries: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            url,
            brand,
            num_queries,
            status: JobStatus::Analyzing,
            phase: Phase::GeneratingQueries,
            queries: Vec::new(),
            results: Vec::new(),
            aggregate: None,
            error: None,
            completed_probes: 0,
            failed_probes: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn result_for(&self, query: &str) -> Option<&QueryResult> {
        let wanted = query.trim();
        self.results.iter().find(|r| r.query == wanted).or_else(|| {
            self.results
                .iter()
                .find(|r| r.query.eq_ignore_ascii_case(wanted))
        })
    }
}
