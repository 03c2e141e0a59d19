//! Citation aggregation pipeline: generate probe queries for a site, ask a
//! grounded answer engine each one, resolve what it cites and rank the domains.

pub mod aggregate;
pub mod citations;
pub mod job;
pub mod orchestrator;
pub mod queries;
pub mod resolver;

pub use citations::{CitationExtractor, CitationParse, RawCitation};
pub use job::{
    AnalysisJob, Citation, DomainCount, DomainKindBreakdown, DomainStat, JobStatus, Phase,
    QueryKind, QueryKindSummary, QueryResult,
};
pub use orchestrator::{
    Accepted, AggregateReport, Orchestrator, OrchestratorConfig, QueryDetail, StatusReport,
};
pub use queries::{QueryGenerator, QueryGeneratorConfig};
pub use resolver::{CachingResolver, HttpRedirectResolver, LinkResolver, ResolvedLink};
