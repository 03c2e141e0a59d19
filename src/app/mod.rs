mod data_io;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use citelens::engine::{AnswerEngine, DEFAULT_GEMINI_MODEL, GeminiClient};
use citelens::pipeline::orchestrator::DEFAULT_PROBE_CONCURRENCY;
use citelens::pipeline::resolver::DEFAULT_RESOLVE_TIMEOUT;
use citelens::pipeline::{
    AggregateReport, DomainKindBreakdown, HttpRedirectResolver, JobStatus, Orchestrator,
    OrchestratorConfig, QueryKindSummary, StatusReport,
};
use citelens::structure::{
    DEFAULT_FETCH_TIMEOUT, HttpPageFetcher, StructureAnalyzer, StructureReport,
};

use data_io::{
    CitationExport, DataFormat, default_output_path, detect_data_format, write_citation_export,
    write_structure_export,
};

const FALLBACK_API_KEY_ENV: &str = "GOOGLE_API_KEY";

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum FileFormatArg {
    Csv,
    Json,
}

impl From<FileFormatArg> for DataFormat {
    fn from(value: FileFormatArg) -> Self {
        match value {
            FileFormatArg::Csv => DataFormat::Csv,
            FileFormatArg::Json => DataFormat::Json,
        }
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "citelens",
    version,
    about = "Measure which domains generative answer engines cite for a site"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, value_name = "MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    model: String,

    /// Variable holding the engine API key; GOOGLE_API_KEY is tried next.
    #[arg(long, global = true, value_name = "VAR", default_value = "GEMINI_API_KEY")]
    api_key_env: String,

    #[arg(long, global = true, value_name = "MS", default_value_t = 60_000)]
    engine_timeout_ms: u64,

    #[arg(long, global = true, value_name = "MS", default_value_t = DEFAULT_RESOLVE_TIMEOUT.as_millis() as u64)]
    resolve_timeout_ms: u64,

    #[arg(long, global = true, value_name = "MS", default_value_t = DEFAULT_FETCH_TIMEOUT.as_millis() as u64)]
    fetch_timeout_ms: u64,

    #[arg(long, global = true, value_name = "UA")]
    user_agent: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
enum Command {
    /// Probe the answer engine and rank the domains it cites
    Citations(CitationsArgs),
    /// Score one page's structure for machine readers
    Structure(StructureArgs),
}

#[derive(Debug, Args, Clone)]
struct CitationsArgs {
    #[arg(value_name = "URL")]
    url: String,

    #[arg(short = 'n', long = "queries", value_name = "N", default_value_t = 8)]
    queries: usize,

    #[arg(long, value_name = "N", default_value_t = DEFAULT_PROBE_CONCURRENCY)]
    probe_concurrency: usize,

    #[arg(long, value_name = "SECS", default_value_t = 300)]
    max_wait_secs: u64,

    #[arg(long, value_name = "MS", default_value_t = 1_000)]
    poll_ms: u64,

    #[arg(short, long, value_name = "FILE")]
    output: Option<String>,

    #[arg(long, value_enum, default_value_t = FileFormatArg::Csv)]
    format: FileFormatArg,
}

#[derive(Debug, Args, Clone)]
struct StructureArgs {
    #[arg(value_name = "URL")]
    url: String,

    /// Use rule-based recommendations when the engine gives none
    #[arg(long, default_value_t = false)]
    fallback_recommendations: bool,

    #[arg(short, long, value_name = "FILE")]
    output: Option<String>,

    #[arg(long, value_enum, default_value_t = FileFormatArg::Json)]
    format: FileFormatArg,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.clone() {
        Command::Citations(args) => run_citations(&cli, args).await,
        Command::Structure(args) => run_structure(&cli, args).await,
    }
}

fn build_engine(cli: &Cli) -> anyhow::Result<GeminiClient> {
    let vars = [cli.api_key_env.as_str(), FALLBACK_API_KEY_ENV];
    let client = GeminiClient::from_env(&vars, Duration::from_millis(cli.engine_timeout_ms))
        .context("failed to configure the answer engine")?;
    Ok(client.with_model(cli.model.clone()))
}

fn build_fetcher(cli: &Cli) -> anyhow::Result<HttpPageFetcher> {
    HttpPageFetcher::new(
        Duration::from_millis(cli.fetch_timeout_ms),
        cli.user_agent.as_deref(),
    )
    .context("failed to build page fetcher")
}

async fn run_citations(cli: &Cli, args: CitationsArgs) -> anyhow::Result<()> {
    let engine: Arc<dyn AnswerEngine> = Arc::new(build_engine(cli)?);
    let resolver = HttpRedirectResolver::new(
        Duration::from_millis(cli.resolve_timeout_ms),
        cli.user_agent.as_deref(),
    )
    .context("failed to build link resolver")?;
    let fetcher = build_fetcher(cli)?;

    let config = OrchestratorConfig::default().with_probe_concurrency(args.probe_concurrency);
    let orchestrator = Orchestrator::new(engine, Arc::new(resolver), Arc::new(fetcher), config);

    let accepted = orchestrator
        .submit_analysis(&args.url, args.queries)
        .await
        .context("analysis was not accepted")?;
    info!(
        job_id = %accepted.job_id,
        url = %accepted.url,
        num_queries = accepted.num_queries,
        model = %cli.model,
        "citation analysis started"
    );

    let status = wait_for_job(
        &orchestrator,
        Duration::from_secs(args.max_wait_secs),
        Duration::from_millis(args.poll_ms.max(50)),
    )
    .await?;
    match status.status {
        JobStatus::Complete => {}
        JobStatus::Error => bail!(
            "analysis failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        ),
        other => bail!("analysis ended in unexpected state: {}", other.as_str()),
    }

    let report = orchestrator.aggregate_results().await?;
    let breakdown = orchestrator.domain_breakdown_by_kind().await?;
    print_citation_report(&report, &breakdown);

    if let Some(path) = args.output.as_deref() {
        let mut details = Vec::with_capacity(report.queries.len());
        for query in &report.queries {
            details.push(orchestrator.query_detail(query).await?);
        }
        let format = detect_data_format(path, args.format.into());
        let export = CitationExport {
            exported_at: Utc::now(),
            report,
            kind_breakdown: breakdown,
            details,
        };
        write_citation_export(path, &export, format)
            .with_context(|| format!("failed to write {path}"))?;
        println!("Wrote {path}");
    } else {
        let path = default_output_path(&report.url, "citations", args.format.into());
        println!("Use -o {path} to save this report.");
    }
    Ok(())
}

/// Polls until the job leaves `analyzing` or `max_wait` elapses.
async fn wait_for_job(
    orchestrator: &Orchestrator,
    max_wait: Duration,
    poll: Duration,
) -> anyhow::Result<StatusReport> {
    let started = Instant::now();
    let mut last_progress = None;
    loop {
        let status = orchestrator.status().await;
        if status.status != JobStatus::Analyzing {
            return Ok(status);
        }

        let progress = (status.phase, status.completed_probes, status.failed_probes);
        if last_progress != Some(progress) {
            eprintln!(
                "[{}] {}/{} probes done ({} failed)",
                status.phase.map(|p| p.as_str()).unwrap_or("starting"),
                status.completed_probes,
                status.num_queries,
                status.failed_probes
            );
            last_progress = Some(progress);
        }

        if started.elapsed() >= max_wait {
            warn!(
                waited_secs = max_wait.as_secs(),
                completed = status.completed_probes,
                "giving up on analysis"
            );
            bail!(
                "timed out after {}s waiting for the analysis ({} of {} probes finished)",
                max_wait.as_secs(),
                status.completed_probes,
                status.num_queries
            );
        }
        tokio::time::sleep(poll).await;
    }
}

fn print_citation_report(report: &AggregateReport, breakdown: &[DomainKindBreakdown]) {
    println!();
    println!("Citations for {} across {} queries", report.url, report.num_queries);
    if report.failed_probes > 0 {
        println!("{} probe(s) failed and cite nothing", report.failed_probes);
    }
    print_kind_summary(&report.query_kinds);

    if report.domain_stats.is_empty() {
        println!("No resolvable citations.");
        return;
    }

    println!();
    println!("{:>4}  {:<40} {:>7} {:>6} {:>7} {:>7}", "#", "domain", "queries", "share", "direct", "generic");
    for (idx, stat) in report.domain_stats.iter().enumerate() {
        let (direct, generic) = breakdown
            .iter()
            .find(|row| row.domain == stat.domain)
            .map(|row| (row.direct, row.generic))
            .unwrap_or((0, 0));
        println!(
            "{:>4}  {:<40} {:>7} {:>5}% {:>7} {:>7}",
            idx + 1,
            stat.domain,
            stat.query_count,
            stat.percentage,
            direct,
            generic
        );
    }
}

fn print_kind_summary(summary: &QueryKindSummary) {
    println!(
        "Queries: {} direct ({:.1}%), {} generic ({:.1}%)",
        summary.direct, summary.direct_percentage, summary.generic, summary.generic_percentage
    );
}

async fn run_structure(cli: &Cli, args: StructureArgs) -> anyhow::Result<()> {
    let engine: Option<Arc<dyn AnswerEngine>> = match build_engine(cli) {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "no answer engine; recommendations limited");
            None
        }
    };
    let analyzer = StructureAnalyzer::new(Arc::new(build_fetcher(cli)?), engine)
        .with_rule_fallback(args.fallback_recommendations);

    let report = analyzer
        .analyze(&args.url)
        .await
        .with_context(|| format!("failed to analyze {}", args.url))?;
    print_structure_report(&report);

    if let Some(path) = args.output.as_deref() {
        let format = detect_data_format(path, args.format.into());
        write_structure_export(path, &report, format)
            .with_context(|| format!("failed to write {path}"))?;
        println!("Wrote {path}");
    }
    Ok(())
}

fn print_structure_report(report: &StructureReport) {
    let analysis = &report.analysis;
    println!();
    println!("Structure of {}", report.final_url);
    println!("Score: {}/100", analysis.score);
    println!(
        "Words: {}  Paragraphs: {}  Headings: {}",
        analysis.content_metrics.word_count,
        analysis.content_metrics.paragraph_count,
        analysis.heading_structure.total
    );
    println!(
        "llm.txt: {}",
        analysis.llm_txt.url.as_deref().unwrap_or("not found")
    );

    if !analysis.structural_issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in &analysis.structural_issues {
            println!("  - {} (-{})", issue.label(), issue.penalty());
        }
    }

    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for rec in &report.recommendations {
            println!("  [{:?}] {}", rec.priority, rec.title);
            if !rec.description.is_empty() {
                println!("      {}", rec.description);
            }
        }
    }
}
