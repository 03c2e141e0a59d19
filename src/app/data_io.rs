use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use citelens::pipeline::{AggregateReport, DomainKindBreakdown, QueryDetail};
use citelens::structure::{Issue, StructureReport};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
}

const DOMAIN_CSV_HEADERS: [&str; 5] = [
    "domain",
    "query_count",
    "percentage",
    "direct_queries",
    "generic_queries",
];

const STRUCTURE_CSV_HEADERS: [&str; 2] = ["metric", "value"];

/// Everything one finished citation job produced.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CitationExport {
    pub exported_at: DateTime<Utc>,
    #[serde(flatten)]
    pub report: AggregateReport,
    pub kind_breakdown: Vec<DomainKindBreakdown>,
    pub details: Vec<QueryDetail>,
}

pub fn detect_data_format(path: &str, fallback: DataFormat) -> DataFormat {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".json") {
        DataFormat::Json
    } else if lower.ends_with(".csv") {
        DataFormat::Csv
    } else {
        fallback
    }
}

pub fn default_output_path(url: &str, label: &str, format: DataFormat) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| "site".to_string());
    let host = host
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    let ts = Utc::now().format("%Y%m%d_%H%M%S");
    match format {
        DataFormat::Csv => format!("{host}_{label}_{ts}.csv"),
        DataFormat::Json => format!("{host}_{label}_{ts}.json"),
    }
}

pub fn write_citation_export(path: &str, export: &CitationExport, format: DataFormat) -> io::Result<()> {
    let file = BufWriter::new(File::create(path)?);
    match format {
        DataFormat::Csv => write_domain_csv(file, export),
        DataFormat::Json => write_json(file, export),
    }
}

pub fn write_structure_export(path: &str, report: &StructureReport, format: DataFormat) -> io::Result<()> {
    let file = BufWriter::new(File::create(path)?);
    match format {
        DataFormat::Csv => write_structure_csv(file, report),
        DataFormat::Json => write_json(file, report),
    }
}

fn write_json<W: Write, T: Serialize>(mut writer: W, value: &T) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()
}

/// One row per ranked domain, in report order.
fn write_domain_csv<W: Write>(writer: W, export: &CitationExport) -> io::Result<()> {
    let by_domain = export
        .kind_breakdown
        .iter()
        .map(|row| (row.domain.as_str(), row))
        .collect::<HashMap<_, _>>();

    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(DOMAIN_CSV_HEADERS)?;
    for stat in &export.report.domain_stats {
        let (direct, generic) = by_domain
            .get(stat.domain.as_str())
            .map(|row| (row.direct, row.generic))
            .unwrap_or((0, 0));
        writer.write_record([
            stat.domain.clone(),
            stat.query_count.to_string(),
            stat.percentage.to_string(),
            direct.to_string(),
            generic.to_string(),
        ])?;
    }
    writer.flush()
}

fn write_structure_csv<W: Write>(writer: W, report: &StructureReport) -> io::Result<()> {
    let analysis = &report.analysis;
    let mut rows = vec![
        ("url", report.url.clone()),
        ("final_url", report.final_url.clone()),
        ("score", analysis.score.to_string()),
        ("word_count", analysis.content_metrics.word_count.to_string()),
        ("paragraph_count", analysis.content_metrics.paragraph_count.to_string()),
        ("heading_total", analysis.heading_structure.total.to_string()),
        (
            "semantic_score",
            format!("{:.2}", analysis.semantic_elements.semantic_score),
        ),
        (
            "critical_meta_completeness",
            format!("{:.2}", analysis.meta_completeness.critical_completeness),
        ),
        ("json_ld_blocks", analysis.schema_markup.json_ld.to_string()),
        ("faq_sections", analysis.faq_structure.faq_sections.to_string()),
        ("llm_txt_found", analysis.llm_txt.found.to_string()),
        ("issues", issues_to_csv(&analysis.structural_issues)),
    ];
    rows.extend(
        report
            .recommendations
            .iter()
            .map(|rec| ("recommendation", rec.title.clone())),
    );

    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(STRUCTURE_CSV_HEADERS)?;
    for (metric, value) in rows {
        writer.write_record([metric, value.as_str()])?;
    }
    writer.flush()
}

fn issues_to_csv(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(|issue| issue.label())
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use citelens::pipeline::{DomainStat, QueryKindSummary};
    use citelens::structure::metrics::analyze_document;
    use citelens::structure::{LlmTxtStatus, RecommendationSource, StructureRules};
    use uuid::Uuid;

    fn export() -> CitationExport {
        CitationExport {
            exported_at: Utc::now(),
            report: AggregateReport {
                job_id: Uuid::new_v4(),
                url: "https://example.com/".to_string(),
                queries: vec!["q1".into(), "q2".into(), "q3".into()],
                domain_stats: vec![
                    DomainStat {
                        domain: "example.org".into(),
                        query_count: 2,
                        percentage: 67,
                    },
                    DomainStat {
                        domain: "foo.com".into(),
                        query_count: 1,
                        percentage: 33,
                    },
                ],
                num_queries: 3,
                failed_probes: 0,
                query_kinds: QueryKindSummary {
                    total: 3,
                    direct: 1,
                    generic: 2,
                    direct_percentage: 33.3,
                    generic_percentage: 66.7,
                },
            },
            kind_breakdown: vec![DomainKindBreakdown {
                domain: "example.org".into(),
                direct: 1,
                generic: 1,
                total: 2,
                direct_percentage: 33,
                generic_percentage: 33,
                total_percentage: 67,
            }],
            details: Vec::new(),
        }
    }

    #[test]
    fn format_follows_extension_then_fallback() {
        assert_eq!(detect_data_format("out.JSON", DataFormat::Csv), DataFormat::Json);
        assert_eq!(detect_data_format("out.csv", DataFormat::Json), DataFormat::Csv);
        assert_eq!(detect_data_format("out.txt", DataFormat::Json), DataFormat::Json);
    }

    #[test]
    fn default_path_uses_sanitized_host() {
        let path = default_output_path("https://www.example.com/pricing", "citations", DataFormat::Csv);
        assert!(path.starts_with("www_example_com_citations_"));
        assert!(path.ends_with(".csv"));

        let path = default_output_path("not a url", "structure", DataFormat::Json);
        assert!(path.starts_with("site_structure_"));
        assert!(path.ends_with(".json"));
    }

    #[test]
    fn domain_csv_joins_kind_counts() {
        let mut buf = Vec::new();
        write_domain_csv(&mut buf, &export()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                "domain,query_count,percentage,direct_queries,generic_queries",
                "example.org,2,67,1,1",
                "foo.com,1,33,0,0",
            ]
        );
    }

    #[test]
    fn json_export_flattens_report() {
        let mut buf = Vec::new();
        write_json(&mut buf, &export()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["url"], "https://example.com/");
        assert_eq!(value["domainStats"][0]["queryCount"], 2);
        assert_eq!(value["kindBreakdown"][0]["totalPercentage"], 67);
        assert!(value["exportedAt"].is_string());
    }

    #[test]
    fn structure_csv_lists_issues_and_recommendations() {
        let analysis = analyze_document(
            "<html><body><p>short</p></body></html>",
            &StructureRules::default(),
            LlmTxtStatus::default(),
        );
        let report = StructureReport {
            url: "https://acme.test/".into(),
            final_url: "https://acme.test/".into(),
            analysis,
            recommendations: Vec::new(),
            recommendation_source: RecommendationSource::None,
            analyzed_at: Utc::now(),
        };

        let mut buf = Vec::new();
        write_structure_csv(&mut buf, &report).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("metric,value\n"));
        assert!(text.contains("heading_total,0\n"));
        let issues = text
            .lines()
            .find(|line| line.starts_with("issues,"))
            .unwrap();
        assert!(issues.contains("missing_headings"));
        assert!(issues.contains("missing_llm_txt"));
    }

    #[test]
    fn export_writes_file() {
        let path = std::env::temp_dir().join(format!("citelens_export_{}.json", Uuid::new_v4()));
        let path = path.to_string_lossy().to_string();
        write_citation_export(&path, &export(), DataFormat::Json).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(text.contains("\"numQueries\": 3"));
    }
}
