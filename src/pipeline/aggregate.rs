use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::job::{DomainCount, DomainKindBreakdown, DomainStat, QueryKind, QueryKindSummary, QueryResult};

/// Integer percentage, half rounded up.
pub fn percentage(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((200 * count + total) / (2 * total)) as u32
}

fn percentage_one_decimal(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 1000.0 / total as f64).round() / 10.0
}

fn distinct_domains(result: &QueryResult) -> BTreeSet<&str> {
    result
        .citations
        .iter()
        .filter_map(|c| c.resolved_domain.as_deref())
        .collect()
}

/// Ranked domain statistics across all probes. A domain counts once per query;
/// unresolved citations are skipped.
pub fn aggregate(results: &[QueryResult], num_queries: usize) -> Vec<DomainStat> {
    let mut counts = HashMap::<&str, usize>::new();
    for result in results {
        for domain in distinct_domains(result) {
            *counts.entry(domain).or_default() += 1;
        }
    }

    let mut stats = counts
        .into_iter()
        .map(|(domain, query_count)| DomainStat {
            domain: domain.to_string(),
            query_count,
            percentage: percentage(query_count, num_queries),
        })
        .collect::<Vec<_>>();
    stats.sort_by(|a, b| {
        b.query_count
            .cmp(&a.query_count)
            .then_with(|| a.domain.cmp(&b.domain))
    });
    stats
}

/// Raw per-domain citation counts inside one probe.
pub fn domain_counts(result: &QueryResult) -> Vec<DomainCount> {
    let mut counts = HashMap::<&str, usize>::new();
    for domain in result.citations.iter().filter_map(|c| c.resolved_domain.as_deref()) {
        *counts.entry(domain).or_default() += 1;
    }
    let mut out = counts
        .into_iter()
        .map(|(domain, count)| DomainCount {
            domain: domain.to_string(),
            count,
        })
        .collect::<Vec<_>>();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.domain.cmp(&b.domain)));
    out
}

pub fn query_kind_summary(results: &[QueryResult]) -> QueryKindSummary {
    let total = results.len();
    let direct = results.iter().filter(|r| r.kind == QueryKind::Direct).count();
    let generic = total - direct;
    QueryKindSummary {
        total,
        direct,
        generic,
        direct_percentage: percentage_one_decimal(direct, total),
        generic_percentage: percentage_one_decimal(generic, total),
    }
}

pub fn domain_breakdown_by_kind(results: &[QueryResult], num_queries: usize) -> Vec<DomainKindBreakdown> {
    let mut by_domain = BTreeMap::<&str, (usize, usize)>::new();
    for result in results {
        for domain in distinct_domains(result) {
            let entry = by_domain.entry(domain).or_default();
            match result.kind {
                QueryKind::Direct => entry.0 += 1,
                QueryKind::Generic => entry.1 += 1,
            }
        }
    }

    let mut out = by_domain
        .into_iter()
        .map(|(domain, (direct, generic))| DomainKindBreakdown {
            domain: domain.to_string(),
            direct,
            generic,
            total: direct + generic,
            direct_percentage: percentage(direct, num_queries),
            generic_percentage: percentage(generic, num_queries),
            total_percentage: percentage(direct + generic, num_queries),
        })
        .collect::<Vec<_>>();
    out.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.domain.cmp(&b.domain)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::job::{Citation, ParseKind};

    fn cite(domain: Option<&str>) -> Citation {
        Citation {
            title: domain.unwrap_or("unresolved").to_string(),
            raw_link: format!("https://redirect.test/{}", domain.unwrap_or("x")),
            resolved_domain: domain.map(str::to_string),
            resolved_url: domain.map(|d| format!("https://{d}/")),
            failure: None,
        }
    }

    fn result(query: &str, kind: QueryKind, domains: &[Option<&str>]) -> QueryResult {
        QueryResult {
            query: query.to_string(),
            kind,
            raw_answer_text: String::new(),
            citations: domains.iter().map(|d| cite(*d)).collect(),
            search_queries: Vec::new(),
            segments: Vec::new(),
            parse: ParseKind::Structured,
            error: None,
        }
    }

    fn sample() -> Vec<QueryResult> {
        vec![
            result("q1", QueryKind::Direct, &[Some("example.org")]),
            result("q2", QueryKind::Generic, &[Some("example.org"), Some("foo.com")]),
            result("q3", QueryKind::Generic, &[]),
        ]
    }

    #[test]
    fn three_query_example_ranks_and_rounds() {
        let stats = aggregate(&sample(), 3);
        assert_eq!(
            stats,
            vec![
                DomainStat {
                    domain: "example.org".to_string(),
                    query_count: 2,
                    percentage: 67,
                },
                DomainStat {
                    domain: "foo.com".to_string(),
                    query_count: 1,
                    percentage: 33,
                },
            ]
        );
    }

    #[test]
    fn aggregation_ignores_result_order() {
        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(aggregate(&reversed, 3), aggregate(&sample(), 3));
    }

    #[test]
    fn repeated_and_unresolved_citations() {
        let results = vec![result(
            "q",
            QueryKind::Generic,
            &[Some("b.com"), Some("a.com"), Some("b.com"), None],
        )];
        let stats = aggregate(&results, 1);
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|s| s.query_count == 1 && s.percentage == 100));
        assert_eq!(stats[0].domain, "a.com");

        let counts = domain_counts(&results[0]);
        assert_eq!(counts[0], DomainCount { domain: "b.com".to_string(), count: 2 });
        assert_eq!(counts[1], DomainCount { domain: "a.com".to_string(), count: 1 });
    }

    #[test]
    fn percentages_stay_in_range() {
        assert_eq!(percentage(0, 7), 0);
        assert_eq!(percentage(7, 7), 100);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(3, 0), 0);
    }

    #[test]
    fn kind_summary_and_breakdown() {
        let summary = query_kind_summary(&sample());
        assert_eq!((summary.total, summary.direct, summary.generic), (3, 1, 2));
        assert_eq!(summary.direct_percentage, 33.3);
        assert_eq!(summary.generic_percentage, 66.7);

        let breakdown = domain_breakdown_by_kind(&sample(), 3);
        assert_eq!(breakdown[0].domain, "example.org");
        assert_eq!((breakdown[0].direct, breakdown[0].generic, breakdown[0].total), (1, 1, 2));
        assert_eq!(breakdown[0].total_percentage, 67);
        assert_eq!(breakdown[1].domain, "foo.com");
        assert_eq!(breakdown[1].generic_percentage, 33);
    }
}
