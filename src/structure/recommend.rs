use serde::Serialize;
use serde_json::Value;

use super::metrics::{Issue, StructureAnalysis};
use crate::engine::output::first_json_array;

pub const MAX_RECOMMENDATIONS: usize = 6;
const CONTENT_SAMPLE_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Case-insensitive; anything unrecognized is medium.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" => Priority::High,
            "low" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub title: String,
    pub priority: Priority,
    pub description: String,
    pub reason: String,
    pub implementation: String,
}

pub fn recommendation_prompt(analysis: &StructureAnalysis, content_sample: &str) -> String {
    let sample = content_sample.chars().take(CONTENT_SAMPLE_CHARS).collect::<String>();
    let issues = analysis
        .structural_issues
        .iter()
        .map(Issue::label)
        .collect::<Vec<_>>();

    format!(
        "You advise site owners on generative engine optimization: making pages easy for \
AI answer engines to parse and cite.\n\n\
PAGE TEXT SAMPLE:\n{sample}\n\n\
MEASURED STRUCTURE:\n\
- word count: {words}\n\
- headings per level: {headings:?} (hierarchy: {hierarchy:?})\n\
- semantic elements: {semantic:?}\n\
- missing semantic elements: {missing_semantic:?}\n\
- missing critical meta tags: {missing_meta:?}\n\
- missing social meta tags: {missing_social:?}\n\
- JSON-LD blocks: {json_ld}, schema types: {schemas:?}\n\
- llm.txt present: {llm_txt}\n\
- issues: {issues:?}\n\n\
Give 4 to {max} concrete structural recommendations. Each must say why it makes the \
page more likely to be cited by AI systems and how to implement it.\n\n\
Respond with ONLY a JSON array, no prose and no markdown, shaped like:\n\
[{{\"title\": \"...\", \"description\": \"...\", \"reason\": \"...\", \
\"implementation\": \"...\", \"priority\": \"high|medium|low\"}}]",
        words = analysis.content_metrics.word_count,
        headings = analysis.heading_structure.per_level_counts,
        hierarchy = analysis.heading_structure.hierarchy_quality,
        semantic = analysis.semantic_elements.per_element_counts,
        missing_semantic = analysis.semantic_elements.missing_elements,
        missing_meta = analysis.meta_completeness.missing_critical,
        missing_social = analysis.meta_completeness.missing_social,
        json_ld = analysis.schema_markup.json_ld,
        schemas = analysis.schema_markup.specific_schemas,
        llm_txt = analysis.llm_txt.found,
        max = MAX_RECOMMENDATIONS,
    )
}

/// Reads recommendations out of engine output. Objects without a title are
/// skipped; the result is priority-sorted and capped.
pub fn parse_recommendations(text: &str) -> Vec<Recommendation> {
    let Some(items) = first_json_array(text) else {
        return Vec::new();
    };

    let field = |item: &Value, key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let recommendations = items
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| {
            let title = field(item, "title");
            if title.is_empty() {
                return None;
            }
            Some(Recommendation {
                title,
                priority: Priority::parse(&field(item, "priority")),
                description: field(item, "description"),
                reason: field(item, "reason"),
                implementation: field(item, "implementation"),
            })
        })
        .collect::<Vec<_>>();

    order_and_cap(recommendations)
}

pub(crate) fn order_and_cap(mut recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
    // sort_by_key is stable, so same-priority items keep engine order
    recommendations.sort_by_key(|r| r.priority);
    recommendations.truncate(MAX_RECOMMENDATIONS);
    recommendations
}

/// Deterministic recommendations derived from the detected issues.
pub fn rule_based_recommendations(analysis: &StructureAnalysis) -> Vec<Recommendation> {
    let rec = |title: &str, priority, description: String, reason: &str, implementation: &str| {
        Recommendation {
            title: title.to_string(),
            priority,
            description,
            reason: reason.to_string(),
            implementation: implementation.to_string(),
        }
    };

    let h1_count = analysis
        .heading_structure
        .per_level_counts
        .get("h1")
        .copied()
        .unwrap_or(0);
    let mut out = Vec::new();
    let mut missing_meta = Vec::new();
    let mut semantic_added = false;

    for issue in &analysis.structural_issues {
        match issue {
            Issue::MissingLlmTxt => out.push(rec(
                "Add an llms.txt file",
                Priority::High,
                "Publish /llms.txt describing the site and its key pages for AI crawlers.".to_string(),
                "Answer engines look for llms.txt as a curated entry point to a site.",
                "Serve a markdown file at /llms.txt with a summary and links to primary content.",
            )),
            Issue::MissingMeta(tag) => missing_meta.push(tag.clone()),
            Issue::MissingHeadings | Issue::MissingH1 => out.push(rec(
                "Add a single descriptive H1",
                Priority::High,
                "Give the page one H1 stating its main topic, followed by H2 sections.".to_string(),
                "Headings are the strongest signal of what a passage is about.",
                "Wrap the page title in <h1> and break content into <h2>/<h3> sections.",
            )),
            Issue::MultipleH1 => out.push(rec(
                "Use only one H1",
                Priority::High,
                format!("Convert the other {} H1 headings to H2 or H3.", h1_count.saturating_sub(1)),
                "Multiple H1s make the page topic ambiguous to parsers.",
                "Keep the primary H1 and demote the rest.",
            )),
            Issue::LowHeadingDensity => out.push(rec(
                "Add more subheadings",
                Priority::Medium,
                format!(
                    "Only {} headings for {} words; split long passages under H2/H3 headings.",
                    analysis.heading_structure.total, analysis.content_metrics.word_count
                ),
                "Short, well-labelled sections are easier to quote accurately.",
                "Insert a heading every few paragraphs summarizing the section.",
            )),
            Issue::InsufficientContent => out.push(rec(
                "Expand page content",
                Priority::Medium,
                format!(
                    "Grow the page from {} words to at least 300-500 words of substantive text.",
                    analysis.content_metrics.word_count
                ),
                "Thin pages rarely contain a citable answer.",
                "Add explanations, examples and answers to common questions.",
            )),
            Issue::FewSemanticElements | Issue::MissingArticleTag | Issue::MissingMainTag
                if !semantic_added =>
            {
                semantic_added = true;
                out.push(rec(
                    "Use semantic HTML5 elements",
                    Priority::Medium,
                    format!(
                        "Add the missing elements: {}.",
                        analysis.semantic_elements.missing_elements.join(", ")
                    ),
                    "Semantic landmarks let parsers separate main content from chrome.",
                    "Wrap primary content in <main> and <article>; use <section>, <header>, <nav> and <footer>.",
                ));
            }
            Issue::MissingSchemaMarkup => out.push(rec(
                "Add JSON-LD structured data",
                Priority::High,
                "Describe the organization and page type with schema.org JSON-LD.".to_string(),
                "Structured data states facts in a machine-readable form engines trust.",
                "Add a <script type=\"application/ld+json\"> block with Organization and WebPage types.",
            )),
            Issue::MissingFaqStructure => out.push(rec(
                "Mark up the FAQ section",
                Priority::Low,
                "The page mentions FAQs but has no dedicated FAQ container.".to_string(),
                "Question/answer pairs map directly onto how users query answer engines.",
                "Group questions in a <section class=\"faq\"> and add FAQPage JSON-LD.",
            )),
            _ => {}
        }
    }

    if !missing_meta.is_empty() {
        out.push(rec(
            "Add missing meta tags",
            Priority::High,
            format!("Add these meta tags: {}.", missing_meta.join(", ")),
            "Title and description are the first summary an engine reads.",
            "Add <title> and <meta name=\"description\"> plus Open Graph tags in <head>.",
        ));
    }

    order_and_cap(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::metrics::{LlmTxtStatus, StructureRules, analyze_document};

    #[test]
    fn parses_fenced_array_and_sorts_by_priority() {
        let text = r#"```json
[
  {"title": "Low one", "priority": "Low"},
  {"title": "First high", "priority": "HIGH", "reason": "r"},
  {"description": "no title"},
  {"title": "Mystery", "priority": "urgent-ish"},
  {"title": "Second high", "priority": "high"}
]
```"#;
        let recs = parse_recommendations(text);
        let titles = recs.iter().map(|r| r.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["First high", "Second high", "Mystery", "Low one"]);
        assert_eq!(recs[0].reason, "r");
        assert_eq!(recs[2].priority, Priority::Medium);
    }

    #[test]
    fn unusable_output_yields_nothing() {
        assert!(parse_recommendations("I cannot help with that.").is_empty());
        assert!(parse_recommendations("[1, 2, 3]").is_empty());
    }

    #[test]
    fn caps_at_six() {
        let items = (0..10)
            .map(|i| format!(r#"{{"title": "r{i}", "priority": "low"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        assert_eq!(parse_recommendations(&format!("[{items}]")).len(), MAX_RECOMMENDATIONS);
    }

    #[test]
    fn rule_based_recommendations_follow_issues() {
        let analysis = analyze_document(
            "<html><body><p>tiny page</p></body></html>",
            &StructureRules::default(),
            LlmTxtStatus::default(),
        );
        let recs = rule_based_recommendations(&analysis);
        assert!(!recs.is_empty());
        assert!(recs.len() <= MAX_RECOMMENDATIONS);
        assert!(recs.windows(2).all(|w| w[0].priority <= w[1].priority));
        assert!(recs.iter().any(|r| r.title == "Add an llms.txt file"));
        assert_eq!(
            recs.iter().filter(|r| r.title == "Use semantic HTML5 elements").count(),
            1
        );
    }

    #[test]
    fn prompt_carries_measurements() {
        let analysis = analyze_document(
            "<html><body><h1>Title</h1><p>hello world</p></body></html>",
            &StructureRules::default(),
            LlmTxtStatus::default(),
        );
        let prompt = recommendation_prompt(&analysis, "hello world");
        assert!(prompt.contains("word count: 3"));
        assert!(prompt.contains("missing_llm_txt"));
        assert!(prompt.contains("ONLY a JSON array"));
    }
}
