use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Serialize, Serializer};
use serde_json::Value;

pub const SEMANTIC_ELEMENTS: [&str; 6] = ["article", "section", "nav", "header", "footer", "main"];
pub const SOCIAL_META_TAGS: [&str; 3] = ["og:title", "og:description", "og:image"];
const HIDDEN_TEXT_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

static FAQ_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)frequently\s+asked\s+questions?|\bfaqs?\b|questions?\s+(?:and|&)\s+answers?")
        .expect("Failed to compile FAQ regex")
});

/// Thresholds the analyzer checks a page against.
#[derive(Debug, Clone)]
pub struct StructureRules {
    /// Headings per 100 words of visible text.
    pub min_heading_density: f64,
    pub required_meta_tags: Vec<String>,
    /// Distinct kinds out of [`SEMANTIC_ELEMENTS`].
    pub min_semantic_tag_count: usize,
    pub min_word_count: usize,
}

impl Default for StructureRules {
    fn default() -> Self {
        Self {
            min_heading_density: 0.3,
            required_meta_tags: vec!["title".to_string(), "description".to_string()],
            min_semantic_tag_count: 3,
            min_word_count: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    MissingHeadings,
    MissingH1,
    MultipleH1,
    LowHeadingDensity,
    InsufficientContent,
    MissingMeta(String),
    FewSemanticElements,
    MissingArticleTag,
    MissingMainTag,
    MissingSchemaMarkup,
    MissingFaqStructure,
    MissingLlmTxt,
}

impl Issue {
    pub fn label(&self) -> String {
        match self {
            Issue::MissingHeadings => "missing_headings".to_string(),
            Issue::MissingH1 => "missing_h1".to_string(),
            Issue::MultipleH1 => "multiple_h1".to_string(),
            Issue::LowHeadingDensity => "low_heading_density".to_string(),
            Issue::InsufficientContent => "insufficient_content".to_string(),
            Issue::MissingMeta(tag) => format!("missing_meta:{tag}"),
            Issue::FewSemanticElements => "few_semantic_elements".to_string(),
            Issue::MissingArticleTag => "missing_article_tag".to_string(),
            Issue::MissingMainTag => "missing_main_tag".to_string(),
            Issue::MissingSchemaMarkup => "missing_schema_markup".to_string(),
            Issue::MissingFaqStructure => "missing_faq_structure".to_string(),
            Issue::MissingLlmTxt => "missing_llm_txt".to_string(),
        }
    }

    pub fn penalty(&self) -> u8 {
        match self {
            Issue::MissingHeadings => 20,
            Issue::MissingH1 => 14,
            Issue::InsufficientContent => 12,
            Issue::MissingMeta(_) => 10,
            Issue::MultipleH1 => 8,
            Issue::FewSemanticElements => 8,
            Issue::MissingSchemaMarkup => 8,
            Issue::LowHeadingDensity => 6,
            Issue::MissingLlmTxt => 5,
            Issue::MissingArticleTag => 4,
            Issue::MissingMainTag => 4,
            Issue::MissingFaqStructure => 4,
        }
    }
}

impl Serialize for Issue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetrics {
    pub word_count: usize,
    pub paragraph_count: usize,
    pub content_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadingStructure {
    pub total: usize,
    pub per_level_counts: BTreeMap<String, usize>,
    pub hierarchy_quality: HierarchyQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticElements {
    pub per_element_counts: BTreeMap<String, usize>,
    pub semantic_score: f64,
    pub missing_elements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaCompleteness {
    pub critical_completeness: f64,
    pub social_completeness: f64,
    pub missing_critical: Vec<String>,
    pub missing_social: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqStructure {
    pub faq_sections: usize,
    pub question_headings: usize,
    pub has_faq: bool,
    #[serde(skip)]
    text_mentions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaMarkup {
    pub json_ld: usize,
    pub microdata: usize,
    pub specific_schemas: Vec<String>,
    pub has_structured_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmTxtStatus {
    pub found: bool,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureAnalysis {
    pub content_metrics: ContentMetrics,
    pub heading_structure: HeadingStructure,
    pub semantic_elements: SemanticElements,
    pub meta_completeness: MetaCompleteness,
    pub faq_structure: FaqStructure,
    pub schema_markup: SchemaMarkup,
    pub llm_txt: LlmTxtStatus,
    pub score: u8,
    pub structural_issues: Vec<Issue>,
}

/// Computes every metric for one HTML document. Pure; the caller supplies the
/// llm.txt probe result.
pub fn analyze_document(html: &str, rules: &StructureRules, llm_txt: LlmTxtStatus) -> StructureAnalysis {
    let doc = Html::parse_document(html);
    let text = visible_text(&doc);

    let content_metrics = ContentMetrics {
        word_count: text.split_whitespace().count(),
        paragraph_count: count_non_empty(&doc, "p"),
        content_length: text.chars().count(),
    };
    let heading_structure = heading_structure(&doc);
    let semantic_elements = semantic_elements(&doc);
    let meta_completeness = meta_completeness(&doc, &rules.required_meta_tags);
    let faq_structure = faq_structure(&doc, &text);
    let schema_markup = schema_markup(&doc);

    let structural_issues = collect_issues(
        rules,
        &content_metrics,
        &heading_structure,
        &semantic_elements,
        &meta_completeness,
        &faq_structure,
        &schema_markup,
        &llm_txt,
    );
    let score = compute_structure_score(&structural_issues);

    StructureAnalysis {
        content_metrics,
        heading_structure,
        semantic_elements,
        meta_completeness,
        faq_structure,
        schema_markup,
        llm_txt,
        score,
        structural_issues,
    }
}

#[allow(clippy::too_many_arguments)]
fn collect_issues(
    rules: &StructureRules,
    content: &ContentMetrics,
    headings: &HeadingStructure,
    semantic: &SemanticElements,
    meta: &MetaCompleteness,
    faq: &FaqStructure,
    schema: &SchemaMarkup,
    llm_txt: &LlmTxtStatus,
) -> Vec<Issue> {
    let mut issues = Vec::new();

    let h1_count = headings.per_level_counts.get("h1").copied().unwrap_or(0);
    if headings.total == 0 {
        issues.push(Issue::MissingHeadings);
    } else {
        if h1_count == 0 {
            issues.push(Issue::MissingH1);
        } else if h1_count > 1 {
            issues.push(Issue::MultipleH1);
        }
        if content.word_count > 0 {
            let density = headings.total as f64 * 100.0 / content.word_count as f64;
            if density < rules.min_heading_density {
                issues.push(Issue::LowHeadingDensity);
            }
        }
    }

    if content.word_count < rules.min_word_count {
        issues.push(Issue::InsufficientContent);
    }

    for tag in &meta.missing_critical {
        issues.push(Issue::MissingMeta(tag.clone()));
    }

    let present_kinds = SEMANTIC_ELEMENTS.len() - semantic.missing_elements.len();
    if present_kinds < rules.min_semantic_tag_count {
        issues.push(Issue::FewSemanticElements);
    }
    if semantic.missing_elements.iter().any(|e| e == "article") {
        issues.push(Issue::MissingArticleTag);
    }
    if semantic.missing_elements.iter().any(|e| e == "main") {
        issues.push(Issue::MissingMainTag);
    }

    if !schema.has_structured_data {
        issues.push(Issue::MissingSchemaMarkup);
    }
    if faq.text_mentions > 0 && faq.faq_sections == 0 {
        issues.push(Issue::MissingFaqStructure);
    }
    if !llm_txt.found {
        issues.push(Issue::MissingLlmTxt);
    }

    issues
}

pub fn compute_structure_score(issues: &[Issue]) -> u8 {
    let penalty = issues
        .iter()
        .map(|issue| issue.penalty() as u16)
        .sum::<u16>();
    (100u16.saturating_sub(penalty)) as u8
}

/// Whitespace-normalized text a reader would see in `<body>`.
pub fn visible_text(doc: &Html) -> String {
    let root = selector("body")
        .and_then(|sel| doc.select(&sel).next())
        .unwrap_or_else(|| doc.root_element());

    let mut chunks = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| HIDDEN_TEXT_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            chunks.push(&**text);
        }
    }
    normalize_text(&chunks.join(" "))
}

fn heading_structure(doc: &Html) -> HeadingStructure {
    let per_level_counts = (1..=6)
        .map(|level| {
            let tag = format!("h{level}");
            let count = count_elements(doc, &tag);
            (tag, count)
        })
        .collect::<BTreeMap<_, _>>();
    let total = per_level_counts.values().sum();

    let level = |tag: &str| per_level_counts.get(tag).copied().unwrap_or(0);
    let hierarchy_quality = match (level("h1"), level("h2"), level("h3")) {
        (1, h2, h3) if h2 >= 2 && h3 > 0 => HierarchyQuality::Excellent,
        (1, h2, _) if h2 >= 2 => HierarchyQuality::Good,
        (1, h2, _) if h2 >= 1 => HierarchyQuality::Fair,
        _ => HierarchyQuality::Poor,
    };

    HeadingStructure {
        total,
        per_level_counts,
        hierarchy_quality,
    }
}

fn semantic_elements(doc: &Html) -> SemanticElements {
    let per_element_counts = SEMANTIC_ELEMENTS
        .iter()
        .map(|tag| (tag.to_string(), count_elements(doc, tag)))
        .collect::<BTreeMap<_, _>>();
    let missing_elements = SEMANTIC_ELEMENTS
        .iter()
        .filter(|tag| per_element_counts.get(**tag).copied().unwrap_or(0) == 0)
        .map(|tag| tag.to_string())
        .collect::<Vec<_>>();
    let present = SEMANTIC_ELEMENTS.len() - missing_elements.len();

    SemanticElements {
        per_element_counts,
        semantic_score: present as f64 / SEMANTIC_ELEMENTS.len() as f64,
        missing_elements,
    }
}

fn meta_completeness(doc: &Html, required: &[String]) -> MetaCompleteness {
    let missing_critical = required
        .iter()
        .filter(|tag| !meta_present(doc, tag))
        .cloned()
        .collect::<Vec<_>>();
    let missing_social = SOCIAL_META_TAGS
        .iter()
        .filter(|tag| !meta_present(doc, tag))
        .map(|tag| tag.to_string())
        .collect::<Vec<_>>();

    let ratio = |missing: usize, total: usize| {
        if total == 0 {
            1.0
        } else {
            (total - missing) as f64 / total as f64
        }
    };
    MetaCompleteness {
        critical_completeness: ratio(missing_critical.len(), required.len()),
        social_completeness: ratio(missing_social.len(), SOCIAL_META_TAGS.len()),
        missing_critical,
        missing_social,
    }
}

fn meta_present(doc: &Html, tag: &str) -> bool {
    let tag = tag.trim().to_ascii_lowercase();
    if tag == "title" {
        return !extract_first_text(doc, "head title, title").is_empty();
    }
    let Some(meta) = selector("meta") else {
        return false;
    };
    doc.select(&meta)
        .filter(|el| {
            ["name", "property"].iter().any(|attr| {
                el.value()
                    .attr(attr)
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case(&tag))
            })
        })
        .any(|el| {
            el.value()
                .attr("content")
                .is_some_and(|c| !c.trim().is_empty())
        })
}

fn faq_structure(doc: &Html, text: &str) -> FaqStructure {
    let faq_sections = selector("[class], [id]")
        .map(|sel| {
            doc.select(&sel)
                .filter(|el| {
                    ["class", "id"].iter().any(|attr| {
                        el.value()
                            .attr(attr)
                            .is_some_and(|v| v.to_ascii_lowercase().contains("faq"))
                    })
                })
                .count()
        })
        .unwrap_or(0);

    let question_headings = selector("h1, h2, h3, h4, h5, h6, dt, summary")
        .map(|sel| {
            doc.select(&sel)
                .filter(|el| element_text(el).contains('?'))
                .count()
        })
        .unwrap_or(0);

    let text_mentions = FAQ_TEXT_RE.find_iter(text).count();
    let has_faq = faq_sections > 0 || text_mentions > 1 || (text_mentions > 0 && question_headings > 3);

    FaqStructure {
        faq_sections,
        question_headings,
        has_faq,
        text_mentions,
    }
}

fn schema_markup(doc: &Html) -> SchemaMarkup {
    let mut json_ld = 0usize;
    let mut types = BTreeSet::new();
    if let Some(sel) = selector("script[type=\"application/ld+json\"]") {
        for el in doc.select(&sel) {
            let body = el.text().collect::<String>();
            if body.trim().is_empty() {
                continue;
            }
            json_ld += 1;
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                collect_schema_types(&value, &mut types);
            }
        }
    }

    let microdata = count_elements(doc, "[itemscope]");
    if let Some(sel) = selector("[itemtype]") {
        for el in doc.select(&sel) {
            if let Some(kind) = el
                .value()
                .attr("itemtype")
                .and_then(|t| t.trim().trim_end_matches('/').rsplit('/').next())
                .filter(|t| !t.is_empty())
            {
                types.insert(kind.to_string());
            }
        }
    }

    SchemaMarkup {
        json_ld,
        microdata,
        specific_schemas: types.into_iter().collect(),
        has_structured_data: json_ld > 0 || microdata > 0,
    }
}

fn collect_schema_types(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_schema_types(v, out)),
        Value::Object(map) => {
            match map.get("@type") {
                Some(Value::String(t)) => {
                    out.insert(t.clone());
                }
                Some(Value::Array(ts)) => {
                    out.extend(ts.iter().filter_map(Value::as_str).map(str::to_string));
                }
                _ => {}
            }
            if let Some(graph) = map.get("@graph") {
                collect_schema_types(graph, out);
            }
        }
        _ => {}
    }
}

fn selector(raw: &str) -> Option<Selector> {
    Selector::parse(raw).ok()
}

fn count_elements(doc: &Html, raw: &str) -> usize {
    selector(raw).map(|sel| doc.select(&sel).count()).unwrap_or(0)
}

fn count_non_empty(doc: &Html, raw: &str) -> usize {
    selector(raw)
        .map(|sel| doc.select(&sel).filter(|el| !element_text(el).is_empty()).count())
        .unwrap_or(0)
}

fn extract_first_text(doc: &Html, raw: &str) -> String {
    let Some(sel) = selector(raw) else {
        return String::new();
    };
    doc.select(&sel)
        .map(|el| element_text(&el))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn element_text(el: &ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
