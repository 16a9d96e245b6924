//! Keyword-based task category detection
//!
//! Each category carries a keyword vector, suggested tools, and short tips.
//! Detection counts keyword hits in the task text and normalizes by vector
//! length; no hit at all means `General` with zero confidence.

use once_cell::sync::Lazy;

use crate::types::Category;

/// Minimum confidence before tool suggestions are worth surfacing
const TOOL_CONFIDENCE_FLOOR: f64 = 0.1;

struct CategoryVector {
    category: Category,
    keywords: &'static [&'static str],
    tools: &'static [&'static str],
    description: &'static str,
    tips: &'static [&'static str],
}

static VECTORS: Lazy<Vec<CategoryVector>> = Lazy::new(|| {
    vec![
        CategoryVector {
            category: Category::CodeGeneration,
            keywords: &[
                "implement", "function", "write code", "algorithm", "program",
                "generate", "solve", "compute", "return",
            ],
            tools: &["sandbox_exec"],
            description: "Writing new code or functions",
            tips: &[
                "Define the function signature exactly as the task names it",
                "Handle the empty input case before the general one",
            ],
        },
        CategoryVector {
            category: Category::FileCreate,
            keywords: &[
                "create", "write", "new", "save", "file", "output", "export",
            ],
            tools: &["write_file"],
            description: "Creating or writing files",
            tips: &["Write to the full path, creating parent directories first"],
        },
        CategoryVector {
            category: Category::FileRead,
            keywords: &[
                "read", "show", "display", "content", "open", "load", "inspect",
            ],
            tools: &["read_file"],
            description: "Reading or inspecting files",
            tips: &["Check the file exists before reading it"],
        },
        CategoryVector {
            category: Category::Parsing,
            keywords: &[
                "parse", "extract", "split", "tokenize", "format", "convert",
                "transform", "regex", "pattern",
            ],
            tools: &[],
            description: "Parsing, extraction, text transformation",
            tips: &[
                "Decide what malformed input should do before writing the happy path",
            ],
        },
        CategoryVector {
            category: Category::Debugging,
            keywords: &[
                "analyze", "review", "debug", "error", "problem", "fix", "bug",
                "fails", "broken", "wrong",
            ],
            tools: &["sandbox_exec"],
            description: "Analysis, debugging, error diagnosis",
            tips: &["Reproduce the failure before changing anything"],
        },
        CategoryVector {
            category: Category::DataAnalysis,
            keywords: &[
                "count", "sum", "average", "aggregate", "sort", "filter",
                "statistics", "data", "maximum", "minimum",
            ],
            tools: &[],
            description: "Data aggregation and computation",
            tips: &["Watch for integer overflow and empty collections"],
        },
    ]
});

/// Detect the task category from its description
///
/// Confidence is the matched-keyword fraction of the winning vector, so it
/// lands in (0, 1]; an unmatched query returns `(General, 0.0)`.
pub fn detect(task: &str) -> (Category, f64) {
    let lower = task.to_lowercase();
    let mut best: Option<(Category, f64)> = None;

    for vector in VECTORS.iter() {
        let matches = vector
            .keywords
            .iter()
            .filter(|kw| lower.contains(*kw))
            .count();
        if matches == 0 {
            continue;
        }
        let confidence = matches as f64 / vector.keywords.len() as f64;
        if best.map_or(true, |(_, c)| confidence > c) {
            best = Some((vector.category, confidence));
        }
    }

    best.unwrap_or((Category::General, 0.0))
}

/// Tools likely needed for this task, empty when detection is too weak
pub fn suggested_tools(task: &str) -> Vec<&'static str> {
    let (category, confidence) = detect(task);
    if confidence < TOOL_CONFIDENCE_FLOOR {
        return Vec::new();
    }
    vector_for(category).map_or_else(Vec::new, |v| v.tools.to_vec())
}

/// Short prompt addition describing the detected category and its tips
pub fn context_hint(category: Category) -> Option<String> {
    let vector = vector_for(category)?;
    let mut hint = format!("Task type: {}.", vector.description);
    if !vector.tools.is_empty() {
        hint.push_str(&format!(" Relevant tools: {}.", vector.tools.join(", ")));
    }
    if !vector.tips.is_empty() {
        hint.push_str(&format!(" TIPS: {}.", vector.tips.join(". ")));
    }
    Some(hint)
}

fn vector_for(category: Category) -> Option<&'static CategoryVector> {
    VECTORS.iter().find(|v| v.category == category)
}

/// Heuristic keyword extraction for when no gateway is available
///
/// Lowercased words longer than 4 chars, stripped of punctuation and
/// markdown noise, stop words removed, capped at 10.
pub fn fallback_keywords(text: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "when", "always", "should", "must", "that", "this", "with", "from",
        "the", "and", "for", "never", "before", "after",
    ];

    let clean = text
        .to_lowercase()
        .replace(['*', '#', '`'], "");

    clean
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()))
        .filter(|w| w.len() > 4 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .take(10)
        .collect()
}
