//! Documentation query classification and expansion.
//!
//! Pure, deterministic functions: classification runs a fixed regex set
//! plus a question-word check; expansion applies a fixed synonym map
//! capped at ten distinct queries, the first always being the input.

use regex::RegexSet;
use std::sync::OnceLock;

const DOC_QUERY_PATTERNS: &[&str] = &[
    r"(?i)\b(how\s+to|howto)\b",
    r"(?i)\b(getting\s+started|get\s+started)\b",
    r"(?i)\b(installation|install|setup)\b",
    r"(?i)\b(configuration|configure|config)\b",
    r"(?i)\b(api\s+doc|api\s+documentation|api\s+reference)\b",
    r"(?i)\b(tutorial|guide|walkthrough)\b",
    r"(?i)\b(example|sample|snippet)\b",
    r"(?i)\b(readme|documentation|docs)\b",
    r"(?i)\b(usage|use\s+case|using)\b",
    r"(?i)\b(reference|manual)\b",
    r"(?i)\b(faq|frequently\s+asked)\b",
    r"(?i)\b(troubleshoot|troubleshooting|debug|debugging|error|errors|issue|issues)\b",
    r"(?i)\b(best\s+practice|best\s+practices|convention|conventions)\b",
    r"(?i)\b(architecture|design|overview)\b",
    r"(?i)\b(changelog|release\s+notes|migration)\b",
];

const DOC_FILE_PATTERNS: &[&str] = &[
    r"(?i)readme(\.\w+)?$",
    r"(?i)changelog(\.\w+)?$",
    r"(?i)contributing(\.\w+)?$",
    r"(?i)license(\.\w+)?$",
    r"(?i)install(\.\w+)?$",
    r"(?i)setup(\.\w+)?$",
    r"(?i)guide(\.\w+)?$",
    r"(?i)tutorial(\.\w+)?$",
    r"(?i)\.md$",
    r"(?i)\.rst$",
    r"(?i)\.txt$",
    r"(?i)docs?/",
    r"(?i)documentation/",
];

const QUESTION_STARTERS: &[&str] = &[
    "how", "what", "where", "when", "why", "can", "is", "does", "should",
];

/// Expansion synonym map; order matters for the ten-query cap.
const EXPANSIONS: &[(&str, &[&str])] = &[
    (
        "install",
        &["installation", "setup", "getting started", "requirements"],
    ),
    (
        "config",
        &["configuration", "configure", "settings", "options", "parameters"],
    ),
    ("api", &["api documentation", "api reference", "endpoint", "method"]),
    ("how to", &["tutorial", "guide", "example", "usage"]),
    ("example", &["sample", "snippet", "demo", "code example"]),
    ("error", &["troubleshoot", "debug", "issue", "problem", "fix"]),
    (
        "getting started",
        &["quickstart", "tutorial", "introduction", "setup"],
    ),
    ("guide", &["tutorial", "documentation", "walkthrough", "how to"]),
    ("usage", &["how to use", "example", "api", "reference"]),
];

const TOPIC_STOP_WORDS: &[&str] = &[
    "how", "to", "the", "a", "an", "is", "are", "what", "where", "when",
];

const MAX_EXPANDED_QUERIES: usize = 10;

fn doc_query_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(DOC_QUERY_PATTERNS).expect("valid doc query patterns"))
}

fn doc_file_set() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(DOC_FILE_PATTERNS).expect("valid doc file patterns"))
}

/// Is this query looking for documentation rather than code?
pub fn is_document_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    if doc_query_set().is_match(&lower) {
        return true;
    }
    lower
        .split_whitespace()
        .next()
        .map(|first| QUESTION_STARTERS.contains(&first))
        .unwrap_or(false)
}

/// Does this path look like a documentation file?
pub fn is_documentation_file(path: &str) -> bool {
    doc_file_set().is_match(&path.to_lowercase())
}

/// Expand a documentation query into related variations. The first
/// element always equals the input; output is capped at ten distinct
/// queries.
pub fn expand_document_query(query: &str) -> Vec<String> {
    let mut expanded: Vec<String> = vec![query.to_string()];
    let lower = query.to_lowercase();

    for (term, related_terms) in EXPANSIONS {
        if !lower.contains(term) {
            continue;
        }
        for related in *related_terms {
            let replaced = lower.replace(term, related);
            if replaced != lower && !expanded.contains(&replaced) {
                expanded.push(replaced);
            }
        }
        // A couple of additive forms on top of the replacements
        for related in related_terms.iter().take(2) {
            let additive = format!("{query} {related}");
            if !expanded.contains(&additive) {
                expanded.push(additive);
            }
        }
    }

    if is_document_query(query) {
        let topic_words: Vec<&str> = lower
            .split_whitespace()
            .filter(|word| !TOPIC_STOP_WORDS.contains(word))
            .take(2)
            .collect();
        if !topic_words.is_empty() {
            let topic = topic_words.join(" ");
            for form in [
                format!("README {topic}"),
                format!("{topic} documentation"),
                format!("{topic} docs"),
                format!("{topic} guide"),
            ] {
                if !expanded.contains(&form) {
                    expanded.push(form);
                }
            }
        }
    }

    expanded.truncate(MAX_EXPANDED_QUERIES);
    expanded
}

/// Default document types for `search_documentation`.
pub fn default_doc_types() -> Vec<String> {
    [
        "readme",
        "documentation",
        "guide",
        "tutorial",
        "api",
        "changelog",
        "contributing",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Per-doc-type query forms for cross-documentation search, capped at
/// ten distinct queries.
pub fn documentation_queries(topic: &str, doc_types: &[String]) -> Vec<String> {
    let mut queries = Vec::new();
    for doc_type in doc_types {
        for form in [
            format!("{doc_type} {topic}"),
            format!("{topic} {doc_type}"),
            format!("{topic} in {doc_type}"),
        ] {
            if !queries.contains(&form) {
                queries.push(form);
            }
        }
    }
    for form in [
        format!("README {topic}"),
        format!("CONTRIBUTING {topic}"),
        format!("docs {topic}"),
        format!("documentation {topic}"),
    ] {
        if !queries.contains(&form) {
            queries.push(form);
        }
    }
    queries.truncate(MAX_EXPANDED_QUERIES);
    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_hits_the_enumerated_patterns() {
        for query in [
            "how to install",
            "getting started with the server",
            "installation steps",
            "configuration options",
            "api reference for search",
            "usage of the watcher",
            "troubleshooting index errors",
            "architecture overview",
            "changelog for v2",
            "README contents",
        ] {
            assert!(is_document_query(query), "expected doc query: {query}");
        }
    }

    #[test]
    fn question_words_classify_as_documentation() {
        assert!(is_document_query("what does the dispatcher do"));
        assert!(is_document_query("should I pin versions"));
        assert!(!is_document_query("authenticate_user"));
        assert!(!is_document_query("fn main"));
        assert!(!is_document_query(""));
    }

    #[test]
    fn classification_is_deterministic() {
        for query in ["how to install", "authenticate_user", "", "+[->+<]"] {
            let first = is_document_query(query);
            for _ in 0..10 {
                assert_eq!(is_document_query(query), first);
            }
        }
    }

    #[test]
    fn expansion_starts_with_the_input() {
        for query in ["how to install", "plain identifier", ""] {
            let expanded = expand_document_query(query);
            assert_eq!(expanded[0], query);
        }
    }

    #[test]
    fn install_query_expands_to_synonyms() {
        let expanded = expand_document_query("how to install");
        assert!(expanded.len() <= 10);
        assert!(expanded.iter().any(|q| q.contains("installation")));
        assert!(expanded.iter().any(|q| q.contains("setup")));
        assert!(expanded.iter().any(|q| q.contains("getting started")));
        // No duplicates
        let unique: std::collections::HashSet<&String> = expanded.iter().collect();
        assert_eq!(unique.len(), expanded.len());
    }

    #[test]
    fn non_doc_queries_expand_to_themselves_only() {
        assert_eq!(
            expand_document_query("authenticate_user"),
            vec!["authenticate_user".to_string()]
        );
    }

    #[test]
    fn documentation_file_detection() {
        for path in [
            "README.md",
            "readme",
            "docs/api.md",
            "documentation/intro.html",
            "CHANGELOG",
            "guide.rst",
            "notes.txt",
        ] {
            assert!(is_documentation_file(path), "expected doc file: {path}");
        }
        for path in ["src/main.rs", "auth.py", "lib/util.go"] {
            assert!(!is_documentation_file(path), "expected code file: {path}");
        }
    }

    #[test]
    fn documentation_queries_are_capped_and_distinct() {
        let queries = documentation_queries("install", &default_doc_types());
        assert_eq!(queries.len(), 10);
        let unique: std::collections::HashSet<&String> = queries.iter().collect();
        assert_eq!(unique.len(), queries.len());
        assert!(queries.contains(&"readme install".to_string()));
    }
}
