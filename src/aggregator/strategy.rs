//! Aggregation strategies: grouping, primary selection, and ranking.

use crate::plugins::SearchResult;

/// Criteria for ranking aggregated results. Weights sum to 1.0.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RankingCriteria {
    pub relevance_weight: f32,
    pub confidence_weight: f32,
    pub frequency_weight: f32,
    pub recency_weight: f32,

    pub prefer_exact_matches: bool,
    pub boost_multiple_sources: bool,
    pub penalize_long_files: bool,
    pub boost_common_extensions: bool,
}

impl Default for RankingCriteria {
    fn default() -> Self {
        Self {
            relevance_weight: 0.4,
            confidence_weight: 0.3,
            frequency_weight: 0.2,
            recency_weight: 0.1,
            prefer_exact_matches: true,
            boost_multiple_sources: true,
            penalize_long_files: false,
            boost_common_extensions: true,
        }
    }
}

impl RankingCriteria {
    /// Tuning for natural-language documentation queries: relevance up,
    /// confidence down, exact matching off.
    pub fn documentation() -> Self {
        Self {
            relevance_weight: 0.5,
            confidence_weight: 0.2,
            frequency_weight: 0.2,
            recency_weight: 0.1,
            prefer_exact_matches: false,
            boost_multiple_sources: true,
            penalize_long_files: false,
            boost_common_extensions: true,
        }
    }
}

/// A result fused from one or more plugins.
#[derive(Debug, Clone)]
pub struct AggregatedResult {
    pub primary: SearchResult,
    /// Languages of the plugins that produced this group.
    pub sources: Vec<String>,
    pub confidence: f32,
    pub rank_score: f32,
    pub duplicate_count: usize,
    pub context_lines: Vec<String>,
    pub doc_boost: bool,
}

pub trait AggregationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn aggregate(
        &self,
        results_by_plugin: &[(String, Vec<SearchResult>)],
        criteria: &RankingCriteria,
    ) -> Vec<AggregatedResult>;
}

/// Group by exact `(file, line)`; first result is primary.
pub struct SimpleStrategy;

impl AggregationStrategy for SimpleStrategy {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn aggregate(
        &self,
        results_by_plugin: &[(String, Vec<SearchResult>)],
        criteria: &RankingCriteria,
    ) -> Vec<AggregatedResult> {
        // Group results by file:line, preserving first-seen order
        let mut order: Vec<(String, u32)> = Vec::new();
        let mut groups: std::collections::HashMap<(String, u32), Vec<(&str, &SearchResult)>> =
            std::collections::HashMap::new();

        for (language, results) in results_by_plugin {
            for result in results {
                let key = (result.file_path.clone(), result.line);
                match groups.get_mut(&key) {
                    Some(group) => group.push((language.as_str(), result)),
                    None => {
                        order.push(key.clone());
                        groups.insert(key, vec![(language.as_str(), result)]);
                    }
                }
            }
        }

        let mut aggregated = Vec::with_capacity(order.len());
        for key in order {
            let group = &groups[&key];
            let (_, primary) = group[0];
            let sources: Vec<String> = group.iter().map(|(lang, _)| lang.to_string()).collect();
            let confidence = (sources.len() as f32 / 3.0).min(1.0);
            let rank_score = simple_rank(group, criteria);

            aggregated.push(AggregatedResult {
                primary: primary.clone(),
                sources,
                confidence,
                rank_score,
                duplicate_count: group.len(),
                context_lines: Vec::new(),
                doc_boost: false,
            });
        }

        sort_by_rank(&mut aggregated);
        aggregated
    }
}

fn simple_rank(group: &[(&str, &SearchResult)], criteria: &RankingCriteria) -> f32 {
    let (_, primary) = group[0];
    let relevance = primary.score.clamp(0.0, 1.0);
    let confidence = (group.len() as f32 / 3.0).min(1.0);
    let frequency = (group.len() as f32 / 5.0).min(1.0);
    let recency = 0.5;

    let mut rank = relevance * criteria.relevance_weight
        + confidence * criteria.confidence_weight
        + frequency * criteria.frequency_weight
        + recency * criteria.recency_weight;

    if criteria.boost_multiple_sources && group.len() > 1 {
        rank *= 1.1;
    }
    rank.min(1.0)
}

/// Group by similarity: same file with close lines, or snippets with a
/// high longest-common-subsequence ratio. Primary is the best-scoring
/// member; documentation groups get merged contexts.
pub struct SmartStrategy {
    pub similarity_threshold: f32,
    pub document_chunking: bool,
}

impl Default for SmartStrategy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            document_chunking: true,
        }
    }
}

impl AggregationStrategy for SmartStrategy {
    fn name(&self) -> &'static str {
        "smart"
    }

    fn aggregate(
        &self,
        results_by_plugin: &[(String, Vec<SearchResult>)],
        criteria: &RankingCriteria,
    ) -> Vec<AggregatedResult> {
        let all: Vec<(&str, &SearchResult)> = results_by_plugin
            .iter()
            .flat_map(|(language, results)| {
                results.iter().map(move |r| (language.as_str(), r))
            })
            .collect();
        if all.is_empty() {
            return Vec::new();
        }

        let groups = self.group_similar(&all);

        let mut aggregated = Vec::with_capacity(groups.len());
        for group in groups {
            let (_, primary) = select_primary(&group);
            let sources: Vec<String> = group.iter().map(|(lang, _)| lang.to_string()).collect();

            let base_confidence = (sources.len() as f32 / 3.0).min(1.0);
            let similarity_bonus = if group.len() > 1 { 0.1 } else { 0.0 };
            let confidence = (base_confidence + similarity_bonus).min(1.0);
            let rank_score = self.enhanced_rank(&group, criteria);
            let context_lines = self.merge_context(&group);

            aggregated.push(AggregatedResult {
                primary: primary.clone(),
                sources,
                confidence,
                rank_score,
                duplicate_count: group.len(),
                context_lines,
                doc_boost: false,
            });
        }

        sort_by_rank(&mut aggregated);
        aggregated
    }
}

impl SmartStrategy {
    fn group_similar<'a>(
        &self,
        all: &[(&'a str, &'a SearchResult)],
    ) -> Vec<Vec<(&'a str, &'a SearchResult)>> {
        let mut groups = Vec::new();
        let mut used = vec![false; all.len()];

        for i in 0..all.len() {
            if used[i] {
                continue;
            }
            let mut group = vec![all[i]];
            used[i] = true;
            for j in (i + 1)..all.len() {
                if used[j] {
                    continue;
                }
                if self.are_similar(all[i].1, all[j].1) {
                    group.push(all[j]);
                    used[j] = true;
                }
            }
            groups.push(group);
        }
        groups
    }

    fn are_similar(&self, a: &SearchResult, b: &SearchResult) -> bool {
        if a.file_path == b.file_path {
            let line_diff = a.line.abs_diff(b.line);
            let window = if self.document_chunking && is_documentation_path(&a.file_path) {
                10
            } else {
                2
            };
            if line_diff <= window {
                return true;
            }
        }
        similarity_ratio(&a.snippet, &b.snippet) >= self.similarity_threshold
    }

    fn enhanced_rank(&self, group: &[(&str, &SearchResult)], criteria: &RankingCriteria) -> f32 {
        let (_, first) = group[0];
        let relevance = first.score.clamp(0.0, 1.0);

        let base_confidence = (group.len() as f32 / 3.0).min(1.0);
        let similarity_boost = if group.len() > 1 { 0.1 } else { 0.0 };
        let confidence = (base_confidence + similarity_boost).min(1.0);

        let unique_files = group
            .iter()
            .map(|(_, r)| r.file_path.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let mut frequency = (group.len() as f32 / 5.0).min(1.0);
        if unique_files > 1 {
            frequency *= 1.2;
        }

        let recency = 0.5;

        let mut rank = relevance * criteria.relevance_weight
            + confidence * criteria.confidence_weight
            + frequency * criteria.frequency_weight
            + recency * criteria.recency_weight;

        if criteria.boost_multiple_sources && group.len() > 1 {
            rank *= 1.1;
        }
        if criteria.prefer_exact_matches
            && group
                .iter()
                .any(|(_, r)| r.snippet.len() < 100 && !r.snippet.contains('\n'))
        {
            rank *= 1.05;
        }
        rank.min(1.0)
    }

    fn merge_context(&self, group: &[(&str, &SearchResult)]) -> Vec<String> {
        let (_, primary) = group[0];

        if self.document_chunking && is_documentation_path(&primary.file_path) {
            // Merge adjacent documentation snippets into combined
            // contexts (line gap <= 3), capped at five per group
            let mut by_line: std::collections::BTreeMap<u32, &str> =
                std::collections::BTreeMap::new();
            for (_, result) in group {
                by_line.entry(result.line).or_insert(result.snippet.as_str());
            }

            let mut merged = Vec::new();
            let mut current: Vec<&str> = Vec::new();
            let mut last_line: Option<u32> = None;
            for (line, snippet) in by_line {
                match last_line {
                    Some(prev) if line.saturating_sub(prev) <= 3 => current.push(snippet),
                    Some(_) => {
                        merged.push(current.join("\n"));
                        current = vec![snippet];
                    }
                    None => current.push(snippet),
                }
                last_line = Some(line);
            }
            if !current.is_empty() {
                merged.push(current.join("\n"));
            }
            merged.truncate(5);
            merged
        } else {
            let mut seen = std::collections::HashSet::new();
            group
                .iter()
                .filter_map(|(_, r)| {
                    seen.insert(r.snippet.as_str()).then(|| r.snippet.clone())
                })
                .take(5)
                .collect()
        }
    }
}

fn select_primary<'a>(group: &[(&'a str, &'a SearchResult)]) -> (&'a str, &'a SearchResult) {
    let mut best = group[0];
    for candidate in &group[1..] {
        if candidate.1.score > best.1.score {
            best = *candidate;
        }
    }
    best
}

/// Stable descending sort on rank score; equal ranks keep input order
/// so identical inputs always produce identical output orderings.
pub(crate) fn sort_by_rank(results: &mut [AggregatedResult]) {
    results.sort_by(|a, b| {
        b.rank_score
            .partial_cmp(&a.rank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Documentation file detection for grouping and context merging.
pub fn is_documentation_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    const DOC_EXTENSIONS: &[&str] = &[".md", ".rst", ".txt", ".adoc", ".textile"];
    if DOC_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return true;
    }
    const DOC_NAMES: &[&str] = &[
        "readme",
        "changelog",
        "contributing",
        "license",
        "install",
        "setup",
        "guide",
        "tutorial",
    ];
    let stem = lower
        .rsplit('/')
        .next()
        .map(|name| name.split('.').next().unwrap_or(name))
        .unwrap_or(lower.as_str());
    if DOC_NAMES.iter().any(|name| stem.contains(name)) {
        return true;
    }
    lower.contains("/docs/") || lower.contains("/documentation/") || lower.starts_with("docs/")
}

/// Similarity between two snippets: longest-common-subsequence ratio
/// `2*lcs / (len(a) + len(b))` over the first 200 characters.
pub fn similarity_ratio(a: &str, b: &str) -> f32 {
    const CAP: usize = 200;
    let a_chars: Vec<char> = a.chars().take(CAP).collect();
    let b_chars: Vec<char> = b.chars().take(CAP).collect();
    if a_chars.is_empty() && b_chars.is_empty() {
        return 1.0;
    }
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0u16; b_chars.len() + 1];
    let mut row = vec![0u16; b_chars.len() + 1];
    for &ca in &a_chars {
        for (j, &cb) in b_chars.iter().enumerate() {
            row[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(row[j])
            };
        }
        std::mem::swap(&mut prev, &mut row);
        row[0] = 0;
    }
    let lcs = prev[b_chars.len()] as f32;
    2.0 * lcs / (a_chars.len() + b_chars.len()) as f32
}
