//! Cross-plugin result fusion: deduplication, similarity grouping,
//! weighted re-ranking, context merging, and bounded TTL caching of
//! aggregated results keyed by a stable fingerprint.

mod strategy;

pub use strategy::{
    AggregatedResult, AggregationStrategy, RankingCriteria, SimpleStrategy, SmartStrategy,
    is_documentation_path, similarity_ratio,
};

use crate::plugins::{Reference, SearchResult, SymbolDef};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics about one aggregation operation.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AggregationStats {
    pub total_results: usize,
    pub unique_results: usize,
    pub duplicates_removed: usize,
    pub plugins_used: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

struct CachedAggregation {
    results: Vec<AggregatedResult>,
    stats: AggregationStats,
    inserted_at: Instant,
}

/// Result aggregator with interchangeable strategies and a
/// fingerprinted TTL cache. Entries become visible atomically.
pub struct ResultAggregator {
    strategy: Box<dyn AggregationStrategy>,
    cache: Mutex<HashMap<String, CachedAggregation>>,
    cache_ttl: Duration,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ResultAggregator {
    pub fn new(strategy: Box<dyn AggregationStrategy>, cache_ttl: Duration) -> Self {
        Self {
            strategy,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Build from a strategy name (`simple` | `smart`); anything else
    /// falls back to smart.
    pub fn from_config(strategy: &str, similarity_threshold: f32, cache_ttl: Duration) -> Self {
        let strategy: Box<dyn AggregationStrategy> = match strategy {
            "simple" => Box::new(SimpleStrategy),
            _ => Box::new(SmartStrategy {
                similarity_threshold,
                document_chunking: true,
            }),
        };
        Self::new(strategy, cache_ttl)
    }

    /// Aggregate per-plugin search results. Identical inputs within the
    /// TTL return the cached ordering with counters updated.
    pub fn aggregate_search_results(
        &self,
        results_by_plugin: &[(String, Vec<SearchResult>)],
        limit: Option<usize>,
        criteria: &RankingCriteria,
    ) -> (Vec<AggregatedResult>, AggregationStats) {
        let fingerprint = self.fingerprint(results_by_plugin, limit, criteria);

        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.get(&fingerprint) {
                if entry.inserted_at.elapsed() < self.cache_ttl {
                    let hits = self.cache_hits.fetch_add(1, Ordering::Relaxed) + 1;
                    let mut stats = entry.stats.clone();
                    stats.cache_hits = hits;
                    stats.cache_misses = self.cache_misses.load(Ordering::Relaxed);
                    return (entry.results.clone(), stats);
                }
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let total_results: usize = results_by_plugin.iter().map(|(_, r)| r.len()).sum();
        let plugins_used = results_by_plugin
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .count();

        let mut aggregated = self.strategy.aggregate(results_by_plugin, criteria);
        if let Some(limit) = limit {
            if limit > 0 {
                aggregated.truncate(limit);
            }
        }

        let stats = AggregationStats {
            total_results,
            unique_results: aggregated.len(),
            duplicates_removed: total_results.saturating_sub(aggregated.len()),
            plugins_used,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        };

        let mut cache = self.cache.lock();
        if cache.len() >= 1000 {
            let ttl = self.cache_ttl;
            cache.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        }
        cache.insert(
            fingerprint,
            CachedAggregation {
                results: aggregated.clone(),
                stats: stats.clone(),
                inserted_at: Instant::now(),
            },
        );

        (aggregated, stats)
    }

    /// Select the most complete definition when several plugins return
    /// one: documentation +0.3, signature +0.2, kind +0.1, span +0.1,
    /// language +0.1, base 0.2.
    pub fn merge_symbol_definitions(
        &self,
        definitions: &[(String, Option<SymbolDef>)],
    ) -> Option<SymbolDef> {
        let valid: Vec<&SymbolDef> = definitions
            .iter()
            .filter_map(|(_, def)| def.as_ref())
            .collect();
        match valid.len() {
            0 => None,
            1 => Some(valid[0].clone()),
            _ => {
                let mut best = valid[0];
                let mut best_score = completeness(best);
                for def in &valid[1..] {
                    let score = completeness(def);
                    if score > best_score {
                        best = def;
                        best_score = score;
                    }
                }
                Some(best.clone())
            }
        }
    }

    /// Deduplicate references by `(file, line)` and sort ascending.
    pub fn merge_references(&self, references: &[(String, Vec<Reference>)]) -> Vec<Reference> {
        let mut seen = std::collections::HashSet::new();
        let mut merged: Vec<Reference> = references
            .iter()
            .flat_map(|(_, refs)| refs.iter())
            .filter(|r| seen.insert((r.file_path.clone(), r.line)))
            .cloned()
            .collect();
        merged.sort_by(|a, b| a.file_path.cmp(&b.file_path).then(a.line.cmp(&b.line)));
        merged
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn cache_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "strategy": self.strategy.name(),
            "cached_results": self.cache.lock().len(),
            "cache_hits": self.cache_hits.load(Ordering::Relaxed),
            "cache_misses": self.cache_misses.load(Ordering::Relaxed),
            "ttl_secs": self.cache_ttl.as_secs(),
        })
    }

    /// Stable fingerprint of (plugins ordered by language, per-plugin
    /// result digest, limit, strategy, criteria).
    fn fingerprint(
        &self,
        results_by_plugin: &[(String, Vec<SearchResult>)],
        limit: Option<usize>,
        criteria: &RankingCriteria,
    ) -> String {
        let mut plugins: Vec<&(String, Vec<SearchResult>)> = results_by_plugin.iter().collect();
        plugins.sort_by(|a, b| a.0.cmp(&b.0));

        let mut parts = Vec::with_capacity(plugins.len() + 3);
        for (language, results) in plugins {
            let serialized = serde_json::to_string(results).unwrap_or_default();
            let digest = Sha256::digest(serialized.as_bytes());
            parts.push(format!("{language}:{:02x}{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2], digest[3]));
        }
        parts.push(format!("limit:{limit:?}"));
        parts.push(format!("strategy:{}", self.strategy.name()));
        parts.push(format!(
            "criteria:{}",
            serde_json::to_string(criteria).unwrap_or_default()
        ));

        let digest = Sha256::digest(parts.join("|").as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn completeness(def: &SymbolDef) -> f32 {
    let mut score = 0.2;
    if def.documentation.is_some() {
        score += 0.3;
    }
    if def.signature.is_some() {
        score += 0.2;
    }
    if def.kind.is_some() {
        score += 0.1;
    }
    if def.line_start.is_some() {
        score += 0.1;
    }
    if def.language.is_some() {
        score += 0.1;
    }
    score
}
