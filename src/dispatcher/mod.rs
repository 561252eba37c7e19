//! Dispatcher: the public query surface.
//!
//! Owns query classification/expansion, fan-out to plugins, result
//! aggregation, query caching, and file indexing. A plugin misbehaving
//! never fails a query; the dispatcher degrades to whatever is still
//! healthy, down to the BM25 fast path when no plugin can serve.

pub mod doc_query;

use crate::aggregator::{AggregatedResult, RankingCriteria, ResultAggregator};
use crate::cache::{
    NS_DOCUMENTATION_SEARCH, NS_PROJECT_STATUS, NS_SEARCH, NS_SEMANTIC_SEARCH, NS_SYMBOL_LOOKUP,
    QueryCache, file_tag,
};
use crate::config::Settings;
use crate::error::{IndexError, IndexResult};
use crate::paths::{PathResolver, hash_bytes};
use crate::plugins::{
    LanguagePlugin, MatchType, PluginRegistry, PluginRouter, Reference, SearchOpts, SearchResult,
    SymbolDef, locate_line, score_from_rank,
};
use crate::semantic::SemanticBackend;
use crate::store::{IndexStore, NewFile};
use crate::types::{FileId, RepoId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Outcome of an `index_file` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { file_id: FileId, symbols: usize },
    /// Content hash unchanged; nothing re-parsed.
    Unchanged,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Binary,
    TooLarge,
}

#[derive(Debug, Default)]
struct OperationStats {
    searches: AtomicU64,
    lookups: AtomicU64,
    indexings: AtomicU64,
}

/// Cached per-file fingerprint used to skip unchanged files.
type FileState = (i64, u64, String);

pub struct Dispatcher {
    settings: Arc<Settings>,
    store: Arc<IndexStore>,
    registry: Arc<PluginRegistry>,
    router: Arc<PluginRouter>,
    aggregator: ResultAggregator,
    query_cache: Arc<QueryCache>,
    resolver: PathResolver,
    semantic: SemanticBackend,
    repo: RepoId,
    file_state: DashMap<String, FileState>,
    file_locks: DashMap<String, Arc<Mutex<()>>>,
    stats: OperationStats,
    plugin_errors: DashMap<String, u64>,
}

impl Dispatcher {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<IndexStore>,
        resolver: PathResolver,
    ) -> IndexResult<Self> {
        let registry = Arc::new(PluginRegistry::with_builtins(
            store.clone(),
            Duration::from_millis(settings.dispatcher.plugin_load_timeout_ms),
        ));
        Self::with_registry(settings, store, resolver, registry)
    }

    /// Construct with an externally assembled registry (used to add
    /// custom plugin specs).
    pub fn with_registry(
        settings: Arc<Settings>,
        store: Arc<IndexStore>,
        resolver: PathResolver,
        registry: Arc<PluginRegistry>,
    ) -> IndexResult<Self> {
        let router = Arc::new(PluginRouter::new(
            registry.specs(),
            settings.dispatcher.latency_sample_window,
        ));
        let aggregator = ResultAggregator::from_config(
            &settings.aggregator.strategy,
            settings.aggregator.similarity_threshold,
            Duration::from_secs(settings.aggregator.cache_ttl_secs),
        );
        let query_cache = Arc::new(QueryCache::new(settings.cache.clone()));
        let semantic = SemanticBackend::new(settings.semantic.clone());

        let root = resolver.root().to_string_lossy().to_string();
        let name = resolver
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "repository".to_string());
        let repo = store.create_repository(&root, &name)?;

        Ok(Self {
            settings,
            store,
            registry,
            router,
            aggregator,
            query_cache,
            resolver,
            semantic,
            repo,
            file_state: DashMap::new(),
            file_locks: DashMap::new(),
            stats: OperationStats::default(),
            plugin_errors: DashMap::new(),
        })
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn query_cache(&self) -> &Arc<QueryCache> {
        &self.query_cache
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn repo(&self) -> RepoId {
        self.repo
    }

    /// File extensions any declared plugin handles; the watcher uses
    /// this to decide what to dispatch.
    pub fn indexable_extensions(&self) -> HashSet<String> {
        self.registry
            .specs()
            .iter()
            .flat_map(|s| s.extensions.iter().map(|e| e.to_string()))
            .collect()
    }

    // ----- lookup -----

    /// Look up a symbol definition across all plugins. Plugin failures
    /// are logged and counted, never surfaced.
    pub fn lookup(&self, symbol: &str) -> IndexResult<Option<SymbolDef>> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let key = QueryCache::key(
            NS_SYMBOL_LOOKUP,
            "lookup",
            &serde_json::json!({ "symbol": symbol }),
        );
        if let Some(value) = self.query_cache.get(&key) {
            if let Ok(cached) = serde_json::from_value::<Option<SymbolDef>>(value) {
                return Ok(cached);
            }
        }

        self.ensure_plugins_loaded();
        let mut definitions = Vec::new();
        for plugin in self.registry.loaded() {
            let language = plugin.language().to_string();
            match plugin.get_definition(symbol) {
                Ok(def) => definitions.push((language, def)),
                Err(e) => {
                    tracing::warn!("[dispatcher] {language} get_definition failed for '{symbol}': {e}");
                    self.record_plugin_error(&language);
                    definitions.push((language, None));
                }
            }
        }

        let merged = self.aggregator.merge_symbol_definitions(&definitions);
        let tags: Vec<String> = merged
            .as_ref()
            .and_then(|def| def.file_path.as_deref())
            .map(|path| vec![file_tag(path)])
            .unwrap_or_default();
        if let Ok(value) = serde_json::to_value(&merged) {
            self.query_cache.put(NS_SYMBOL_LOOKUP, key, value, &tags);
        }
        Ok(merged)
    }

    /// All references to a symbol, merged across plugins.
    pub fn find_references(&self, symbol: &str) -> IndexResult<Vec<Reference>> {
        self.ensure_plugins_loaded();
        let mut by_plugin = Vec::new();
        for plugin in self.registry.loaded() {
            let language = plugin.language().to_string();
            match plugin.find_references(symbol) {
                Ok(refs) => by_plugin.push((language, refs)),
                Err(e) => {
                    tracing::warn!("[dispatcher] {language} find_references failed: {e}");
                    self.record_plugin_error(&language);
                }
            }
        }
        Ok(self.aggregator.merge_references(&by_plugin))
    }

    // ----- search -----

    /// Search code and documentation. Documentation-style queries are
    /// expanded and re-ranked so documentation files come first.
    pub fn search(
        &self,
        query: &str,
        semantic: bool,
        limit: usize,
    ) -> IndexResult<Vec<SearchResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.stats.searches.fetch_add(1, Ordering::Relaxed);

        let is_doc = doc_query::is_document_query(query);
        // Doc queries force semantic; an absent backend degrades it back
        let semantic_requested = semantic || is_doc;
        let semantic_effective = self.semantic.effective(semantic_requested);

        let namespace = if semantic_requested {
            NS_SEMANTIC_SEARCH
        } else {
            NS_SEARCH
        };
        let key = QueryCache::key(
            namespace,
            "search",
            &serde_json::json!({
                "query": query,
                "semantic": semantic_requested,
                "limit": limit,
            }),
        );
        if let Some(value) = self.query_cache.get(&key) {
            if let Ok(results) = serde_json::from_value::<Vec<SearchResult>>(value) {
                return Ok(results);
            }
        }

        self.ensure_plugins_loaded();
        let plugins = self.registry.loaded();

        let results = if plugins.is_empty() {
            // Fast path: plugins unavailable, BM25 keeps search alive
            self.fast_path_search(query, limit)?
        } else {
            let queries: Vec<String> = if is_doc {
                doc_query::expand_document_query(query)
            } else {
                vec![query.to_string()]
            };
            let opts = SearchOpts {
                semantic: semantic_effective,
                limit: if is_doc { limit * 2 } else { limit },
            };
            let results_by_plugin = self.fan_out_search(&plugins, &queries, opts);

            let criteria = if is_doc {
                RankingCriteria::documentation()
            } else {
                RankingCriteria::default()
            };
            let agg_limit = if is_doc { limit * 2 } else { limit };
            let (mut aggregated, _) = self.aggregator.aggregate_search_results(
                &results_by_plugin,
                Some(agg_limit),
                &criteria,
            );

            if is_doc {
                aggregated = reorder_documentation_first(aggregated);
            }
            aggregated.truncate(limit);
            aggregated.into_iter().map(|a| a.primary).collect()
        };

        let mut tags: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for result in &results {
            if seen.insert(result.file_path.as_str()) {
                tags.push(file_tag(&result.file_path));
            }
        }
        if let Ok(value) = serde_json::to_value(&results) {
            self.query_cache.put(namespace, key, value, &tags);
        }
        Ok(results)
    }

    /// Search restricted to documentation files, fanning out across
    /// per-doc-type query forms.
    pub fn search_documentation(
        &self,
        topic: &str,
        doc_types: Option<&[String]>,
        limit: usize,
    ) -> IndexResult<Vec<SearchResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let doc_types: Vec<String> = match doc_types {
            Some(types) => types.to_vec(),
            None => doc_query::default_doc_types(),
        };

        let key = QueryCache::key(
            NS_DOCUMENTATION_SEARCH,
            "search_documentation",
            &serde_json::json!({ "topic": topic, "doc_types": doc_types, "limit": limit }),
        );
        if let Some(value) = self.query_cache.get(&key) {
            if let Ok(results) = serde_json::from_value::<Vec<SearchResult>>(value) {
                return Ok(results);
            }
        }

        let queries = doc_query::documentation_queries(topic, &doc_types);
        let mut seen = HashSet::new();
        let mut collected: Vec<SearchResult> = Vec::new();
        for query in &queries {
            for result in self.search(query, true, limit)? {
                if doc_query::is_documentation_file(&result.file_path)
                    && seen.insert((result.file_path.clone(), result.line))
                {
                    collected.push(result);
                }
            }
        }
        collected.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        collected.truncate(limit);

        let tags: Vec<String> = collected.iter().map(|r| file_tag(&r.file_path)).collect();
        if let Ok(value) = serde_json::to_value(&collected) {
            self.query_cache.put(NS_DOCUMENTATION_SEARCH, key, value, &tags);
        }
        Ok(collected)
    }

    // ----- indexing -----

    /// Index one file if it changed. Re-indexing of the same path is
    /// serialized by a per-file mutex; different paths may interleave.
    pub fn index_file(&self, path: &Path) -> IndexResult<IndexOutcome> {
        let absolute = self.absolute(path);
        let relative = self.resolver.normalize(&absolute)?;

        let metadata = read_metadata(&absolute)?;
        let size = metadata.len();
        if size > self.settings.indexing.max_file_size {
            crate::debug_event!("dispatcher", "skipped oversized", "{relative} ({size} bytes)");
            return Ok(IndexOutcome::Skipped(SkipReason::TooLarge));
        }
        let mtime_ns = mtime_of(&metadata);

        let bytes = read_with_retry(&absolute)?;
        if looks_binary(&bytes) {
            return Ok(IndexOutcome::Skipped(SkipReason::Binary));
        }
        let hash = hash_bytes(&bytes);

        let state: FileState = (mtime_ns, size, hash.clone());
        if self
            .file_state
            .get(&relative)
            .map(|s| s.value() == &state)
            .unwrap_or(false)
        {
            return Ok(IndexOutcome::Unchanged);
        }

        let lock = self
            .file_locks
            .entry(relative.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();
        // Re-check under the lock; a concurrent call may have finished
        if self
            .file_state
            .get(&relative)
            .map(|s| s.value() == &state)
            .unwrap_or(false)
        {
            return Ok(IndexOutcome::Unchanged);
        }

        let (content, encoding) = decode_content(bytes);
        let mut meta = serde_json::Map::new();
        meta.insert("encoding".to_string(), serde_json::json!(encoding));

        let detection = self.router.detect(&absolute);
        let plugin = self.select_plugin(&absolute);
        let language = detection
            .as_ref()
            .map(|d| d.language.clone())
            .or_else(|| plugin.as_ref().map(|p| p.language().to_string()));

        let (symbols, references) = match &plugin {
            Some(plugin) => {
                let started = Instant::now();
                match plugin.index_file(&absolute, &content) {
                    Ok(shard) => {
                        self.router.record_execution(plugin.language(), started.elapsed());
                        (shard.symbols, shard.references)
                    }
                    Err(e) => {
                        tracing::warn!(
                            "[dispatcher] {} failed to parse {relative}: {e}",
                            plugin.language()
                        );
                        meta.insert("parse_error".to_string(), serde_json::json!(e.to_string()));
                        self.router.record_error(plugin.language());
                        self.record_plugin_error(plugin.language());
                        (Vec::new(), Vec::new())
                    }
                }
            }
            // No plugin: the file still enters the index so BM25 can
            // serve it through the fast path
            None => (Vec::new(), Vec::new()),
        };

        let absolute_str = absolute.to_string_lossy();
        let new_file = NewFile {
            absolute_path: &absolute_str,
            relative_path: &relative,
            language: language.as_deref(),
            size,
            content_hash: &hash,
            mtime_ns: Some(mtime_ns),
        };
        let (file_id, changed) = self.store.replace_file_index(
            self.repo,
            &new_file,
            &symbols,
            &references,
            Some(&content),
            &serde_json::Value::Object(meta),
        )?;

        self.file_state.insert(relative.clone(), state);
        self.stats.indexings.fetch_add(1, Ordering::Relaxed);

        if changed {
            self.query_cache.invalidate_file_queries(&relative);
            crate::debug_event!("dispatcher", "indexed", "{relative}: {} symbols", symbols.len());
            Ok(IndexOutcome::Indexed {
                file_id,
                symbols: symbols.len(),
            })
        } else {
            Ok(IndexOutcome::Unchanged)
        }
    }

    /// Soft-delete a file from the index and drop its cached queries.
    pub fn remove_file(&self, path: &Path) -> IndexResult<bool> {
        let absolute = self.absolute(path);
        let relative = self.resolver.normalize(&absolute)?;
        let removed = self.store.mark_file_deleted(self.repo, &relative)?;
        if removed {
            self.file_state.remove(&relative);
            self.query_cache.invalidate_file_queries(&relative);
            crate::log_event!("dispatcher", "deleted", "{relative}");
        }
        Ok(removed)
    }

    /// Atomic rename with a recomputed content hash.
    pub fn move_file(&self, old_path: &Path, new_path: &Path) -> IndexResult<FileId> {
        let old_abs = self.absolute(old_path);
        let new_abs = self.absolute(new_path);
        let old_rel = self.resolver.normalize(&old_abs)?;
        let new_rel = self.resolver.normalize(&new_abs)?;
        let hash = crate::paths::content_hash(&new_abs)?;

        let file_id = self.store.move_file(
            self.repo,
            &old_rel,
            &new_rel,
            &new_abs.to_string_lossy(),
            &hash,
        )?;

        self.file_state.remove(&old_rel);
        if let Ok(metadata) = std::fs::metadata(&new_abs) {
            self.file_state
                .insert(new_rel.clone(), (mtime_of(&metadata), metadata.len(), hash));
        }
        self.query_cache.invalidate_file_queries(&old_rel);
        self.query_cache.invalidate_file_queries(&new_rel);
        crate::log_event!("dispatcher", "moved", "{old_rel} -> {new_rel}");
        Ok(file_id)
    }

    /// Walk the repository root and index every supported file.
    /// Returns `(indexed, skipped, failed)` counts.
    pub fn index_directory(&self, dir: Option<&Path>) -> IndexResult<(usize, usize, usize)> {
        use rayon::prelude::*;

        let root = dir
            .map(|d| self.absolute(d))
            .unwrap_or_else(|| self.resolver.root().to_path_buf());

        let mut builder = ignore::WalkBuilder::new(&root);
        builder.hidden(false).follow_links(false);
        let mut overrides = ignore::overrides::OverrideBuilder::new(&root);
        for pattern in &self.settings.indexing.ignore_patterns {
            let _ = overrides.add(&format!("!{pattern}"));
        }
        let _ = overrides.add("!.repolens/**");
        let _ = overrides.add("!.git/**");
        if let Ok(built) = overrides.build() {
            builder.overrides(built);
        }

        let files: Vec<PathBuf> = builder
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.into_path())
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.indexing.parallel_threads.max(1))
            .build()
            .map_err(|e| IndexError::General(format!("thread pool: {e}")))?;

        let outcomes: Vec<IndexResult<IndexOutcome>> = pool.install(|| {
            files
                .par_iter()
                .map(|path| self.index_file(path))
                .collect()
        });

        let mut indexed = 0;
        let mut skipped = 0;
        let mut failed = 0;
        for outcome in outcomes {
            match outcome {
                Ok(IndexOutcome::Indexed { .. }) => indexed += 1,
                Ok(IndexOutcome::Unchanged) | Ok(IndexOutcome::Skipped(_)) => skipped += 1,
                Err(e) => {
                    tracing::warn!("[dispatcher] indexing failed: {e}");
                    failed += 1;
                }
            }
        }
        Ok((indexed, skipped, failed))
    }

    // ----- observability -----

    pub fn status(&self) -> IndexResult<serde_json::Value> {
        let key = QueryCache::key(NS_PROJECT_STATUS, "status", &serde_json::json!({}));
        if let Some(value) = self.query_cache.get(&key) {
            return Ok(value);
        }

        let stats = self.store.get_stats()?;
        let status = serde_json::json!({
            "plugins": self.registry.plugin_states(),
            "indexed_files": {
                "total": stats.file_count,
                "by_language": stats.languages,
            },
            "database": {
                "path": self.store.db_path().to_string_lossy(),
                "symbols": stats.symbol_count,
                "bm25_documents": stats.bm25_count,
            },
            "cache": self.query_cache.stats(),
        });
        self.query_cache
            .put(NS_PROJECT_STATUS, key, status.clone(), &[]);
        Ok(status)
    }

    pub fn plugins(&self) -> Vec<serde_json::Value> {
        self.registry.plugin_states()
    }

    pub fn get_statistics(&self) -> serde_json::Value {
        let errors: serde_json::Map<String, serde_json::Value> = self
            .plugin_errors
            .iter()
            .map(|entry| (entry.key().clone(), serde_json::json!(*entry.value())))
            .collect();
        serde_json::json!({
            "operations": {
                "searches": self.stats.searches.load(Ordering::Relaxed),
                "lookups": self.stats.lookups.load(Ordering::Relaxed),
                "indexings": self.stats.indexings.load(Ordering::Relaxed),
            },
            "plugins_loaded": self.registry.loaded_count(),
            "plugin_errors": errors,
            "router": self.router.stats_snapshot(),
            "aggregator": self.aggregator.cache_stats(),
        })
    }

    pub fn health_check(&self) -> serde_json::Value {
        let error_count: u64 = self.plugin_errors.iter().map(|e| *e.value()).sum();
        let status = if self.registry.all_unavailable() {
            "degraded"
        } else if error_count > 0 {
            "degraded"
        } else {
            "healthy"
        };
        serde_json::json!({
            "status": status,
            "plugins": self.registry.plugin_states(),
            "fast_path_active": self.registry.loaded_count() == 0,
            "plugin_error_count": error_count,
        })
    }

    // ----- internals -----

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.resolver.root().join(path)
        }
    }

    fn ensure_plugins_loaded(&self) {
        if self.registry.loaded_count() == 0 {
            self.registry.ensure_all();
        }
    }

    fn select_plugin(&self, path: &Path) -> Option<Arc<dyn LanguagePlugin>> {
        for candidate in self.router.route_file(path) {
            if let Some(plugin) = self.registry.ensure_plugin(&candidate.language) {
                return Some(plugin);
            }
        }
        None
    }

    fn record_plugin_error(&self, language: &str) {
        *self.plugin_errors.entry(language.to_string()).or_insert(0) += 1;
    }

    /// Fan queries out to plugins on worker threads and collect results
    /// until the search deadline. Late plugins are dropped, their
    /// results discarded; errors are logged and counted.
    fn fan_out_search(
        &self,
        plugins: &[Arc<dyn LanguagePlugin>],
        queries: &[String],
        opts: SearchOpts,
    ) -> Vec<(String, Vec<SearchResult>)> {
        let (tx, rx) = crossbeam_channel::bounded(plugins.len());
        for plugin in plugins {
            let tx = tx.clone();
            let plugin = plugin.clone();
            let queries = queries.to_vec();
            std::thread::spawn(move || {
                let mut collected = Vec::new();
                let mut failure: Option<String> = None;
                for query in &queries {
                    match plugin.search(query, &opts) {
                        Ok(results) => collected.extend(results),
                        Err(e) => failure = Some(e.to_string()),
                    }
                }
                let _ = tx.send((plugin.language().to_string(), collected, failure));
            });
        }
        drop(tx);

        let deadline =
            Instant::now() + Duration::from_millis(self.settings.dispatcher.search_timeout_ms);
        let mut out: Vec<(String, Vec<SearchResult>)> = Vec::new();
        loop {
            match rx.recv_deadline(deadline) {
                Ok((language, mut results, failure)) => {
                    if let Some(reason) = failure {
                        tracing::warn!("[dispatcher] {language} search failed: {reason}");
                        self.router.record_error(&language);
                        self.record_plugin_error(&language);
                    }
                    dedup_by_location(&mut results);
                    if !results.is_empty() {
                        out.push((language, results));
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        "[dispatcher] plugin search exceeded {}ms; returning partial results",
                        self.settings.dispatcher.search_timeout_ms
                    );
                    break;
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        // Arrival order is nondeterministic; canonicalize for stable
        // aggregation and fingerprints
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// BM25 directly against the store, bypassing plugins entirely.
    fn fast_path_search(&self, query: &str, limit: usize) -> IndexResult<Vec<SearchResult>> {
        crate::debug_event!("dispatcher", "fast path", "BM25 for '{query}'");
        let mut results = Vec::new();
        for hit in self.store.search_bm25(query, limit)? {
            let line = self
                .store
                .bm25_document(hit.file_id)?
                .map(|doc| locate_line(&doc.content, query))
                .unwrap_or(1);
            results.push(SearchResult {
                file_path: hit.filepath,
                line,
                column: None,
                snippet: hit.snippet,
                score: score_from_rank(hit.rank),
                match_type: MatchType::Fuzzy,
                context: None,
            });
        }
        Ok(results)
    }
}

/// Documentation files precede code files for doc queries; each doc
/// entry's rank is boosted 1.5x before the stable per-group sort.
fn reorder_documentation_first(aggregated: Vec<AggregatedResult>) -> Vec<AggregatedResult> {
    let mut docs = Vec::new();
    let mut code = Vec::new();
    for mut result in aggregated {
        if doc_query::is_documentation_file(&result.primary.file_path) {
            result.rank_score *= 1.5;
            result.doc_boost = true;
            docs.push(result);
        } else {
            code.push(result);
        }
    }
    let by_rank = |a: &AggregatedResult, b: &AggregatedResult| {
        b.rank_score
            .partial_cmp(&a.rank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    };
    docs.sort_by(by_rank);
    code.sort_by(by_rank);
    docs.extend(code);
    docs
}

fn dedup_by_location(results: &mut Vec<SearchResult>) {
    let mut seen = HashSet::new();
    results.retain(|r| seen.insert((r.file_path.clone(), r.line)));
}

fn read_metadata(path: &Path) -> IndexResult<std::fs::Metadata> {
    std::fs::metadata(path).map_err(|source| IndexError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}

fn mtime_of(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Read file bytes, retrying once on transient I/O errors.
fn read_with_retry(path: &Path) -> IndexResult<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(first) if first.kind() == std::io::ErrorKind::Interrupted => std::fs::read(path)
            .map_err(|source| IndexError::FileRead {
                path: path.to_path_buf(),
                source,
            }),
        Err(source) => Err(IndexError::FileRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(8192)].contains(&0)
}

/// Decode file bytes: UTF-8 first, latin-1 as the fallback. Returns the
/// text and the encoding label persisted in file metadata.
fn decode_content(bytes: Vec<u8>) -> (String, &'static str) {
    match String::from_utf8(bytes) {
        Ok(content) => (content, "utf-8"),
        Err(e) => {
            let bytes = e.into_bytes();
            (bytes.iter().map(|&b| b as char).collect(), "latin-1")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(dir.path()).unwrap();
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let dispatcher =
            Dispatcher::new(Arc::new(Settings::default()), store, resolver).unwrap();
        (dir, dispatcher)
    }

    fn write(dir: &tempfile::TempDir, rel: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn index_file_skips_unchanged_content() {
        let (dir, dispatcher) = workspace();
        let path = write(&dir, "src/app.py", b"def install(): pass\n");

        let first = dispatcher.index_file(&path).unwrap();
        assert!(matches!(first, IndexOutcome::Indexed { symbols: 1, .. }));

        let second = dispatcher.index_file(&path).unwrap();
        assert_eq!(second, IndexOutcome::Unchanged);

        // Touching mtime without changing bytes is still unchanged at
        // the store layer
        std::fs::write(&path, b"def install(): pass\n").unwrap();
        let third = dispatcher.index_file(&path).unwrap();
        assert_eq!(third, IndexOutcome::Unchanged);
    }

    #[test]
    fn latin1_files_index_with_encoding_metadata() {
        let (dir, dispatcher) = workspace();
        // 0xE9 is 'é' in latin-1 but invalid standalone UTF-8
        let path = write(&dir, "legacy.py", b"# caf\xe9\ndef caf(): pass\n");

        let outcome = dispatcher.index_file(&path).unwrap();
        assert!(matches!(outcome, IndexOutcome::Indexed { .. }));

        let record = dispatcher
            .store()
            .get_file(dispatcher.repo(), "legacy.py")
            .unwrap()
            .unwrap();
        assert_eq!(record.metadata["encoding"], "latin-1");

        // And the content is searchable
        let results = dispatcher.search("caf", false, 10).unwrap();
        assert!(results.iter().any(|r| r.file_path == "legacy.py"));
    }

    #[test]
    fn binary_files_are_skipped() {
        let (dir, dispatcher) = workspace();
        let path = write(&dir, "blob.py", &[0u8, 1, 2, 3]);
        assert_eq!(
            dispatcher.index_file(&path).unwrap(),
            IndexOutcome::Skipped(SkipReason::Binary)
        );
        assert!(
            dispatcher
                .store()
                .get_file(dispatcher.repo(), "blob.py")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn empty_repository_has_empty_status_and_search() {
        let (_dir, dispatcher) = workspace();
        let status = dispatcher.status().unwrap();
        assert_eq!(status["indexed_files"]["total"], 0);
        assert!(dispatcher.search("anything", false, 10).unwrap().is_empty());
    }

    #[test]
    fn doc_query_prefers_readme_over_code() {
        let (dir, dispatcher) = workspace();
        write(
            &dir,
            "README.md",
            b"## Installation\nRun `pip install foo`\n",
        );
        write(&dir, "src/app.py", b"def install(): pass\n");
        dispatcher.index_directory(None).unwrap();

        let results = dispatcher.search("how to install", false, 5).unwrap();
        assert!(!results.is_empty());
        assert!(
            results[0].file_path.ends_with("README.md"),
            "expected README first, got {:?}",
            results.iter().map(|r| &r.file_path).collect::<Vec<_>>()
        );
    }

    #[test]
    fn lookup_missing_symbol_is_none_not_error() {
        let (_dir, dispatcher) = workspace();
        assert!(dispatcher.lookup("nonexistent_symbol").unwrap().is_none());
    }

    #[test]
    fn search_results_are_cached_until_invalidated() {
        let (dir, dispatcher) = workspace();
        let path = write(&dir, "src/app.py", b"def install(): pass\n");
        dispatcher.index_file(&path).unwrap();

        let first = dispatcher.search("install", false, 10).unwrap();
        assert!(!first.is_empty());
        let hits_before = dispatcher.query_cache().stats()["hits"].as_u64().unwrap();
        let second = dispatcher.search("install", false, 10).unwrap();
        assert_eq!(first.len(), second.len());
        let hits_after = dispatcher.query_cache().stats()["hits"].as_u64().unwrap();
        assert!(hits_after > hits_before);

        // Re-index with new content: tag invalidation drops the entry
        std::fs::write(&path, b"def install_v2(): pass\n").unwrap();
        dispatcher.index_file(&path).unwrap();
        let third = dispatcher.search("install", false, 10).unwrap();
        // install() is gone; only install_v2 remains, so the result set
        // was recomputed rather than replayed
        assert!(third.iter().all(|r| !r.snippet.contains("install()")));
    }

    #[test]
    fn deleted_files_disappear_from_search() {
        let (dir, dispatcher) = workspace();
        let path = write(&dir, "src/app.py", b"def install(): pass\n");
        dispatcher.index_file(&path).unwrap();
        assert!(!dispatcher.search("install", false, 10).unwrap().is_empty());

        std::fs::remove_file(&path).unwrap();
        assert!(dispatcher.remove_file(&path).unwrap());
        assert!(dispatcher.search("install", false, 10).unwrap().is_empty());
    }

    #[test]
    fn move_keeps_searchability_under_new_path() {
        let (dir, dispatcher) = workspace();
        let old = write(&dir, "old.py", b"def install(): pass\n");
        dispatcher.index_file(&old).unwrap();

        let new = dir.path().join("new.py");
        std::fs::rename(&old, &new).unwrap();
        dispatcher.move_file(&old, &new).unwrap();

        let results = dispatcher.search("install", false, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_path, "new.py");
        assert!(
            dispatcher
                .store()
                .get_file(dispatcher.repo(), "old.py")
                .unwrap()
                .is_none()
        );
    }
}
