//! End-to-end scenarios through the dispatcher: documentation routing,
//! multi-plugin fusion, change propagation, secure export, and the
//! BM25 fast path.

use repolens::aggregator::{RankingCriteria, ResultAggregator};
use repolens::config::Settings;
use repolens::dispatcher::{Dispatcher, doc_query};
use repolens::export::{SecureExporter, SensitiveMatcher};
use repolens::paths::PathResolver;
use repolens::plugins::{
    LanguagePlugin, MatchType, PluginCapability, PluginRegistry, PluginSpec, Reference,
    SearchOpts, SearchResult, Shard, SymbolDef,
};
use repolens::store::{IndexStore, NewFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn workspace() -> (TempDir, Arc<Dispatcher>) {
    let dir = TempDir::new().unwrap();
    let resolver = PathResolver::new(dir.path()).unwrap();
    let store = Arc::new(IndexStore::open_in_memory().unwrap());
    let dispatcher =
        Arc::new(Dispatcher::new(Arc::new(Settings::default()), store, resolver).unwrap());
    (dir, dispatcher)
}

fn write(dir: &TempDir, rel: &str, content: &str) -> PathBuf {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn documentation_query_ranks_readme_before_code() {
    let (dir, dispatcher) = workspace();
    write(
        &dir,
        "README.md",
        "## Installation\nRun `pip install foo`\n",
    );
    write(&dir, "src/app.py", "def install(): pass\n");
    dispatcher.index_directory(None).unwrap();

    // Classification and expansion are pure and observable
    assert!(doc_query::is_document_query("how to install"));
    let expanded = doc_query::expand_document_query("how to install");
    assert!(expanded.iter().any(|q| q.contains("installation")));
    assert!(expanded.iter().any(|q| q.contains("setup")));
    assert!(expanded.iter().any(|q| q.contains("getting started")));

    let results = dispatcher.search("how to install", false, 5).unwrap();
    assert!(!results.is_empty());
    assert!(
        results[0].file_path.ends_with("README.md"),
        "README should lead for a doc query, got {:?}",
        results.iter().map(|r| &r.file_path).collect::<Vec<_>>()
    );
}

// Two stub plugins that agree on the same hit, for fusion scenarios.

struct FixedResultPlugin {
    language: &'static str,
}

impl LanguagePlugin for FixedResultPlugin {
    fn language(&self) -> &'static str {
        self.language
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["py"]
    }
    fn capabilities(&self) -> Vec<PluginCapability> {
        vec![PluginCapability::new(
            "code_search",
            "stub".to_string(),
            50,
            self.language,
        )]
    }
    fn index_file(&self, _path: &Path, _content: &str) -> repolens::IndexResult<Shard> {
        Ok(Shard::default())
    }
    fn get_definition(&self, _name: &str) -> repolens::IndexResult<Option<SymbolDef>> {
        Ok(None)
    }
    fn find_references(&self, _name: &str) -> repolens::IndexResult<Vec<Reference>> {
        Ok(Vec::new())
    }
    fn search(&self, query: &str, _opts: &SearchOpts) -> repolens::IndexResult<Vec<SearchResult>> {
        if query.contains("authenticate_user") {
            Ok(vec![SearchResult {
                file_path: "auth.py".to_string(),
                line: 15,
                column: Some(0),
                snippet: "def authenticate_user(token):".to_string(),
                score: 0.8,
                match_type: MatchType::Symbol,
                context: None,
            }])
        } else {
            Ok(Vec::new())
        }
    }
}

fn alpha_builder(_store: Arc<IndexStore>) -> repolens::IndexResult<Arc<dyn LanguagePlugin>> {
    Ok(Arc::new(FixedResultPlugin { language: "alpha" }))
}

fn beta_builder(_store: Arc<IndexStore>) -> repolens::IndexResult<Arc<dyn LanguagePlugin>> {
    Ok(Arc::new(FixedResultPlugin { language: "beta" }))
}

fn stub_spec(language: &'static str, builder: repolens::plugins::registry::PluginBuilder) -> PluginSpec {
    PluginSpec {
        language,
        extensions: &["py"],
        mime_types: &[],
        priority: 50,
        capabilities: &["code_search"],
        builder,
    }
}

#[test]
fn two_plugins_agreeing_fuse_into_one_result() {
    let dir = TempDir::new().unwrap();
    let resolver = PathResolver::new(dir.path()).unwrap();
    let store = Arc::new(IndexStore::open_in_memory().unwrap());
    let registry = Arc::new(PluginRegistry::new(
        store.clone(),
        vec![
            stub_spec("alpha", alpha_builder),
            stub_spec("beta", beta_builder),
        ],
        Duration::from_secs(5),
    ));
    let dispatcher = Arc::new(
        Dispatcher::with_registry(Arc::new(Settings::default()), store, resolver, registry)
            .unwrap(),
    );

    let results = dispatcher.search("authenticate_user", false, 10).unwrap();
    assert_eq!(results.len(), 1, "duplicates must fuse to one primary");
    assert_eq!(results[0].file_path, "auth.py");
    assert_eq!(results[0].line, 15);

    // The fused sources and confidence are visible at the aggregator
    let aggregator = ResultAggregator::from_config("smart", 0.8, Duration::from_secs(300));
    let hit = || SearchResult {
        file_path: "auth.py".to_string(),
        line: 15,
        column: None,
        snippet: "def authenticate_user(token):".to_string(),
        score: 0.8,
        match_type: MatchType::Symbol,
        context: None,
    };
    let (aggregated, _) = aggregator.aggregate_search_results(
        &[
            ("alpha".to_string(), vec![hit()]),
            ("beta".to_string(), vec![hit()]),
        ],
        Some(10),
        &RankingCriteria::default(),
    );
    assert_eq!(aggregated.len(), 1);
    assert_eq!(aggregated[0].sources.len(), 2);
    assert!(aggregated[0].confidence >= 0.66);
}

#[test]
fn modify_reindexes_and_invalidates_cached_queries() {
    let (dir, dispatcher) = workspace();
    let path = write(&dir, "src/app.py", "def install(): pass\n");
    dispatcher.index_file(&path).unwrap();

    let before = dispatcher
        .store()
        .get_file(dispatcher.repo(), "src/app.py")
        .unwrap()
        .unwrap();

    // Populate the query cache
    assert!(!dispatcher.search("install", false, 10).unwrap().is_empty());
    let cached_before = dispatcher.query_cache().len();
    assert!(cached_before > 0);

    // Content change: new hash stored, file-tagged queries dropped
    std::fs::write(&path, "def install():\n    return 42\n").unwrap();
    dispatcher.index_file(&path).unwrap();

    let after = dispatcher
        .store()
        .get_file(dispatcher.repo(), "src/app.py")
        .unwrap()
        .unwrap();
    assert_ne!(before.content_hash, after.content_hash);
    assert_eq!(before.id, after.id);

    let misses_before = dispatcher.query_cache().stats()["misses"].as_u64().unwrap();
    let results = dispatcher.search("install", false, 10).unwrap();
    assert!(!results.is_empty());
    let misses_after = dispatcher.query_cache().stats()["misses"].as_u64().unwrap();
    assert!(misses_after > misses_before, "expected a cache miss after invalidation");
}

#[test]
fn secure_export_strips_env_files_end_to_end() {
    let (dir, dispatcher) = workspace();
    write(&dir, ".env", "API_KEY=secret\n");
    write(&dir, "src/app.py", "def install(): pass\n");
    dispatcher.index_directory(None).unwrap();

    // Local index happily serves the secret
    let local = dispatcher.search("API_KEY", false, 10).unwrap();
    assert!(local.iter().any(|r| r.file_path == ".env"));

    let out_dir = TempDir::new().unwrap();
    let dest = out_dir.path().join("shared.db");
    let exporter = SecureExporter::new(SensitiveMatcher::new(&[]));
    let audit = exporter.export(dispatcher.store(), &dest).unwrap();
    assert!(audit.excluded_files.contains(&".env".to_string()));

    // The exported index knows nothing about the secret
    let exported = IndexStore::open(&dest).unwrap();
    assert!(exported.search_bm25("API_KEY", 10).unwrap().is_empty());
    assert!(!exported.search_bm25("install", 10).unwrap().is_empty());
}

fn slow_builder(_store: Arc<IndexStore>) -> repolens::IndexResult<Arc<dyn LanguagePlugin>> {
    std::thread::sleep(Duration::from_millis(400));
    Ok(Arc::new(FixedResultPlugin { language: "slowlang" }))
}

#[test]
fn slow_plugin_load_falls_back_to_bm25_fast_path() {
    let dir = TempDir::new().unwrap();
    let resolver = PathResolver::new(dir.path()).unwrap();
    let store = Arc::new(IndexStore::open_in_memory().unwrap());

    // Pre-populate full-text content the fast path can serve
    let repo = store.create_repository("/repo", "repo").unwrap();
    store
        .replace_file_index(
            repo,
            &NewFile {
                absolute_path: "/repo/notes.txt",
                relative_path: "notes.txt",
                language: Some("plaintext"),
                size: 20,
                content_hash: "h1",
                mtime_ns: None,
            },
            &[],
            &[],
            Some("installation notes for operators\n"),
            &serde_json::json!({}),
        )
        .unwrap();

    let registry = Arc::new(PluginRegistry::new(
        store.clone(),
        vec![stub_spec("slowlang", slow_builder)],
        Duration::from_millis(50),
    ));
    let dispatcher = Arc::new(
        Dispatcher::with_registry(Arc::new(Settings::default()), store, resolver, registry)
            .unwrap(),
    );

    let results = dispatcher.search("installation", false, 5).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file_path, "notes.txt");
    assert!(dispatcher.registry().is_unavailable("slowlang"));

    // Sticky: the next search takes the fast path immediately
    let again = dispatcher.search("installation notes", false, 5).unwrap();
    assert!(!again.is_empty());
}

#[test]
fn unknown_language_query_takes_fast_path_without_error() {
    let dir = TempDir::new().unwrap();
    let resolver = PathResolver::new(dir.path()).unwrap();
    let store = Arc::new(IndexStore::open_in_memory().unwrap());
    let registry = Arc::new(PluginRegistry::new(store.clone(), Vec::new(), Duration::from_secs(1)));
    let dispatcher = Arc::new(
        Dispatcher::with_registry(Arc::new(Settings::default()), store, resolver, registry)
            .unwrap(),
    );

    // No plugin for brainfuck anywhere; operator soup must not throw
    let results = dispatcher.search("+[->+<]", false, 5).unwrap();
    assert!(results.is_empty());
}

#[test]
fn lookup_of_missing_symbol_returns_none() {
    let (_dir, dispatcher) = workspace();
    assert!(dispatcher.lookup("nonexistent_symbol").unwrap().is_none());
}

#[test]
fn search_documentation_restricts_to_doc_files() {
    let (dir, dispatcher) = workspace();
    write(
        &dir,
        "README.md",
        "## Installation\nRun `pip install foo`\n",
    );
    write(&dir, "src/install.py", "def install(): pass\n");
    dispatcher.index_directory(None).unwrap();

    let results = dispatcher
        .search_documentation("install", None, 10)
        .unwrap();
    assert!(!results.is_empty());
    assert!(
        results
            .iter()
            .all(|r| doc_query::is_documentation_file(&r.file_path)),
        "non-doc file leaked into documentation search: {:?}",
        results.iter().map(|r| &r.file_path).collect::<Vec<_>>()
    );
}
