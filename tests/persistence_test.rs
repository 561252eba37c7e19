//! Index durability: the database file survives process restarts with
//! symbols, full-text documents, and move/delete history intact.

use repolens::config::Settings;
use repolens::dispatcher::Dispatcher;
use repolens::paths::PathResolver;
use repolens::store::IndexStore;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn index_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("index").join("code_index.db");

    let repo_dir = TempDir::new().unwrap();
    std::fs::write(
        repo_dir.path().join("app.py"),
        "def authenticate_user(token):\n    return token\n",
    )
    .unwrap();
    std::fs::write(repo_dir.path().join("README.md"), "## Usage\nCall it.\n").unwrap();

    {
        let resolver = PathResolver::new(repo_dir.path()).unwrap();
        let store = Arc::new(IndexStore::open(&db_path).unwrap());
        let dispatcher =
            Dispatcher::new(Arc::new(Settings::default()), store, resolver).unwrap();
        let (indexed, _, failed) = dispatcher.index_directory(None).unwrap();
        assert_eq!(failed, 0);
        assert!(indexed >= 2);
    }

    // Fresh handle over the same file
    let reopened = IndexStore::open(&db_path).unwrap();
    reopened.integrity_check().unwrap();

    let stats = reopened.get_stats().unwrap();
    assert_eq!(stats.file_count, 2);
    assert!(stats.symbol_count >= 1);
    assert_eq!(stats.bm25_count, 2);
    assert_eq!(stats.languages.get("python"), Some(&1));
    assert_eq!(stats.languages.get("markdown"), Some(&1));

    let symbols = reopened.get_symbol("authenticate_user", None, None).unwrap();
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].file_path, "app.py");

    let hits = reopened.search_bm25("authenticate", 10).unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn move_then_lookup_by_old_path_returns_nothing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("code_index.db");

    let store = IndexStore::open(&db_path).unwrap();
    let repo = store.create_repository("/repo", "repo").unwrap();
    store
        .replace_file_index(
            repo,
            &repolens::store::NewFile {
                absolute_path: "/repo/a.py",
                relative_path: "a.py",
                language: Some("python"),
                size: 10,
                content_hash: "h1",
                mtime_ns: None,
            },
            &[],
            &[],
            Some("def f(): pass\n"),
            &serde_json::json!({}),
        )
        .unwrap();

    let original = store.get_file(repo, "a.py").unwrap().unwrap();
    let moved = store
        .move_file(repo, "a.py", "b.py", "/repo/b.py", "h1")
        .unwrap();
    drop(store);

    let reopened = IndexStore::open(&db_path).unwrap();
    assert!(reopened.get_file(repo, "a.py").unwrap().is_none());
    let found = reopened.get_file(repo, "b.py").unwrap().unwrap();
    assert_eq!(found.id, original.id);
    assert_eq!(found.id, moved);
}

#[test]
fn soft_deleted_files_stay_hidden_after_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("code_index.db");

    let store = IndexStore::open(&db_path).unwrap();
    let repo = store.create_repository("/repo", "repo").unwrap();
    store
        .replace_file_index(
            repo,
            &repolens::store::NewFile {
                absolute_path: "/repo/gone.py",
                relative_path: "gone.py",
                language: Some("python"),
                size: 10,
                content_hash: "h1",
                mtime_ns: None,
            },
            &[],
            &[],
            Some("def vanish(): pass\n"),
            &serde_json::json!({}),
        )
        .unwrap();
    assert!(store.mark_file_deleted(repo, "gone.py").unwrap());
    drop(store);

    let reopened = IndexStore::open(&db_path).unwrap();
    assert!(reopened.get_file(repo, "gone.py").unwrap().is_none());
    assert!(
        reopened
            .get_file_including_deleted(repo, "gone.py")
            .unwrap()
            .is_some()
    );
    assert!(reopened.search_bm25("vanish", 10).unwrap().is_empty());
    assert!(reopened.get_symbol("vanish", None, None).unwrap().is_empty());
}
