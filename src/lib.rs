//! repolens: a code indexing and search service for local agents.
//!
//! Watches a working copy, maintains a persistent index (files,
//! symbols, references, BM25 full text) in an embedded SQLite database,
//! and serves symbol lookup, full-text, and documentation-aware search
//! through the [`dispatcher::Dispatcher`].

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod export;
pub mod logging;
pub mod paths;
pub mod plugins;
pub mod semantic;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod watcher;

pub use aggregator::{AggregatedResult, RankingCriteria, ResultAggregator};
pub use cache::QueryCache;
pub use config::Settings;
pub use dispatcher::{Dispatcher, IndexOutcome};
pub use error::{IndexError, IndexResult};
pub use export::{SecureExporter, SensitiveMatcher};
pub use paths::PathResolver;
pub use plugins::{LanguagePlugin, PluginRegistry, SearchResult, Shard, SymbolDef};
pub use store::IndexStore;
pub use types::{FileId, RepoId, SymbolId, SymbolKind};
pub use watcher::WatchService;
