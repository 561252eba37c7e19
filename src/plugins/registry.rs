//! Plugin registry and factory.
//!
//! Plugins are declared in an init-time registration table and
//! instantiated lazily on first request for a language. Instantiation
//! is bounded: a builder that exceeds the load timeout is abandoned and
//! its language marked unavailable for the process lifetime, after
//! which callers fall back to BM25.

use crate::error::{IndexError, IndexResult};
use crate::plugins::{LanguagePlugin, MarkdownPlugin, SourcePlugin};
use crate::store::IndexStore;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub type PluginBuilder = fn(Arc<IndexStore>) -> IndexResult<Arc<dyn LanguagePlugin>>;

/// Init-time plugin declaration. Routing consults this metadata without
/// instantiating anything.
#[derive(Clone)]
pub struct PluginSpec {
    pub language: &'static str,
    pub extensions: &'static [&'static str],
    pub mime_types: &'static [&'static str],
    pub priority: u8,
    pub capabilities: &'static [&'static str],
    pub builder: PluginBuilder,
}

impl std::fmt::Debug for PluginSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSpec")
            .field("language", &self.language)
            .field("extensions", &self.extensions)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Observable plugin lifecycle state, surfaced by `status()`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Declared but not yet instantiated
    Available,
    Loaded,
    /// Load failed or timed out; sticky for the process lifetime
    Unavailable,
}

macro_rules! source_builder {
    ($lang:literal) => {{
        fn build(store: Arc<IndexStore>) -> IndexResult<Arc<dyn LanguagePlugin>> {
            Ok(Arc::new(SourcePlugin::new($lang, store)?))
        }
        build
    }};
}

fn build_markdown(store: Arc<IndexStore>) -> IndexResult<Arc<dyn LanguagePlugin>> {
    Ok(Arc::new(MarkdownPlugin::new(store)?))
}

/// The built-in registration table.
pub fn builtin_specs() -> Vec<PluginSpec> {
    vec![
        PluginSpec {
            language: "python",
            extensions: &["py", "pyi"],
            mime_types: &["text/x-python"],
            priority: 80,
            capabilities: &["syntax_analysis", "code_search"],
            builder: source_builder!("python"),
        },
        PluginSpec {
            language: "rust",
            extensions: &["rs"],
            mime_types: &["text/x-rust"],
            priority: 80,
            capabilities: &["syntax_analysis", "code_search"],
            builder: source_builder!("rust"),
        },
        PluginSpec {
            language: "javascript",
            extensions: &["js", "mjs", "cjs", "jsx"],
            mime_types: &["text/javascript"],
            priority: 75,
            capabilities: &["syntax_analysis", "code_search"],
            builder: source_builder!("javascript"),
        },
        PluginSpec {
            language: "typescript",
            extensions: &["ts", "tsx"],
            mime_types: &["text/x-typescript"],
            priority: 75,
            capabilities: &["syntax_analysis", "code_search"],
            builder: source_builder!("typescript"),
        },
        PluginSpec {
            language: "go",
            extensions: &["go"],
            mime_types: &["text/x-go"],
            priority: 80,
            capabilities: &["syntax_analysis", "code_search"],
            builder: source_builder!("go"),
        },
        PluginSpec {
            language: "markdown",
            extensions: &["md", "markdown", "rst", "txt"],
            mime_types: &["text/markdown", "text/x-rst", "text/plain"],
            priority: 60,
            capabilities: &["documentation_search", "code_search"],
            builder: build_markdown,
        },
    ]
}

/// Lazy, bounded plugin factory. Lookups are lock-free after an
/// instance is published; instantiation runs under a mutex.
pub struct PluginRegistry {
    specs: Vec<PluginSpec>,
    store: Arc<IndexStore>,
    load_timeout: Duration,
    instances: RwLock<HashMap<String, Arc<dyn LanguagePlugin>>>,
    unavailable: DashMap<String, String>,
    load_lock: Mutex<()>,
}

impl PluginRegistry {
    pub fn new(store: Arc<IndexStore>, specs: Vec<PluginSpec>, load_timeout: Duration) -> Self {
        Self {
            specs,
            store,
            load_timeout,
            instances: RwLock::new(HashMap::new()),
            unavailable: DashMap::new(),
            load_lock: Mutex::new(()),
        }
    }

    pub fn with_builtins(store: Arc<IndexStore>, load_timeout: Duration) -> Self {
        Self::new(store, builtin_specs(), load_timeout)
    }

    /// Register an additional plugin spec. Idempotent by language.
    pub fn register(&mut self, spec: PluginSpec) {
        if !self.specs.iter().any(|s| s.language == spec.language) {
            self.specs.push(spec);
        }
    }

    pub fn specs(&self) -> &[PluginSpec] {
        &self.specs
    }

    pub fn spec_for(&self, language: &str) -> Option<&PluginSpec> {
        let language = normalize_language(language);
        self.specs.iter().find(|s| s.language == language)
    }

    /// Ensure the plugin for a language is instantiated, respecting the
    /// bounded load time. Returns None when the language has no spec or
    /// is (now) unavailable.
    pub fn ensure_plugin(&self, language: &str) -> Option<Arc<dyn LanguagePlugin>> {
        let language = normalize_language(language);

        if let Some(plugin) = self.instances.read().get(&language) {
            return Some(plugin.clone());
        }
        if self.unavailable.contains_key(&language) {
            return None;
        }
        let spec = self.spec_for(&language)?.clone();

        let _guard = self.load_lock.lock();
        // Another thread may have finished the load while we waited
        if let Some(plugin) = self.instances.read().get(&language) {
            return Some(plugin.clone());
        }
        if self.unavailable.contains_key(&language) {
            return None;
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let store = self.store.clone();
        let builder = spec.builder;
        std::thread::spawn(move || {
            let _ = tx.send(builder(store));
        });

        match rx.recv_timeout(self.load_timeout) {
            Ok(Ok(plugin)) => {
                tracing::info!("[registry] loaded {language} plugin");
                self.instances.write().insert(language, plugin.clone());
                Some(plugin)
            }
            Ok(Err(e)) => {
                tracing::warn!("[registry] {language} plugin failed to load: {e}");
                self.unavailable.insert(language, e.to_string());
                None
            }
            Err(_) => {
                let timeout = IndexError::Timeout {
                    operation: format!("load {language} plugin"),
                    timeout_ms: self.load_timeout.as_millis() as u64,
                };
                tracing::warn!("[registry] {timeout}; marking {language} unavailable");
                self.unavailable.insert(language, timeout.to_string());
                None
            }
        }
    }

    /// Instantiate every declared plugin, each bounded individually.
    pub fn ensure_all(&self) -> Vec<Arc<dyn LanguagePlugin>> {
        let languages: Vec<&'static str> = self.specs.iter().map(|s| s.language).collect();
        languages
            .into_iter()
            .filter_map(|language| self.ensure_plugin(language))
            .collect()
    }

    /// Currently instantiated plugins, ordered by language.
    pub fn loaded(&self) -> Vec<Arc<dyn LanguagePlugin>> {
        let instances = self.instances.read();
        let mut plugins: Vec<_> = instances.values().cloned().collect();
        plugins.sort_by_key(|p| p.language());
        plugins
    }

    pub fn loaded_count(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_unavailable(&self, language: &str) -> bool {
        self.unavailable.contains_key(&normalize_language(language))
    }

    /// True when no declared plugin can be served anymore.
    pub fn all_unavailable(&self) -> bool {
        self.specs
            .iter()
            .all(|s| self.unavailable.contains_key(s.language))
    }

    pub fn state_of(&self, language: &str) -> PluginState {
        let language = normalize_language(language);
        if self.instances.read().contains_key(&language) {
            PluginState::Loaded
        } else if self.unavailable.contains_key(&language) {
            PluginState::Unavailable
        } else {
            PluginState::Available
        }
    }

    /// Per-plugin state rows for the `plugins()` / `status()` surface.
    pub fn plugin_states(&self) -> Vec<serde_json::Value> {
        self.specs
            .iter()
            .map(|spec| {
                serde_json::json!({
                    "name": spec.language,
                    "version": env!("CARGO_PKG_VERSION"),
                    "language": spec.language,
                    "file_extensions": spec.extensions,
                    "state": self.state_of(spec.language),
                    "enabled": !self.is_unavailable(spec.language),
                })
            })
            .collect()
    }
}

fn normalize_language(language: &str) -> String {
    language.to_ascii_lowercase().replace('-', "_")
}
