//! Plugin contract and built-in language handlers.
//!
//! Every language handler implements [`LanguagePlugin`]. Plugins receive
//! a store handle at construction time and hold no cross-request mutable
//! state, so a single instance can serve concurrent queries.

pub mod filetype;
pub mod markdown;
pub mod registry;
pub mod router;
pub mod source;

pub use filetype::{Detection, FileTypeMatcher};
pub use markdown::MarkdownPlugin;
pub use registry::{PluginRegistry, PluginSpec, PluginState, builtin_specs};
pub use router::{PluginRouter, RouteCandidate};
pub use source::SourcePlugin;

use crate::error::IndexResult;
use crate::types::{ReferenceKind, SymbolKind, Visibility};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A symbol extracted from one file by a plugin.
#[derive(Debug, Clone)]
pub struct ParsedSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub line_start: u32,
    pub line_end: u32,
    pub col_start: Option<u32>,
    pub col_end: Option<u32>,
    pub signature: Option<String>,
    pub documentation: Option<String>,
    pub scope: Option<String>,
    pub visibility: Option<Visibility>,
    pub metadata: Option<serde_json::Value>,
}

/// A use site of a symbol defined in the same shard.
#[derive(Debug, Clone)]
pub struct ParsedReference {
    pub name: String,
    pub line: u32,
    pub column: u32,
    pub kind: ReferenceKind,
}

/// A plugin's per-file output.
#[derive(Debug, Clone, Default)]
pub struct Shard {
    pub language: String,
    pub symbols: Vec<ParsedSymbol>,
    pub references: Vec<ParsedReference>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
    Semantic,
    Symbol,
}

/// One search hit. Scores are normalized into `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub file_path: String,
    pub line: u32,
    pub column: Option<u32>,
    pub snippet: String,
    pub score: f32,
    pub match_type: MatchType,
    pub context: Option<String>,
}

/// A merged symbol definition as returned by `lookup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolDef {
    pub name: String,
    pub kind: Option<SymbolKind>,
    pub language: Option<String>,
    pub file_path: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    pub signature: Option<String>,
    pub documentation: Option<String>,
}

/// A reference hit as returned by `find_references`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub kind: Option<String>,
}

/// Advertised plugin capability; priority is in `[0, 100]`.
#[derive(Debug, Clone, Serialize)]
pub struct PluginCapability {
    pub name: String,
    pub version: String,
    pub description: String,
    pub priority: u8,
    pub metadata: serde_json::Value,
}

impl PluginCapability {
    pub fn new(name: &str, description: String, priority: u8, language: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0".to_string(),
            description,
            priority,
            metadata: serde_json::json!({ "language": language }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOpts {
    pub semantic: bool,
    pub limit: usize,
}

impl Default for SearchOpts {
    fn default() -> Self {
        Self {
            semantic: false,
            limit: 20,
        }
    }
}

/// Contract every language handler implements.
pub trait LanguagePlugin: Send + Sync {
    /// Canonical lowercased language name (e.g. `python`, `go`).
    fn language(&self) -> &'static str;

    /// File extensions this plugin handles (without the dot).
    fn extensions(&self) -> &'static [&'static str];

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions().iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    fn capabilities(&self) -> Vec<PluginCapability>;

    /// Parse one file into a shard of symbols and references.
    fn index_file(&self, path: &Path, content: &str) -> IndexResult<Shard>;

    /// Best definition of a symbol, if this plugin knows one.
    fn get_definition(&self, name: &str) -> IndexResult<Option<SymbolDef>>;

    /// All known use sites of a symbol.
    fn find_references(&self, name: &str) -> IndexResult<Vec<Reference>>;

    /// Language-scoped search. Results are capped at `opts.limit`.
    fn search(&self, query: &str, opts: &SearchOpts) -> IndexResult<Vec<SearchResult>>;
}

/// Map a raw FTS5 bm25 rank (more negative is better) into `[0, 1]`.
pub(crate) fn score_from_rank(rank: f64) -> f32 {
    let r = (-rank).max(0.0);
    (r / (r + 1.0)) as f32
}

/// Best-effort line number for a full-text hit: the first line that
/// contains the first query token, case-insensitively.
pub(crate) fn locate_line(content: &str, query: &str) -> u32 {
    let Some(token) = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .find(|t| !t.is_empty())
    else {
        return 1;
    };
    let needle = token.to_ascii_lowercase();
    for (i, line) in content.lines().enumerate() {
        if line.to_ascii_lowercase().contains(&needle) {
            return (i + 1) as u32;
        }
    }
    1
}
