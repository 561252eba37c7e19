//! Documentation plugin for markdown, reStructuredText, and plain text.
//!
//! Headings become `module`-kind symbols spanning their section, which
//! makes documentation topics addressable through the same symbol APIs
//! as code.

use crate::error::IndexResult;
use crate::plugins::{
    LanguagePlugin, MatchType, ParsedSymbol, PluginCapability, Reference, SearchOpts, SearchResult,
    Shard, SymbolDef, locate_line, score_from_rank,
};
use crate::store::IndexStore;
use crate::types::SymbolKind;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

/// Languages this plugin serves when filtering full-text search.
const DOC_LANGUAGES: &[&str] = &["markdown", "restructuredtext", "plaintext"];

pub struct MarkdownPlugin {
    store: Arc<IndexStore>,
    atx_heading: Regex,
    rst_underline: Regex,
}

impl MarkdownPlugin {
    pub fn new(store: Arc<IndexStore>) -> IndexResult<Self> {
        Ok(Self {
            store,
            atx_heading: Regex::new(r"^(?P<level>#{1,6})\s+(?P<title>.+?)\s*#*\s*$")
                .expect("valid heading pattern"),
            rst_underline: Regex::new(r"^(?P<char>[=\-~^]){3,}\s*$").expect("valid underline pattern"),
        })
    }

    fn extract_headings(&self, lines: &[&str]) -> Vec<(u32, usize, String)> {
        let mut headings: Vec<(u32, usize, String)> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(caps) = self.atx_heading.captures(line) {
                let level = caps.name("level").map(|m| m.len()).unwrap_or(1);
                let title = caps["title"].trim().to_string();
                if !title.is_empty() {
                    headings.push(((idx + 1) as u32, level, title));
                }
                continue;
            }
            // reStructuredText style: a title line followed by an
            // underline of punctuation at least as long as the title
            if idx > 0 && self.rst_underline.is_match(line) {
                let title = lines[idx - 1].trim();
                if !title.is_empty() && line.trim_end().len() >= title.len() {
                    let level = match line.chars().next() {
                        Some('=') => 1,
                        Some('-') => 2,
                        _ => 3,
                    };
                    headings.push((idx as u32, level, title.to_string()));
                }
            }
        }
        headings
    }
}

impl LanguagePlugin for MarkdownPlugin {
    fn language(&self) -> &'static str {
        "markdown"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["md", "markdown", "rst", "txt"]
    }

    fn capabilities(&self) -> Vec<PluginCapability> {
        vec![
            PluginCapability::new(
                "documentation_search",
                "documentation structure and search".to_string(),
                85,
                "markdown",
            ),
            PluginCapability::new("code_search", "full-text search".to_string(), 60, "markdown"),
        ]
    }

    fn index_file(&self, _path: &Path, content: &str) -> IndexResult<Shard> {
        let lines: Vec<&str> = content.lines().collect();
        let headings = self.extract_headings(&lines);
        let total_lines = lines.len() as u32;

        let mut symbols = Vec::new();
        for (i, (line_start, level, title)) in headings.iter().enumerate() {
            // Section runs until the next heading of the same or a
            // shallower level
            let line_end = headings[i + 1..]
                .iter()
                .find(|(_, next_level, _)| next_level <= level)
                .map(|(next_start, _, _)| next_start.saturating_sub(1))
                .unwrap_or(total_lines);
            symbols.push(ParsedSymbol {
                name: title.clone(),
                kind: SymbolKind::Module,
                line_start: *line_start,
                line_end: line_end.max(*line_start),
                col_start: None,
                col_end: None,
                signature: None,
                documentation: None,
                scope: None,
                visibility: None,
                metadata: Some(serde_json::json!({ "heading_level": level })),
            });
        }

        Ok(Shard {
            language: "markdown".to_string(),
            symbols,
            references: Vec::new(),
            metadata: None,
        })
    }

    fn get_definition(&self, name: &str) -> IndexResult<Option<SymbolDef>> {
        let rows = self.store.get_symbol(name, None, None)?;
        Ok(rows
            .into_iter()
            .find(|row| {
                row.language
                    .as_deref()
                    .map(|l| DOC_LANGUAGES.contains(&l))
                    .unwrap_or(false)
            })
            .map(|row| SymbolDef {
                name: row.name,
                kind: Some(row.kind),
                language: row.language,
                file_path: Some(row.file_path),
                line_start: Some(row.line_start),
                line_end: Some(row.line_end),
                signature: row.signature,
                documentation: row.documentation,
            }))
    }

    fn find_references(&self, _name: &str) -> IndexResult<Vec<Reference>> {
        // Documentation has no reference graph
        Ok(Vec::new())
    }

    fn search(&self, query: &str, opts: &SearchOpts) -> IndexResult<Vec<SearchResult>> {
        let mut results = Vec::new();
        for hit in self
            .store
            .search_bm25_filtered(query, DOC_LANGUAGES, opts.limit)?
        {
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
        results.truncate(opts.limit);
        Ok(results)
    }
}
