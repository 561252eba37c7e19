//! Regex-heuristic source plugin.
//!
//! One plugin type serves several languages, parameterized by a
//! per-language rule table: declaration patterns, doc-comment prefixes,
//! and block style. The goal is useful symbol extraction without a full
//! parser; languages needing real ASTs plug in externally.

use crate::error::{IndexError, IndexResult};
use crate::plugins::{
    LanguagePlugin, MatchType, ParsedReference, ParsedSymbol, PluginCapability, Reference,
    SearchOpts, SearchResult, Shard, SymbolDef, locate_line, score_from_rank,
};
use crate::store::IndexStore;
use crate::types::{ReferenceKind, SymbolKind, Visibility};
use regex::Regex;
use std::path::Path;
use std::sync::Arc;

/// How a language delimits definition bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStyle {
    Braces,
    Indent,
}

struct Rules {
    language: &'static str,
    extensions: &'static [&'static str],
    patterns: Vec<(SymbolKind, Regex)>,
    doc_prefixes: &'static [&'static str],
    block_style: BlockStyle,
}

fn rules_for(language: &str) -> Option<Rules> {
    let rules = match language {
        "python" => Rules {
            language: "python",
            extensions: &["py", "pyi"],
            patterns: vec![
                (
                    SymbolKind::Function,
                    Regex::new(r"^\s*(?:async\s+)?def\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*\(")
                        .unwrap(),
                ),
                (
                    SymbolKind::Class,
                    Regex::new(r"^\s*class\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*[(:]").unwrap(),
                ),
                (
                    SymbolKind::Constant,
                    Regex::new(r"^(?P<name>[A-Z][A-Z0-9_]{2,})\s*=").unwrap(),
                ),
            ],
            doc_prefixes: &["#"],
            block_style: BlockStyle::Indent,
        },
        "rust" => Rules {
            language: "rust",
            extensions: &["rs"],
            patterns: vec![
                (
                    SymbolKind::Function,
                    Regex::new(
                        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)",
                    )
                    .unwrap(),
                ),
                (
                    SymbolKind::Struct,
                    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)")
                        .unwrap(),
                ),
                (
                    SymbolKind::Enum,
                    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)")
                        .unwrap(),
                ),
                (
                    SymbolKind::Trait,
                    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)")
                        .unwrap(),
                ),
                (
                    SymbolKind::Type,
                    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?type\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)")
                        .unwrap(),
                ),
                (
                    SymbolKind::Constant,
                    Regex::new(
                        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*:",
                    )
                    .unwrap(),
                ),
                (
                    SymbolKind::Module,
                    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)")
                        .unwrap(),
                ),
            ],
            doc_prefixes: &["///"],
            block_style: BlockStyle::Braces,
        },
        "javascript" | "typescript" => {
            let mut patterns = vec![
                (
                    SymbolKind::Function,
                    Regex::new(
                        r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)",
                    )
                    .unwrap(),
                ),
                (
                    SymbolKind::Class,
                    Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?class\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)")
                        .unwrap(),
                ),
                (
                    SymbolKind::Function,
                    Regex::new(
                        r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][A-Za-z0-9_$]*)\s*=>",
                    )
                    .unwrap(),
                ),
            ];
            let is_ts = language == "typescript";
            if is_ts {
                patterns.push((
                    SymbolKind::Interface,
                    Regex::new(r"^\s*(?:export\s+)?interface\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)")
                        .unwrap(),
                ));
                patterns.push((
                    SymbolKind::Type,
                    Regex::new(r"^\s*(?:export\s+)?type\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)\s*=")
                        .unwrap(),
                ));
                patterns.push((
                    SymbolKind::Enum,
                    Regex::new(r"^\s*(?:export\s+)?(?:const\s+)?enum\s+(?P<name>[A-Za-z_$][A-Za-z0-9_$]*)")
                        .unwrap(),
                ));
            }
            Rules {
                language: if is_ts { "typescript" } else { "javascript" },
                extensions: if is_ts {
                    &["ts", "tsx"]
                } else {
                    &["js", "mjs", "cjs", "jsx"]
                },
                patterns,
                doc_prefixes: &["//", "*", "/**"],
                block_style: BlockStyle::Braces,
            }
        }
        "go" => Rules {
            language: "go",
            extensions: &["go"],
            patterns: vec![
                (
                    SymbolKind::Function,
                    Regex::new(r"^func\s+(?:\([^)]*\)\s+)?(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*\(")
                        .unwrap(),
                ),
                (
                    SymbolKind::Struct,
                    Regex::new(r"^type\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s+struct\b").unwrap(),
                ),
                (
                    SymbolKind::Interface,
                    Regex::new(r"^type\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s+interface\b").unwrap(),
                ),
                (
                    SymbolKind::Constant,
                    Regex::new(r"^const\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)").unwrap(),
                ),
                (
                    SymbolKind::Variable,
                    Regex::new(r"^var\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)").unwrap(),
                ),
            ],
            doc_prefixes: &["//"],
            block_style: BlockStyle::Braces,
        },
        _ => return None,
    };
    Some(rules)
}

/// Heuristic symbol extractor for one language.
pub struct SourcePlugin {
    rules: Rules,
    store: Arc<IndexStore>,
}

impl SourcePlugin {
    pub fn new(language: &str, store: Arc<IndexStore>) -> IndexResult<Self> {
        let rules = rules_for(language).ok_or_else(|| IndexError::PluginUnavailable {
            language: language.to_string(),
        })?;
        Ok(Self { rules, store })
    }

    fn extract_symbols(&self, lines: &[&str]) -> Vec<ParsedSymbol> {
        let mut symbols = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            for (kind, pattern) in &self.rules.patterns {
                let Some(caps) = pattern.captures(line) else {
                    continue;
                };
                let name_match = caps.name("name").expect("pattern defines a name group");
                let name = name_match.as_str().to_string();
                let line_start = (idx + 1) as u32;
                let line_end = block_end(lines, idx, self.rules.block_style) as u32;

                let indent = line.len() - line.trim_start().len();
                let kind = if *kind == SymbolKind::Function && indent > 0 {
                    SymbolKind::Method
                } else {
                    *kind
                };

                symbols.push(ParsedSymbol {
                    name,
                    kind,
                    line_start,
                    line_end,
                    col_start: Some(name_match.start() as u32),
                    col_end: Some(name_match.end() as u32),
                    signature: Some(truncate(line.trim(), 200)),
                    documentation: self.doc_comment(lines, idx),
                    scope: None,
                    visibility: visibility_of(line),
                    metadata: None,
                });
                break;
            }
        }
        symbols
    }

    /// Consecutive doc-comment lines immediately above the declaration.
    fn doc_comment(&self, lines: &[&str], decl_idx: usize) -> Option<String> {
        let mut collected = Vec::new();
        for line in lines[..decl_idx].iter().rev() {
            let trimmed = line.trim_start();
            let Some(prefix) = self
                .rules
                .doc_prefixes
                .iter()
                .find(|p| trimmed.starts_with(**p))
            else {
                break;
            };
            collected.push(trimmed[prefix.len()..].trim().to_string());
            if collected.len() >= 10 {
                break;
            }
        }
        if collected.is_empty() {
            return None;
        }
        collected.reverse();
        Some(collected.join("\n"))
    }

    /// Call sites of symbols defined in the same file.
    fn extract_references(&self, lines: &[&str], symbols: &[ParsedSymbol]) -> Vec<ParsedReference> {
        let mut references = Vec::new();
        for symbol in symbols {
            if !matches!(symbol.kind, SymbolKind::Function | SymbolKind::Method) {
                continue;
            }
            let needle = format!("{}(", symbol.name);
            for (idx, line) in lines.iter().enumerate() {
                let line_no = (idx + 1) as u32;
                if line_no == symbol.line_start {
                    continue;
                }
                if let Some(col) = line.find(&needle) {
                    references.push(ParsedReference {
                        name: symbol.name.clone(),
                        line: line_no,
                        column: col as u32,
                        kind: ReferenceKind::Call,
                    });
                    if references.len() >= 200 {
                        return references;
                    }
                }
            }
        }
        references
    }
}

impl LanguagePlugin for SourcePlugin {
    fn language(&self) -> &'static str {
        self.rules.language
    }

    fn extensions(&self) -> &'static [&'static str] {
        self.rules.extensions
    }

    fn capabilities(&self) -> Vec<PluginCapability> {
        let lang = self.rules.language;
        vec![
            PluginCapability::new(
                "syntax_analysis",
                format!("{lang} syntax analysis"),
                70,
                lang,
            ),
            PluginCapability::new("code_search", format!("{lang} code search"), 80, lang),
        ]
    }

    fn index_file(&self, _path: &Path, content: &str) -> IndexResult<Shard> {
        let lines: Vec<&str> = content.lines().collect();
        let symbols = self.extract_symbols(&lines);
        let references = self.extract_references(&lines, &symbols);
        Ok(Shard {
            language: self.rules.language.to_string(),
            symbols,
            references,
            metadata: None,
        })
    }

    fn get_definition(&self, name: &str) -> IndexResult<Option<SymbolDef>> {
        let rows = self
            .store
            .get_symbol(name, Some(self.rules.language), None)?;
        Ok(rows.into_iter().next().map(|row| SymbolDef {
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

    fn find_references(&self, name: &str) -> IndexResult<Vec<Reference>> {
        let hits = self
            .store
            .references_for_symbol(name, Some(self.rules.language))?;
        Ok(hits
            .into_iter()
            .map(|hit| Reference {
                file_path: hit.file_path,
                line: hit.line,
                column: hit.column,
                kind: hit.reference_kind,
            })
            .collect())
    }

    fn search(&self, query: &str, opts: &SearchOpts) -> IndexResult<Vec<SearchResult>> {
        let mut results = Vec::new();

        // Exact symbol matches first when the query is identifier-like
        if is_identifier(query) {
            for row in self
                .store
                .get_symbol(query, Some(self.rules.language), None)?
            {
                results.push(SearchResult {
                    file_path: row.file_path,
                    line: row.line_start,
                    column: row.col_start,
                    snippet: row.signature.unwrap_or_else(|| row.name.clone()),
                    score: 0.9,
                    match_type: MatchType::Symbol,
                    context: row.documentation,
                });
            }
        }

        for hit in self
            .store
            .search_bm25_filtered(query, &[self.rules.language], opts.limit)?
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

        dedup_by_location(&mut results);
        results.truncate(opts.limit);
        Ok(results)
    }
}

fn visibility_of(line: &str) -> Option<Visibility> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("pub") || trimmed.starts_with("export") {
        Some(Visibility::Public)
    } else {
        None
    }
}

/// Find the last line of a definition body starting at `start`.
fn block_end(lines: &[&str], start: usize, style: BlockStyle) -> usize {
    const MAX_SCAN: usize = 500;
    match style {
        BlockStyle::Braces => {
            let mut depth = 0i32;
            let mut opened = false;
            for (offset, line) in lines[start..].iter().take(MAX_SCAN).enumerate() {
                for c in line.chars() {
                    match c {
                        '{' => {
                            depth += 1;
                            opened = true;
                        }
                        '}' => depth -= 1,
                        _ => {}
                    }
                }
                if opened && depth <= 0 {
                    return start + offset + 1;
                }
                // Declaration without a body (trait method, type alias)
                if !opened && offset == 0 && line.trim_end().ends_with(';') {
                    return start + 1;
                }
            }
            start + 1
        }
        BlockStyle::Indent => {
            let indent = lines[start].len() - lines[start].trim_start().len();
            let mut end = start + 1;
            for (offset, line) in lines[start + 1..].iter().take(MAX_SCAN).enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let line_indent = line.len() - line.trim_start().len();
                if line_indent <= indent {
                    break;
                }
                end = start + 1 + offset + 1;
            }
            end
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut boundary = max_bytes;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    s[..boundary].to_string()
}

fn dedup_by_location(results: &mut Vec<SearchResult>) {
    let mut seen = std::collections::HashSet::new();
    results.retain(|r| seen.insert((r.file_path.clone(), r.line)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(language: &str) -> SourcePlugin {
        SourcePlugin::new(language, Arc::new(IndexStore::open_in_memory().unwrap())).unwrap()
    }

    #[test]
    fn python_functions_and_classes_are_extracted() {
        let plugin = plugin("python");
        let content = "\
class Installer:
    def install(self):
        return True

def main():
    Installer().install()

MAX_RETRIES = 3
";
        let shard = plugin.index_file(Path::new("app.py"), content).unwrap();
        let names: Vec<_> = shard.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Installer", "install", "main", "MAX_RETRIES"]);

        let install = &shard.symbols[1];
        assert_eq!(install.kind, SymbolKind::Method);
        assert_eq!(install.line_start, 2);
        assert_eq!(install.line_end, 3);

        let class = &shard.symbols[0];
        assert_eq!(class.kind, SymbolKind::Class);
        assert_eq!(class.line_end, 3);

        // Call site of install() inside main() became a reference
        assert!(
            shard
                .references
                .iter()
                .any(|r| r.name == "install" && r.line == 6)
        );
    }

    #[test]
    fn rust_declarations_with_doc_comments() {
        let plugin = plugin("rust");
        let content = "\
/// Adds two numbers.
/// Wrapping is the caller's problem.
pub fn add(a: i32, b: i32) -> i32 {
    a + b
}

struct Point {
    x: i32,
}

pub const LIMIT: usize = 10;
";
        let shard = plugin.index_file(Path::new("lib.rs"), content).unwrap();
        let add = shard.symbols.iter().find(|s| s.name == "add").unwrap();
        assert_eq!(add.kind, SymbolKind::Function);
        assert_eq!(add.visibility, Some(Visibility::Public));
        assert_eq!(
            add.documentation.as_deref(),
            Some("Adds two numbers.\nWrapping is the caller's problem.")
        );
        assert_eq!(add.line_start, 3);
        assert_eq!(add.line_end, 5);

        assert!(shard.symbols.iter().any(|s| s.name == "Point"));
        let limit = shard.symbols.iter().find(|s| s.name == "LIMIT").unwrap();
        assert_eq!(limit.kind, SymbolKind::Constant);
    }

    #[test]
    fn typescript_interfaces_and_arrows() {
        let plugin = plugin("typescript");
        let content = "\
export interface User {
    id: number;
}

export const fetchUser = async (id: number) => {
    return id;
};

function helper() {}
";
        let shard = plugin.index_file(Path::new("user.ts"), content).unwrap();
        let names: Vec<_> = shard.symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"User"));
        assert!(names.contains(&"fetchUser"));
        assert!(names.contains(&"helper"));
    }

    #[test]
    fn go_receiver_functions() {
        let plugin = plugin("go");
        let content = "\
type Server struct {
}

func (s *Server) Start() error {
    return nil
}

func main() {
}
";
        let shard = plugin.index_file(Path::new("main.go"), content).unwrap();
        let names: Vec<_> = shard.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Server", "Start", "main"]);
    }

    #[test]
    fn definition_and_search_flow_through_store() {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        let repo = store.create_repository("/repo", "repo").unwrap();
        let plugin = SourcePlugin::new("python", store.clone()).unwrap();

        let content = "def authenticate_user(token):\n    return token\n";
        let shard = plugin.index_file(Path::new("auth.py"), content).unwrap();
        store
            .replace_file_index(
                repo,
                &crate::store::NewFile {
                    absolute_path: "/repo/auth.py",
                    relative_path: "auth.py",
                    language: Some("python"),
                    size: content.len() as u64,
                    content_hash: "h1",
                    mtime_ns: None,
                },
                &shard.symbols,
                &shard.references,
                Some(content),
                &serde_json::json!({}),
            )
            .unwrap();

        let def = plugin.get_definition("authenticate_user").unwrap().unwrap();
        assert_eq!(def.file_path.as_deref(), Some("auth.py"));
        assert_eq!(def.line_start, Some(1));
        assert!(def.signature.is_some());

        let results = plugin
            .search("authenticate_user", &SearchOpts::default())
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].match_type, MatchType::Symbol);
        assert_eq!(results[0].file_path, "auth.py");

        assert!(plugin.get_definition("missing").unwrap().is_none());
    }

    #[test]
    fn unknown_language_is_rejected() {
        let store = Arc::new(IndexStore::open_in_memory().unwrap());
        assert!(matches!(
            SourcePlugin::new("brainfuck", store),
            Err(IndexError::PluginUnavailable { .. })
        ));
    }
}
