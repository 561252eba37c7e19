//! Secure export: produce a shareable copy of the index with sensitive
//! paths removed.
//!
//! Local indexing never filters; the full index stays local. Export
//! iterates the source files table, applies the sensitive-path
//! predicate, and copies only qualifying file rows together with their
//! symbols, references, and full-text documents. A verification pass
//! re-scans the output and aborts on any match, so the exported index
//! cannot contain a sensitive row by construction.

use crate::error::{IndexError, IndexResult};
use crate::store::IndexStore;
use regex::Regex;
use std::path::Path;

/// Built-in sensitive patterns; user-supplied patterns are additive.
pub const BUILTIN_PATTERNS: &[&str] = &[
    ".env*",
    "*.env",
    "*.key",
    "*.pem",
    "*.p12",
    "*.pfx",
    "*secret*",
    "*password*",
    "*credential*",
    "id_rsa*",
    "id_ed25519*",
    "node_modules/**",
    ".git/**",
    "*.sqlite",
    "*.db",
];

/// Matches relative paths against sensitive patterns (glob by default;
/// a pattern that fails to parse as a glob is tried as a regex).
pub struct SensitiveMatcher {
    globs: Vec<glob::Pattern>,
    regexes: Vec<Regex>,
    patterns: Vec<String>,
}

impl SensitiveMatcher {
    pub fn new(user_patterns: &[String]) -> Self {
        let mut globs = Vec::new();
        let mut regexes = Vec::new();
        let mut patterns = Vec::new();

        for raw in BUILTIN_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(user_patterns.iter().cloned())
        {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match glob::Pattern::new(trimmed) {
                Ok(pattern) => globs.push(pattern),
                Err(_) => {
                    if let Ok(regex) = Regex::new(trimmed) {
                        regexes.push(regex);
                    } else {
                        tracing::warn!("[export] ignoring unparseable pattern '{trimmed}'");
                        continue;
                    }
                }
            }
            patterns.push(trimmed.to_string());
        }

        Self {
            globs,
            regexes,
            patterns,
        }
    }

    /// Parse newline-separated patterns (the sensitive-pattern file
    /// format) and build a matcher from them.
    pub fn from_pattern_file(content: &str, extra: &[String]) -> Self {
        let mut user: Vec<String> = content
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();
        user.extend(extra.iter().cloned());
        Self::new(&user)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// True when a relative path (or its file name) matches any
    /// sensitive pattern. Case-insensitive, as secrets hide in
    /// `SECRETS.yaml` as happily as `secrets.yaml`.
    pub fn is_sensitive(&self, relative_path: &str) -> bool {
        let lower = relative_path.to_ascii_lowercase();
        let file_name = lower.rsplit('/').next().unwrap_or(&lower);

        for pattern in &self.globs {
            if pattern.matches(&lower) || pattern.matches(file_name) {
                return true;
            }
        }
        self.regexes
            .iter()
            .any(|r| r.is_match(&lower) || r.is_match(file_name))
    }
}

/// Audit record produced alongside every export.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExportAudit {
    pub total_files: usize,
    pub included: usize,
    pub excluded: usize,
    pub patterns_used: Vec<String>,
    pub excluded_files: Vec<String>,
}

pub struct SecureExporter {
    matcher: SensitiveMatcher,
}

impl SecureExporter {
    pub fn new(matcher: SensitiveMatcher) -> Self {
        Self { matcher }
    }

    /// Export `source` into a fresh database at `dest_path`, skipping
    /// sensitive files. Fails with `Security` if verification finds a
    /// sensitive row in the output.
    pub fn export(&self, source: &IndexStore, dest_path: &Path) -> IndexResult<ExportAudit> {
        if dest_path.exists() {
            return Err(IndexError::InvalidInput {
                reason: format!("export target '{}' already exists", dest_path.display()),
            });
        }
        let dest = IndexStore::open(dest_path)?;

        let mut audit = ExportAudit {
            total_files: 0,
            included: 0,
            excluded: 0,
            patterns_used: self.matcher.patterns().to_vec(),
            excluded_files: Vec::new(),
        };

        for repository in source.list_repositories()? {
            dest.insert_repository_raw(&repository)?;

            for file in source.list_files(repository.id, false)? {
                audit.total_files += 1;
                if self.matcher.is_sensitive(&file.relative_path) {
                    audit.excluded += 1;
                    audit.excluded_files.push(file.relative_path.clone());
                    continue;
                }

                dest.insert_file_raw(&file)?;
                for symbol in source.symbols_for_file(file.id)? {
                    dest.insert_symbol_raw(&symbol)?;
                }
                for reference in source.references_for_file(file.id)? {
                    dest.insert_reference_raw(&reference)?;
                }
                if let Some(doc) = source.bm25_document(file.id)? {
                    dest.insert_bm25_raw(&doc)?;
                }
                audit.included += 1;
            }
        }

        self.verify(&dest)?;

        crate::log_event!(
            "export",
            "completed",
            "{} included, {} excluded -> {}",
            audit.included,
            audit.excluded,
            dest_path.display()
        );
        Ok(audit)
    }

    /// Write the audit log next to the exported index.
    pub fn write_audit(&self, audit: &ExportAudit, dest_path: &Path) -> IndexResult<std::path::PathBuf> {
        let audit_path = dest_path.with_extension("audit.json");
        let rendered = serde_json::to_string_pretty(audit)
            .map_err(|e| IndexError::General(format!("serializing audit: {e}")))?;
        std::fs::write(&audit_path, rendered).map_err(|source| IndexError::FileWrite {
            path: audit_path.clone(),
            source,
        })?;
        Ok(audit_path)
    }

    /// Re-scan the exported store; any sensitive row aborts the export.
    fn verify(&self, dest: &IndexStore) -> IndexResult<()> {
        for repository in dest.list_repositories()? {
            for file in dest.list_files(repository.id, true)? {
                if self.matcher.is_sensitive(&file.relative_path) {
                    return Err(IndexError::Security {
                        path: file.relative_path,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewFile;

    #[test]
    fn builtin_patterns_catch_the_usual_suspects() {
        let matcher = SensitiveMatcher::new(&[]);
        for path in [
            ".env",
            ".env.local",
            "config/.env",
            "certs/server.key",
            "certs/server.pem",
            "app/secrets.yaml",
            "deploy/credentials.json",
            "node_modules/pkg/index.js",
            ".git/config",
            ".ssh/id_rsa",
        ] {
            assert!(matcher.is_sensitive(path), "expected sensitive: {path}");
        }
        for path in ["src/main.rs", "README.md", "auth.py", "keyboard.rs"] {
            assert!(!matcher.is_sensitive(path), "expected clean: {path}");
        }
    }

    #[test]
    fn user_patterns_are_additive() {
        let matcher = SensitiveMatcher::new(&["internal/**".to_string()]);
        assert!(matcher.is_sensitive("internal/notes.md"));
        assert!(matcher.is_sensitive(".env"));
        assert!(!matcher.is_sensitive("public/notes.md"));
    }

    #[test]
    fn pattern_file_parsing_skips_comments_and_blanks() {
        let matcher = SensitiveMatcher::from_pattern_file(
            "# internal things\n\ninternal/**\n*.bak\n",
            &[],
        );
        assert!(matcher.is_sensitive("internal/x"));
        assert!(matcher.is_sensitive("old/data.bak"));
    }

    fn populated_store() -> IndexStore {
        let store = IndexStore::open_in_memory().unwrap();
        let repo = store.create_repository("/repo", "repo").unwrap();
        let meta = serde_json::json!({});

        for (rel, content) in [
            ("src/app.py", "def install(): pass\n"),
            (".env", "API_KEY=secret\n"),
            ("README.md", "## Installation\n"),
        ] {
            store
                .replace_file_index(
                    repo,
                    &NewFile {
                        absolute_path: &format!("/repo/{rel}"),
                        relative_path: rel,
                        language: Some("plaintext"),
                        size: content.len() as u64,
                        content_hash: rel,
                        mtime_ns: None,
                    },
                    &[],
                    &[],
                    Some(content),
                    &meta,
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn export_strips_sensitive_files_and_writes_audit() {
        let store = populated_store();

        // Local index finds the secret
        let hits = store.search_bm25("API_KEY", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filepath, ".env");

        let dir = tempfile::tempdir().unwrap();
        let dest_path = dir.path().join("shared.db");
        let exporter = SecureExporter::new(SensitiveMatcher::new(&[]));
        let audit = exporter.export(&store, &dest_path).unwrap();

        assert_eq!(audit.total_files, 3);
        assert_eq!(audit.included, 2);
        assert_eq!(audit.excluded, 1);
        assert_eq!(audit.excluded_files, vec![".env".to_string()]);

        let audit_path = exporter.write_audit(&audit, &dest_path).unwrap();
        let written = std::fs::read_to_string(audit_path).unwrap();
        assert!(written.contains(".env"));

        // Exported index: the secret is gone, the rest survives
        let exported = IndexStore::open(&dest_path).unwrap();
        assert!(exported.search_bm25("API_KEY", 10).unwrap().is_empty());
        assert_eq!(exported.search_bm25("install", 10).unwrap().len(), 1);
        let stats = exported.get_stats().unwrap();
        assert_eq!(stats.file_count, 2);
    }

    #[test]
    fn export_refuses_existing_target() {
        let store = populated_store();
        let dir = tempfile::tempdir().unwrap();
        let dest_path = dir.path().join("shared.db");
        std::fs::write(&dest_path, b"occupied").unwrap();

        let exporter = SecureExporter::new(SensitiveMatcher::new(&[]));
        assert!(matches!(
            exporter.export(&store, &dest_path),
            Err(IndexError::InvalidInput { .. })
        ));
    }
}
