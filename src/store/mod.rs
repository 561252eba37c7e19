//! Persistent index store backed by an embedded SQLite database.
//!
//! The store is the single source of truth for indexed data:
//! repositories, files, symbols, symbol references, and the BM25
//! full-text table. A single connection behind a mutex gives the
//! single-writer guarantee; every per-file mutation runs in one
//! transaction so readers see either the old or the new symbol set,
//! never a mix.

mod schema;

use crate::error::{IndexError, IndexResult};
use crate::plugins::{ParsedReference, ParsedSymbol};
use crate::types::{FileId, RepoId, SymbolId, SymbolKind};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// A watched working copy.
#[derive(Debug, Clone)]
pub struct Repository {
    pub id: RepoId,
    pub root_path: String,
    pub name: String,
    pub created_at: String,
}

/// One row of the `files` table.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: FileId,
    pub repository_id: RepoId,
    pub absolute_path: String,
    pub relative_path: String,
    pub language: Option<String>,
    pub size: u64,
    pub content_hash: String,
    pub mtime_ns: Option<i64>,
    pub indexed_at: Option<String>,
    pub deleted_at: Option<String>,
    pub metadata: serde_json::Value,
}

/// One row of the `symbols` table, joined with its file path.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub id: SymbolId,
    pub file_id: FileId,
    pub name: String,
    pub kind: SymbolKind,
    pub line_start: u32,
    pub line_end: u32,
    pub col_start: Option<u32>,
    pub col_end: Option<u32>,
    pub signature: Option<String>,
    pub documentation: Option<String>,
    pub scope: Option<String>,
    pub visibility: Option<String>,
    pub metadata: serde_json::Value,
    pub file_path: String,
    pub language: Option<String>,
}

/// One row of the `symbol_references` table.
#[derive(Debug, Clone)]
pub struct ReferenceRecord {
    pub symbol_id: SymbolId,
    pub file_id: FileId,
    pub line: u32,
    pub column: u32,
    pub reference_kind: Option<String>,
}

/// A reference joined with the path of the file it occurs in.
#[derive(Debug, Clone)]
pub struct ReferenceHit {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub reference_kind: Option<String>,
}

/// A BM25 full-text hit. `rank` is the raw bm25 score (more negative is
/// more relevant); snippets carry `<<`/`>>` match delimiters.
#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub file_id: FileId,
    pub filepath: String,
    pub snippet: String,
    pub rank: f64,
}

/// A stored full-text document, used by the exporter.
#[derive(Debug, Clone)]
pub struct Bm25Document {
    pub file_id: FileId,
    pub filepath: String,
    pub language: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexStats {
    pub file_count: u64,
    pub symbol_count: u64,
    pub bm25_count: u64,
    pub languages: BTreeMap<String, u64>,
}

/// Input for storing or updating a file row.
#[derive(Debug, Clone)]
pub struct NewFile<'a> {
    pub absolute_path: &'a str,
    pub relative_path: &'a str,
    pub language: Option<&'a str>,
    pub size: u64,
    pub content_hash: &'a str,
    pub mtime_ns: Option<i64>,
}

/// Outcome of a `store_file` upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stored {
    /// Row existed with the same content hash; nothing changed.
    Unchanged(FileId),
    /// Row was inserted or updated and dependent data was cleared.
    Updated(FileId),
}

impl Stored {
    pub fn file_id(&self) -> FileId {
        match self {
            Self::Unchanged(id) | Self::Updated(id) => *id,
        }
    }
}

/// Persistent index store. Thread-safe; one writer at a time.
pub struct IndexStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl IndexStore {
    /// Open (or create) the index database at the given path.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> IndexResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ----- repositories -----

    pub fn create_repository(&self, root: &str, name: &str) -> IndexResult<RepoId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO repositories (root_path, name, created_at) VALUES (?1, ?2, ?3)",
            params![root, name, now()],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM repositories WHERE root_path = ?1",
            params![root],
            |row| row.get(0),
        )?;
        repo_id(id)
    }

    pub fn get_repository(&self, root: &str) -> IndexResult<Option<Repository>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, root_path, name, created_at FROM repositories WHERE root_path = ?1",
            params![root],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?
        .map(|(id, root_path, name, created_at)| {
            Ok(Repository {
                id: repo_id(id)?,
                root_path,
                name,
                created_at,
            })
        })
        .transpose()
    }

    pub fn list_repositories(&self) -> IndexResult<Vec<Repository>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, root_path, name, created_at FROM repositories ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, root_path, name, created_at) = row?;
            out.push(Repository {
                id: repo_id(id)?,
                root_path,
                name,
                created_at,
            });
        }
        Ok(out)
    }

    // ----- files -----

    /// Upsert a file row on `(repository_id, relative_path)`.
    ///
    /// When the row exists with a matching `content_hash` the existing id
    /// is returned unchanged. Otherwise the row is updated and dependent
    /// symbols, references, and the FTS document are cleared, all inside
    /// one transaction.
    pub fn store_file(&self, repo: RepoId, file: &NewFile) -> IndexResult<Stored> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let stored = upsert_file(&tx, repo, file)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Atomically replace everything the index knows about a file: the
    /// file row, its symbol set, its references, and its FTS document.
    ///
    /// Returns the file id and whether anything changed. An unchanged
    /// content hash is a no-op; the second call with identical input
    /// causes no symbol churn.
    pub fn replace_file_index(
        &self,
        repo: RepoId,
        file: &NewFile,
        symbols: &[ParsedSymbol],
        references: &[ParsedReference],
        content: Option<&str>,
        metadata: &serde_json::Value,
    ) -> IndexResult<(FileId, bool)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let stored = upsert_file(&tx, repo, file)?;
        let file_id = stored.file_id();
        if let Stored::Unchanged(id) = stored {
            tx.commit()?;
            return Ok((id, false));
        }

        tx.execute(
            "UPDATE files SET metadata = ?1, indexed_at = ?2 WHERE id = ?3",
            params![metadata.to_string(), now(), file_id.value() as i64],
        )?;

        let mut by_name: HashMap<&str, SymbolId> = HashMap::new();
        for symbol in symbols {
            let id = insert_symbol(&tx, file_id, symbol)?;
            by_name.entry(symbol.name.as_str()).or_insert(id);
        }
        for reference in references {
            // Plugin-driven references resolve against symbols defined in
            // the same shard; unresolvable names are dropped.
            if let Some(&symbol_id) = by_name.get(reference.name.as_str()) {
                tx.execute(
                    "INSERT INTO symbol_references (symbol_id, file_id, line, \"column\", reference_kind)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        symbol_id.value() as i64,
                        file_id.value() as i64,
                        reference.line,
                        reference.column,
                        reference.kind.as_str(),
                    ],
                )?;
            }
        }

        if let Some(content) = content {
            tx.execute(
                "DELETE FROM bm25_content WHERE rowid = ?1",
                params![file_id.value() as i64],
            )?;
            tx.execute(
                "INSERT INTO bm25_content (rowid, file_id, filepath, language, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    file_id.value() as i64,
                    file_id.value() as i64,
                    file.relative_path,
                    file.language,
                    content,
                ],
            )?;
        }

        tx.commit()?;
        Ok((file_id, true))
    }

    pub fn store_symbol(&self, file_id: FileId, symbol: &ParsedSymbol) -> IndexResult<SymbolId> {
        let conn = self.conn.lock();
        insert_symbol(&conn, file_id, symbol)
    }

    pub fn store_reference(
        &self,
        symbol_id: SymbolId,
        file_id: FileId,
        line: u32,
        column: u32,
        kind: &str,
    ) -> IndexResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO symbol_references (symbol_id, file_id, line, \"column\", reference_kind)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                symbol_id.value() as i64,
                file_id.value() as i64,
                line,
                column,
                kind
            ],
        )?;
        Ok(())
    }

    /// Soft delete: the row is hidden from queries but retained for
    /// history. The FTS document is removed so full-text search cannot
    /// surface deleted files.
    pub fn mark_file_deleted(&self, repo: RepoId, relative_path: &str) -> IndexResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM files
                 WHERE repository_id = ?1 AND relative_path = ?2 AND deleted_at IS NULL",
                params![repo.value() as i64, relative_path],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = existing else {
            tx.commit()?;
            return Ok(false);
        };
        tx.execute(
            "UPDATE files SET deleted_at = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        tx.execute("DELETE FROM bm25_content WHERE rowid = ?1", params![id])?;
        tx.commit()?;
        Ok(true)
    }

    /// Atomic rename preserving the file id and its symbol rows.
    pub fn move_file(
        &self,
        repo: RepoId,
        old_relative: &str,
        new_relative: &str,
        new_absolute: &str,
        new_content_hash: &str,
    ) -> IndexResult<FileId> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM files
                 WHERE repository_id = ?1 AND relative_path = ?2 AND deleted_at IS NULL",
                params![repo.value() as i64, old_relative],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = existing else {
            return Err(IndexError::General(format!(
                "move_file: '{old_relative}' is not indexed"
            )));
        };
        tx.execute(
            "UPDATE files SET relative_path = ?1, absolute_path = ?2, content_hash = ?3
             WHERE id = ?4",
            params![new_relative, new_absolute, new_content_hash, id],
        )?;
        // FTS rows are immutable in place; re-insert under the new path
        let doc: Option<(Option<String>, String)> = tx
            .query_row(
                "SELECT language, content FROM bm25_content WHERE rowid = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((language, content)) = doc {
            tx.execute("DELETE FROM bm25_content WHERE rowid = ?1", params![id])?;
            tx.execute(
                "INSERT INTO bm25_content (rowid, file_id, filepath, language, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, id, new_relative, language, content],
            )?;
        }
        tx.commit()?;
        file_id(id)
    }

    pub fn get_file(&self, repo: RepoId, relative_path: &str) -> IndexResult<Option<FileRecord>> {
        self.get_file_inner(repo, relative_path, false)
    }

    /// Historical lookup that includes soft-deleted rows.
    pub fn get_file_including_deleted(
        &self,
        repo: RepoId,
        relative_path: &str,
    ) -> IndexResult<Option<FileRecord>> {
        self.get_file_inner(repo, relative_path, true)
    }

    fn get_file_inner(
        &self,
        repo: RepoId,
        relative_path: &str,
        include_deleted: bool,
    ) -> IndexResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        let sql = if include_deleted {
            "SELECT id, repository_id, absolute_path, relative_path, language, size,
                    content_hash, mtime_ns, indexed_at, deleted_at, metadata
             FROM files WHERE repository_id = ?1 AND relative_path = ?2
             ORDER BY deleted_at IS NOT NULL LIMIT 1"
        } else {
            "SELECT id, repository_id, absolute_path, relative_path, language, size,
                    content_hash, mtime_ns, indexed_at, deleted_at, metadata
             FROM files WHERE repository_id = ?1 AND relative_path = ?2 AND deleted_at IS NULL"
        };
        let row = conn
            .query_row(sql, params![repo.value() as i64, relative_path], map_file_row)
            .optional()?;
        row.map(finish_file_row).transpose()
    }

    pub fn list_files(&self, repo: RepoId, include_deleted: bool) -> IndexResult<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let sql = if include_deleted {
            "SELECT id, repository_id, absolute_path, relative_path, language, size,
                    content_hash, mtime_ns, indexed_at, deleted_at, metadata
             FROM files WHERE repository_id = ?1 ORDER BY relative_path"
        } else {
            "SELECT id, repository_id, absolute_path, relative_path, language, size,
                    content_hash, mtime_ns, indexed_at, deleted_at, metadata
             FROM files WHERE repository_id = ?1 AND deleted_at IS NULL ORDER BY relative_path"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![repo.value() as i64], map_file_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_file_row(row?)?);
        }
        Ok(out)
    }

    // ----- symbols -----

    /// Look up symbols by exact name, optionally filtered by language
    /// and/or relative file path. Soft-deleted files are invisible here.
    pub fn get_symbol(
        &self,
        name: &str,
        language: Option<&str>,
        file: Option<&str>,
    ) -> IndexResult<Vec<SymbolRecord>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT s.id, s.file_id, s.name, s.kind, s.line_start, s.line_end,
                    s.col_start, s.col_end, s.signature, s.documentation, s.scope,
                    s.visibility, s.metadata, f.relative_path, f.language
             FROM symbols s JOIN files f ON f.id = s.file_id
             WHERE s.name = ?1 AND f.deleted_at IS NULL",
        );
        let mut values: Vec<rusqlite::types::Value> = vec![name.to_string().into()];
        if let Some(language) = language {
            sql.push_str(&format!(" AND f.language = ?{}", values.len() + 1));
            values.push(language.to_string().into());
        }
        if let Some(file) = file {
            sql.push_str(&format!(" AND f.relative_path = ?{}", values.len() + 1));
            values.push(file.to_string().into());
        }
        sql.push_str(" ORDER BY f.relative_path, s.line_start");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), map_symbol_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_symbol_row(row?)?);
        }
        Ok(out)
    }

    pub fn symbols_for_file(&self, file: FileId) -> IndexResult<Vec<SymbolRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.file_id, s.name, s.kind, s.line_start, s.line_end,
                    s.col_start, s.col_end, s.signature, s.documentation, s.scope,
                    s.visibility, s.metadata, f.relative_path, f.language
             FROM symbols s JOIN files f ON f.id = s.file_id
             WHERE s.file_id = ?1 ORDER BY s.line_start",
        )?;
        let rows = stmt.query_map(params![file.value() as i64], map_symbol_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish_symbol_row(row?)?);
        }
        Ok(out)
    }

    pub fn references_for_file(&self, file: FileId) -> IndexResult<Vec<ReferenceRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol_id, file_id, line, \"column\", reference_kind
             FROM symbol_references WHERE file_id = ?1 ORDER BY line, \"column\"",
        )?;
        let rows = stmt.query_map(params![file.value() as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (symbol, file, line, column, reference_kind) = row?;
            out.push(ReferenceRecord {
                symbol_id: symbol_id(symbol)?,
                file_id: file_id(file)?,
                line,
                column,
                reference_kind,
            });
        }
        Ok(out)
    }

    /// All use sites of a named symbol, joined with their file paths.
    pub fn references_for_symbol(
        &self,
        name: &str,
        language: Option<&str>,
    ) -> IndexResult<Vec<ReferenceHit>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT f.relative_path, r.line, r.\"column\", r.reference_kind
             FROM symbol_references r
             JOIN symbols s ON s.id = r.symbol_id
             JOIN files f ON f.id = r.file_id
             WHERE s.name = ?1 AND f.deleted_at IS NULL",
        );
        let mut values: Vec<rusqlite::types::Value> = vec![name.to_string().into()];
        if let Some(language) = language {
            sql.push_str(" AND f.language = ?2");
            values.push(language.to_string().into());
        }
        sql.push_str(" ORDER BY f.relative_path, r.line");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            Ok(ReferenceHit {
                file_path: row.get(0)?,
                line: row.get(1)?,
                column: row.get(2)?,
                reference_kind: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ----- full-text search -----

    /// BM25 search over indexed content. The raw query is reduced to
    /// quoted alphanumeric tokens before reaching FTS5, so arbitrary
    /// input (operators, punctuation-only queries) can never raise a
    /// syntax error; a query with no usable tokens returns no rows.
    pub fn search_bm25(&self, query: &str, limit: usize) -> IndexResult<Vec<Bm25Hit>> {
        self.search_bm25_filtered(query, &[], limit)
    }

    /// BM25 search restricted to the given languages (empty = all).
    pub fn search_bm25_filtered(
        &self,
        query: &str,
        languages: &[&str],
        limit: usize,
    ) -> IndexResult<Vec<Bm25Hit>> {
        let Some(match_expr) = sanitize_match_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT file_id, filepath, snippet(bm25_content, 3, '<<', '>>', '...', 20), rank
             FROM bm25_content WHERE bm25_content MATCH ?1",
        );
        let mut values: Vec<rusqlite::types::Value> = vec![match_expr.into()];
        if !languages.is_empty() {
            let placeholders = (0..languages.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND language IN ({placeholders})"));
            for lang in languages {
                values.push(lang.to_string().into());
            }
        }
        sql.push_str(&format!(" ORDER BY rank LIMIT {limit}"));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, filepath, snippet, rank) = row?;
            out.push(Bm25Hit {
                file_id: file_id(id)?,
                filepath,
                snippet,
                rank,
            });
        }
        Ok(out)
    }

    pub fn bm25_document(&self, file: FileId) -> IndexResult<Option<Bm25Document>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT filepath, language, content FROM bm25_content WHERE rowid = ?1",
                params![file.value() as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(filepath, language, content)| Bm25Document {
            file_id: file,
            filepath,
            language,
            content,
        }))
    }

    // ----- stats and integrity -----

    pub fn get_stats(&self) -> IndexResult<IndexStats> {
        let conn = self.conn.lock();
        let file_count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        let symbol_count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM symbols s JOIN files f ON f.id = s.file_id
             WHERE f.deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        let bm25_count: u64 =
            conn.query_row("SELECT COUNT(*) FROM bm25_content", [], |row| row.get(0))?;
        let mut stmt = conn.prepare(
            "SELECT language, COUNT(*) FROM files
             WHERE deleted_at IS NULL AND language IS NOT NULL
             GROUP BY language",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        let mut languages = BTreeMap::new();
        for row in rows {
            let (lang, count) = row?;
            languages.insert(lang, count);
        }
        Ok(IndexStats {
            file_count,
            symbol_count,
            bm25_count,
            languages,
        })
    }

    /// Run SQLite's integrity check; anything but "ok" is corruption.
    pub fn integrity_check(&self) -> IndexResult<()> {
        let conn = self.conn.lock();
        let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if verdict == "ok" {
            Ok(())
        } else {
            Err(IndexError::Corruption { reason: verdict })
        }
    }

    // ----- raw copies (secure export) -----

    pub fn insert_repository_raw(&self, repo: &Repository) -> IndexResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO repositories (id, root_path, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                repo.id.value() as i64,
                repo.root_path,
                repo.name,
                repo.created_at
            ],
        )?;
        Ok(())
    }

    pub fn insert_file_raw(&self, file: &FileRecord) -> IndexResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO files (id, repository_id, absolute_path, relative_path, language,
                                size, content_hash, mtime_ns, indexed_at, deleted_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                file.id.value() as i64,
                file.repository_id.value() as i64,
                file.absolute_path,
                file.relative_path,
                file.language,
                file.size,
                file.content_hash,
                file.mtime_ns,
                file.indexed_at,
                file.deleted_at,
                file.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_symbol_raw(&self, symbol: &SymbolRecord) -> IndexResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO symbols (id, file_id, name, kind, line_start, line_end, col_start,
                                  col_end, signature, documentation, scope, visibility, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                symbol.id.value() as i64,
                symbol.file_id.value() as i64,
                symbol.name,
                symbol.kind.as_str(),
                symbol.line_start,
                symbol.line_end,
                symbol.col_start,
                symbol.col_end,
                symbol.signature,
                symbol.documentation,
                symbol.scope,
                symbol.visibility,
                symbol.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_reference_raw(&self, reference: &ReferenceRecord) -> IndexResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO symbol_references (symbol_id, file_id, line, \"column\", reference_kind)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                reference.symbol_id.value() as i64,
                reference.file_id.value() as i64,
                reference.line,
                reference.column,
                reference.reference_kind,
            ],
        )?;
        Ok(())
    }

    pub fn insert_bm25_raw(&self, doc: &Bm25Document) -> IndexResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bm25_content (rowid, file_id, filepath, language, content)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                doc.file_id.value() as i64,
                doc.file_id.value() as i64,
                doc.filepath,
                doc.language,
                doc.content,
            ],
        )?;
        Ok(())
    }
}

// ----- helpers -----

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn repo_id(raw: i64) -> IndexResult<RepoId> {
    u32::try_from(raw)
        .ok()
        .and_then(RepoId::new)
        .ok_or_else(|| IndexError::Corruption {
            reason: format!("invalid repository id {raw}"),
        })
}

fn file_id(raw: i64) -> IndexResult<FileId> {
    u32::try_from(raw)
        .ok()
        .and_then(FileId::new)
        .ok_or_else(|| IndexError::Corruption {
            reason: format!("invalid file id {raw}"),
        })
}

fn symbol_id(raw: i64) -> IndexResult<SymbolId> {
    u32::try_from(raw)
        .ok()
        .and_then(SymbolId::new)
        .ok_or_else(|| IndexError::Corruption {
            reason: format!("invalid symbol id {raw}"),
        })
}

fn upsert_file(conn: &Connection, repo: RepoId, file: &NewFile) -> IndexResult<Stored> {
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, content_hash FROM files
             WHERE repository_id = ?1 AND relative_path = ?2 AND deleted_at IS NULL",
            params![repo.value() as i64, file.relative_path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((id, hash)) if hash == file.content_hash => Ok(Stored::Unchanged(file_id(id)?)),
        Some((id, _)) => {
            conn.execute(
                "UPDATE files SET absolute_path = ?1, language = ?2, size = ?3,
                        content_hash = ?4, mtime_ns = ?5, indexed_at = ?6
                 WHERE id = ?7",
                params![
                    file.absolute_path,
                    file.language,
                    file.size,
                    file.content_hash,
                    file.mtime_ns,
                    now(),
                    id,
                ],
            )?;
            conn.execute(
                "DELETE FROM symbol_references WHERE file_id = ?1",
                params![id],
            )?;
            conn.execute("DELETE FROM symbols WHERE file_id = ?1", params![id])?;
            conn.execute("DELETE FROM bm25_content WHERE rowid = ?1", params![id])?;
            Ok(Stored::Updated(file_id(id)?))
        }
        None => {
            conn.execute(
                "INSERT INTO files (repository_id, absolute_path, relative_path, language,
                                    size, content_hash, mtime_ns, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    repo.value() as i64,
                    file.absolute_path,
                    file.relative_path,
                    file.language,
                    file.size,
                    file.content_hash,
                    file.mtime_ns,
                    now(),
                ],
            )?;
            Ok(Stored::Updated(file_id(conn.last_insert_rowid())?))
        }
    }
}

fn insert_symbol(conn: &Connection, file: FileId, symbol: &ParsedSymbol) -> IndexResult<SymbolId> {
    conn.execute(
        "INSERT INTO symbols (file_id, name, kind, line_start, line_end, col_start, col_end,
                              signature, documentation, scope, visibility, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            file.value() as i64,
            symbol.name,
            symbol.kind.as_str(),
            symbol.line_start,
            symbol.line_end,
            symbol.col_start,
            symbol.col_end,
            symbol.signature,
            symbol.documentation,
            symbol.scope,
            symbol.visibility.map(|v| v.as_str()),
            symbol
                .metadata
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "{}".to_string()),
        ],
    )?;
    symbol_id(conn.last_insert_rowid())
}

type FileRowTuple = (
    i64,
    i64,
    String,
    String,
    Option<String>,
    u64,
    String,
    Option<i64>,
    Option<String>,
    Option<String>,
    String,
);

fn map_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRowTuple> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ))
}

fn finish_file_row(row: FileRowTuple) -> IndexResult<FileRecord> {
    let (id, repo, absolute_path, relative_path, language, size, content_hash, mtime_ns, indexed_at, deleted_at, metadata) =
        row;
    Ok(FileRecord {
        id: file_id(id)?,
        repository_id: repo_id(repo)?,
        absolute_path,
        relative_path,
        language,
        size,
        content_hash,
        mtime_ns,
        indexed_at,
        deleted_at,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

type SymbolRowTuple = (
    i64,
    i64,
    String,
    String,
    u32,
    u32,
    Option<u32>,
    Option<u32>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
);

fn map_symbol_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolRowTuple> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
    ))
}

fn finish_symbol_row(row: SymbolRowTuple) -> IndexResult<SymbolRecord> {
    let (id, file, name, kind, line_start, line_end, col_start, col_end, signature, documentation, scope, visibility, metadata, file_path, language) =
        row;
    Ok(SymbolRecord {
        id: symbol_id(id)?,
        file_id: file_id(file)?,
        name,
        kind: SymbolKind::parse(&kind).ok_or_else(|| IndexError::Corruption {
            reason: format!("unknown symbol kind '{kind}'"),
        })?,
        line_start,
        line_end,
        col_start,
        col_end,
        signature,
        documentation,
        scope,
        visibility,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        file_path,
        language,
    })
}

/// Reduce arbitrary input to a safe FTS5 MATCH expression: quoted
/// alphanumeric tokens joined with OR, so BM25 ranks partial matches
/// instead of requiring every term. Returns None when no token
/// survives, which callers translate to an empty result set.
fn sanitize_match_query(query: &str) -> Option<String> {
    let tokens: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .take(32)
        .collect();
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}
