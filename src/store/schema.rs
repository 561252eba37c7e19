//! SQLite schema for the persistent index.
//!
//! One database file per repository. The `bm25_content` virtual table
//! is the full-text inverted index; its rowid is the owning file id so
//! FTS rows can be replaced in O(1) when a file changes.

use rusqlite::Connection;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY,
    root_path TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    absolute_path TEXT NOT NULL,
    relative_path TEXT NOT NULL,
    language TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL,
    mtime_ns INTEGER,
    indexed_at TEXT,
    deleted_at TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_files_repo_relpath
    ON files(repository_id, relative_path) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_files_language ON files(language);

CREATE TABLE IF NOT EXISTS symbols (
    id INTEGER PRIMARY KEY,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    col_start INTEGER,
    col_end INTEGER,
    signature TEXT,
    documentation TEXT,
    scope TEXT,
    visibility TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);

CREATE TABLE IF NOT EXISTS symbol_references (
    id INTEGER PRIMARY KEY,
    symbol_id INTEGER NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    line INTEGER NOT NULL,
    \"column\" INTEGER NOT NULL,
    reference_kind TEXT
);

CREATE INDEX IF NOT EXISTS idx_refs_symbol ON symbol_references(symbol_id);
CREATE INDEX IF NOT EXISTS idx_refs_file ON symbol_references(file_id);

CREATE VIRTUAL TABLE IF NOT EXISTS bm25_content USING fts5(
    file_id UNINDEXED,
    filepath,
    language UNINDEXED,
    content,
    tokenize = 'porter unicode61'
);
";

/// Apply connection pragmas and create tables.
pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    // journal_mode returns a row, so it cannot go through execute()
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
