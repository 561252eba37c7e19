//! Error types for the indexing and search service.
//!
//! This module provides structured error types using thiserror for
//! actionable error messages and a stable exit-code mapping for CLI
//! wrappers.

use crate::types::FileId;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Malformed query, bad flag, invalid parameter
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Path is not under the repository root
    #[error("Path '{path}' is outside the repository root '{root}'")]
    OutsidePath { path: PathBuf, root: PathBuf },

    /// Plugin parse errors
    #[error("Failed to parse {language} file '{path}': {reason}")]
    Parse {
        path: PathBuf,
        language: String,
        reason: String,
    },

    /// Plugin load or query exceeded its deadline
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// No plugin can serve the language; BM25 fast path stays active
    #[error("No plugin available for language '{language}'")]
    PluginUnavailable { language: String },

    /// Index integrity violated
    #[error("Index appears to be corrupted: {reason}")]
    Corruption { reason: String },

    /// Cache backend failure; queries continue uncached
    #[error("Cache operation failed: {reason}")]
    Cache { reason: String },

    /// Export would include a sensitive file
    #[error("Security violation: export would include sensitive path '{path}'")]
    Security { path: String },

    /// Database errors
    #[error("Database operation '{operation}' failed: {source}")]
    Database {
        operation: String,
        source: rusqlite::Error,
    },

    #[error("File ID {id:?} not found in index. The file may have been removed or not indexed.")]
    FileNotFound { id: FileId },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// General errors for cases that need no dedicated variant
    #[error("{0}")]
    General(String),
}

impl IndexError {
    /// Exit code for CLI wrappers: 0 success, 1 generic, 2 invalid
    /// arguments, 3 corruption, 4 plugin subsystem unavailable.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput { .. } => 2,
            Self::Corruption { .. } => 3,
            Self::PluginUnavailable { .. } => 4,
            _ => 1,
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Corruption { .. } => vec![
                "Run 'repolens index --force' to rebuild from scratch",
                "Check for disk errors or filesystem corruption",
            ],
            Self::Database { .. } => vec![
                "Check disk space and permissions in the index directory",
                "Run 'repolens index --force' if the problem persists",
            ],
            Self::FileRead { .. } => vec![
                "Check that the file exists and you have read permissions",
                "Ensure the file is not locked by another process",
            ],
            Self::PluginUnavailable { .. } => vec![
                "Full-text search remains available via the BM25 fast path",
                "Restart the process to retry plugin loading",
            ],
            Self::Timeout { .. } => vec![
                "The operation was abandoned; partial results may have been returned",
                "Raise the timeout in .repolens/settings.toml if this recurs",
            ],
            _ => vec![],
        }
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, _) = &e {
            if err.code == rusqlite::ErrorCode::DatabaseCorrupt
                || err.code == rusqlite::ErrorCode::NotADatabase
            {
                return IndexError::Corruption {
                    reason: e.to_string(),
                };
            }
        }
        IndexError::Database {
            operation: "sqlite".to_string(),
            source: e,
        }
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T, IndexError>;

    /// Add context with a path
    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T, IndexError> {
        self.map_err(|e| IndexError::General(format!("{msg}: {e}")))
    }

    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError> {
        self.map_err(|e| {
            IndexError::General(format!("Error processing '{}': {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        let invalid = IndexError::InvalidInput {
            reason: "bad flag".into(),
        };
        assert_eq!(invalid.exit_code(), 2);

        let corrupt = IndexError::Corruption {
            reason: "bad page".into(),
        };
        assert_eq!(corrupt.exit_code(), 3);

        let unavailable = IndexError::PluginUnavailable {
            language: "brainfuck".into(),
        };
        assert_eq!(unavailable.exit_code(), 4);

        let generic = IndexError::General("boom".into());
        assert_eq!(generic.exit_code(), 1);
    }

    #[test]
    fn corruption_suggests_rebuild() {
        let err = IndexError::Corruption {
            reason: "integrity_check failed".into(),
        };
        assert!(
            err.recovery_suggestions()
                .iter()
                .any(|s| s.contains("--force"))
        );
    }
}
