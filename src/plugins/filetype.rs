//! File-type detection: path -> language, MIME, confidence.
//!
//! The extension map is the primary source; well-known documentation
//! filenames come second; a cheap content sniff is the fallback for
//! extensionless files. Results are cached per path for the lifetime of
//! the file's mtime.

use dashmap::DashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Detection result. Confidence: 1.0 exact extension, 0.8 well-known
/// filename, 0.6 content sniff.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub language: String,
    pub mime: Option<String>,
    pub confidence: f32,
}

const EXTENSION_MAP: &[(&str, &str, &str)] = &[
    ("py", "python", "text/x-python"),
    ("pyi", "python", "text/x-python"),
    ("rs", "rust", "text/x-rust"),
    ("js", "javascript", "text/javascript"),
    ("mjs", "javascript", "text/javascript"),
    ("cjs", "javascript", "text/javascript"),
    ("jsx", "javascript", "text/javascript"),
    ("ts", "typescript", "text/x-typescript"),
    ("tsx", "typescript", "text/x-typescript"),
    ("go", "go", "text/x-go"),
    ("md", "markdown", "text/markdown"),
    ("markdown", "markdown", "text/markdown"),
    ("rst", "restructuredtext", "text/x-rst"),
    ("txt", "plaintext", "text/plain"),
];

const FILENAME_MAP: &[(&str, &str, &str)] = &[
    ("readme", "markdown", "text/markdown"),
    ("changelog", "markdown", "text/markdown"),
    ("contributing", "markdown", "text/markdown"),
    ("license", "plaintext", "text/plain"),
];

/// Cached path -> detection mapping, invalidated by mtime.
#[derive(Debug, Default)]
pub struct FileTypeMatcher {
    cache: DashMap<PathBuf, (i64, Option<Detection>)>,
}

impl FileTypeMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect the language of a path. Returns None for files that look
    /// binary or cannot be classified.
    pub fn detect(&self, path: &Path) -> Option<Detection> {
        let mtime = mtime_ns(path);
        if let Some(entry) = self.cache.get(path) {
            let (cached_mtime, detection) = entry.value();
            if *cached_mtime == mtime {
                return detection.clone();
            }
        }
        let detection = self.detect_uncached(path);
        self.cache
            .insert(path.to_path_buf(), (mtime, detection.clone()));
        detection
    }

    fn detect_uncached(&self, path: &Path) -> Option<Detection> {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let ext = ext.to_ascii_lowercase();
            if let Some((_, language, mime)) = EXTENSION_MAP.iter().find(|(e, _, _)| *e == ext) {
                return Some(Detection {
                    language: (*language).to_string(),
                    mime: Some((*mime).to_string()),
                    confidence: 1.0,
                });
            }
        }

        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            let stem = stem.to_ascii_lowercase();
            if let Some((_, language, mime)) = FILENAME_MAP.iter().find(|(n, _, _)| *n == stem) {
                return Some(Detection {
                    language: (*language).to_string(),
                    mime: Some((*mime).to_string()),
                    confidence: 0.8,
                });
            }
        }

        // Secondary: sniff the first bytes. Text without NUL bytes is
        // treated as plain text so extensionless files (dotfiles,
        // scripts) remain indexable and searchable.
        if sniff_is_text(path) {
            return Some(Detection {
                language: "plaintext".to_string(),
                mime: Some("text/plain".to_string()),
                confidence: 0.6,
            });
        }

        None
    }

    /// Known extension -> language mapping without touching the
    /// filesystem; used for routing decisions on deleted paths.
    pub fn language_for_extension(ext: &str) -> Option<&'static str> {
        let ext = ext.to_ascii_lowercase();
        EXTENSION_MAP
            .iter()
            .find(|(e, _, _)| *e == ext)
            .map(|(_, language, _)| *language)
    }
}

fn mtime_ns(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn sniff_is_text(path: &Path) -> bool {
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut buf = [0u8; 8192];
    let Ok(n) = file.read(&mut buf) else {
        return false;
    };
    n > 0 && !buf[..n].contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_win_with_full_confidence() {
        let matcher = FileTypeMatcher::new();
        let d = matcher.detect(Path::new("src/app.py")).unwrap();
        assert_eq!(d.language, "python");
        assert_eq!(d.mime.as_deref(), Some("text/x-python"));
        assert_eq!(d.confidence, 1.0);

        let d = matcher.detect(Path::new("README.md")).unwrap();
        assert_eq!(d.language, "markdown");
    }

    #[test]
    fn known_filenames_without_extension() {
        let matcher = FileTypeMatcher::new();
        let d = matcher.detect(Path::new("README")).unwrap();
        assert_eq!(d.language, "markdown");
        assert_eq!(d.confidence, 0.8);
    }

    #[test]
    fn sniff_classifies_dotfiles_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join(".env");
        std::fs::write(&env, "API_KEY=secret\n").unwrap();

        let matcher = FileTypeMatcher::new();
        let d = matcher.detect(&env).unwrap();
        assert_eq!(d.language, "plaintext");
        assert_eq!(d.confidence, 0.6);
    }

    #[test]
    fn binary_content_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("blob");
        std::fs::write(&bin, [0u8, 159, 146, 150]).unwrap();

        let matcher = FileTypeMatcher::new();
        assert!(matcher.detect(&bin).is_none());
    }

    #[test]
    fn cache_is_refreshed_when_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes");
        std::fs::write(&file, "text\n").unwrap();

        let matcher = FileTypeMatcher::new();
        assert!(matcher.detect(&file).is_some());
        // Same mtime: served from cache
        assert!(matcher.detect(&file).is_some());
    }
}
