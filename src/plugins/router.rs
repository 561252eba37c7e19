//! Plugin routing: choose handlers for a path, capability, or language.
//!
//! Confidence comes from how the path matched (exact extension 1.0,
//! MIME only 0.6, language hint only 0.4); ties are broken by priority,
//! then recent average latency, then usage count for load balancing.
//! Statistics are accumulated under a mutex sized to the sample window;
//! registration data is read lock-free.

use crate::plugins::filetype::{Detection, FileTypeMatcher};
use crate::plugins::registry::PluginSpec;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

const EXACT_EXTENSION: f32 = 1.0;
const MIME_ONLY: f32 = 0.6;
const LANGUAGE_HINT: f32 = 0.4;

/// One routing candidate, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteCandidate {
    pub language: String,
    pub confidence: f32,
}

#[derive(Debug, Default)]
struct PluginStats {
    samples_ms: VecDeque<f64>,
    usage_count: u64,
    error_count: u64,
}

#[derive(Debug, Clone)]
struct RouteEntry {
    language: String,
    extensions: Vec<String>,
    mime_types: Vec<String>,
    priority: u8,
    capabilities: Vec<String>,
}

/// Routes paths, capabilities, and languages to plugin candidates and
/// tracks per-plugin execution statistics.
pub struct PluginRouter {
    entries: Vec<RouteEntry>,
    matcher: FileTypeMatcher,
    stats: Mutex<HashMap<String, PluginStats>>,
    sample_window: usize,
}

impl PluginRouter {
    pub fn new(specs: &[PluginSpec], sample_window: usize) -> Self {
        let entries = specs
            .iter()
            .map(|spec| RouteEntry {
                language: spec.language.to_string(),
                extensions: spec.extensions.iter().map(|e| e.to_string()).collect(),
                mime_types: spec.mime_types.iter().map(|m| m.to_string()).collect(),
                priority: spec.priority,
                capabilities: spec.capabilities.iter().map(|c| c.to_string()).collect(),
            })
            .collect();
        Self {
            entries,
            matcher: FileTypeMatcher::new(),
            stats: Mutex::new(HashMap::new()),
            sample_window,
        }
    }

    /// Detect the file type of a path (cached by mtime).
    pub fn detect(&self, path: &Path) -> Option<Detection> {
        self.matcher.detect(path)
    }

    /// Ordered plugin candidates for a path.
    pub fn route_file(&self, path: &Path) -> Vec<RouteCandidate> {
        let detection = self.matcher.detect(path);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let mut candidates: Vec<(RouteCandidate, u8)> = Vec::new();
        for entry in &self.entries {
            let confidence = if extension
                .as_deref()
                .map(|ext| entry.extensions.iter().any(|e| e == ext))
                .unwrap_or(false)
            {
                EXACT_EXTENSION
            } else if detection
                .as_ref()
                .and_then(|d| d.mime.as_ref())
                .map(|mime| entry.mime_types.iter().any(|m| m == mime))
                .unwrap_or(false)
            {
                MIME_ONLY
            } else if detection
                .as_ref()
                .map(|d| d.language == entry.language)
                .unwrap_or(false)
            {
                LANGUAGE_HINT
            } else {
                continue;
            };
            candidates.push((
                RouteCandidate {
                    language: entry.language.clone(),
                    confidence,
                },
                entry.priority,
            ));
        }

        let stats = self.stats.lock();
        candidates.sort_by(|(a, a_priority), (b, b_priority)| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b_priority.cmp(a_priority))
                .then_with(|| {
                    let a_latency = avg_of(stats.get(&a.language));
                    let b_latency = avg_of(stats.get(&b.language));
                    a_latency
                        .partial_cmp(&b_latency)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    let a_usage = stats.get(&a.language).map(|s| s.usage_count).unwrap_or(0);
                    let b_usage = stats.get(&b.language).map(|s| s.usage_count).unwrap_or(0);
                    a_usage.cmp(&b_usage)
                })
        });

        candidates.into_iter().map(|(c, _)| c).collect()
    }

    /// Languages advertising a capability, highest priority first.
    pub fn route_by_capability(&self, capability: &str) -> Vec<String> {
        let mut matching: Vec<(&RouteEntry, u8)> = self
            .entries
            .iter()
            .filter(|e| e.capabilities.iter().any(|c| c == capability))
            .map(|e| (e, e.priority))
            .collect();
        matching.sort_by(|a, b| b.1.cmp(&a.1));
        matching
            .into_iter()
            .map(|(e, _)| e.language.clone())
            .collect()
    }

    pub fn route_by_language(&self, language: &str) -> Option<RouteCandidate> {
        let language = language.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|e| e.language == language)
            .map(|e| RouteCandidate {
                language: e.language.clone(),
                confidence: 1.0,
            })
    }

    /// Record a plugin execution time into the rolling sample window.
    pub fn record_execution(&self, language: &str, elapsed: Duration) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(language.to_string()).or_default();
        entry.samples_ms.push_back(elapsed.as_secs_f64() * 1_000.0);
        while entry.samples_ms.len() > self.sample_window {
            entry.samples_ms.pop_front();
        }
        entry.usage_count += 1;
    }

    pub fn record_error(&self, language: &str) {
        let mut stats = self.stats.lock();
        stats.entry(language.to_string()).or_default().error_count += 1;
    }

    pub fn avg_latency_ms(&self, language: &str) -> Option<f64> {
        let stats = self.stats.lock();
        let entry = stats.get(language)?;
        if entry.samples_ms.is_empty() {
            return None;
        }
        Some(entry.samples_ms.iter().sum::<f64>() / entry.samples_ms.len() as f64)
    }

    /// Snapshot for the status surface.
    pub fn stats_snapshot(&self) -> serde_json::Value {
        let stats = self.stats.lock();
        let mut out = serde_json::Map::new();
        for (language, entry) in stats.iter() {
            let avg = if entry.samples_ms.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::json!(
                    entry.samples_ms.iter().sum::<f64>() / entry.samples_ms.len() as f64
                )
            };
            out.insert(
                language.clone(),
                serde_json::json!({
                    "usage_count": entry.usage_count,
                    "error_count": entry.error_count,
                    "avg_latency_ms": avg,
                }),
            );
        }
        serde_json::Value::Object(out)
    }
}

fn avg_of(stats: Option<&PluginStats>) -> f64 {
    match stats {
        Some(s) if !s.samples_ms.is_empty() => {
            s.samples_ms.iter().sum::<f64>() / s.samples_ms.len() as f64
        }
        // Unmeasured plugins sort ahead of slow ones, behind fast ones
        _ => 0.0,
    }
}
