//! Semantic search backend handle.
//!
//! The vector store runs out of process; the core only holds its
//! location and collection name. When credentials or the endpoint are
//! absent the backend is simply unavailable and `semantic=true` is
//! treated as `false` with no other change in behavior.

use crate::config::SemanticConfig;

#[derive(Debug, Clone)]
pub struct SemanticBackend {
    config: SemanticConfig,
}

impl SemanticBackend {
    pub fn new(config: SemanticConfig) -> Self {
        Self { config }
    }

    /// The backend is usable only when enabled, an endpoint is
    /// configured, and the credential environment variable is set.
    pub fn is_available(&self) -> bool {
        self.config.enabled
            && self.config.endpoint.is_some()
            && std::env::var(&self.config.api_key_env)
                .map(|v| !v.is_empty())
                .unwrap_or(false)
    }

    /// Gate a requested semantic flag on availability.
    pub fn effective(&self, requested: bool) -> bool {
        requested && self.is_available()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.config.endpoint.as_deref()
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }
}
