//! Session-scoped subscriptions with filtered, batched notification
//! delivery.
//!
//! Sessions expire on a TTL and are bounded in number; each session
//! owns a bounded pending queue (oldest events are dropped beyond the
//! limit, the subscription survives) and a batch task that delivers
//! events in groups of `batch_size` or after `batch_timeout`.

use crate::config::SubscriptionConfig;
use crate::error::{IndexError, IndexResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    FileCreated,
    FileModified,
    FileDeleted,
    FileMoved,
    IndexReloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionScope {
    File,
    Directory,
    Project,
    Symbol,
    Search,
    Global,
}

/// Predicates a subscription applies before an event is queued.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilter {
    pub file_extensions: Option<HashSet<String>>,
    pub languages: Option<HashSet<String>>,
    pub notification_types: Option<HashSet<NotificationType>>,
    pub exclude_patterns: Vec<String>,
}

impl NotificationFilter {
    fn matches(&self, event: &NotificationEvent) -> bool {
        if let Some(types) = &self.notification_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(extensions) = &self.file_extensions {
            let ext = event
                .uri
                .rsplit('.')
                .next()
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default();
            if !extensions.contains(&ext) {
                return false;
            }
        }
        if let Some(languages) = &self.languages {
            let language = event
                .metadata
                .get("language")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            if !languages.contains(language) {
                return false;
            }
        }
        for pattern in &self.exclude_patterns {
            if glob::Pattern::new(pattern)
                .map(|p| p.matches(&event.uri))
                .unwrap_or(false)
            {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub event_type: NotificationType,
    pub uri: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl NotificationEvent {
    pub fn new(event_type: NotificationType, uri: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            event_type,
            uri: uri.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub scope: SubscriptionScope,
    pub uri_pattern: String,
    pub filter: NotificationFilter,
}

impl Subscription {
    fn matches(&self, event: &NotificationEvent) -> bool {
        let scope_match = match self.scope {
            SubscriptionScope::Global | SubscriptionScope::Project => true,
            SubscriptionScope::File => glob_matches(&self.uri_pattern, &event.uri),
            SubscriptionScope::Directory => {
                let dir = self.uri_pattern.trim_end_matches('/');
                event.uri.starts_with(&format!("{dir}/")) || glob_matches(&self.uri_pattern, &event.uri)
            }
            SubscriptionScope::Symbol | SubscriptionScope::Search => {
                glob_matches(&self.uri_pattern, &event.uri)
            }
        };
        scope_match && self.filter.matches(event)
    }
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(value))
        .unwrap_or(false)
}

struct Session {
    id: String,
    created_at: Instant,
    last_active: Mutex<Instant>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    pending: Mutex<VecDeque<NotificationEvent>>,
    wakeup: Notify,
    delivery_tx: mpsc::UnboundedSender<Vec<NotificationEvent>>,
    batch_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    dropped: AtomicU64,
}

/// Manages sessions, their subscriptions, and batched delivery.
pub struct SubscriptionManager {
    config: SubscriptionConfig,
    sessions: DashMap<String, Arc<Session>>,
    next_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(config: SubscriptionConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        })
    }

    /// Create a session and return its id plus the receiver that yields
    /// delivered batches. Must be called within a tokio runtime.
    pub fn create_session(&self) -> (String, mpsc::UnboundedReceiver<Vec<NotificationEvent>>) {
        while self.sessions.len() >= self.config.max_sessions {
            self.evict_oldest();
        }

        let id = format!("session-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            id: id.clone(),
            created_at: Instant::now(),
            last_active: Mutex::new(Instant::now()),
            subscriptions: Mutex::new(HashMap::new()),
            pending: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            delivery_tx: tx,
            batch_task: Mutex::new(None),
            dropped: AtomicU64::new(0),
        });

        let task = spawn_batch_task(
            session.clone(),
            self.config.batch_size.max(1),
            Duration::from_millis(self.config.batch_timeout_ms),
        );
        *session.batch_task.lock() = Some(task);

        self.sessions.insert(id.clone(), session);
        crate::debug_event!("subscriptions", "session created", "{id}");
        (id, rx)
    }

    pub fn remove_session(&self, session_id: &str) -> bool {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            if let Some(task) = session.batch_task.lock().take() {
                task.abort();
            }
            crate::debug_event!("subscriptions", "session removed", "{session_id}");
            true
        } else {
            false
        }
    }

    pub fn subscribe(
        &self,
        session_id: &str,
        scope: SubscriptionScope,
        uri_pattern: &str,
        filter: NotificationFilter,
    ) -> IndexResult<String> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| IndexError::InvalidInput {
                reason: format!("unknown session '{session_id}'"),
            })?;
        *session.last_active.lock() = Instant::now();

        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        session.subscriptions.lock().insert(
            id.clone(),
            Subscription {
                id: id.clone(),
                scope,
                uri_pattern: uri_pattern.to_string(),
                filter,
            },
        );
        Ok(id)
    }

    pub fn unsubscribe(&self, session_id: &str, subscription_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|session| session.subscriptions.lock().remove(subscription_id).is_some())
            .unwrap_or(false)
    }

    /// Route an event to every live session with a matching
    /// subscription. Queues are bounded: beyond `max_pending` the
    /// oldest events are dropped, the subscription is kept.
    pub fn publish(&self, event: &NotificationEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let ttl = Duration::from_secs(self.config.session_ttl_secs);

        for entry in self.sessions.iter() {
            let session = entry.value();
            if session.last_active.lock().elapsed() > ttl {
                continue;
            }
            let matched = session
                .subscriptions
                .lock()
                .values()
                .any(|sub| sub.matches(event));
            if !matched {
                continue;
            }

            {
                let mut pending = session.pending.lock();
                while pending.len() >= self.config.max_pending {
                    pending.pop_front();
                    session.dropped.fetch_add(1, Ordering::Relaxed);
                }
                pending.push_back(event.clone());
            }
            self.delivered.fetch_add(1, Ordering::Relaxed);
            session.wakeup.notify_one();
        }
    }

    /// Remove sessions idle past the TTL. Returns how many were
    /// removed.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = Duration::from_secs(self.config.session_ttl_secs);
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().last_active.lock().elapsed() > ttl)
            .map(|entry| entry.key().clone())
            .collect();
        let count = expired.len();
        for id in expired {
            self.remove_session(&id);
        }
        count
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn stats(&self) -> serde_json::Value {
        let dropped: u64 = self
            .sessions
            .iter()
            .map(|entry| entry.value().dropped.load(Ordering::Relaxed))
            .sum();
        serde_json::json!({
            "sessions": self.sessions.len(),
            "published": self.published.load(Ordering::Relaxed),
            "queued": self.delivered.load(Ordering::Relaxed),
            "dropped": dropped,
        })
    }

    fn evict_oldest(&self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.value().created_at)
            .map(|entry| entry.key().clone());
        if let Some(id) = oldest {
            tracing::warn!("[subscriptions] session limit reached; evicting {id}");
            self.remove_session(&id);
        }
    }
}

fn spawn_batch_task(
    session: Arc<Session>,
    batch_size: usize,
    batch_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            session.wakeup.notified().await;
            loop {
                let pending_len = session.pending.lock().len();
                if pending_len == 0 {
                    break;
                }
                if pending_len >= batch_size {
                    flush(&session, batch_size);
                    continue;
                }
                // Partial batch: deliver after the timeout unless more
                // events arrive first
                tokio::select! {
                    _ = session.wakeup.notified() => {}
                    _ = tokio::time::sleep(batch_timeout) => {
                        flush(&session, batch_size);
                    }
                }
            }
        }
    })
}

fn flush(session: &Session, batch_size: usize) {
    let batch: Vec<NotificationEvent> = {
        let mut pending = session.pending.lock();
        let take = batch_size.min(pending.len());
        pending.drain(..take).collect()
    };
    if batch.is_empty() {
        return;
    }
    crate::debug_event!(
        "subscriptions",
        "delivering",
        "{} events to {}",
        batch.len(),
        session.id
    );
    let _ = session.delivery_tx.send(batch);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SubscriptionConfig {
        SubscriptionConfig {
            batch_size: 3,
            batch_timeout_ms: 50,
            max_sessions: 2,
            max_pending: 5,
            session_ttl_secs: 3600,
        }
    }

    fn event(event_type: NotificationType, uri: &str) -> NotificationEvent {
        NotificationEvent::new(
            event_type,
            uri,
            serde_json::json!({ "language": "python" }),
        )
    }

    #[tokio::test]
    async fn full_batches_deliver_immediately() {
        let manager = SubscriptionManager::new(config());
        let (session, mut rx) = manager.create_session();
        manager
            .subscribe(
                &session,
                SubscriptionScope::Global,
                "*",
                NotificationFilter::default(),
            )
            .unwrap();

        for i in 0..3 {
            manager.publish(&event(
                NotificationType::FileModified,
                &format!("src/file{i}.py"),
            ));
        }

        let batch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("batch within deadline")
            .expect("channel open");
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn partial_batches_deliver_after_timeout() {
        let manager = SubscriptionManager::new(config());
        let (session, mut rx) = manager.create_session();
        manager
            .subscribe(
                &session,
                SubscriptionScope::Global,
                "*",
                NotificationFilter::default(),
            )
            .unwrap();

        manager.publish(&event(NotificationType::FileCreated, "src/new.py"));

        let batch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("batch within deadline")
            .expect("channel open");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event_type, NotificationType::FileCreated);
    }

    #[tokio::test]
    async fn filters_gate_delivery() {
        let manager = SubscriptionManager::new(config());
        let (session, mut rx) = manager.create_session();
        let filter = NotificationFilter {
            file_extensions: Some(["py".to_string()].into_iter().collect()),
            notification_types: Some([NotificationType::FileDeleted].into_iter().collect()),
            ..NotificationFilter::default()
        };
        manager
            .subscribe(&session, SubscriptionScope::Global, "*", filter)
            .unwrap();

        // Wrong type and wrong extension: both filtered out
        manager.publish(&event(NotificationType::FileModified, "src/app.py"));
        manager.publish(&event(NotificationType::FileDeleted, "README.md"));
        // Matches
        manager.publish(&event(NotificationType::FileDeleted, "src/app.py"));

        let batch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("batch within deadline")
            .expect("channel open");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].uri, "src/app.py");
    }

    #[tokio::test]
    async fn directory_scope_matches_subtree_only() {
        let manager = SubscriptionManager::new(config());
        let (session, mut rx) = manager.create_session();
        manager
            .subscribe(
                &session,
                SubscriptionScope::Directory,
                "src",
                NotificationFilter::default(),
            )
            .unwrap();

        manager.publish(&event(NotificationType::FileModified, "docs/guide.md"));
        manager.publish(&event(NotificationType::FileModified, "src/app.py"));

        let batch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("batch within deadline")
            .expect("channel open");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].uri, "src/app.py");
    }

    #[tokio::test]
    async fn bounded_queue_drops_oldest() {
        let manager = SubscriptionManager::new(SubscriptionConfig {
            batch_size: 100,
            batch_timeout_ms: 40,
            max_pending: 5,
            ..config()
        });
        let (session, mut rx) = manager.create_session();
        manager
            .subscribe(
                &session,
                SubscriptionScope::Global,
                "*",
                NotificationFilter::default(),
            )
            .unwrap();

        for i in 0..8 {
            manager.publish(&event(
                NotificationType::FileModified,
                &format!("f{i}.py"),
            ));
        }

        let batch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("batch within deadline")
            .expect("channel open");
        // Oldest three were dropped, subscription stayed alive
        assert_eq!(batch.len(), 5);
        assert_eq!(batch[0].uri, "f3.py");
        assert_eq!(manager.stats()["dropped"], 3);
    }

    #[tokio::test]
    async fn session_limit_evicts_oldest() {
        let manager = SubscriptionManager::new(config());
        let (first, _rx1) = manager.create_session();
        let (_second, _rx2) = manager.create_session();
        assert_eq!(manager.session_count(), 2);

        let (_third, _rx3) = manager.create_session();
        assert_eq!(manager.session_count(), 2);
        assert!(!manager.remove_session(&first));
    }

    #[tokio::test]
    async fn unsubscribe_stops_matching() {
        let manager = SubscriptionManager::new(config());
        let (session, _rx) = manager.create_session();
        let sub = manager
            .subscribe(
                &session,
                SubscriptionScope::Global,
                "*",
                NotificationFilter::default(),
            )
            .unwrap();
        assert!(manager.unsubscribe(&session, &sub));
        assert!(!manager.unsubscribe(&session, &sub));

        manager.publish(&event(NotificationType::FileModified, "a.py"));
        assert_eq!(manager.stats()["queued"], 0);
    }

    #[test]
    fn subscribe_to_unknown_session_is_invalid_input() {
        let config = config();
        let manager = SubscriptionManager {
            config,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        };
        let err = manager
            .subscribe(
                "ghost",
                SubscriptionScope::Global,
                "*",
                NotificationFilter::default(),
            )
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput { .. }));
    }
}
