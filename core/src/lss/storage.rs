//! Persistence seam for the session store.
//!
//! Session records live in one table; message history lives in a separate
//! per-thread append-only log. Backends must make each call atomic; the store
//! serializes calls for one thread on top of that.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::envelope::{Envelope, Payload};
use crate::error::LriResult;

use super::awareness::AwarenessMetrics;
use super::coherence::CoherenceResult;
use super::drift::DriftEvent;
use super::obstacles::ObstacleMetrics;
use super::terma::Terma;

/// One envelope as received. Never mutated after append.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub envelope: Envelope,
    pub payload: Option<Payload>,
    pub received_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(envelope: Envelope, payload: Option<Payload>, received_at: DateTime<Utc>) -> Self {
        Self {
            envelope,
            payload,
            received_at,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        self.envelope.topic()
    }

    pub fn text(&self) -> Option<String> {
        self.payload.as_ref().and_then(Payload::text)
    }
}

/// Everything about a session except its message log.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub thread_id: String,
    pub message_count: usize,
    pub coherence: CoherenceResult,
    pub previous_coherence: Option<CoherenceResult>,
    pub awareness: AwarenessMetrics,
    pub obstacles: ObstacleMetrics,
    pub termas: Vec<Terma>,
    pub drift_events: Vec<DriftEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(thread_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            thread_id: thread_id.into(),
            message_count: 0,
            coherence: CoherenceResult::NEUTRAL,
            previous_coherence: None,
            awareness: AwarenessMetrics::NEUTRAL,
            obstacles: ObstacleMetrics::NONE,
            termas: Vec::new(),
            drift_events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn get_record(&self, thread_id: &str) -> LriResult<Option<SessionRecord>>;

    async fn put_record(&self, record: SessionRecord) -> LriResult<()>;

    /// Append to the thread's log, dropping the oldest entries beyond
    /// `max_messages`. Returns the resulting log length.
    async fn append(
        &self,
        thread_id: &str,
        message: Arc<StoredMessage>,
        max_messages: usize,
    ) -> LriResult<usize>;

    /// Up to the last `n` messages, oldest first.
    async fn tail(&self, thread_id: &str, n: usize) -> LriResult<Vec<Arc<StoredMessage>>>;

    async fn messages(&self, thread_id: &str) -> LriResult<Vec<Arc<StoredMessage>>>;

    /// Remove record and log. Returns whether a record existed.
    async fn remove(&self, thread_id: &str) -> LriResult<bool>;

    async fn records(&self) -> LriResult<Vec<SessionRecord>>;

    async fn clear(&self) -> LriResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    records: RwLock<HashMap<String, SessionRecord>>,
    log: RwLock<HashMap<String, VecDeque<Arc<StoredMessage>>>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn get_record(&self, thread_id: &str) -> LriResult<Option<SessionRecord>> {
        Ok(self.records.read().await.get(thread_id).cloned())
    }

    async fn put_record(&self, record: SessionRecord) -> LriResult<()> {
        self.records
            .write()
            .await
            .insert(record.thread_id.clone(), record);
        Ok(())
    }

    async fn append(
        &self,
        thread_id: &str,
        message: Arc<StoredMessage>,
        max_messages: usize,
    ) -> LriResult<usize> {
        let mut log = self.log.write().await;
        let entries = log.entry(thread_id.to_string()).or_default();
        entries.push_back(message);
        while entries.len() > max_messages.max(1) {
            entries.pop_front();
        }
        Ok(entries.len())
    }

    async fn tail(&self, thread_id: &str, n: usize) -> LriResult<Vec<Arc<StoredMessage>>> {
        let log = self.log.read().await;
        Ok(log
            .get(thread_id)
            .map(|entries| {
                let skip = entries.len().saturating_sub(n);
                entries.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn messages(&self, thread_id: &str) -> LriResult<Vec<Arc<StoredMessage>>> {
        let log = self.log.read().await;
        Ok(log
            .get(thread_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove(&self, thread_id: &str) -> LriResult<bool> {
        let existed = self.records.write().await.remove(thread_id).is_some();
        self.log.write().await.remove(thread_id);
        Ok(existed)
    }

    async fn records(&self) -> LriResult<Vec<SessionRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn clear(&self) -> LriResult<()> {
        self.records.write().await.clear();
        self.log.write().await.clear();
        Ok(())
    }
}
