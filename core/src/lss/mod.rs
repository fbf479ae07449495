//! Session store: per-thread message history plus live coherence, awareness,
//! obstacle and drift signals, and the terma scheduler.
//!
//! Each `store` is an atomic read-modify-write of one thread's record: calls
//! for the same thread are serialized through a per-thread lock and scored in
//! call order, calls for different threads proceed independently.

pub mod awareness;
pub mod coherence;
pub mod drift;
pub mod obstacles;
pub mod storage;
pub mod terma;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::config::StoreConfig;
use crate::envelope::{Envelope, Payload};
use crate::error::{LriError, LriResult};

pub use awareness::AwarenessMetrics;
pub use coherence::CoherenceResult;
pub use drift::{DriftEvent, DriftKind, DriftSeverity};
pub use obstacles::ObstacleMetrics;
pub use storage::{InMemorySessionStorage, SessionRecord, SessionStorage, StoredMessage};
pub use terma::{RevealConditions, SessionContext, Terma, TermaType};

/// Snapshot of a session: record plus message history, oldest first.
#[derive(Debug, Clone)]
pub struct Session {
    pub thread_id: String,
    pub messages: Vec<Arc<StoredMessage>>,
    pub coherence: CoherenceResult,
    pub awareness: AwarenessMetrics,
    pub obstacles: ObstacleMetrics,
    pub termas: Vec<Terma>,
    pub drift_events: Vec<DriftEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    fn from_parts(record: SessionRecord, messages: Vec<Arc<StoredMessage>>) -> Self {
        Self {
            thread_id: record.thread_id,
            messages,
            coherence: record.coherence,
            awareness: record.awareness,
            obstacles: record.obstacles,
            termas: record.termas,
            drift_events: record.drift_events,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SessionMetrics {
    pub coherence: CoherenceResult,
    pub previous_coherence: Option<CoherenceResult>,
    pub awareness: AwarenessMetrics,
    pub obstacles: ObstacleMetrics,
    pub drift_events: Vec<DriftEvent>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct StoreStats {
    pub session_count: usize,
    pub total_messages: usize,
    pub average_coherence: f64,
    pub average_awareness: f64,
    pub average_obstacles: f64,
}

/// Result of one `store` call.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StoreOutcome {
    pub thread_id: String,
    pub message_count: usize,
    pub coherence: CoherenceResult,
    pub awareness: AwarenessMetrics,
    pub obstacles: ObstacleMetrics,
    pub drift: Option<DriftEvent>,
    /// Termas released by this message, highest priority first.
    pub revealed: Vec<Terma>,
}

/// Notifications published to subscribers, in order per thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageStored {
        thread_id: String,
        message_count: usize,
        coherence: f64,
    },
    Drift(DriftEvent),
    TermaRevealed {
        thread_id: String,
        terma: Terma,
    },
    SessionExpired {
        thread_id: String,
    },
    SessionDeleted {
        thread_id: String,
    },
}

impl SessionEvent {
    pub fn thread_id(&self) -> &str {
        match self {
            SessionEvent::MessageStored { thread_id, .. }
            | SessionEvent::TermaRevealed { thread_id, .. }
            | SessionEvent::SessionExpired { thread_id }
            | SessionEvent::SessionDeleted { thread_id } => thread_id,
            SessionEvent::Drift(event) => &event.thread_id,
        }
    }
}

pub struct SessionStore {
    config: StoreConfig,
    storage: Arc<dyn SessionStorage>,
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl SessionStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_storage(config, Arc::new(InMemorySessionStorage::new()))
    }

    pub fn with_storage(config: StoreConfig, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            config,
            storage,
            thread_locks: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Messages the engines need to see on every recomputation.
    fn scoring_window(&self) -> usize {
        self.config
            .coherence_window
            .max(self.config.awareness.engagement_window)
            .max(self.config.awareness.distraction_window)
            .max(self.config.obstacles.window)
            .max(self.config.drift.topic_shift_window)
            .max(2)
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.thread_locks.lock().await;
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop lock entries nobody else holds or waits on. An entry still
    /// cloned elsewhere stays, so every caller keeps sharing one mutex.
    async fn prune_locks(&self, thread_ids: &[String]) {
        let mut locks = self.thread_locks.lock().await;
        for thread_id in thread_ids {
            if locks
                .get(thread_id)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                locks.remove(thread_id);
            }
        }
    }

    async fn publish(&self, events: Vec<SessionEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }

    /// Receive every event published after this call.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    pub async fn store(
        &self,
        thread_id: &str,
        envelope: Envelope,
        payload: Option<Payload>,
    ) -> LriResult<StoreOutcome> {
        self.store_at(thread_id, envelope, payload, Utc::now()).await
    }

    /// Store with an explicit receive time.
    pub async fn store_at(
        &self,
        thread_id: &str,
        envelope: Envelope,
        payload: Option<Payload>,
        received_at: DateTime<Utc>,
    ) -> LriResult<StoreOutcome> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;

        let mut record = match self.storage.get_record(thread_id).await? {
            Some(record) => record,
            None => {
                tracing::debug!(thread_id = %thread_id, "creating session");
                SessionRecord::new(thread_id, received_at)
            }
        };

        let message = Arc::new(StoredMessage::new(envelope, payload, received_at));
        record.message_count = self
            .storage
            .append(thread_id, message, self.config.max_messages)
            .await?;
        record.updated_at = received_at;

        let messages = self.storage.tail(thread_id, self.scoring_window()).await?;
        let mut drift = None;
        if record.message_count >= 2 {
            let coherence = coherence::calculate(&messages, self.config.coherence_window);
            drift = drift::detect(
                thread_id,
                record.coherence.overall,
                coherence.overall,
                &messages,
                &self.config.drift,
                received_at,
            );
            record.previous_coherence = Some(record.coherence);
            record.coherence = coherence;
            record.awareness =
                awareness::calculate(&messages, &coherence, received_at, &self.config.awareness);
            record.obstacles = obstacles::calculate(&messages, &self.config.obstacles);
        }

        if let Some(event) = &drift {
            tracing::info!(
                thread_id = %thread_id,
                kind = ?event.kind,
                severity = ?event.severity,
                "drift detected"
            );
            record.drift_events.push(event.clone());
            let excess = record
                .drift_events
                .len()
                .saturating_sub(self.config.drift.history_limit);
            record.drift_events.drain(..excess);
        }

        let revealed = if self.config.auto_reveal {
            let context = current_context(&record, &messages);
            terma::reveal_ready(&mut record.termas, &context, received_at)
        } else {
            Vec::new()
        };

        let outcome = StoreOutcome {
            thread_id: thread_id.to_string(),
            message_count: record.message_count,
            coherence: record.coherence,
            awareness: record.awareness,
            obstacles: record.obstacles,
            drift: drift.clone(),
            revealed: revealed.clone(),
        };
        self.storage.put_record(record).await?;

        let mut events = vec![SessionEvent::MessageStored {
            thread_id: thread_id.to_string(),
            message_count: outcome.message_count,
            coherence: outcome.coherence.overall,
        }];
        events.extend(drift.map(SessionEvent::Drift));
        events.extend(revealed.into_iter().map(|terma| SessionEvent::TermaRevealed {
            thread_id: thread_id.to_string(),
            terma,
        }));
        self.publish(events).await;

        tracing::debug!(
            thread_id = %thread_id,
            message_count = outcome.message_count,
            coherence = outcome.coherence.overall,
            "message stored"
        );
        Ok(outcome)
    }

    pub async fn get_session(&self, thread_id: &str) -> LriResult<Option<Session>> {
        let Some(record) = self.storage.get_record(thread_id).await? else {
            return Ok(None);
        };
        let messages = self.storage.messages(thread_id).await?;
        Ok(Some(Session::from_parts(record, messages)))
    }

    pub async fn get_all_sessions(&self) -> LriResult<Vec<Session>> {
        let mut records = self.storage.records().await?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut sessions = Vec::with_capacity(records.len());
        for record in records {
            let messages = self.storage.messages(&record.thread_id).await?;
            sessions.push(Session::from_parts(record, messages));
        }
        Ok(sessions)
    }

    pub async fn delete_session(&self, thread_id: &str) -> LriResult<bool> {
        let existed = {
            let lock = self.thread_lock(thread_id).await;
            let _guard = lock.lock().await;
            self.storage.remove(thread_id).await?
        };
        self.prune_locks(&[thread_id.to_string()]).await;
        if existed {
            self.publish(vec![SessionEvent::SessionDeleted {
                thread_id: thread_id.to_string(),
            }])
            .await;
        }
        Ok(existed)
    }

    /// Remove every session. Waits for in-flight stores and blocks new ones
    /// until the storage is empty.
    pub async fn clear(&self) -> LriResult<()> {
        let mut locks = self.thread_locks.lock().await;
        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks.values() {
            guards.push(Arc::clone(lock).lock_owned().await);
        }
        self.storage.clear().await?;
        drop(guards);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(())
    }

    pub async fn get_stats(&self) -> LriResult<StoreStats> {
        let records = self.storage.records().await?;
        let count = records.len();
        let average = |f: fn(&SessionRecord) -> f64| {
            if count == 0 {
                0.0
            } else {
                records.iter().map(f).sum::<f64>() / count as f64
            }
        };
        Ok(StoreStats {
            session_count: count,
            total_messages: records.iter().map(|r| r.message_count).sum(),
            average_coherence: average(|r| r.coherence.overall),
            average_awareness: average(|r| r.awareness.overall),
            average_obstacles: average(|r| r.obstacles.overall),
        })
    }

    pub async fn get_metrics(&self, thread_id: &str) -> LriResult<Option<SessionMetrics>> {
        Ok(self
            .storage
            .get_record(thread_id)
            .await?
            .map(|record| SessionMetrics {
                coherence: record.coherence,
                previous_coherence: record.previous_coherence,
                awareness: record.awareness,
                obstacles: record.obstacles,
                drift_events: record.drift_events,
                updated_at: record.updated_at,
            }))
    }

    /// Hide content against the session's current state.
    pub async fn hide(
        &self,
        thread_id: &str,
        content: impl Into<String>,
        kind: TermaType,
        conditions: RevealConditions,
        priority: u8,
    ) -> LriResult<Terma> {
        self.hide_at(thread_id, content, kind, conditions, priority, Utc::now())
            .await
    }

    pub async fn hide_at(
        &self,
        thread_id: &str,
        content: impl Into<String>,
        kind: TermaType,
        conditions: RevealConditions,
        priority: u8,
        now: DateTime<Utc>,
    ) -> LriResult<Terma> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .storage
            .get_record(thread_id)
            .await?
            .ok_or_else(|| LriError::not_found(thread_id))?;
        let messages = self.storage.tail(thread_id, 1).await?;
        let terma = Terma::new(
            kind,
            content,
            current_context(&record, &messages),
            conditions,
            priority,
            now,
        );
        record.termas.push(terma.clone());
        self.storage.put_record(record).await?;

        tracing::debug!(thread_id = %thread_id, terma_id = %terma.id, "terma hidden");
        Ok(terma)
    }

    /// Release every terma whose conditions hold now.
    pub async fn reveal(&self, thread_id: &str) -> LriResult<Vec<Terma>> {
        self.reveal_at(thread_id, Utc::now()).await
    }

    pub async fn reveal_at(&self, thread_id: &str, now: DateTime<Utc>) -> LriResult<Vec<Terma>> {
        let lock = self.thread_lock(thread_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .storage
            .get_record(thread_id)
            .await?
            .ok_or_else(|| LriError::not_found(thread_id))?;
        let messages = self.storage.tail(thread_id, 1).await?;
        let context = current_context(&record, &messages);
        let revealed = terma::reveal_ready(&mut record.termas, &context, now);
        if revealed.is_empty() {
            return Ok(revealed);
        }
        self.storage.put_record(record).await?;

        self.publish(
            revealed
                .iter()
                .cloned()
                .map(|terma| SessionEvent::TermaRevealed {
                    thread_id: thread_id.to_string(),
                    terma,
                })
                .collect(),
        )
        .await;
        Ok(revealed)
    }

    pub async fn termas(&self, thread_id: &str) -> LriResult<Vec<Terma>> {
        self.storage
            .get_record(thread_id)
            .await?
            .map(|record| record.termas)
            .ok_or_else(|| LriError::not_found(thread_id))
    }

    /// Delete sessions idle for longer than the TTL. Returns the removed threads.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> LriResult<Vec<String>> {
        let ttl = self.config.session_ttl;
        let is_expired = |record: &SessionRecord| {
            (now - record.updated_at)
                .to_std()
                .is_ok_and(|idle| idle > ttl)
        };

        let candidates: Vec<String> = self
            .storage
            .records()
            .await?
            .into_iter()
            .filter(|record| is_expired(record))
            .map(|record| record.thread_id)
            .collect();

        let mut removed = Vec::new();
        for thread_id in candidates {
            let lock = self.thread_lock(&thread_id).await;
            let _guard = lock.lock().await;
            // A store may have refreshed the session since the snapshot.
            let still_expired = self
                .storage
                .get_record(&thread_id)
                .await?
                .is_some_and(|record| is_expired(&record));
            if still_expired && self.storage.remove(&thread_id).await? {
                removed.push(thread_id);
            }
        }

        if !removed.is_empty() {
            self.prune_locks(&removed).await;
            tracing::info!(count = removed.len(), "expired sessions swept");
            self.publish(
                removed
                    .iter()
                    .map(|thread_id| SessionEvent::SessionExpired {
                        thread_id: thread_id.clone(),
                    })
                    .collect(),
            )
            .await;
        }
        Ok(removed)
    }

    /// Run `sweep_expired` every `sweep_interval` until the task is aborted.
    /// Failures are logged and retried on the next tick.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(store.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(err) = store.sweep_expired(Utc::now()).await {
                    tracing::warn!(error = %err, "session sweep failed");
                }
            }
        })
    }
}

/// Current topic and intent come from the latest message.
fn current_context(record: &SessionRecord, messages: &[Arc<StoredMessage>]) -> SessionContext {
    let last = messages.last();
    SessionContext {
        topic: last.and_then(|m| m.topic()).map(str::to_string),
        intent: last.map(|m| m.envelope.intent_type().clone()),
        coherence: record.coherence.overall,
        awareness: record.awareness.overall,
        obstacles: record.obstacles.overall,
    }
}
