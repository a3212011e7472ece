//! Per-application session registry
//!
//! Sessions are bucketed by [`AppId`]. The outer map only hands out bucket
//! handles; each bucket has its own `RwLock`, so flushes for different
//! applications never contend and publish fan-out (readers) shares a bucket
//! with concurrent agent flushes (writers).
//!
//! Expiry is lazy: reads skip sessions whose deadline has passed. A periodic
//! sweep ([`SessionRegistry::sweep_expired`]) removes them using the same
//! `now >= expires_at` predicate. Buckets left empty by a sweep are dropped.
//!
//! The session gauge is fed from a registry-wide counter of stored entries,
//! so no operation on one application reads another application's bucket.

use crate::error::FeedError;
use crate::session::{Session, SessionPersister, SessionState};
use crate::telemetry;
use dashmap::DashMap;
use feed_types::{AgentIdentity, AppId, Notification, SessionKey};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug)]
struct SessionEntry {
    session: Session,
    expires_at: Instant,
    last_persisted: Option<Instant>,
}

impl SessionEntry {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Sessions of one application, ordered by key
type AppBucket = BTreeMap<SessionKey, SessionEntry>;

/// Registry of live sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    buckets: DashMap<AppId, Arc<RwLock<AppBucket>>>,
    persister: Option<Arc<dyn SessionPersister>>,
    persist_interval: Duration,
    stored: AtomicUsize,
}

impl SessionRegistry {
    /// Create registry without durable persistence
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create registry persisting each session at most once per `interval`
    #[must_use]
    pub fn with_persister(persister: Arc<dyn SessionPersister>, interval: Duration) -> Self {
        Self {
            persister: Some(persister),
            persist_interval: interval,
            ..Self::default()
        }
    }

    fn bucket(&self, app_id: AppId) -> Arc<RwLock<AppBucket>> {
        self.buckets.entry(app_id).or_default().clone()
    }

    fn existing_bucket(&self, app_id: AppId) -> Option<Arc<RwLock<AppBucket>>> {
        self.buckets.get(&app_id).map(|b| b.clone())
    }

    fn all_buckets(&self) -> Vec<Arc<RwLock<AppBucket>>> {
        self.buckets.iter().map(|b| b.value().clone()).collect()
    }

    fn app_ids(&self) -> Vec<AppId> {
        self.buckets.iter().map(|b| *b.key()).collect()
    }

    /// Drop the bucket of `app_id` if it is empty and nobody holds a handle
    ///
    /// Handles are only cloned under the map's shard lock, which `remove_if`
    /// holds, so a strong count of one means no flush can be writing to it.
    fn drop_bucket_if_empty(&self, app_id: AppId) -> bool {
        self.buckets
            .remove_if(&app_id, |_, bucket| {
                Arc::strong_count(bucket) == 1 && bucket.read().is_empty()
            })
            .is_some()
    }

    // Callers hold the write lock of the bucket they changed, so an entry's
    // decrement never runs ahead of its increment.
    fn stored_add(&self, n: usize) {
        let stored = self.stored.fetch_add(n, Ordering::Relaxed) + n;
        telemetry::record_sessions(stored);
    }

    fn stored_sub(&self, n: usize) {
        let stored = self.stored.fetch_sub(n, Ordering::Relaxed) - n;
        telemetry::record_sessions(stored);
    }

    /// Upsert the session for `identity` and reset its TTL
    ///
    /// A flush on an existing key with a different channel supersedes the
    /// previous session, which is closed. Never waits on delivery.
    ///
    /// # Errors
    /// [`FeedError::Validation`] for incomplete identities and
    /// [`FeedError::InvalidArgument`] for a zero TTL; nothing is mutated.
    pub fn flush(
        &self,
        identity: AgentIdentity,
        sender: mpsc::Sender<Notification>,
        ttl: Duration,
    ) -> Result<Session, FeedError> {
        identity.validate()?;
        if ttl.is_zero() {
            return Err(FeedError::InvalidArgument("ttl must be greater than 0".into()));
        }

        let now = Instant::now();
        let key = identity.session_key();
        let bucket = self.bucket(identity.app_id);

        let (session, persist) = {
            let mut sessions = bucket.write();
            if !sessions.contains_key(&key) {
                self.stored_add(1);
            }
            let entry = sessions.entry(key).or_insert_with(|| SessionEntry {
                session: Session::new(identity.clone(), sender.clone()),
                expires_at: now,
                last_persisted: None,
            });

            let reusable = entry.session.is_open()
                && entry.session.same_channel(&sender)
                && entry.session.identity() == &identity;
            if !reusable {
                let replacement = Session::new(identity.clone(), sender);
                let previous = std::mem::replace(&mut entry.session, replacement);
                previous.set_state(SessionState::Closed);
            }
            entry.expires_at = now + ttl;

            let persist = self.persister.is_some()
                && entry
                    .last_persisted
                    .map_or(true, |at| now.duration_since(at) >= self.persist_interval);
            if persist {
                entry.last_persisted = Some(now);
            }
            (entry.session.clone(), persist)
        };
        drop(bucket);

        if persist {
            self.spawn_persist(identity);
        }
        tracing::debug!(app_id = %session.identity().app_id, session = %session.key(), "session flushed");
        Ok(session)
    }

    fn spawn_persist(&self, identity: AgentIdentity) {
        let Some(persister) = self.persister.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(app_id = %identity.app_id, "no runtime, session not persisted");
            return;
        };
        runtime.spawn(async move {
            if let Err(err) = persister.persist(&identity).await {
                tracing::warn!(
                    app_id = %identity.app_id,
                    session = %identity.session_key(),
                    error = %err,
                    "session persist failed"
                );
            }
        });
    }

    /// Snapshot of the live sessions of an application, ordered by key
    ///
    /// Unknown applications yield an empty list.
    #[must_use]
    pub fn get(&self, app_id: AppId) -> Vec<Session> {
        let Some(bucket) = self.existing_bucket(app_id) else {
            return Vec::new();
        };
        let now = Instant::now();
        let sessions = bucket.read();
        sessions
            .values()
            .filter(|entry| !entry.is_expired(now) && entry.session.is_open())
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Remove the session for `identity`; returns whether one existed
    pub fn delete(&self, identity: &AgentIdentity) -> bool {
        let Some(bucket) = self.existing_bucket(identity.app_id) else {
            return false;
        };
        let key = identity.session_key();
        let removed = {
            let mut sessions = bucket.write();
            if let Some(entry) = sessions.get(&key) {
                entry.session.set_state(SessionState::Closing);
            }
            let removed = sessions.remove(&key);
            if removed.is_some() {
                self.stored_sub(1);
            }
            removed
        };
        match removed {
            Some(entry) => {
                entry.session.set_state(SessionState::Closed);
                tracing::debug!(app_id = %identity.app_id, session = %key, "session deleted");
                true
            }
            None => false,
        }
    }

    /// Live sessions across all applications
    ///
    /// Reads every bucket; meant for on-demand queries, not hot paths.
    #[must_use]
    pub fn count(&self) -> usize {
        let now = Instant::now();
        self.all_buckets()
            .iter()
            .map(|bucket| {
                bucket
                    .read()
                    .values()
                    .filter(|entry| !entry.is_expired(now) && entry.session.is_open())
                    .count()
            })
            .sum()
    }

    /// Sessions held by the registry, including expired ones not yet swept
    #[inline]
    #[must_use]
    pub fn stored(&self) -> usize {
        self.stored.load(Ordering::Relaxed)
    }

    /// Applications that currently have a bucket
    #[inline]
    #[must_use]
    pub fn app_count(&self) -> usize {
        self.buckets.len()
    }

    /// Remove expired and closed sessions; returns how many were removed
    ///
    /// Buckets left empty are dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut dropped = 0;
        for app_id in self.app_ids() {
            let Some(bucket) = self.existing_bucket(app_id) else {
                continue;
            };
            let empty = {
                let mut sessions = bucket.write();
                let before = sessions.len();
                sessions.retain(|_, entry| {
                    let keep =
                        !entry.is_expired(now) && entry.session.state() != SessionState::Closed;
                    if !keep {
                        entry.session.set_state(SessionState::Closed);
                    }
                    keep
                });
                let swept = before - sessions.len();
                if swept > 0 {
                    self.stored_sub(swept);
                    removed += swept;
                }
                sessions.is_empty()
            };
            drop(bucket);
            if empty && self.drop_bucket_if_empty(app_id) {
                dropped += 1;
            }
        }
        if removed > 0 || dropped > 0 {
            tracing::debug!(removed, dropped, "expired sessions swept");
        }
        removed
    }

    /// Run [`SessionRegistry::sweep_expired`] every `interval`
    ///
    /// Intervals shorter than a millisecond are raised to one.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_expired();
            }
        })
    }
}
