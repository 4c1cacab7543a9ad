use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{FlowError, Result};
use crate::session::{FormDraft, Session};

/// Ephemeral keyed byte cache backing sessions and drafts.
///
/// The engine only relies on get / set-with-ttl / delete, so any Redis-like
/// store can slot in.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-memory implementation of [`Cache`] with lazy per-entry expiry.
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        } else {
            return Ok(None);
        }
        // Expired: drop the entry.
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// TTLs for the two cache-backed records. The constructor rejects a draft
/// TTL shorter than the session TTL: drafts must outlive sessions so a user
/// can resume after the live session expires.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub session_ttl: Duration,
    pub draft_ttl: Duration,
}

impl StoreConfig {
    pub fn new(session_ttl: Duration, draft_ttl: Duration) -> Result<Self> {
        if draft_ttl < session_ttl {
            return Err(FlowError::Config(format!(
                "draft TTL ({draft_ttl:?}) must be at least the session TTL ({session_ttl:?})"
            )));
        }
        Ok(Self {
            session_ttl,
            draft_ttl,
        })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(30 * 60),
            draft_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn draft_key(session_id: &str, flow_id: &str) -> String {
    format!("draft:{session_id}:{flow_id}")
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| FlowError::Storage(format!("encode failed: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| FlowError::Storage(format!("decode failed: {e}")))
}

/// Typed adapter over the cache for [`Session`] records.
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn save(&self, session: &Session) -> Result<()> {
        self.cache
            .set(&session_key(&session.session_id), encode(session)?, self.ttl)
            .await
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        match self.cache.get(&session_key(session_id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.cache.delete(&session_key(session_id)).await
    }
}

/// Typed adapter over the cache for [`FormDraft`] snapshots.
#[derive(Clone)]
pub struct DraftStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl DraftStore {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn save(&self, draft: &FormDraft) -> Result<()> {
        self.cache
            .set(
                &draft_key(&draft.session_id, &draft.flow_id),
                encode(draft)?,
                self.ttl,
            )
            .await
    }

    pub async fn get(&self, session_id: &str, flow_id: &str) -> Result<Option<FormDraft>> {
        match self.cache.get(&draft_key(session_id, flow_id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, session_id: &str, flow_id: &str) -> Result<()> {
        self.cache.delete(&draft_key(session_id, flow_id)).await
    }
}
