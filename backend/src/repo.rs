use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::{AsyncCommands, Client, Script};
use shared::{Document, Fields, UserId};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::docs::{apply_patch, newest_first};

/// Attempts a patch makes before giving up on a document that keeps
/// changing underneath it.
const MAX_PATCH_ATTEMPTS: usize = 8;

/// Compare-and-set on the stored JSON.
/// KEYS[1] = document key, ARGV[1] = JSON the patch was computed from,
/// ARGV[2] = patched JSON.
/// Returns 1 when written, 0 when the document changed, -1 when it is gone.
const LUA_SWAP: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
if current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("stored document is not valid JSON: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("document {id} kept changing, patch abandoned")]
    Contention { id: Uuid },
}

/// Per-owner document collections.
#[async_trait]
pub trait DocumentRepo: Send + Sync {
    /// Every document of `owner`, newest first.
    async fn list(&self, owner: &UserId) -> Result<Vec<Document>, RepoError>;

    async fn get(&self, owner: &UserId, id: Uuid) -> Result<Option<Document>, RepoError>;

    async fn insert(&self, owner: &UserId, doc: &Document) -> Result<(), RepoError>;

    /// Merges `patch` into the stored document as one atomic step and
    /// returns the result, or `None` if there is no such document.
    async fn patch(
        &self,
        owner: &UserId,
        id: Uuid,
        patch: Fields,
        now: DateTime<Utc>,
    ) -> Result<Option<Document>, RepoError>;

    /// Returns false if there was nothing to remove.
    async fn remove(&self, owner: &UserId, id: Uuid) -> Result<bool, RepoError>;
}

/// Documents as JSON strings under `users:{uid}:tasks:{id}`, indexed by a
/// sorted set `users:{uid}:tasks` scored with a per-owner insert counter.
pub struct RedisRepo {
    client: Client,
}

impl RedisRepo {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn open(url: &str) -> Result<Self, RepoError> {
        Ok(Self::new(Client::open(url)?))
    }
}

fn index_key(owner: &UserId) -> String {
    format!("users:{owner}:tasks")
}

fn seq_key(owner: &UserId) -> String {
    format!("users:{owner}:tasks:seq")
}

fn doc_key(owner: &UserId, id: Uuid) -> String {
    format!("users:{owner}:tasks:{id}")
}

#[async_trait]
impl DocumentRepo for RedisRepo {
    async fn list(&self, owner: &UserId) -> Result<Vec<Document>, RepoError> {
        let mut conn = self.client.get_async_connection().await?;

        let ids: Vec<String> = conn.zrevrange(index_key(owner), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}:{id}", index_key(owner)))
            .collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        let mut docs = Vec::with_capacity(raw.len());
        for (key, json) in keys.iter().zip(raw) {
            let Some(json) = json else {
                warn!(%key, "index points at a missing document");
                continue;
            };
            match serde_json::from_str::<Document>(&json) {
                Ok(doc) => docs.push(doc),
                Err(err) => warn!(%key, error = %err, "skipping unreadable document"),
            }
        }
        newest_first(&mut docs);
        Ok(docs)
    }

    async fn get(&self, owner: &UserId, id: Uuid) -> Result<Option<Document>, RepoError> {
        let mut conn = self.client.get_async_connection().await?;
        let json: Option<String> = conn.get(doc_key(owner, id)).await?;
        Ok(json.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    async fn insert(&self, owner: &UserId, doc: &Document) -> Result<(), RepoError> {
        let json = serde_json::to_string(doc)?;
        let mut conn = self.client.get_async_connection().await?;

        let seq: i64 = conn.incr(seq_key(owner), 1).await?;
        redis::pipe()
            .atomic()
            .set(doc_key(owner, doc.id), json)
            .ignore()
            .zadd(index_key(owner), doc.id.to_string(), seq)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn patch(
        &self,
        owner: &UserId,
        id: Uuid,
        patch: Fields,
        now: DateTime<Utc>,
    ) -> Result<Option<Document>, RepoError> {
        let key = doc_key(owner, id);
        let swap = Script::new(LUA_SWAP);
        let mut conn = self.client.get_async_connection().await?;

        for attempt in 1..=MAX_PATCH_ATTEMPTS {
            let Some(before) = conn.get::<_, Option<String>>(&key).await? else {
                return Ok(None);
            };
            let mut doc: Document = serde_json::from_str(&before)?;
            apply_patch(&mut doc, patch.clone(), now);
            let after = serde_json::to_string(&doc)?;

            let outcome: i64 = swap
                .key(&key)
                .arg(&before)
                .arg(&after)
                .invoke_async(&mut conn)
                .await?;
            match outcome {
                1 => return Ok(Some(doc)),
                -1 => return Ok(None),
                _ => debug!(%key, attempt, "document changed during patch, retrying"),
            }
        }
        Err(RepoError::Contention { id })
    }

    async fn remove(&self, owner: &UserId, id: Uuid) -> Result<bool, RepoError> {
        let mut conn = self.client.get_async_connection().await?;
        let (deleted, _): (usize, usize) = redis::pipe()
            .atomic()
            .del(doc_key(owner, id))
            .zrem(index_key(owner), id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}

/// Process-local repo, for tests and running without Redis.
#[derive(Default)]
pub struct MemoryRepo {
    collections: Mutex<HashMap<UserId, Vec<Document>>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentRepo for MemoryRepo {
    async fn list(&self, owner: &UserId) -> Result<Vec<Document>, RepoError> {
        let mut docs: Vec<Document> = self
            .collections
            .lock()
            .get(owner)
            .map(|docs| docs.iter().rev().cloned().collect())
            .unwrap_or_default();
        newest_first(&mut docs);
        Ok(docs)
    }

    async fn get(&self, owner: &UserId, id: Uuid) -> Result<Option<Document>, RepoError> {
        Ok(self
            .collections
            .lock()
            .get(owner)
            .and_then(|docs| docs.iter().find(|doc| doc.id == id).cloned()))
    }

    async fn insert(&self, owner: &UserId, doc: &Document) -> Result<(), RepoError> {
        self.collections
            .lock()
            .entry(owner.clone())
            .or_default()
            .push(doc.clone());
        Ok(())
    }

    async fn patch(
        &self,
        owner: &UserId,
        id: Uuid,
        patch: Fields,
        now: DateTime<Utc>,
    ) -> Result<Option<Document>, RepoError> {
        let mut collections = self.collections.lock();
        let doc = collections
            .get_mut(owner)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id));
        Ok(doc.map(|doc| {
            apply_patch(doc, patch, now);
            doc.clone()
        }))
    }

    async fn remove(&self, owner: &UserId, id: Uuid) -> Result<bool, RepoError> {
        let mut collections = self.collections.lock();
        let Some(docs) = collections.get_mut(owner) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|doc| doc.id != id);
        Ok(docs.len() != before)
    }
}
