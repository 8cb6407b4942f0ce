use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

/// User-embedding cache contract: key -> (vector, stored-at) with lazy
/// eviction on read. Injected so the in-process map can be swapped for a
/// distributed cache without touching the embedding computation.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    async fn get(&self, user_id: Uuid) -> Option<Vec<f32>>;
    async fn put(&self, user_id: Uuid, vector: Vec<f32>);
}

/// Sharded in-process cache. Writers on one key never block readers of
/// another; a concurrent recompute race on the same key is acceptable
/// (at most stale by one recompute).
pub struct InMemoryEmbeddingCache {
    entries: DashMap<Uuid, (Vec<f32>, DateTime<Utc>)>,
    ttl: Duration,
}

impl InMemoryEmbeddingCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }
}

#[async_trait]
impl EmbeddingCache for InMemoryEmbeddingCache {
    async fn get(&self, user_id: Uuid) -> Option<Vec<f32>> {
        let expired = match self.entries.get(&user_id) {
            Some(entry) => {
                let (vector, stored_at) = entry.value();
                if Utc::now() - *stored_at < self.ttl {
                    return Some(vector.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            self.entries.remove(&user_id);
            debug!(user_id = %user_id, "Evicted expired user embedding");
        }
        None
    }

    async fn put(&self, user_id: Uuid, vector: Vec<f32>) {
        self.entries.insert(user_id, (vector, Utc::now()));
    }
}

/// Redis-backed cache with the same key -> vector shape; expiry is
/// delegated to Redis TTLs. Cache failures degrade to a recompute, never
/// to a request failure.
pub struct RedisEmbeddingCache {
    client: redis::Client,
    ttl_secs: u64,
}

const USER_EMBEDDING_KEY: &str = "user:embedding:";

impl RedisEmbeddingCache {
    pub fn new(client: redis::Client, ttl_secs: u64) -> Self {
        Self { client, ttl_secs }
    }

    fn key(user_id: Uuid) -> String {
        format!("{}{}", USER_EMBEDDING_KEY, user_id)
    }
}

#[async_trait]
impl EmbeddingCache for RedisEmbeddingCache {
    async fn get(&self, user_id: Uuid) -> Option<Vec<f32>> {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Embedding cache read failed, recomputing: {}", e);
                return None;
            }
        };

        let cached: Option<String> = conn.get(Self::key(user_id)).await.unwrap_or_default();
        cached.and_then(|json| serde_json::from_str(&json).ok())
    }

    async fn put(&self, user_id: Uuid, vector: Vec<f32>) {
        let mut conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Embedding cache write failed: {}", e);
                return;
            }
        };

        let json = match serde_json::to_string(&vector) {
            Ok(json) => json,
            Err(e) => {
                warn!("Embedding cache serialization failed: {}", e);
                return;
            }
        };

        let result: redis::RedisResult<()> = conn.set_ex(Self::key(user_id), json, self.ttl_secs).await;
        if let Err(e) = result {
            warn!("Embedding cache write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let cache = InMemoryEmbeddingCache::new(300);
        let user_id = Uuid::new_v4();

        assert!(cache.get(user_id).await.is_none());

        cache.put(user_id, vec![0.1, 0.2, 0.3]).await;
        assert_eq!(cache.get(user_id).await, Some(vec![0.1, 0.2, 0.3]));
    }

    #[tokio::test]
    async fn test_in_memory_lazy_eviction() {
        // Zero TTL: every entry is expired at the next read.
        let cache = InMemoryEmbeddingCache::new(0);
        let user_id = Uuid::new_v4();

        cache.put(user_id, vec![1.0]).await;
        assert!(cache.get(user_id).await.is_none());
    }
}
