//! Durable key/value store backing upload progress, gallery counters, and
//! the gradient job queue. None of the teacher's package-repository
//! functionality needs a store like this — it keeps everything on local
//! disk — so this is a fresh module, but it follows the same discipline as
//! the rest of the adapters here: every operation is fallible, every
//! failure is wrapped as `Error::Transport`, and nothing panics on a
//! disconnected backend.

use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;

/// The durable primitives the rest of the crate needs from a KV store:
/// strings with optional TTL, lists used as queues, and sorted sets used
/// for the delayed-job schedule. Kept narrow on purpose — callers reach
/// for `MetaStore`, not `redis::Client`, so the backend stays swappable.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()>;
    /// Atomically add `delta` to the integer stored at `key` (treating a
    /// missing key as 0), returning the new value. Used for gallery item
    /// counters.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Push onto the tail of a list (queue producer side).
    async fn list_push(&self, key: &str, value: &str) -> Result<()>;
    /// Atomically move the head of `src` onto the tail of `dst`, returning
    /// the moved element if the source was non-empty. Used to move a job
    /// from the ready queue into a per-worker processing list so an orphan
    /// can be recovered if the worker crashes mid-job.
    async fn list_move_head(&self, src: &str, dst: &str) -> Result<Option<String>>;
    async fn list_remove(&self, key: &str, value: &str) -> Result<()>;
    async fn list_all(&self, key: &str) -> Result<Vec<String>>;

    /// Add `member` to a sorted set with `score` (used as a ready-at unix
    /// timestamp for delayed jobs).
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    /// Pop every member scored at or below `max_score`, atomically.
    async fn zpop_ready(&self, key: &str, max_score: f64) -> Result<Vec<String>>;
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;

    /// Move every member of `zset_key` scored at or below `max_score` onto
    /// the tail of `list_key`, removing them from the sorted set in the
    /// same transaction so a crash mid-promotion neither drops nor
    /// duplicates a delayed job.
    async fn promote_ready(&self, zset_key: &str, list_key: &str, max_score: f64) -> Result<Vec<String>>;
}

pub struct RedisMetaStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisMetaStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::transport(format!("invalid redis url: {e}")))?;

        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::transport(format!("redis connection failed: {e}")))?;

        Ok(Self { manager })
    }
}

#[async_trait]
impl MetaStore for RedisMetaStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| Error::transport(format!("redis GET {key} failed: {e}")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set(key, value)
            .await
            .map_err(|e| Error::transport(format!("redis SET {key} failed: {e}")))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl_secs)
            .await
            .map_err(|e| Error::transport(format!("redis SETEX {key} failed: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del(key)
            .await
            .map_err(|e| Error::transport(format!("redis DEL {key} failed: {e}")))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.expire(key, ttl_secs as i64)
            .await
            .map_err(|e| Error::transport(format!("redis EXPIRE {key} failed: {e}")))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.manager.clone();
        conn.incr(key, delta)
            .await
            .map_err(|e| Error::transport(format!("redis INCRBY {key} failed: {e}")))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.manager.clone();
        conn.hgetall(key)
            .await
            .map_err(|e| Error::transport(format!("redis HGETALL {key} failed: {e}")))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hset(key, field, value)
            .await
            .map_err(|e| Error::transport(format!("redis HSET {key} failed: {e}")))
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.rpush(key, value)
            .await
            .map_err(|e| Error::transport(format!("redis RPUSH {key} failed: {e}")))
    }

    async fn list_move_head(&self, src: &str, dst: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.lmove(src, dst, redis::Direction::Left, redis::Direction::Right)
            .await
            .map_err(|e| Error::transport(format!("redis LMOVE {src}->{dst} failed: {e}")))
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .lrem(key, 0, value)
            .await
            .map_err(|e| Error::transport(format!("redis LREM {key} failed: {e}")))?;
        Ok(())
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.lrange(key, 0, -1)
            .await
            .map_err(|e| Error::transport(format!("redis LRANGE {key} failed: {e}")))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zadd(key, member, score)
            .await
            .map_err(|e| Error::transport(format!("redis ZADD {key} failed: {e}")))
    }

    async fn zpop_ready(&self, key: &str, max_score: f64) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();

        let ready: Vec<String> = conn
            .zrangebyscore(key, f64::NEG_INFINITY, max_score)
            .await
            .map_err(|e| Error::transport(format!("redis ZRANGEBYSCORE {key} failed: {e}")))?;

        if ready.is_empty() {
            return Ok(ready);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for member in &ready {
            pipe.zrem(key, member).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::transport(format!("redis pipelined ZREM {key} failed: {e}")))?;

        Ok(ready)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zrem(key, member)
            .await
            .map_err(|e| Error::transport(format!("redis ZREM {key} failed: {e}")))
    }

    async fn promote_ready(&self, zset_key: &str, list_key: &str, max_score: f64) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();

        let ready: Vec<String> = conn
            .zrangebyscore(zset_key, f64::NEG_INFINITY, max_score)
            .await
            .map_err(|e| Error::transport(format!("redis ZRANGEBYSCORE {zset_key} failed: {e}")))?;

        if ready.is_empty() {
            return Ok(ready);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for member in &ready {
            pipe.zrem(zset_key, member).ignore();
            pipe.rpush(list_key, member).ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::transport(format!("redis promote transaction failed: {e}")))?;

        Ok(ready)
    }
}

/// In-memory `MetaStore` used by unit and integration tests so they don't
/// need a live Redis instance.
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeMetaStore {
        strings: Mutex<HashMap<String, String>>,
        hashes: Mutex<HashMap<String, HashMap<String, String>>>,
        lists: Mutex<HashMap<String, Vec<String>>>,
        zsets: Mutex<HashMap<String, Vec<(String, f64)>>>,
    }

    #[async_trait]
    impl MetaStore for FakeMetaStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.strings.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            self.strings
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn set_ex(&self, key: &str, value: &str, _ttl_secs: u64) -> Result<()> {
            self.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.strings.lock().unwrap().remove(key);
            Ok(())
        }

        async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<()> {
            Ok(())
        }

        async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
            let mut strings = self.strings.lock().unwrap();
            let current: i64 = strings
                .get(key)
                .map(|v| v.parse().unwrap_or(0))
                .unwrap_or(0);
            let next = current + delta;
            strings.insert(key.to_string(), next.to_string());
            Ok(next)
        }

        async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
            Ok(self.hashes.lock().unwrap().get(key).cloned().unwrap_or_default())
        }

        async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
            self.hashes
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
            Ok(())
        }

        async fn list_push(&self, key: &str, value: &str) -> Result<()> {
            self.lists
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
            Ok(())
        }

        async fn list_move_head(&self, src: &str, dst: &str) -> Result<Option<String>> {
            let mut lists = self.lists.lock().unwrap();
            let moved = lists.get_mut(src).filter(|l| !l.is_empty()).map(|l| l.remove(0));
            if let Some(value) = &moved {
                lists.entry(dst.to_string()).or_default().push(value.clone());
            }
            Ok(moved)
        }

        async fn list_remove(&self, key: &str, value: &str) -> Result<()> {
            if let Some(list) = self.lists.lock().unwrap().get_mut(key) {
                list.retain(|v| v != value);
            }
            Ok(())
        }

        async fn list_all(&self, key: &str) -> Result<Vec<String>> {
            Ok(self.lists.lock().unwrap().get(key).cloned().unwrap_or_default())
        }

        async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
            let mut zsets = self.zsets.lock().unwrap();
            let set = zsets.entry(key.to_string()).or_default();
            set.retain(|(m, _)| m != member);
            set.push((member.to_string(), score));
            Ok(())
        }

        async fn zpop_ready(&self, key: &str, max_score: f64) -> Result<Vec<String>> {
            let mut zsets = self.zsets.lock().unwrap();
            let Some(set) = zsets.get_mut(key) else {
                return Ok(Vec::new());
            };
            let (ready, rest): (Vec<_>, Vec<_>) = set.drain(..).partition(|(_, score)| *score <= max_score);
            *set = rest;
            Ok(ready.into_iter().map(|(m, _)| m).collect())
        }

        async fn zrem(&self, key: &str, member: &str) -> Result<()> {
            if let Some(set) = self.zsets.lock().unwrap().get_mut(key) {
                set.retain(|(m, _)| m != member);
            }
            Ok(())
        }

        async fn promote_ready(&self, zset_key: &str, list_key: &str, max_score: f64) -> Result<Vec<String>> {
            let ready = self.zpop_ready(zset_key, max_score).await?;
            for member in &ready {
                self.list_push(list_key, member).await?;
            }
            Ok(ready)
        }
    }

    #[tokio::test]
    async fn list_move_head_transfers_single_element() {
        let store = FakeMetaStore::default();
        store.list_push("src", "a").await.unwrap();
        store.list_push("src", "b").await.unwrap();

        let moved = store.list_move_head("src", "dst").await.unwrap();
        assert_eq!(moved, Some("a".to_string()));
        assert_eq!(store.list_all("src").await.unwrap(), vec!["b"]);
        assert_eq!(store.list_all("dst").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn zpop_ready_only_returns_due_members() {
        let store = FakeMetaStore::default();
        store.zadd("delayed", "job-1", 100.0).await.unwrap();
        store.zadd("delayed", "job-2", 200.0).await.unwrap();

        let ready = store.zpop_ready("delayed", 150.0).await.unwrap();
        assert_eq!(ready, vec!["job-1"]);

        let remaining = store.zpop_ready("delayed", 250.0).await.unwrap();
        assert_eq!(remaining, vec!["job-2"]);
    }
}
