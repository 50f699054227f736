//! Key/value store contract and backends.
//!
//! The hub keeps its only durable notification state (error-locks), the
//! recipient directory and the intel backlog in a Redis-style store. The
//! engines consume nothing beyond hget/hset/rpush/ltrim.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>>;
    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<()>;
    async fn rpush(&self, list: &str, value: &str) -> Result<i64>;
    async fn ltrim(&self, list: &str, start: i64, stop: i64) -> Result<()>;
    async fn lrange(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>>;
}

/// Redis-backed store
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
    addr: String,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!("connected to redis at {}", url);
        Ok(Self {
            conn,
            addr: url.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(hash, field).await?)
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(hash, field, value).await?;
        Ok(())
    }

    async fn rpush(&self, list: &str, value: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.rpush(list, value).await?)
    }

    async fn ltrim(&self, list: &str, start: i64, stop: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.ltrim::<_, ()>(list, start as isize, stop as isize).await?;
        Ok(())
    }

    async fn lrange(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(list, start as isize, stop as isize).await?)
    }
}

/// In-memory store, used when no redis URL is configured and by tests.
/// State does not survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn clamp_range(len: i64, start: i64, stop: i64) -> (usize, usize) {
    let norm = |v: i64| if v < 0 { (len + v).max(0) } else { v.min(len) };
    let start = norm(start);
    let stop = norm(stop);
    if start > stop || len == 0 {
        (0, 0)
    } else {
        (start as usize, (stop + 1).min(len) as usize)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>> {
        let hashes = self.hashes.lock().await;
        Ok(hashes.get(hash).and_then(|h| h.get(field)).cloned())
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<()> {
        let mut hashes = self.hashes.lock().await;
        hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn rpush(&self, list: &str, value: &str) -> Result<i64> {
        let mut lists = self.lists.lock().await;
        let l = lists.entry(list.to_string()).or_default();
        l.push(value.to_string());
        Ok(l.len() as i64)
    }

    async fn ltrim(&self, list: &str, start: i64, stop: i64) -> Result<()> {
        let mut lists = self.lists.lock().await;
        if let Some(l) = lists.get_mut(list) {
            let (lo, hi) = clamp_range(l.len() as i64, start, stop);
            *l = l[lo..hi].to_vec();
        }
        Ok(())
    }

    async fn lrange(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let lists = self.lists.lock().await;
        Ok(lists
            .get(list)
            .map(|l| {
                let (lo, hi) = clamp_range(l.len() as i64, start, stop);
                l[lo..hi].to_vec()
            })
            .unwrap_or_default())
    }
}
