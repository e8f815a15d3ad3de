use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::KeyValueStore;
use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};

const SCAN_BATCH: usize = 500;

#[derive(Clone)]
pub struct RedisKeyValueStore {
    redis: ConnectionManager,
}

impl RedisKeyValueStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.redis.clone();
        track_cache_operation("set", async {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("EX").arg(ttl_seconds(ttl));
            }
            cmd.query_async::<()>(&mut conn)
                .await
                .with_context(|| format!("Failed to SET {}", key))
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.redis.clone();
        track_cache_operation("set_nx", async {
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_seconds(ttl))
                .query_async(&mut conn)
                .await
                .with_context(|| format!("Failed to SET NX {}", key))?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(key)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("Failed to GET {}", key))
        })
        .await?;

        if value.is_some() {
            record_cache_hit();
        } else {
            record_cache_miss();
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        track_cache_operation("del", async {
            let removed: i64 = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("Failed to DEL {}", key))?;
            Ok(removed > 0)
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        track_cache_operation("exists", async {
            let found: i64 = redis::cmd("EXISTS")
                .arg(key)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("Failed to EXISTS {}", key))?;
            Ok(found > 0)
        })
        .await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.redis.clone();
        track_cache_operation("incr", async {
            redis::cmd("INCR")
                .arg(key)
                .query_async(&mut conn)
                .await
                .with_context(|| format!("Failed to INCR {}", key))
        })
        .await
    }

    async fn scan_count(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", prefix);
        track_cache_operation("scan", async {
            let mut cursor: u64 = 0;
            let mut count: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await
                    .with_context(|| format!("Failed to SCAN {}", pattern))?;
                count += keys.len() as u64;
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok(count)
        })
        .await
    }
}
