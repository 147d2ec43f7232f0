use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::models::job::{JobRecord, JobStatus, StatusUpdate};

const STATUS_PREFIX: &str = "job:status:";
const CLEANUP_PREFIX: &str = "job:cleanup:";

/// Key-value service underneath the job store.
#[async_trait]
pub trait StatusBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write `value` under `key`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Write `value` only if `key` is absent. Returns whether the write happened.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Redis-backed status records (`SETEX job:status:<id>`).
pub struct RedisStatusBackend {
    client: redis::Client,
}

impl RedisStatusBackend {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StatusBackend for RedisStatusBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// In-process backend with per-entry expiry.
#[derive(Default)]
pub struct MemoryStatusBackend {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStatusBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that have not yet expired.
    pub async fn live_entries(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|(_, expires)| *expires > now).count()
    }
}

#[async_trait]
impl StatusBackend for MemoryStatusBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if matches!(entries.get(key), Some((_, expires)) if *expires > now) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Job id → status record, with TTL and partial-update merge.
#[derive(Clone)]
pub struct JobStore {
    backend: Arc<dyn StatusBackend>,
    ttl: Duration,
}

impl JobStore {
    pub fn new(backend: Arc<dyn StatusBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    fn key(id: &str) -> String {
        format!("{STATUS_PREFIX}{id}")
    }

    async fn write(&self, record: &JobRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        self.backend
            .set_ex(&Self::key(&record.id), &payload, self.ttl)
            .await
    }

    /// Overwrite the whole record and refresh its TTL.
    pub async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        result_location: Option<String>,
        error_message: Option<String>,
        command: Option<String>,
    ) -> Result<(), StoreError> {
        let record = JobRecord {
            id: id.to_string(),
            status,
            result_location,
            command,
            error_message,
        };
        // Route through the merge so the stored record keeps result and error exclusive.
        let record = StatusUpdate::default().merge(record);
        self.write(&record).await
    }

    /// `None` for unknown or expired ids.
    pub async fn get_status(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        match self.backend.get(&Self::key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read, merge `update` over the record (or a fresh `Pending` one), write back.
    ///
    /// Not atomic: a job has a single owning worker at a time.
    pub async fn update_status(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<JobRecord, StoreError> {
        let base = self
            .get_status(id)
            .await?
            .unwrap_or_else(|| JobRecord::pending(id));

        let merged = update.merge(base);
        self.write(&merged).await?;

        tracing::debug!(job_id = %id, status = %merged.status, "Job status updated");

        Ok(merged)
    }

    /// Claim the one cleanup a job may schedule. `false` if already claimed.
    ///
    /// The marker lives as long as a status record does.
    pub async fn claim_cleanup(&self, id: &str) -> Result<bool, StoreError> {
        let claimed = self
            .backend
            .set_nx_ex(&format!("{CLEANUP_PREFIX}{id}"), "1", self.ttl)
            .await?;
        if !claimed {
            tracing::debug!(job_id = %id, "Cleanup already scheduled");
        }
        Ok(claimed)
    }

    /// Give the claim back after scheduling failed, so a later download retries.
    pub async fn release_cleanup(&self, id: &str) -> Result<(), StoreError> {
        self.backend.del(&format!("{CLEANUP_PREFIX}{id}")).await
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.backend.ping().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
