use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Delayed entries promoted per reserve call.
const PROMOTE_BATCH: isize = 100;

/// Dead-lettered entries kept per queue.
const FAILED_RETENTION: isize = 1000;

/// Moves due members of a delayed set (KEYS[1]) onto a ready list (KEYS[2])
/// in one step. ARGV: now in epoch millis, batch size.
static PROMOTE_DUE: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"
        local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
        for _, raw in ipairs(due) do
            redis.call('ZREM', KEYS[1], raw)
            redis.call('LPUSH', KEYS[2], raw)
        end
        return #due
        ",
    )
});

/// Wrapper stored on a queue around every payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub id: Uuid,
    pub queue: String,
    pub data: serde_json::Value,
    /// Deliveries that ended without an acknowledgement.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Envelope {
    fn new(queue: &str, data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            data,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// A reserved envelope, owned by one consumer until acked or failed.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: Envelope,
    pub consumer: String,
    raw: String,
}

/// Dead-letter entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEntry {
    pub envelope: Envelope,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Named work queues with optional delay and at-least-once delivery.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Push a payload, eligible for delivery after `delay` when given.
    async fn push(
        &self,
        queue: &str,
        data: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<Uuid, QueueError>;

    /// Take the next ready envelope for `consumer`, if any.
    async fn reserve(&self, queue: &str, consumer: &str) -> Result<Option<Delivery>, QueueError>;

    /// Finish a delivery successfully.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Finish a delivery as failed, moving it to the queue's dead-letter list.
    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError>;

    /// Return deliveries `consumer` reserved but never finished to the ready list.
    async fn recover(&self, queue: &str, consumer: &str) -> Result<usize, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

impl dyn QueueBroker {
    /// Serialize and push a typed payload.
    pub async fn enqueue<T: Serialize + Sync>(
        &self,
        queue: &str,
        payload: &T,
        delay: Option<Duration>,
    ) -> Result<Uuid, QueueError> {
        let data = serde_json::to_value(payload)?;
        self.push(queue, data, delay).await
    }
}

fn wait_key(queue: &str) -> String {
    format!("queue:{queue}:wait")
}

fn active_key(queue: &str, consumer: &str) -> String {
    format!("queue:{queue}:active:{consumer}")
}

fn delayed_key(queue: &str) -> String {
    format!("queue:{queue}:delayed")
}

fn failed_key(queue: &str) -> String {
    format!("queue:{queue}:failed")
}

/// Redis-backed broker: ready list, per-consumer active list, delayed sorted set.
pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Move delayed entries whose due time has passed onto the ready list.
    async fn promote_due(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        queue: &str,
    ) -> Result<(), QueueError> {
        let promoted: usize = PROMOTE_DUE
            .key(delayed_key(queue))
            .key(wait_key(queue))
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async(conn)
            .await?;

        if promoted > 0 {
            tracing::debug!(queue, promoted, "Promoted delayed jobs");
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBroker for RedisBroker {
    async fn push(
        &self,
        queue: &str,
        data: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<Uuid, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let envelope = Envelope::new(queue, data);
        let raw = serde_json::to_string(&envelope)?;

        match delay {
            Some(delay) if !delay.is_zero() => {
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                let due_ms = Utc::now().timestamp_millis().saturating_add(delay_ms);
                let _: () = conn.zadd(delayed_key(queue), &raw, due_ms).await?;
            }
            _ => {
                conn.lpush::<_, _, ()>(wait_key(queue), &raw).await?;
            }
        }

        tracing::debug!(queue, envelope_id = %envelope.id, ?delay, "Enqueued job");
        Ok(envelope.id)
    }

    async fn reserve(&self, queue: &str, consumer: &str) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.promote_due(&mut conn, queue).await?;

        let raw: Option<String> = conn
            .rpoplpush(wait_key(queue), active_key(queue, consumer))
            .await?;

        match raw {
            Some(raw) => {
                let envelope: Envelope = serde_json::from_str(&raw)?;
                Ok(Some(Delivery {
                    envelope,
                    consumer: consumer.to_string(),
                    raw,
                }))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lrem::<_, _, ()>(
            active_key(&delivery.envelope.queue, &delivery.consumer),
            1,
            &delivery.raw,
        )
        .await?;
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let queue = &delivery.envelope.queue;

        let mut envelope = delivery.envelope.clone();
        envelope.attempts += 1;
        let entry = FailedEntry {
            envelope,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        let entry = serde_json::to_string(&entry)?;

        conn.lrem::<_, _, ()>(active_key(queue, &delivery.consumer), 1, &delivery.raw)
            .await?;
        conn.lpush::<_, _, ()>(failed_key(queue), &entry).await?;
        let _: () = conn.ltrim(failed_key(queue), 0, FAILED_RETENTION - 1).await?;
        Ok(())
    }

    async fn recover(&self, queue: &str, consumer: &str) -> Result<usize, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut recovered = 0;

        loop {
            let raw: Option<String> = conn.rpop(active_key(queue, consumer), None).await?;
            let Some(raw) = raw else { break };

            let mut envelope: Envelope = serde_json::from_str(&raw)?;
            envelope.attempts += 1;
            // Right end of the ready list is served next.
            conn.rpush::<_, _, ()>(wait_key(queue), serde_json::to_string(&envelope)?)
                .await?;
            recovered += 1;
        }

        Ok(recovered)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryQueue {
    ready: VecDeque<Envelope>,
    delayed: Vec<(Instant, Envelope)>,
    active: HashMap<String, Vec<Envelope>>,
    failed: VecDeque<FailedEntry>,
}

impl MemoryQueue {
    fn promote_due(&mut self) {
        let now = Instant::now();
        let (due, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(ready_at, _)| *ready_at <= now);
        self.delayed = pending;
        self.ready.extend(due.into_iter().map(|(_, envelope)| envelope));
    }

    fn take_active(&mut self, consumer: &str, id: Uuid) -> Option<Envelope> {
        let active = self.active.get_mut(consumer)?;
        let idx = active.iter().position(|e| e.id == id)?;
        Some(active.remove(idx))
    }
}

/// In-process broker with the same delivery semantics as [`RedisBroker`].
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, MemoryQueue>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ready_len(&self, queue: &str) -> usize {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        state.promote_due();
        state.ready.len()
    }

    pub async fn active_len(&self, queue: &str) -> usize {
        let queues = self.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.active.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Delayed envelopes with the time left until each becomes deliverable.
    pub async fn delayed(&self, queue: &str) -> Vec<(Duration, Envelope)> {
        let now = Instant::now();
        let queues = self.queues.lock().await;
        queues
            .get(queue)
            .map(|q| {
                q.delayed
                    .iter()
                    .map(|(ready_at, e)| (ready_at.saturating_duration_since(now), e.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn failed(&self, queue: &str) -> Vec<FailedEntry> {
        let queues = self.queues.lock().await;
        queues
            .get(queue)
            .map(|q| q.failed.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueBroker for MemoryBroker {
    async fn push(
        &self,
        queue: &str,
        data: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<Uuid, QueueError> {
        let envelope = Envelope::new(queue, data);
        let id = envelope.id;
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();

        match delay {
            Some(delay) if !delay.is_zero() => state.delayed.push((Instant::now() + delay, envelope)),
            _ => state.ready.push_back(envelope),
        }
        Ok(id)
    }

    async fn reserve(&self, queue: &str, consumer: &str) -> Result<Option<Delivery>, QueueError> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        state.promote_due();

        let Some(envelope) = state.ready.pop_front() else {
            return Ok(None);
        };
        state
            .active
            .entry(consumer.to_string())
            .or_default()
            .push(envelope.clone());

        let raw = serde_json::to_string(&envelope)?;
        Ok(Some(Delivery {
            envelope,
            consumer: consumer.to_string(),
            raw,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(&delivery.envelope.queue) {
            state.take_active(&delivery.consumer, delivery.envelope.id);
        }
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(delivery.envelope.queue.clone()).or_default();
        let mut envelope = state
            .take_active(&delivery.consumer, delivery.envelope.id)
            .unwrap_or_else(|| delivery.envelope.clone());
        envelope.attempts += 1;

        // Newest first, trimmed like the Redis list.
        state.failed.push_front(FailedEntry {
            envelope,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        });
        state.failed.truncate(FAILED_RETENTION as usize);
        Ok(())
    }

    async fn recover(&self, queue: &str, consumer: &str) -> Result<usize, QueueError> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let leftovers = state.active.remove(consumer).unwrap_or_default();
        let recovered = leftovers.len();

        for mut envelope in leftovers.into_iter().rev() {
            envelope.attempts += 1;
            state.ready.push_front(envelope);
        }
        Ok(recovered)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
