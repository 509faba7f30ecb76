use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

const QUEUE_KEY: &str = "meshgen:tasks";
const PROCESSING_KEY: &str = "meshgen:processing";

/// Task payload handed from the API to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub job_id: Uuid,
    pub prompt: String,
    pub input_keys: Vec<String>,
    pub output_key: String,
}

/// FIFO hand-off between submitters and workers.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a task to the tail. Fails with [`QueueError::Full`] when at capacity.
    async fn enqueue(&self, task: &QueuedTask) -> Result<(), QueueError>;

    /// Pop the head, waiting at most `wait` for one to arrive.
    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedTask>, QueueError>;

    /// Acknowledge a task once a worker is done with it.
    async fn complete(&self, task: &QueuedTask) -> Result<(), QueueError>;

    /// Number of pending tasks.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// In-process queue. Workers park on a [`Notify`] instead of polling.
pub struct MemoryQueue {
    tasks: Mutex<VecDeque<QueuedTask>>,
    available: Notify,
    capacity: Option<usize>,
}

impl MemoryQueue {
    /// `capacity` of `None` means unbounded.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            capacity,
        }
    }

    async fn pop(&self) -> Option<QueuedTask> {
        self.tasks.lock().await.pop_front()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: &QueuedTask) -> Result<(), QueueError> {
        {
            let mut tasks = self.tasks.lock().await;
            if let Some(capacity) = self.capacity {
                if tasks.len() >= capacity {
                    return Err(QueueError::Full(capacity));
                }
            }
            tasks.push_back(task.clone());
        }
        self.available.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedTask>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(task) = self.pop().await {
                return Ok(Some(task));
            }
            // notify_one stores a permit when nobody waits, so a push between
            // the pop above and this await is not lost.
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return Ok(self.pop().await);
            }
        }
    }

    async fn complete(&self, _task: &QueuedTask) -> Result<(), QueueError> {
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.tasks.lock().await.len() as u64)
    }
}

/// Redis-backed queue shared between the API and standalone workers.
///
/// Tasks are pushed on the left and popped from the right into a processing
/// list, which keeps them visible until acknowledged.
pub struct RedisQueue {
    client: redis::Client,
    capacity: Option<usize>,
    poll_interval: Duration,
}

impl RedisQueue {
    pub fn new(
        redis_url: &str,
        capacity: Option<usize>,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            capacity,
            poll_interval,
        })
    }

    async fn try_pop(&self) -> Result<Option<QueuedTask>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match result {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn enqueue(&self, task: &QueuedTask) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        if let Some(capacity) = self.capacity {
            // Check-then-push is not atomic; concurrent submitters may overshoot slightly.
            let depth: u64 = conn.llen(QUEUE_KEY).await?;
            if depth >= capacity as u64 {
                return Err(QueueError::Full(capacity));
            }
        }
        let payload = serde_json::to_string(task)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<QueuedTask>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(task) = self.try_pop().await? {
                return Ok(Some(task));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn complete(&self, task: &QueuedTask) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(task)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        Ok(())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is full ({0} pending tasks)")]
    Full(usize),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
