//! Job queue: submission hands job ids to workers through the broker.
//!
//! Workers take one job at a time (prefetch 1); a blocking pop with a
//! timeout lets the worker loop stay responsive to shutdown.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use talkdub_utils::error::KvError;

const QUEUE_KEY: &str = "talkdub:jobs:queue";

/// FIFO queue of job ids.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job id.
    async fn push(&self, job_id: &str) -> Result<(), KvError>;

    /// Dequeue one job id, blocking up to `timeout`. `None` on timeout.
    async fn pop(&self, timeout: Duration) -> Result<Option<String>, KvError>;

    /// Current queue length, for observability.
    async fn len(&self) -> Result<usize, KvError>;
}

/// Redis list-backed queue shared across worker processes.
#[derive(Clone)]
pub struct RedisQueue {
    manager: redis::aio::ConnectionManager,
}

impl RedisQueue {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client =
            redis::Client::open(url).map_err(|e| KvError::Connection(e.to_string()))?;
        let manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(Self { manager })
    }

    fn op_err(e: redis::RedisError) -> KvError {
        KvError::Operation(e.to_string())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn push(&self, job_id: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("LPUSH")
            .arg(QUEUE_KEY)
            .arg(job_id)
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        // BRPOP returns (key, value) or nil on timeout.
        let reply: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(QUEUE_KEY)
            .arg(timeout.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)?;
        Ok(reply.map(|(_, job_id)| job_id))
    }

    async fn len(&self) -> Result<usize, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("LLEN")
            .arg(QUEUE_KEY)
            .query_async(&mut conn)
            .await
            .map_err(Self::op_err)
    }
}

/// In-memory queue for tests and single-process runs.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    items: Arc<Mutex<VecDeque<String>>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn push(&self, job_id: &str) -> Result<(), KvError> {
        self.items.lock().await.push_back(job_id.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>, KvError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(item) = self.items.lock().await.pop_front() {
                return Ok(Some(item));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout_at(deadline, self.notify.notified()).await;
        }
    }

    async fn len(&self) -> Result<usize, KvError> {
        Ok(self.items.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_queue_fifo() {
        let queue = MemoryQueue::new();
        queue.push("a").await.unwrap();
        queue.push("b").await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(
            queue.pop(Duration::from_millis(10)).await.unwrap(),
            Some("a".to_string())
        );
        assert_eq!(
            queue.pop(Duration::from_millis(10)).await.unwrap(),
            Some("b".to_string())
        );
    }

    #[tokio::test]
    async fn test_memory_queue_pop_times_out_when_empty() {
        let queue = MemoryQueue::new();
        assert_eq!(queue.pop(Duration::from_millis(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_queue_wakes_blocked_pop() {
        let queue = MemoryQueue::new();
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("late").await.unwrap();

        assert_eq!(popper.await.unwrap(), Some("late".to_string()));
    }
}
